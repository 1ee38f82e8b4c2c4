//! Commitment solver back-ends
//!
//! - DP: dynamic programming over unit modes, see [`super::dp`]
//! - MILP: mixed-integer linear programming with CBC

pub mod milp;

pub use milp::*;
