//! Rolling-horizon unit commitment for reactor fleets whose capacity and
//! restart limits depend on core reactivity.

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod optimizer;
pub mod telemetry;

pub use error::CommitmentError;
