pub mod physics;
pub mod reactor;
pub mod results;
pub mod storage;
pub mod window;

pub use physics::*;
pub use reactor::*;
pub use results::*;
pub use storage::*;
pub use window::*;
