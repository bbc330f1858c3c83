mod fixed;
mod interface;
mod local;
mod lock;

pub use fixed::*;
pub use interface::*;
pub use local::*;
pub use lock::*;
