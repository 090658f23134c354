pub mod factory;
mod traits;

pub use factory::{build_broker, build_broker_for, Broker};
pub use traits::*;
