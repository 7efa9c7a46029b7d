#![deny(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod params;
pub mod pool;
pub mod version;

pub use params::ConnectionParams;
pub use pool::{PoolError, SlotPool};
pub use version::ServerVersion;
