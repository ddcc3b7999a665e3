pub mod enablement;
pub mod pool;
pub mod protocol;
pub mod transport;
