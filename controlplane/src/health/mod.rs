pub mod monitor;
pub mod probe;
pub mod status;
