pub mod env;
pub mod executor;
pub mod phases;
pub mod trigger;
