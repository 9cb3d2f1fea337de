pub mod service;
pub mod signature;
