pub mod builds;
pub mod client;
pub mod metrics;
pub mod orchestration;
pub mod source_control;
