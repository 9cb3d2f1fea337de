pub mod health_sweep;
pub mod reconciler;
