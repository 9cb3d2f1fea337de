//! Berth control plane library
//!
//! Builds source repositories into images, rolls them out on the
//! orchestration backend and watches the resulting containers.

pub mod app;
pub mod backends;
pub mod build;
pub mod containers;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod logs;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod version;
pub mod webhook;
pub mod workers;
