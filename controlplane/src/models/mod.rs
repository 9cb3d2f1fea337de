//! Domain models

pub mod account;
pub mod container;
pub mod deployment;
pub mod repository;
