//! Wire models shared between the Berth control plane and its clients

pub mod events;
pub mod requests;
pub mod webhook;
