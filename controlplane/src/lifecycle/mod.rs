//! Container lifecycle

pub mod fsm;
