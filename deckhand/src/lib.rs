//! Deckhand
//!
//! Stage-aware deployment orchestrator: resolves a stage to its promotion
//! branch, fans task commands out over the target hosts, and reports how far
//! each run got.

pub mod check;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod models;
pub mod remote;
pub mod scaffold;
