//! Deployment orchestration

pub mod context;
pub mod fsm;
pub mod pipeline;
pub mod roles;
pub mod run;
pub mod stage;
pub mod task;
pub mod template;
