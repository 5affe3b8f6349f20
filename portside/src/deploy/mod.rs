//! Deployment engine: process control, health checks, orchestration

pub mod fsm;
pub mod gc;
pub mod health;
pub mod journal;
pub mod orchestrator;
pub mod process;
