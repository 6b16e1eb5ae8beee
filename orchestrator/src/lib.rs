//! arrstack orchestrator library
//!
//! Validation, change-impact analysis and the apply pipeline for a
//! self-hosted media stack.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod impact;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod runs;
pub mod server;
pub mod storage;
pub mod utils;
pub mod validation;
