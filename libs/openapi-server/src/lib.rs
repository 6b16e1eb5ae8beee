//! Wire models shared by the arrstack orchestrator and its clients.

pub mod models;

pub use models::*;
