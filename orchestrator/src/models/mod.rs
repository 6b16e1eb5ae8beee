//! Domain models

pub mod config;
