//! Persistent storage

pub mod baseline;
pub mod layout;
pub mod settings;

pub use baseline::BaselineStore;
pub use layout::StorageLayout;
pub use settings::Settings;
