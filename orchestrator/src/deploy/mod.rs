//! Default collaborators: compose rendering, docker deployment, service
//! configuration and health probing

pub mod compose;
pub mod configure;
pub mod health;

pub use compose::{ComposeDeployer, ComposeRenderer};
pub use configure::HttpServiceConfigurator;
pub use health::HttpHealthProbe;
