pub mod backend;
pub mod cli;
pub mod config;
pub mod driver;
pub mod orchestrator;
pub mod registry;
pub mod source;

pub use crmsync_common::locator;
pub use crmsync_common::record;
