pub mod config;
pub mod config_loader;
pub mod error;
pub mod package_manager;
pub mod retry;
pub mod state_machine;
pub mod traits;

pub use config::*;
pub use config_loader::{ConfigLoadOptions, ConfigLoader, ConfigOverrides};
pub use error::*;
pub use package_manager::{CommandSpec, Operation, PackageManager};
pub use retry::*;
pub use state_machine::{PublishStage, PublishStateMachine};
pub use traits::*;
