//! Root of the `socker-core` library.

// All user-visible output goes through the CLI or the tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cgroup;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod epilog;
pub mod error;
pub mod exec;
pub mod identity;
pub mod images;
pub mod launcher;
pub mod monitor;
pub mod mounts;
pub mod process_tree;
pub mod run_request;
pub mod session;
pub mod swap;
pub mod test_support;

pub use config::ConfigOverrides;
pub use config::SockerConfig;
pub use error::Result;
pub use error::SockerErr;
pub use identity::ContainerIdentity;
pub use launcher::RunFailure;
pub use launcher::RunOutcome;
pub use launcher::Socker;
pub use monitor::MonitorHandle;
pub use monitor::MonitorReport;
pub use monitor::MonitorState;
pub use monitor::START_TIMEOUT;
pub use session::Session;
