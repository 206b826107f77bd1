//! # launchpad-process
//!
//! **Purpose**: Operating-system process plumbing for the Launchpad supervisor
//!
//! ## Features
//!
//! - **Executable Resolution**: `PATH` lookup with fallbacks to Homebrew, SDK,
//!   user-local and version-manager install locations (newest version first)
//! - **Process Search**: Find processes rooted in a working directory (`lsof`)
//!   or matching a command substring (`ps`)
//! - **Signalling**: Graceful/forced termination and liveness checks by pid,
//!   interrupt/kill of whole process groups
//! - **Managed Children**: Spawn children as process-group leaders with piped
//!   output so a stop reaches every descendant
//!
//! ## Usage
//!
//! ```rust,no_run
//! use launchpad_process::{resolve, ManagedChild, ProcessConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let npm = resolve("npm")?;
//! let config = ProcessConfig::new(npm)
//!     .args(["run", "dev"])
//!     .working_dir("/srv/web");
//!
//! let mut child = ManagedChild::spawn(&config)?;
//! child.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod resolver;
pub mod search;
pub mod signal;

pub use child::ManagedChild;
pub use config::ProcessConfig;
pub use error::{ProcessError, Result};
pub use resolver::{resolve, ExecutableResolver};
pub use search::{ProcessInfo, ProcessSearch, SystemProcessSearch};
pub use signal::{process_is_alive, signal_group, GroupSignal, OsSignaller, Signaller};
