//! File-system backed command queue.
//!
//! Producers drop job descriptors into `<root>/pending`. A single
//! [`QueueProcessor`] claims them one at a time in name order, runs the
//! command and moves the descriptor, with the outcome attached, into
//! `<root>/completed` or `<root>/failed`.
//!
//! ```rust,no_run
//! use cmdq_lib::{install_signal_handler, QueueConfig, QueueProcessor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut processor = QueueProcessor::new(QueueConfig::new("/var/lib/cmdq"));
//!     install_signal_handler(processor.shutdown_handle())?;
//!     processor.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod layout;
pub mod logging;
pub mod processor;
pub mod shutdown;
pub mod slot;
mod util;
pub mod writer;

pub use cmdq_data::{FreeformRecord, JobResult, JobStatus};
pub use config::{PollConfig, QueueConfig};
pub use error::{DescriptorError, QueueError};
pub use processor::{LoopState, Outcome, QueueProcessor, Tick};
pub use shutdown::{install_signal_handler, ShutdownHandle};
