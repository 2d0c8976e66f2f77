use std::{io, path::PathBuf};

use thiserror::Error;

/// Reasons a descriptor cannot be turned into a runnable job.
/// All of them end up as a failed terminal record, none escape the poll loop.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("malformed job descriptor: {reason}\n--- original content ---\n{content}")]
    Malformed { reason: String, content: String },

    #[error("No command found in job file")]
    MissingCommand,

    #[error("invalid args: expected an array of strings")]
    InvalidArgs,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode terminal record: {0}")]
    Encode(String),

    #[error("result file path escapes the queue root: {0}")]
    UnsafeResultPath(String),

    #[error("failed to install logging: {0}")]
    Logging(String),
}

impl QueueError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
