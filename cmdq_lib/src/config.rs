use std::{path::PathBuf, time::Duration};

/// Fixed default from the queue contract: five minutes per job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Sleep intervals of the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// pending directory has no entries at all
    pub empty_backoff: Duration,
    /// entries exist but none is an eligible job file
    pub idle_backoff: Duration,
    /// an iteration failed, e.g. pending could not be listed
    pub error_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            empty_backoff: Duration::from_secs(2),
            idle_backoff: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    /// Same backoff for every case, handy for tests.
    pub fn uniform(backoff: Duration) -> Self {
        Self {
            empty_backoff: backoff,
            idle_backoff: backoff,
            error_backoff: backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub root: PathBuf,
    pub job_timeout: Duration,
    /// upper bound on collecting remaining output once the child is gone
    pub output_grace: Duration,
    pub poll: PollConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("command_queue"),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            output_grace: Duration::from_secs(2),
            poll: PollConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_output_grace(mut self, grace: Duration) -> Self {
        self.output_grace = grace;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queue_config_default() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.root, PathBuf::from("command_queue"));
        assert_eq!(cfg.job_timeout, Duration::from_secs(300));
        assert_eq!(cfg.poll.empty_backoff, Duration::from_secs(2));
        assert_eq!(cfg.poll.idle_backoff, Duration::from_secs(1));
        assert_eq!(cfg.poll.error_backoff, Duration::from_secs(5));
    }

    #[test]
    fn queue_config_builders() {
        let cfg = QueueConfig::new("/tmp/q")
            .with_job_timeout(Duration::from_secs(5))
            .with_poll(PollConfig::uniform(Duration::from_millis(10)));
        assert_eq!(cfg.root, PathBuf::from("/tmp/q"));
        assert_eq!(cfg.job_timeout, Duration::from_secs(5));
        assert_eq!(cfg.poll.error_backoff, Duration::from_millis(10));
    }
}
