use std::{
    collections::HashSet,
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use cmdq_data::{JobResult, JobStatus};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::QueueConfig,
    descriptor::{
        decode_document, parse_freeform, JobDescriptor, JobFormat, StructuredJob, Syntax,
    },
    error::{QueueError, Result},
    executor::CommandExecutor,
    layout::QueueLayout,
    shutdown::ShutdownHandle,
    slot::ProcessSlot,
    writer::ResultWriter,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Selecting,
    Executing,
    ShuttingDown,
}

/// What happened to a claimed descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// terminal record written, source removed
    Committed { path: PathBuf, status: JobStatus },
    /// no record could be written, the descriptor was moved to `failed/` as-is
    Quarantined(PathBuf),
    /// even the move failed; the file stays in pending and is not retried
    /// until it disappears from there
    Stranded,
}

/// Result of one loop iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    Processed { name: String, outcome: Outcome },
    /// pending has no entries at all
    Empty,
    /// entries exist but none of them can be run
    NothingEligible,
    Stopped,
}

/// The single worker draining `pending/`.
pub struct QueueProcessor {
    config: QueueConfig,
    writer: ResultWriter,
    executor: CommandExecutor,
    token: CancellationToken,
    slot: ProcessSlot,
    state: LoopState,
    warned: HashSet<PathBuf>,
    stranded: HashSet<PathBuf>,
}

impl QueueProcessor {
    pub fn new(config: QueueConfig) -> Self {
        let slot = ProcessSlot::new();
        let executor =
            CommandExecutor::new(config.job_timeout, config.output_grace, slot.clone());
        let writer = ResultWriter::new(QueueLayout::new(&config.root));
        Self {
            config,
            writer,
            executor,
            token: CancellationToken::new(),
            slot,
            state: LoopState::Idle,
            warned: HashSet::new(),
            stranded: HashSet::new(),
        }
    }

    pub fn layout(&self) -> &QueueLayout {
        self.writer.layout()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.token.clone(), self.slot.clone())
    }

    /// Poll until a stop is requested. Only fails if the queue directories
    /// cannot be created; errors inside an iteration are logged and retried.
    pub async fn run(&mut self) -> Result<()> {
        self.layout().ensure_dirs()?;
        info!(
            pending = %self.layout().pending().display(),
            timeout_secs = self.config.job_timeout.as_secs(),
            "Queue processor started"
        );

        while !self.token.is_cancelled() {
            let backoff = match self.run_once().await {
                Ok(Tick::Processed { .. }) | Ok(Tick::Stopped) => None,
                Ok(Tick::Empty) => Some(self.config.poll.empty_backoff),
                Ok(Tick::NothingEligible) => Some(self.config.poll.idle_backoff),
                Err(err) => {
                    error!("Error in main loop: {}", err);
                    Some(self.config.poll.error_backoff)
                }
            };
            self.transition(LoopState::Idle);
            if let Some(backoff) = backoff {
                self.backoff(backoff).await;
            }
        }

        self.transition(LoopState::ShuttingDown);
        info!("Queue processor stopped");
        Ok(())
    }

    /// One iteration: list pending, claim the first eligible file by name and
    /// drive it to a terminal outcome.
    pub async fn run_once(&mut self) -> Result<Tick> {
        self.transition(LoopState::Selecting);
        let (entry_count, files) = self.list_pending().await?;
        if entry_count == 0 {
            return Ok(Tick::Empty);
        }
        if self.token.is_cancelled() {
            return Ok(Tick::Stopped);
        }
        let descriptor = match self.claim(files) {
            Some(descriptor) => descriptor,
            None => return Ok(Tick::NothingEligible),
        };

        self.transition(LoopState::Executing);
        let name = descriptor.name.clone();
        let outcome = self.process(&descriptor).await;
        if outcome == Outcome::Stranded {
            self.stranded.insert(descriptor.path.clone());
        }
        Ok(Tick::Processed { name, outcome })
    }

    /// Regular files of pending sorted by name, plus the number of entries of
    /// any kind.
    async fn list_pending(&self) -> Result<(usize, Vec<PathBuf>)> {
        let pending = self.layout().pending();
        let mut entries = tokio::fs::read_dir(pending)
            .await
            .map_err(|e| QueueError::io(pending, e))?;

        let mut entry_count = 0;
        let mut files: Vec<(OsString, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| QueueError::io(pending, e))?
        {
            entry_count += 1;
            let path = entry.path();
            // follows symlinks; entries that vanish in between are skipped
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => files.push((entry.file_name(), path)),
                _ => {}
            }
        }
        files.sort();
        Ok((entry_count, files.into_iter().map(|(_, path)| path).collect()))
    }

    fn claim(&mut self, files: Vec<PathBuf>) -> Option<JobDescriptor> {
        let present: HashSet<&PathBuf> = files.iter().collect();
        self.warned.retain(|path| present.contains(path));
        self.stranded.retain(|path| present.contains(path));

        for path in &files {
            if self.stranded.contains(path) {
                continue;
            }
            match JobDescriptor::from_path(path) {
                Some(descriptor) => return Some(descriptor),
                None => {
                    if self.warned.insert(path.clone()) {
                        warn!("Unknown job format: {}", display_name(path));
                    }
                }
            }
        }
        None
    }

    async fn process(&self, descriptor: &JobDescriptor) -> Outcome {
        let committed = match descriptor.format {
            JobFormat::Structured(syntax) => self.process_structured(descriptor, syntax).await,
            JobFormat::Freeform => self.process_freeform(descriptor).await,
        };
        match committed {
            Ok((path, result)) => {
                report(descriptor, &result);
                Outcome::Committed {
                    path,
                    status: result.status,
                }
            }
            Err(err) => self.fallback(descriptor, err),
        }
    }

    async fn process_structured(
        &self,
        descriptor: &JobDescriptor,
        syntax: Syntax,
    ) -> Result<(PathBuf, JobResult)> {
        info!(job = %descriptor.name, "Processing structured job");
        let raw = read_descriptor(&descriptor.path).await?;
        let raw = String::from_utf8(raw)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());

        let document = match decode_document(&raw, syntax) {
            Ok(document) => document,
            Err(err) => {
                let result = JobResult::failed(err.to_string());
                let path = self.writer.commit_malformed(descriptor, syntax, &result)?;
                return Ok((path, result));
            }
        };

        let job = match StructuredJob::from_document(document) {
            Ok(job) => job,
            Err((document, err)) => {
                let result = JobResult::failed(err.to_string());
                let path = self
                    .writer
                    .commit_structured(descriptor, syntax, document, &result)?;
                return Ok((path, result));
            }
        };

        info!(job = %descriptor.name, "Executing: {}", job.command);
        let result = self.executor.execute(&job.command).await;
        if let Err(err) = self.writer.write_result_file(&job, &result) {
            error!(job = %descriptor.name, "could not save result file: {}", err);
        }
        let path = self
            .writer
            .commit_structured(descriptor, syntax, job.document, &result)?;
        Ok((path, result))
    }

    async fn process_freeform(&self, descriptor: &JobDescriptor) -> Result<(PathBuf, JobResult)> {
        info!(job = %descriptor.name, "Processing text job");
        let raw = read_descriptor(&descriptor.path).await?;
        let (command, result) = match String::from_utf8(raw) {
            Ok(raw) => {
                let command = parse_freeform(&raw);
                info!(job = %descriptor.name, "Executing: {}", command);
                let result = self.executor.execute(&command).await;
                (command.to_string(), result)
            }
            Err(err) => (
                "unknown".to_string(),
                JobResult::failed(format!("job file is not valid UTF-8: {}", err)),
            ),
        };
        let path = self.writer.commit_freeform(descriptor, &command, &result)?;
        Ok((path, result))
    }

    fn fallback(&self, descriptor: &JobDescriptor, err: QueueError) -> Outcome {
        error!(job = %descriptor.name, "Error processing {}: {}", descriptor.name, err);
        match self.writer.quarantine(descriptor) {
            Ok(path) => {
                warn!(
                    job = %descriptor.name,
                    "moved to {} without a result record",
                    path.display()
                );
                Outcome::Quarantined(path)
            }
            Err(move_err) => {
                error!(
                    job = %descriptor.name,
                    "could not move descriptor to failed, leaving it in pending: {}", move_err
                );
                Outcome::Stranded
            }
        }
    }

    async fn backoff(&self, duration: Duration) {
        tokio::select! {
            _ = sleep(duration) => {}
            _ = self.token.cancelled() => {}
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "loop state");
            self.state = next;
        }
    }
}

fn report(descriptor: &JobDescriptor, result: &JobResult) {
    match (&result.status, &result.error) {
        (JobStatus::Completed, _) => {
            info!(job = %descriptor.name, status = %result.status, "Job {} completed", descriptor.name)
        }
        (JobStatus::Failed, Some(error)) => error!(
            job = %descriptor.name,
            status = %result.status,
            "Job {} failed: {}",
            descriptor.name,
            error
        ),
        (JobStatus::Failed, None) => info!(
            job = %descriptor.name,
            status = %result.status,
            returncode = ?result.returncode,
            "Job {} failed",
            descriptor.name
        ),
    }
}

async fn read_descriptor(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| QueueError::io(path, e))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod test {
    use std::{fs, time::Duration};

    use lazy_static::lazy_static;
    use tokio::runtime::Runtime;

    use super::{LoopState, Outcome, QueueProcessor, Tick};
    use crate::config::{PollConfig, QueueConfig};

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }

    fn setup() -> (tempfile::TempDir, QueueProcessor) {
        let tmp = tempfile::tempdir().unwrap();
        let config = QueueConfig::new(tmp.path())
            .with_job_timeout(Duration::from_secs(10))
            .with_poll(PollConfig::uniform(Duration::from_millis(20)));
        let processor = QueueProcessor::new(config);
        processor.layout().ensure_dirs().unwrap();
        (tmp, processor)
    }

    #[test]
    fn test_empty_pending() {
        let (_tmp, mut processor) = setup();
        RUNTIME.block_on(async {
            assert_eq!(Tick::Empty, processor.run_once().await.unwrap());
        });
    }

    #[test]
    fn test_subdirectories_are_not_jobs() {
        let (_tmp, mut processor) = setup();
        fs::create_dir(processor.layout().pending().join("nested.json")).unwrap();
        RUNTIME.block_on(async {
            assert_eq!(Tick::NothingEligible, processor.run_once().await.unwrap());
        });
    }

    #[test]
    fn test_jobs_are_claimed_in_name_order() {
        let (_tmp, mut processor) = setup();
        let pending = processor.layout().pending().to_path_buf();
        fs::write(pending.join("b.txt"), "true").unwrap();
        fs::write(pending.join("a.txt"), "true").unwrap();
        fs::write(pending.join("c.txt"), "true").unwrap();
        RUNTIME.block_on(async {
            for expected in ["a.txt", "b.txt", "c.txt"] {
                match processor.run_once().await.unwrap() {
                    Tick::Processed { name, .. } => assert_eq!(expected, name),
                    other => panic!("expected a processed job, got {:?}", other),
                }
            }
            assert_eq!(Tick::Empty, processor.run_once().await.unwrap());
        });
    }

    // an unknown file sorting first must not block the jobs behind it
    #[test]
    fn test_unsupported_file_does_not_block_queue() {
        let (_tmp, mut processor) = setup();
        let pending = processor.layout().pending().to_path_buf();
        fs::write(pending.join("0-notes.md"), "# notes").unwrap();
        fs::write(pending.join("1-job.sh"), "echo ok").unwrap();
        RUNTIME.block_on(async {
            match processor.run_once().await.unwrap() {
                Tick::Processed { name, outcome } => {
                    assert_eq!("1-job.sh", name);
                    assert!(matches!(outcome, Outcome::Committed { .. }));
                }
                other => panic!("expected a processed job, got {:?}", other),
            }
            assert_eq!(Tick::NothingEligible, processor.run_once().await.unwrap());
            assert_eq!(Tick::NothingEligible, processor.run_once().await.unwrap());
        });
        assert!(pending.join("0-notes.md").exists());
    }

    #[test]
    fn test_stop_before_claim() {
        let (_tmp, mut processor) = setup();
        fs::write(processor.layout().pending().join("a.sh"), "true").unwrap();
        processor.shutdown_handle().stop();
        RUNTIME.block_on(async {
            assert_eq!(Tick::Stopped, processor.run_once().await.unwrap());
        });
        assert!(processor.layout().pending().join("a.sh").exists());
    }

    #[test]
    fn test_run_exits_after_stop() {
        let (_tmp, mut processor) = setup();
        let handle = processor.shutdown_handle();
        RUNTIME.block_on(async {
            let stopper = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                handle.stop();
            });
            processor.run().await.unwrap();
            stopper.await.unwrap();
        });
        assert_eq!(LoopState::ShuttingDown, processor.state());
    }

    #[test]
    fn test_listing_failure_is_an_error() {
        let (_tmp, mut processor) = setup();
        fs::remove_dir_all(processor.layout().pending()).unwrap();
        RUNTIME.block_on(async {
            assert!(processor.run_once().await.is_err());
        });
    }

    #[test]
    fn test_commit_failure_quarantines_descriptor() {
        let (_tmp, mut processor) = setup();
        let pending = processor.layout().pending().to_path_buf();
        fs::write(pending.join("a.json"), r#"{"command": "true"}"#).unwrap();
        fs::remove_dir_all(processor.layout().completed()).unwrap();
        RUNTIME.block_on(async {
            match processor.run_once().await.unwrap() {
                Tick::Processed { outcome, .. } => {
                    let expected = processor.layout().failed().join("a.json");
                    assert_eq!(Outcome::Quarantined(expected.clone()), outcome);
                    assert_eq!(
                        r#"{"command": "true"}"#,
                        fs::read_to_string(expected).unwrap()
                    );
                }
                other => panic!("expected a processed job, got {:?}", other),
            }
        });
        assert!(!pending.join("a.json").exists());
    }

    #[test]
    fn test_stranded_descriptor_is_not_rerun() {
        let (_tmp, mut processor) = setup();
        let pending = processor.layout().pending().to_path_buf();
        let marker = processor.layout().root().join("runs");
        let job = format!("echo run >> {}", marker.display());
        fs::write(pending.join("a.sh"), job).unwrap();
        // neither completed nor failed exist, so no record and no fallback move
        fs::remove_dir_all(processor.layout().completed()).unwrap();
        fs::remove_dir_all(processor.layout().failed()).unwrap();
        RUNTIME.block_on(async {
            match processor.run_once().await.unwrap() {
                Tick::Processed { outcome, .. } => assert_eq!(Outcome::Stranded, outcome),
                other => panic!("expected a processed job, got {:?}", other),
            }
            assert_eq!(Tick::NothingEligible, processor.run_once().await.unwrap());
        });
        assert!(pending.join("a.sh").exists());
        assert_eq!("run\n", fs::read_to_string(marker).unwrap());
    }
}
