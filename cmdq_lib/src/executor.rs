use std::{os::unix::process::ExitStatusExt, process::Stdio, time::Duration};

use cmdq_data::JobResult;
use tokio::{
    process::{Child, Command},
    time::{sleep_until, Instant},
};
use tracing::{error, info, instrument, warn};

use crate::{
    descriptor::CommandLine,
    slot::ProcessSlot,
    util::StreamCollector,
};

/// How a running child came to an end.
enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Stopped,
}

/// Runs job commands one at a time as child processes.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
    output_grace: Duration,
    slot: ProcessSlot,
}

impl CommandExecutor {
    pub fn new(timeout: Duration, output_grace: Duration, slot: ProcessSlot) -> Self {
        Self {
            timeout,
            output_grace,
            slot,
        }
    }

    /// run the command to completion, timeout or stop request
    /// never fails, every problem is reported through the returned result
    #[instrument(skip(self), fields(command = %command))]
    pub async fn execute(&self, command: &CommandLine) -> JobResult {
        let mut process = match command {
            CommandLine::Argv { program, args } => {
                let mut process = Command::new(program);
                process.args(args);
                process
            }
            CommandLine::Shell(line) => {
                let mut process = Command::new("sh");
                process.arg("-c").arg(line);
                process
            }
        };
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("try to spawn process");
        let child = match process.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!("process could not be spawned, error: {}", err);
                return JobResult::failed(format!(
                    "failed to spawn {}: {}",
                    command.program(),
                    err
                ));
            }
        };
        info!("process spawned, pid: {:?}", child.id());
        self.supervise(child).await
    }

    async fn supervise(&self, mut child: Child) -> JobResult {
        let stdout = StreamCollector::spawn(child.stdout.take());
        let stderr = StreamCollector::spawn(child.stderr.take());

        // the guard empties the slot on every way out of this function
        let (_guard, kill_rx) = self.slot.arm();
        let job_deadline = Instant::now() + self.timeout;

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = sleep_until(job_deadline) => Ending::TimedOut,
            _ = kill_rx => Ending::Stopped,
        };

        if !matches!(ending, Ending::Exited(_)) {
            info!("send kill signal to process with pid {:?}", child.id());
            if let Err(kill_error) = child.kill().await {
                warn!(
                    "unexpected error when killing process, pid: {:?}, err: {}",
                    child.id(),
                    kill_error
                );
            }
        }

        // a clean exit keeps reading while the job still has time left, a
        // killed job only gets the grace period
        let grace_deadline = Instant::now() + self.output_grace;
        let deadline = match ending {
            Ending::Exited(_) => job_deadline.max(grace_deadline),
            Ending::TimedOut | Ending::Stopped => grace_deadline,
        };
        let stdout = stdout.finish(deadline).await;
        let stderr = stderr.finish(deadline).await;

        match ending {
            Ending::Exited(Ok(status)) => match (status.code(), status.signal()) {
                (Some(code), _) => {
                    info!(returncode = code, "process exited");
                    JobResult::exited(code, stdout, stderr)
                }
                (None, Some(signal)) => {
                    info!(signal, "process killed by signal");
                    JobResult::interrupted(format!("terminated by signal {}", signal), stdout, stderr)
                }
                (None, None) => JobResult::interrupted("exited without status", stdout, stderr),
            },
            Ending::Exited(Err(io_err)) => {
                error!("unexpected io error when waiting for process: {}", io_err);
                JobResult::interrupted(
                    format!("unexpected io error when waiting for job process: {}", io_err),
                    stdout,
                    stderr,
                )
            }
            Ending::TimedOut => {
                error!(timeout_secs = self.timeout.as_secs_f64(), "process timed out");
                JobResult::interrupted(timeout_message(self.timeout), stdout, stderr)
            }
            Ending::Stopped => {
                info!("process terminated by shutdown request");
                JobResult::interrupted("terminated by shutdown request", stdout, stderr)
            }
        }
    }
}

fn timeout_message(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("timed out after {} seconds", timeout.as_secs())
    } else {
        format!("timed out after {} ms", timeout.as_millis())
    }
}
