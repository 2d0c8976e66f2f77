use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of one job, stored under the `result` key of every terminal record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Local>,
}

impl JobResult {
    /// process ran to completion, status follows the exit code
    pub fn exited(returncode: i32, stdout: String, stderr: String) -> Self {
        let status = if returncode == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        Self {
            status,
            returncode: Some(returncode),
            stdout: Some(stdout),
            stderr: Some(stderr),
            error: None,
            completed_at: Local::now(),
        }
    }

    /// failure before any process output existed (spawn or parse error)
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            returncode: None,
            stdout: None,
            stderr: None,
            error: Some(error.into()),
            completed_at: Local::now(),
        }
    }

    /// process was started but did not exit on its own terms,
    /// whatever it wrote before that is kept
    pub fn interrupted(error: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self {
            status: JobStatus::Failed,
            returncode: None,
            stdout: Some(stdout),
            stderr: Some(stderr),
            error: Some(error.into()),
            completed_at: Local::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn stdout(&self) -> &str {
        self.stdout.as_deref().unwrap_or("")
    }
}

/// Terminal record of a freeform job; the input file carries no metadata of its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreeformRecord {
    pub command: String,
    pub source_file: String,
    pub result: JobResult,
}

impl FreeformRecord {
    pub fn new(command: &str, source_file: &str, result: JobResult) -> Self {
        Self {
            command: command.to_string(),
            source_file: source_file.to_string(),
            result,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{FreeformRecord, JobResult, JobStatus};

    #[test]
    fn test_exit_code_mapping() {
        let ok = JobResult::exited(0, "hi\n".to_string(), String::new());
        assert_eq!(JobStatus::Completed, ok.status);
        assert!(ok.is_success());

        let failed = JobResult::exited(3, String::new(), "boom".to_string());
        assert_eq!(JobStatus::Failed, failed.status);
        assert_eq!(Some(3), failed.returncode);
        assert!(failed.error.is_none());
    }

    #[test]
    fn test_failed_result_omits_process_fields() {
        let result = JobResult::failed("failed to spawn nope: not found");
        let value = serde_json::to_value(&result).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!("failed", object["status"]);
        assert!(!object.contains_key("returncode"));
        assert!(!object.contains_key("stdout"));
        assert!(object.contains_key("completed_at"));
    }

    #[test]
    fn test_freeform_record_shape() {
        let result = JobResult::exited(1, String::new(), String::new());
        let record = FreeformRecord::new("exit 1", "b.sh", result);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!("exit 1", value["command"]);
        assert_eq!("b.sh", value["source_file"]);
        assert_eq!("failed", value["result"]["status"]);
        assert_eq!(1, value["result"]["returncode"]);
    }
}
