use std::{
    ffi::{OsStr, OsString},
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use cmdq_data::{FreeformRecord, JobResult, JobStatus};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::{
    descriptor::{JobDescriptor, StructuredJob, Syntax},
    error::{QueueError, Result},
    layout::QueueLayout,
};

/// Moves finished descriptors out of `pending/`.
///
/// A terminal record is written to a hidden temporary file in the destination
/// directory, synced and renamed into place. The pending file is removed only
/// after that, so a crash leaves at worst both copies but never neither.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    layout: QueueLayout,
}

impl ResultWriter {
    pub fn new(layout: QueueLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    /// original document plus `result`, under the original file name
    pub fn commit_structured(
        &self,
        descriptor: &JobDescriptor,
        syntax: Syntax,
        mut document: Map<String, Value>,
        result: &JobResult,
    ) -> Result<PathBuf> {
        let result_value =
            serde_json::to_value(result).map_err(|e| QueueError::Encode(e.to_string()))?;
        document.insert("result".to_string(), result_value);
        let contents = encode(&Value::Object(document), syntax)?;
        self.commit(descriptor, file_name(&descriptor.path), result.status, &contents)
    }

    /// record for a descriptor that could not be decoded at all
    pub fn commit_malformed(
        &self,
        descriptor: &JobDescriptor,
        syntax: Syntax,
        result: &JobResult,
    ) -> Result<PathBuf> {
        let mut document = Map::new();
        document.insert(
            "source_file".to_string(),
            Value::String(descriptor.name.clone()),
        );
        self.commit_structured(descriptor, syntax, document, result)
    }

    /// freeform jobs always end up as `<stem>_result.json`
    pub fn commit_freeform(
        &self,
        descriptor: &JobDescriptor,
        command: &str,
        result: &JobResult,
    ) -> Result<PathBuf> {
        let record = FreeformRecord::new(command, &descriptor.name, result.clone());
        let contents = serde_json::to_string_pretty(&record)
            .map_err(|e| QueueError::Encode(e.to_string()))?;
        self.commit(
            descriptor,
            descriptor.freeform_record_name(),
            result.status,
            &contents,
        )
    }

    /// Copies stdout verbatim to `result_file` below the queue root.
    /// Nothing is written for empty output.
    pub fn write_result_file(&self, job: &StructuredJob, result: &JobResult) -> Result<Option<PathBuf>> {
        let relative = match &job.result_file {
            Some(relative) => relative,
            None => return Ok(None),
        };
        let stdout = result.stdout();
        if stdout.is_empty() {
            return Ok(None);
        }
        let path = self.layout.resolve_result_file(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| QueueError::io(parent, e))?;
        }
        fs::write(&path, stdout).map_err(|e| QueueError::io(&path, e))?;
        info!("Saved results to {}", path.display());
        Ok(Some(path))
    }

    /// Fallback when no terminal record could be produced: move the
    /// descriptor into `failed/` untouched.
    /// An existing file of the same name in `failed/` is kept; the
    /// descriptor then gets a numbered name (`a.json.1`, `a.json.2`, ...).
    pub fn quarantine(&self, descriptor: &JobDescriptor) -> Result<PathBuf> {
        let name = file_name(&descriptor.path);
        let dest = free_path(self.layout.failed(), &name);
        if dest.file_name() != Some(name.as_os_str()) {
            warn!(
                job = %descriptor.name,
                "failed/{} already exists, quarantining as {}",
                descriptor.name,
                dest.display()
            );
        }
        fs::rename(&descriptor.path, &dest).map_err(|e| QueueError::io(&dest, e))?;
        Ok(dest)
    }

    pub fn destination_dir(&self, status: JobStatus) -> &Path {
        match status {
            JobStatus::Completed => self.layout.completed(),
            JobStatus::Failed => self.layout.failed(),
        }
    }

    fn commit(
        &self,
        descriptor: &JobDescriptor,
        name: OsString,
        status: JobStatus,
        contents: &str,
    ) -> Result<PathBuf> {
        let dir = self.destination_dir(status);
        let dest = dir.join(&name);
        let mut tmp_name = OsString::from(".");
        tmp_name.push(&name);
        tmp_name.push(".tmp");
        let tmp = dir.join(tmp_name);

        if let Err(e) = write_synced(&tmp, contents) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(QueueError::io(&dest, e));
        }
        match fs::remove_file(&descriptor.path) {
            Ok(()) => Ok(dest),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(job = %descriptor.name, "source vanished while the job was running");
                Ok(dest)
            }
            Err(e) => {
                // keep a single copy: the source stays, the record goes
                error!(
                    job = %descriptor.name,
                    "terminal record written but source could not be removed: {}", e
                );
                let _ = fs::remove_file(&dest);
                Err(QueueError::io(&descriptor.path, e))
            }
        }
    }
}

fn write_synced(path: &Path, contents: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| QueueError::io(path, e))?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.sync_all())
        .map_err(|e| QueueError::io(path, e))
}

fn encode(value: &Value, syntax: Syntax) -> Result<String> {
    match syntax {
        Syntax::Json => {
            serde_json::to_string_pretty(value).map_err(|e| QueueError::Encode(e.to_string()))
        }
        Syntax::Yaml => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| QueueError::Encode(e.to_string())),
    }
}

fn free_path(dir: &Path, name: &OsStr) -> PathBuf {
    let mut candidate = dir.join(name);
    let mut n: u32 = 0;
    while candidate.exists() {
        n += 1;
        let mut numbered = name.to_os_string();
        numbered.push(format!(".{}", n));
        candidate = dir.join(numbered);
    }
    candidate
}

fn file_name(path: &Path) -> OsString {
    path.file_name().map(OsStr::to_os_string).unwrap_or_default()
}
