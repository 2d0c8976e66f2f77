//! Turning files found in `pending/` into runnable jobs.
//!
//! Structured descriptors are JSON or YAML objects:
//!
//! ```json
//! {"command": "echo", "args": ["hi"], "result_file": "out.txt", "description": "..."}
//! ```
//!
//! When `args` is absent a string `command` is split on whitespace into program
//! and arguments. Quoting is not understood, so an argument containing a space
//! can only be passed through `args`.
//!
//! Freeform descriptors (`.txt`, `.sh`) hold a single shell command line.

use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use crate::error::DescriptorError;

/// Encoding of a structured descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syntax {
    Json,
    Yaml,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobFormat {
    Structured(Syntax),
    Freeform,
}

impl JobFormat {
    /// None for extensions the queue does not know how to run.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Structured(Syntax::Json)),
            "yaml" | "yml" => Some(Self::Structured(Syntax::Yaml)),
            "txt" | "sh" => Some(Self::Freeform),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandLine {
    /// program started directly, arguments passed without shell interpretation
    Argv { program: String, args: Vec<String> },
    /// handed to `sh -c`
    Shell(String),
}

impl CommandLine {
    pub fn argv(program: &str, args: &[&str]) -> Self {
        Self::Argv {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn program(&self) -> &str {
        match self {
            Self::Argv { program, .. } => program,
            Self::Shell(_) => "sh",
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argv { program, args } => {
                f.write_str(program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            Self::Shell(line) => f.write_str(line),
        }
    }
}

/// A file claimed from `pending/` together with its detected format.
#[derive(Clone, Debug)]
pub struct JobDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub format: JobFormat,
}

impl JobDescriptor {
    pub fn from_path(path: &Path) -> Option<Self> {
        let format = JobFormat::from_path(path)?;
        let name = path.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            name,
            path: path.to_path_buf(),
            format,
        })
    }

    /// `<stem>_result.json`, the terminal name of a freeform job
    pub fn freeform_record_name(&self) -> OsString {
        let mut name = self
            .path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        name.push("_result.json");
        name
    }
}

/// A structured job ready for execution. `document` keeps every field of the
/// descriptor in its original order so it can be written back with the result.
#[derive(Clone, Debug)]
pub struct StructuredJob {
    pub document: Map<String, Value>,
    pub command: CommandLine,
    pub result_file: Option<String>,
}

impl StructuredJob {
    pub fn from_document(
        document: Map<String, Value>,
    ) -> Result<Self, (Map<String, Value>, DescriptorError)> {
        match resolve_command(&document) {
            Ok(command) => {
                let result_file = document
                    .get("result_file")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Self {
                    document,
                    command,
                    result_file,
                })
            }
            Err(e) => Err((document, e)),
        }
    }
}

pub fn decode_document(raw: &str, syntax: Syntax) -> Result<Map<String, Value>, DescriptorError> {
    let decoded: Result<Value, String> = match syntax {
        Syntax::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
        Syntax::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
    };
    match decoded {
        Ok(Value::Object(document)) => Ok(document),
        Ok(other) => Err(malformed(
            format!("expected an object, found {}", kind_of(&other)),
            raw,
        )),
        Err(reason) => Err(malformed(reason, raw)),
    }
}

/// Finds the command of a structured document.
///
/// `command` + `args` wins; otherwise a string command is split on whitespace
/// and an array command is taken element by element.
pub fn resolve_command(document: &Map<String, Value>) -> Result<CommandLine, DescriptorError> {
    let command = document
        .get("command")
        .ok_or(DescriptorError::MissingCommand)?;
    let explicit_args = document.get("args").filter(|a| !a.is_null());

    let (program, args) = match (command, explicit_args) {
        (Value::String(program), Some(args)) => {
            let args = string_array(args).ok_or(DescriptorError::InvalidArgs)?;
            (program.clone(), args)
        }
        (_, Some(_)) => return Err(DescriptorError::MissingCommand),
        (Value::String(line), None) => split_program(line.split_whitespace().map(str::to_string))?,
        (Value::Array(_), None) => {
            let parts = string_array(command).ok_or(DescriptorError::MissingCommand)?;
            split_program(parts.into_iter())?
        }
        _ => return Err(DescriptorError::MissingCommand),
    };

    if program.trim().is_empty() {
        return Err(DescriptorError::MissingCommand);
    }
    Ok(CommandLine::Argv { program, args })
}

pub fn parse_freeform(raw: &str) -> CommandLine {
    CommandLine::Shell(raw.trim().to_string())
}

fn split_program(
    mut parts: impl Iterator<Item = String>,
) -> Result<(String, Vec<String>), DescriptorError> {
    let program = parts.next().ok_or(DescriptorError::MissingCommand)?;
    Ok((program, parts.collect()))
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn malformed(reason: String, raw: &str) -> DescriptorError {
    DescriptorError::Malformed {
        reason,
        content: raw.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
