//! Error types shared by the archive and analysis adapters.
//!
//! Every failure is surfaced to the caller as a distinct variant; nothing here
//! is retried or swallowed. Failures of the external 7z process carry the
//! process output verbatim so the tool's own message is never lost.

use std::fmt;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use crate::fs_tree::TreeError;
use crate::resource::{AttributeError, PatchError, ResourceId, ResourceTag};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Library error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("7z unpack failed: {0}")]
    Unpack(ProcessDiagnostics),

    #[error("7z pack failed: {0}")]
    Pack(ProcessDiagnostics),

    #[error("7z list failed: {0}")]
    List(ProcessDiagnostics),

    #[error("Analysis failed for resource {resource}: {source}")]
    Analysis {
        resource: ResourceId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("7z binary not found ({0}). Please install p7zip or 7-Zip, or set P7ZFS_ARCHIVER.")]
    ArchiverNotFound(String),

    #[error("{} did not finish within {timeout:?}", .program.display())]
    Timeout { program: PathBuf, timeout: Duration },

    #[error("Resource {resource} is not tagged {expected}")]
    NotTargeted {
        resource: ResourceId,
        expected: ResourceTag,
    },

    #[error("Resource {0} has no filesystem tree attached")]
    MissingTree(ResourceId),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Error::Io { context, source }
    }
}

/// Captured result of a failed external process.
#[derive(Debug, Clone)]
pub struct ProcessDiagnostics {
    pub command: String,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessDiagnostics {
    pub fn from_output(command: impl Into<String>, output: &Output) -> Self {
        Self {
            command: command.into(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl fmt::Display for ProcessDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command '{}' returned {}.\nStdout:\n{}\nStderr:\n{}",
            self.command, self.status, self.stdout, self.stderr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_diagnostics_keep_process_output() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(2 << 8),
            stdout: b"Scanning the drive for archives:".to_vec(),
            stderr: b"ERROR: Can not open the file as archive".to_vec(),
        };

        let diagnostics = ProcessDiagnostics::from_output("7z x -o/tmp/out /tmp/in", &output);
        let message = Error::Unpack(diagnostics).to_string();

        assert!(message.starts_with("7z unpack failed: Command '7z x -o/tmp/out /tmp/in'"));
        assert!(message.contains("exit status: 2"));
        assert!(message.contains("Scanning the drive for archives:"));
        assert!(message.contains("ERROR: Can not open the file as archive"));
    }
}
