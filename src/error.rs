// Error taxonomy for the upload workflow.
// Every variant is terminal for the current run and maps to exit status 1;
// the variant only decides which diagnostic the operator sees.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Bad or missing arguments. Carries the rendered clap message.
    #[error("{0}")]
    Usage(String),
    /// `--help` was requested; the text is printed and the run ends with 1.
    #[error("{0}")]
    Help(String),
    #[error("missing required tools: {}", .missing.join(", "))]
    Dependency { missing: Vec<String> },
    #[error("missing required environment variables: {}", .missing.join(", "))]
    Credential { missing: Vec<String> },
    #[error("image file not found or not a regular file: {}", .path.display())]
    Validation { path: PathBuf },
    #[error("failed to connect to the image service (check credentials and network): {detail}")]
    Connection { detail: String },
    #[error("upload timed out after {seconds} seconds")]
    UploadTimeout { seconds: u64 },
    #[error("image upload failed (exit status {code}): {detail}")]
    Upload { code: i32, detail: String },
    #[error("image '{name}' not found after upload")]
    ImageNotFound { name: String },
    #[error("image '{name}' is in error status\n{attributes}")]
    ImageFailed { name: String, attributes: String },
    #[error("failed to run {program}")]
    Command {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl WorkflowError {
    /// No failure class gets its own status code.
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_failure_exits_with_one() {
        let errors = [
            WorkflowError::Usage("usage".into()),
            WorkflowError::Help("help".into()),
            WorkflowError::Dependency {
                missing: vec!["curl".into()],
            },
            WorkflowError::UploadTimeout { seconds: 5 },
            WorkflowError::ImageNotFound { name: "x".into() },
        ];
        for err in errors {
            assert_eq!(err.exit_code(), 1);
        }
    }

    #[test]
    fn dependency_message_lists_every_tool() {
        let err = WorkflowError::Dependency {
            missing: vec!["curl".into(), "file".into()],
        };
        assert_eq!(err.to_string(), "missing required tools: curl, file");
    }
}
