// Image service client: a thin wrapper around the `openstack` CLI.
// Each method builds one argument vector, runs it through the
// `CommandRunner` with the credentials from `CloudEnv`, and interprets the
// exit status. No HTTP calls to the image API are made here; the only direct
// request is the reachability probe against the identity endpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::CloudEnv;
use crate::error::{WorkflowError, WorkflowResult};
use crate::request::UploadRequest;
use crate::runner::{CommandOutput, CommandRunner, Invocation};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle state reported by the image service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    Queued,
    Saving,
    Active,
    Error,
    Unknown(String),
}

impl ImageStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "saving" => Self::Saving,
            "active" => Self::Active,
            "error" => Self::Error,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Saving => f.write_str("saving"),
            Self::Active => f.write_str("active"),
            Self::Error => f.write_str("error"),
            Self::Unknown(other) => f.write_str(other),
        }
    }
}

/// Remote image as last observed; never written locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    pub name: String,
    pub status: ImageStatus,
}

/// Attributes returned by `image show -f json`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ImageAttributes {
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl ImageAttributes {
    /// Parse JSON output; anything else is kept verbatim under `raw`.
    pub fn from_output(stdout: &str) -> Self {
        serde_json::from_str(stdout).unwrap_or_else(|_| {
            let mut fields = BTreeMap::new();
            fields.insert("raw".to_string(), Value::String(stdout.trim().to_string()));
            Self { fields }
        })
    }

    pub fn render(&self) -> String {
        let width = self.fields.keys().map(String::len).max().unwrap_or(0);
        self.fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                format!("{key:<width$}  {value}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Client for the image commands of the OpenStack CLI.
pub struct ImageClient<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
    cloud: CloudEnv,
}

impl<'a> ImageClient<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: impl Into<String>, cloud: CloudEnv) -> Self {
        ImageClient {
            runner,
            program: program.into(),
            cloud,
        }
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.program.clone())
            .args(args)
            .envs(self.cloud.child_env())
    }

    fn run(&self, invocation: Invocation) -> WorkflowResult<CommandOutput> {
        self.runner
            .run(&invocation)
            .map_err(|source| WorkflowError::Command {
                program: invocation.program.clone(),
                source,
            })
    }

    /// Lightweight authenticated call used to prove connectivity.
    pub fn list_images(&self) -> WorkflowResult<()> {
        let output = self.run(
            self.invocation(["image", "list", "--limit", "1"])
                .timeout(QUERY_TIMEOUT),
        )?;
        if output.success() {
            Ok(())
        } else {
            Err(WorkflowError::Connection {
                detail: output.diagnostic(),
            })
        }
    }

    /// Run `image create`, bounded by the request's timeout.
    pub fn create_image(&self, request: &UploadRequest) -> WorkflowResult<()> {
        let output = self.run(self.invocation(request.create_args()).timeout(request.timeout))?;
        if output.success() {
            debug!(name = %request.name, "image create returned");
            return Ok(());
        }
        if output.is_timeout() {
            return Err(WorkflowError::UploadTimeout {
                seconds: request.timeout.as_secs(),
            });
        }
        Err(WorkflowError::Upload {
            code: output.code.unwrap_or(-1),
            detail: output.diagnostic(),
        })
    }

    /// Full attribute set of an image, or `None` if the query failed.
    pub fn show_image(&self, name: &str) -> WorkflowResult<Option<ImageAttributes>> {
        let output = self.run(
            self.invocation(["image", "show", "-f", "json", name])
                .timeout(QUERY_TIMEOUT),
        )?;
        if !output.success() {
            debug!(name, detail = %output.diagnostic(), "image show failed");
            return Ok(None);
        }
        Ok(Some(ImageAttributes::from_output(&output.stdout)))
    }

    /// Status column of an image; `None` if missing or the query failed.
    pub fn image_status(&self, name: &str) -> WorkflowResult<Option<ImageStatus>> {
        let output = self.run(
            self.invocation(["image", "show", name, "-f", "value", "-c", "status"])
                .timeout(QUERY_TIMEOUT),
        )?;
        let raw = output.stdout.trim();
        if !output.success() || raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(ImageStatus::parse(raw)))
    }
}

/// Best-effort GET against the identity endpoint. Any HTTP response counts as
/// reachable; only transport failures are reported.
pub fn probe_endpoint(url: &str) -> Result<u16, reqwest::Error> {
    let client = reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()?;
    let res = client.get(url).send()?;
    Ok(res.status().as_u16())
}
