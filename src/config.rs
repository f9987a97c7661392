// Immutable run configuration.
// Assembled once at start-up from environment lookups plus the parsed flags;
// stages receive it by reference and never read the environment themselves.

use std::collections::HashMap;

use crate::error::{WorkflowError, WorkflowResult};
use crate::request::UploadRequest;

pub const DEFAULT_IMAGE_CLI: &str = "openstack";
pub const DEFAULT_REGION: &str = "RegionOne";
pub const DEFAULT_INTERFACE: &str = "public";

/// Variables that must be present and non-empty. The project name may also
/// come from the legacy tenant variable.
const REQUIRED_VARS: [&str; 4] = ["OS_USERNAME", "OS_PASSWORD", "OS_PROJECT_NAME", "OS_AUTH_URL"];
const LEGACY_PROJECT_VAR: &str = "OS_TENANT_NAME";

/// OpenStack credentials and endpoint selection.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudEnv {
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub auth_url: String,
    pub region: String,
    pub interface: String,
}

impl std::fmt::Debug for CloudEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudEnv")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("auth_url", &self.auth_url)
            .field("region", &self.region)
            .field("interface", &self.interface)
            .finish()
    }
}

impl CloudEnv {
    /// Read credentials through `lookup`, collecting every missing variable
    /// before failing.
    pub fn from_lookup<F>(lookup: F) -> WorkflowResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let username = non_empty("OS_USERNAME");
        let password = non_empty("OS_PASSWORD");
        let project_name = non_empty("OS_PROJECT_NAME").or_else(|| non_empty(LEGACY_PROJECT_VAR));
        let auth_url = non_empty("OS_AUTH_URL");

        match (username, password, project_name, auth_url) {
            (Some(username), Some(password), Some(project_name), Some(auth_url)) => Ok(Self {
                username,
                password,
                project_name,
                auth_url,
                region: non_empty("OS_REGION_NAME").unwrap_or_else(|| DEFAULT_REGION.to_string()),
                interface: non_empty("OS_INTERFACE")
                    .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            }),
            (username, password, project_name, auth_url) => {
                let present = [
                    username.is_some(),
                    password.is_some(),
                    project_name.is_some(),
                    auth_url.is_some(),
                ];
                let missing = REQUIRED_VARS
                    .iter()
                    .zip(present)
                    .filter(|(_, present)| !present)
                    .map(|(key, _)| key.to_string())
                    .collect();
                Err(WorkflowError::Credential { missing })
            }
        }
    }

    /// Variables handed to every child process of the image CLI.
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![
            ("OS_USERNAME".into(), self.username.clone()),
            ("OS_PASSWORD".into(), self.password.clone()),
            ("OS_PROJECT_NAME".into(), self.project_name.clone()),
            ("OS_AUTH_URL".into(), self.auth_url.clone()),
            ("OS_REGION_NAME".into(), self.region.clone()),
            ("OS_INTERFACE".into(), self.interface.clone()),
        ]
    }
}

/// Executables the workflow shells out to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tools {
    pub image_cli: String,
}

impl Tools {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let image_cli = lookup("OSIMAGE_CLI")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_CLI.to_string());
        Self { image_cli }
    }

    /// Every tool that has to resolve on `PATH` before anything else runs.
    pub fn required(&self) -> Vec<&str> {
        vec![self.image_cli.as_str(), "curl", "file"]
    }
}

/// Everything a run needs, fixed before the first stage starts.
#[derive(Clone, Debug)]
pub struct Config {
    pub request: UploadRequest,
    pub tools: Tools,
    /// Snapshot of the process environment taken at start-up.
    pub environment: HashMap<String, String>,
}

impl Config {
    pub fn new(request: UploadRequest, environment: HashMap<String, String>) -> Self {
        let tools = Tools::from_lookup(|key| environment.get(key).cloned());
        Self {
            request,
            tools,
            environment,
        }
    }

    pub fn env_var(&self, key: &str) -> Option<String> {
        self.environment.get(key).cloned()
    }
}
