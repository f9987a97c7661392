// Upload pipeline: dependencies -> credentials -> file -> connection ->
// upload -> verify. Each stage returns a `WorkflowResult`; the first error
// ends the run. Nothing is retried and nothing mutating happens before the
// connection check has passed.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::{CloudEnv, Config, Tools};
use crate::error::{WorkflowError, WorkflowResult};
use crate::openstack::{probe_endpoint, ImageClient, ImageStatus, UploadResult};
use crate::output::Console;
use crate::request::UploadRequest;
use crate::runner::{CommandRunner, Invocation};

/// Files below this size are almost certainly not a bootable image.
pub const MIN_PLAUSIBLE_SIZE: u64 = 1024 * 1024;

/// HTTP reachability check for the identity endpoint.
pub type EndpointProbe = fn(&str) -> Result<u16, reqwest::Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub size_bytes: u64,
    /// Output of `file -b`, when it could be obtained.
    pub kind: Option<String>,
}

/// Every required tool must resolve; all missing ones are reported at once.
pub fn check_dependencies(tools: &Tools, runner: &dyn CommandRunner) -> WorkflowResult<()> {
    let missing: Vec<String> = tools
        .required()
        .into_iter()
        .filter(|tool| !runner.is_available(tool))
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::Dependency { missing })
    }
}

pub fn check_credentials(config: &Config) -> WorkflowResult<CloudEnv> {
    CloudEnv::from_lookup(|key| config.env_var(key))
}

pub fn validate_image_file<W: Write>(
    path: &Path,
    runner: &dyn CommandRunner,
    console: &mut Console<W>,
) -> WorkflowResult<FileInfo> {
    let meta = fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .ok_or_else(|| WorkflowError::Validation {
            path: path.to_path_buf(),
        })?;
    let size_bytes = meta.len();
    if size_bytes < MIN_PLAUSIBLE_SIZE {
        console.warn(&format!(
            "image file is very small ({size_bytes} bytes); is this really a disk image?"
        ));
    }

    let kind = runner
        .run(&Invocation::new("file").args(["-b".to_string(), path.to_string_lossy().into_owned()]))
        .ok()
        .filter(|output| output.success())
        .map(|output| output.stdout.trim().to_string())
        .filter(|kind| !kind.is_empty());
    console.info(&format!(
        "image file: {} ({})",
        path.display(),
        format_size(size_bytes)
    ));
    if let Some(kind) = &kind {
        console.info(&format!("file type: {kind}"));
    }
    Ok(FileInfo { size_bytes, kind })
}

pub fn test_connection<W: Write>(
    client: &ImageClient<'_>,
    cloud: &CloudEnv,
    probe: EndpointProbe,
    console: &mut Console<W>,
) -> WorkflowResult<()> {
    match probe(&cloud.auth_url) {
        Ok(status) => debug!(url = %cloud.auth_url, status, "identity endpoint reachable"),
        Err(err) => {
            warn!(url = %cloud.auth_url, error = %err, "identity endpoint probe failed");
            console.warn(&format!("could not reach {}: {err}", cloud.auth_url));
        }
    }
    console.info("testing connection to the image service...");
    client.list_images()?;
    console.success("connection to the image service verified");
    Ok(())
}

pub fn upload<W: Write>(
    client: &ImageClient<'_>,
    request: &UploadRequest,
    console: &mut Console<W>,
) -> WorkflowResult<()> {
    console.info(&format!(
        "uploading '{}' as {} ({}, min disk {} GB, min ram {} MB{})",
        request.name,
        request.disk_format,
        request.visibility,
        request.min_disk_gb,
        request.min_ram_mb,
        if request.protected { ", protected" } else { "" }
    ));
    info!(name = %request.name, timeout_secs = request.timeout.as_secs(), "starting upload");

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Uploading {}...", request.name));
    spinner.enable_steady_tick(Duration::from_millis(120));
    let outcome = client.create_image(request);
    spinner.finish_and_clear();
    outcome?;

    console.success(&format!("image '{}' created", request.name));
    if let Some(attributes) = client.show_image(&request.name)? {
        console.block(&attributes.render());
    }
    Ok(())
}

/// Query the status once. `queued`/`saving` are accepted without waiting for
/// `active`.
pub fn verify<W: Write>(
    client: &ImageClient<'_>,
    name: &str,
    console: &mut Console<W>,
) -> WorkflowResult<UploadResult> {
    let status = client
        .image_status(name)?
        .ok_or_else(|| WorkflowError::ImageNotFound {
            name: name.to_string(),
        })?;
    match &status {
        ImageStatus::Active => console.success(&format!("image '{name}' is active")),
        ImageStatus::Queued | ImageStatus::Saving => console.warn(&format!(
            "image '{name}' is {status}; upload accepted but still processing"
        )),
        ImageStatus::Error => {
            let attributes = client
                .show_image(name)?
                .map(|attrs| attrs.render())
                .unwrap_or_else(|| "no attributes available".to_string());
            return Err(WorkflowError::ImageFailed {
                name: name.to_string(),
                attributes,
            });
        }
        ImageStatus::Unknown(raw) => {
            console.warn(&format!("image '{name}' reports unrecognized status '{raw}'"))
        }
    }
    Ok(UploadResult {
        name: name.to_string(),
        status,
    })
}

/// Run every stage after argument parsing.
pub fn run<W: Write>(
    config: &Config,
    runner: &dyn CommandRunner,
    probe: EndpointProbe,
    console: &mut Console<W>,
) -> WorkflowResult<UploadResult> {
    let request = &config.request;

    check_dependencies(&config.tools, runner)?;
    let cloud = check_credentials(config)?;
    debug!(?cloud, "credentials loaded");
    validate_image_file(&request.image_path, runner, console)?;

    let client = ImageClient::new(runner, config.tools.image_cli.clone(), cloud.clone());
    test_connection(&client, &cloud, probe, console)?;
    upload(&client, request, console)?;
    verify(&client, &request.name, console)
}

/// `run` wired to the real identity-endpoint probe.
pub fn run_with_defaults<W: Write>(
    config: &Config,
    runner: &dyn CommandRunner,
    console: &mut Console<W>,
) -> WorkflowResult<UploadResult> {
    run(config, runner, probe_endpoint, console)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parse_arguments;
    use crate::runner::{CommandOutput, MockCommandRunner};
    use std::collections::HashMap;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn reachable(_: &str) -> Result<u16, reqwest::Error> {
        Ok(300)
    }

    fn credentials() -> HashMap<String, String> {
        [
            ("OS_USERNAME", "demo"),
            ("OS_PASSWORD", "secret"),
            ("OS_PROJECT_NAME", "demo"),
            ("OS_AUTH_URL", "http://keystone.invalid/v3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn image_file(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).expect("create image");
        file.write_all(&vec![0u8; size]).expect("write image");
        path
    }

    fn config_for(path: &Path, extra: &[&str]) -> Config {
        let mut argv = vec!["osimage-upload".to_string(), path.display().to_string()];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Config::new(parse_arguments(argv).expect("parses"), credentials())
    }

    fn ok_with(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            ..CommandOutput::default()
        }
    }

    fn subcommand(inv: &Invocation) -> (String, String) {
        (
            inv.args.first().cloned().unwrap_or_default(),
            inv.args.get(1).cloned().unwrap_or_default(),
        )
    }

    /// Runner where every tool exists and the image CLI answers with `status`.
    fn cloud_runner(status: &'static str) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner.expect_is_available().return_const(true);
        runner.expect_run().returning(move |inv| {
            if inv.program == "file" {
                return Ok(ok_with("QEMU QCOW2 Image (v3)"));
            }
            let output = match subcommand(inv) {
                (ref a, ref b) if a == "image" && b == "list" => ok_with(""),
                (ref a, ref b) if a == "image" && b == "create" => ok_with(""),
                (ref a, ref b) if a == "image" && b == "show" => {
                    if inv.args.contains(&"status".to_string()) {
                        ok_with(status)
                    } else {
                        ok_with(&format!(r#"{{"name": "myvm", "status": "{status}"}}"#))
                    }
                }
                _ => CommandOutput {
                    code: Some(2),
                    ..CommandOutput::default()
                },
            };
            Ok(output)
        });
        runner
    }

    fn console() -> Console<Vec<u8>> {
        Console::new(Vec::new(), false)
    }

    fn text(console: Console<Vec<u8>>) -> String {
        String::from_utf8(console.into_inner()).expect("utf8")
    }

    #[test]
    fn reports_exactly_the_missing_tools() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_is_available()
            .returning(|tool| tool == "openstack");
        let tools = Tools::from_lookup(|_| None);
        match check_dependencies(&tools, &runner) {
            Err(WorkflowError::Dependency { missing }) => assert_eq!(missing, vec!["curl", "file"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_file_fails_before_any_network_call() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_for(&dir.path().join("absent.qcow2"), &[]);
        let mut runner = MockCommandRunner::new();
        runner.expect_is_available().return_const(true);
        runner.expect_run().never();
        let mut console = console();
        let err = run(&config, &runner, reachable, &mut console).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { .. }));
    }

    #[test]
    fn directory_is_not_a_valid_image() {
        let dir = TempDir::new().expect("tempdir");
        let runner = MockCommandRunner::new();
        let err = validate_image_file(dir.path(), &runner, &mut console()).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { .. }));
    }

    #[test]
    fn small_file_only_warns() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "tiny.qcow2", 16);
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(ok_with("data")));
        let mut console = console();
        let info = validate_image_file(&path, &runner, &mut console).expect("valid");
        assert_eq!(info.size_bytes, 16);
        assert_eq!(info.kind.as_deref(), Some("data"));
        assert!(text(console).contains("[WARNING] image file is very small"));
    }

    #[test]
    fn missing_credentials_stop_before_the_file_check() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = config_for(&dir.path().join("absent.qcow2"), &[]);
        config.environment.remove("OS_AUTH_URL");
        let mut runner = MockCommandRunner::new();
        runner.expect_is_available().return_const(true);
        runner.expect_run().never();
        match run(&config, &runner, reachable, &mut console()) {
            Err(WorkflowError::Credential { missing }) => assert_eq!(missing, vec!["OS_AUTH_URL"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn failed_connection_prevents_upload() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &[]);
        let mut runner = MockCommandRunner::new();
        runner.expect_is_available().return_const(true);
        runner
            .expect_run()
            .withf(|inv| inv.program == "file")
            .returning(|_| Ok(ok_with("data")));
        runner
            .expect_run()
            .withf(|inv| subcommand(inv) == ("image".into(), "list".into()))
            .times(1)
            .returning(|_| {
                Ok(CommandOutput {
                    code: Some(1),
                    stderr: "HTTP 401".into(),
                    ..CommandOutput::default()
                })
            });
        runner
            .expect_run()
            .withf(|inv| subcommand(inv) == ("image".into(), "create".into()))
            .never();
        let err = run(&config, &runner, reachable, &mut console()).unwrap_err();
        assert!(matches!(err, WorkflowError::Connection { .. }));
    }

    #[test]
    fn active_image_succeeds() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &[]);
        let runner = cloud_runner("active");
        let mut console = console();
        let result = run(&config, &runner, reachable, &mut console).expect("uploads");
        assert_eq!(result.name, "myvm");
        assert_eq!(result.status, ImageStatus::Active);
        let out = text(console);
        assert!(out.contains("[SUCCESS] image 'myvm' is active"));
        assert!(out.contains("file type: QEMU QCOW2 Image (v3)"));
        assert!(!out.contains("[WARNING]"));
    }

    #[test]
    fn queued_image_succeeds_with_a_warning() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &[]);
        let runner = cloud_runner("queued");
        let mut console = console();
        let result = run(&config, &runner, reachable, &mut console).expect("accepted");
        assert_eq!(result.status, ImageStatus::Queued);
        assert!(text(console).contains("[WARNING] image 'myvm' is queued"));
    }

    #[test]
    fn unrecognized_status_is_a_warning() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &[]);
        let runner = cloud_runner("importing");
        let mut console = console();
        let result = run(&config, &runner, reachable, &mut console).expect("accepted");
        assert_eq!(result.status, ImageStatus::Unknown("importing".into()));
        assert!(text(console).contains("unrecognized status 'importing'"));
    }

    #[test]
    fn error_status_fails_with_attribute_dump() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &[]);
        let runner = cloud_runner("error");
        let err = run(&config, &runner, reachable, &mut console()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        let message = err.to_string();
        assert!(message.contains("is in error status"));
        assert!(message.contains("status  error"));
        assert!(message.contains("name    myvm"));
    }

    #[test]
    fn missing_image_after_upload_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &[]);
        let runner = cloud_runner("");
        let err = run(&config, &runner, reachable, &mut console()).unwrap_err();
        assert!(matches!(err, WorkflowError::ImageNotFound { ref name } if name == "myvm"));
    }

    #[test]
    fn unreachable_endpoint_only_warns() {
        fn unreachable(_: &str) -> Result<u16, reqwest::Error> {
            // An unparsable URL fails inside reqwest before any connection.
            reqwest::blocking::get("not a url").map(|res| res.status().as_u16())
        }
        let dir = TempDir::new().expect("tempdir");
        let path = image_file(&dir, "myvm.qcow2", 2 * 1024 * 1024);
        let config = config_for(&path, &["--name", "golden", "--protected"]);
        let runner = cloud_runner("active");
        let mut console = console();
        let result = run(&config, &runner, unreachable, &mut console).expect("uploads");
        assert_eq!(result.name, "golden");
        assert!(text(console).contains("[WARNING] could not reach http://keystone.invalid/v3"));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2 * 1024 * 1024), "2.0 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
