// Command-line surface of `osimage-upload`.
// clap does the parsing; this module turns its output (or its errors) into an
// `UploadRequest` or a `WorkflowError`, without ever exiting the process.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;

use crate::error::{WorkflowError, WorkflowResult};
use crate::request::{
    default_image_name, infer_disk_format, DiskFormat, UploadRequest, Visibility,
    DEFAULT_MIN_DISK_GB, DEFAULT_MIN_RAM_MB, DEFAULT_TIMEOUT_SECS,
};

#[derive(Parser, Debug)]
#[command(
    name = "osimage-upload",
    about = "Upload a virtual machine image to OpenStack and verify it",
    after_help = "Credentials are read from OS_USERNAME, OS_PASSWORD, OS_PROJECT_NAME and OS_AUTH_URL."
)]
struct Cli {
    /// Local image file to upload.
    image_path: PathBuf,
    /// Image name (default: file name without extension).
    #[arg(short = 'n', long)]
    name: Option<String>,
    #[arg(short = 'd', long)]
    description: Option<String>,
    /// Disk format (default: inferred from the file extension).
    #[arg(
        short = 'f',
        long = "format",
        value_name = "FORMAT",
        visible_alias = "disk-format",
        visible_short_alias = 't'
    )]
    format: Option<DiskFormat>,
    #[arg(short = 'v', long, value_name = "VIS", default_value_t = Visibility::Private)]
    visibility: Visibility,
    /// Minimum disk size in GB.
    #[arg(long, value_name = "SIZE", default_value_t = DEFAULT_MIN_DISK_GB)]
    min_disk: u32,
    /// Minimum RAM in MB.
    #[arg(long, value_name = "SIZE", default_value_t = DEFAULT_MIN_RAM_MB)]
    min_ram: u32,
    /// Protect the image from deletion.
    #[arg(long)]
    protected: bool,
    /// Upload timeout in seconds.
    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: u64,
}

/// Parse `argv` (program name first) into an upload request.
///
/// `--help` is reported as [`WorkflowError::Help`] so the caller can print the
/// text and still end with a failing status.
pub fn parse_arguments<I, T>(argv: I) -> WorkflowResult<UploadRequest>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(argv).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            WorkflowError::Help(err.render().to_string())
        }
        _ => WorkflowError::Usage(err.render().to_string()),
    })?;
    let request = cli.into_request();
    // The name is the last positional of `image create`/`image show`.
    if request.name.starts_with('-') {
        return Err(WorkflowError::Usage(format!(
            "error: invalid image name '{}': names must not start with '-'\n",
            request.name
        )));
    }
    Ok(request)
}

impl Cli {
    fn into_request(self) -> UploadRequest {
        let name = self
            .name
            .unwrap_or_else(|| default_image_name(&self.image_path));
        let disk_format = self
            .format
            .unwrap_or_else(|| infer_disk_format(&self.image_path));
        UploadRequest {
            image_path: self.image_path,
            name,
            description: self.description,
            disk_format,
            visibility: self.visibility,
            min_disk_gb: self.min_disk,
            min_ram_mb: self.min_ram,
            protected: self.protected,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}
