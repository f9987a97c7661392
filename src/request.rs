// Upload parameters derived from the command line, plus the disk format and
// visibility vocabularies understood by the image service.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;

pub const DEFAULT_MIN_DISK_GB: u32 = 5;
pub const DEFAULT_MIN_RAM_MB: u32 = 512;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// On-disk encoding of a virtual machine image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DiskFormat {
    Qcow2,
    Raw,
    Iso,
    Vmdk,
    Vdi,
    // Accepted but left out of the help text.
    #[value(hide = true)]
    Vpc,
    #[value(hide = true)]
    Vhd,
}

impl DiskFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qcow2 => "qcow2",
            Self::Raw => "raw",
            Self::Iso => "iso",
            Self::Vmdk => "vmdk",
            Self::Vdi => "vdi",
            Self::Vpc => "vpc",
            Self::Vhd => "vhd",
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    /// Flag understood by `openstack image create`.
    pub const fn cli_flag(self) -> &'static str {
        match self {
            Self::Private => "--private",
            Self::Public => "--public",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Public => f.write_str("public"),
        }
    }
}

/// Map a file extension (case-insensitive) to a disk format. Unknown or
/// missing extensions fall back to qcow2.
pub fn infer_disk_format(path: &Path) -> DiskFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("img") | Some("raw") => DiskFormat::Raw,
        Some("iso") => DiskFormat::Iso,
        Some("vmdk") => DiskFormat::Vmdk,
        Some("vdi") => DiskFormat::Vdi,
        Some("vpc") => DiskFormat::Vpc,
        Some("vhd") => DiskFormat::Vhd,
        _ => DiskFormat::Qcow2,
    }
}

/// File name without its extension, used when `--name` is not given.
pub fn default_image_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    pub image_path: PathBuf,
    pub name: String,
    pub description: Option<String>,
    pub disk_format: DiskFormat,
    pub visibility: Visibility,
    pub min_disk_gb: u32,
    pub min_ram_mb: u32,
    pub protected: bool,
    pub timeout: Duration,
}

impl UploadRequest {
    /// Argument vector for `image create`, excluding the CLI program itself.
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "image".to_string(),
            "create".to_string(),
            "--file".to_string(),
            self.image_path.to_string_lossy().into_owned(),
            "--disk-format".to_string(),
            self.disk_format.to_string(),
            "--container-format".to_string(),
            "bare".to_string(),
            self.visibility.cli_flag().to_string(),
            "--min-disk".to_string(),
            self.min_disk_gb.to_string(),
            "--min-ram".to_string(),
            self.min_ram_mb.to_string(),
        ];
        if let Some(description) = &self.description {
            args.push("--property".to_string());
            args.push(format!("description={description}"));
        }
        if self.protected {
            args.push("--protected".to_string());
        }
        args.push(self.name.clone());
        args
    }
}
