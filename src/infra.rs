// Terraform task runner behind `osimage-infra`.
// Each task maps to one `terraform` invocation run in the configuration
// directory with the terminal handed over to terraform. `apply` prefers the
// saved plan artifact and falls back to a fresh auto-approved apply when the
// artifact is missing or stale. `destroy` needs the operator to type
// `destroy` unless `--auto-approve` is given.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{info, warn};

use crate::runner::{CommandOutput, CommandRunner, Invocation};

pub const DESTROY_CONFIRMATION: &str = "destroy";
const CACHE_DIR: &str = ".terraform";

#[derive(Parser, Debug)]
#[command(name = "osimage-infra", about = "Run Terraform tasks for the image infrastructure")]
pub struct InfraCli {
    /// Directory holding the Terraform configuration.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
    /// Variables file, relative to `--dir`; used only if it exists.
    #[arg(long, default_value = "terraform.tfvars")]
    pub var_file: PathBuf,
    /// Saved plan artifact, relative to `--dir`.
    #[arg(long, default_value = "tfplan")]
    pub plan_file: PathBuf,
    #[arg(long, env = "TF_BIN", default_value = "terraform")]
    pub terraform: String,
    #[command(subcommand)]
    pub task: Task,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Init,
    Validate,
    /// Check formatting without rewriting files.
    FmtCheck,
    Plan,
    Apply,
    Destroy {
        #[arg(long)]
        auto_approve: bool,
    },
    /// List resources tracked in the state.
    State,
    /// Select an existing workspace.
    Workspace { name: String },
    /// Remove the local cache directory and the plan artifact.
    Clean,
}

pub type InfraResult<T> = Result<T, InfraError>;

#[derive(Debug, Error)]
pub enum InfraError {
    /// Bad arguments, `--help` included. Carries clap's rendered text.
    #[error("{0}")]
    Usage(String),
    #[error("{program} not found on PATH")]
    MissingTerraform { program: String },
    #[error("terraform {task} failed (exit status {code})")]
    Terraform { task: &'static str, code: i32 },
    #[error("failed to run {program}")]
    Command {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("destroy aborted: confirmation not given")]
    Aborted,
    #[error("failed to read confirmation")]
    Prompt(#[source] io::Error),
    #[error("failed to remove {}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InfraError {
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Parse `argv` without letting clap exit; every parse outcome other than
/// success becomes [`InfraError::Usage`].
pub fn parse_infra_args<I, T>(argv: I) -> InfraResult<InfraCli>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    InfraCli::try_parse_from(argv).map_err(|err| InfraError::Usage(err.render().to_string()))
}

/// Asks the operator to type the confirmation word; returns what was typed.
pub type ConfirmPrompt = fn(&str) -> io::Result<String>;

/// Interactive prompt backed by dialoguer.
pub fn dialoguer_prompt(expected: &str) -> io::Result<String> {
    dialoguer::Input::<String>::new()
        .with_prompt(format!("Type '{expected}' to destroy all managed resources"))
        .allow_empty(true)
        .interact_text()
}

pub struct Terraform<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
    dir: PathBuf,
    var_file: PathBuf,
    plan_file: PathBuf,
}

impl<'a> Terraform<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cli: &InfraCli) -> Self {
        Terraform {
            runner,
            program: cli.terraform.clone(),
            dir: cli.dir.clone(),
            var_file: cli.var_file.clone(),
            plan_file: cli.plan_file.clone(),
        }
    }

    pub fn run_task(&self, task: &Task, prompt: ConfirmPrompt) -> InfraResult<()> {
        if *task == Task::Clean {
            return self.clean();
        }
        if !self.runner.is_available(&self.program) {
            return Err(InfraError::MissingTerraform {
                program: self.program.clone(),
            });
        }
        match task {
            Task::Init => self.expect_success("init", vec!["init".into()]),
            Task::Validate => self.expect_success("validate", vec!["validate".into()]),
            Task::FmtCheck => self.expect_success(
                "fmt",
                vec!["fmt".into(), "-check".into(), "-recursive".into()],
            ),
            Task::Plan => {
                let mut args = vec!["plan".to_string(), format!("-out={}", self.plan_file.display())];
                args.extend(self.var_args());
                self.expect_success("plan", args)
            }
            Task::Apply => self.apply(),
            Task::Destroy { auto_approve } => self.destroy(*auto_approve, prompt),
            Task::State => self.expect_success("state", vec!["state".into(), "list".into()]),
            Task::Workspace { name } => self.expect_success(
                "workspace",
                vec!["workspace".into(), "select".into(), name.clone()],
            ),
            Task::Clean => self.clean(),
        }
    }

    fn var_args(&self) -> Vec<String> {
        if self.dir.join(&self.var_file).is_file() {
            vec![format!("-var-file={}", self.var_file.display())]
        } else {
            Vec::new()
        }
    }

    fn terraform(&self, args: Vec<String>) -> InfraResult<CommandOutput> {
        let invocation = Invocation::new(self.program.clone())
            .args(args)
            .current_dir(&self.dir)
            .streaming();
        info!(command = %invocation.display(), dir = %self.dir.display(), "running terraform");
        self.runner
            .run(&invocation)
            .map_err(|source| InfraError::Command {
                program: self.program.clone(),
                source,
            })
    }

    fn expect_success(&self, task: &'static str, args: Vec<String>) -> InfraResult<()> {
        let output = self.terraform(args)?;
        if output.success() {
            Ok(())
        } else {
            Err(InfraError::Terraform {
                task,
                code: output.code.unwrap_or(-1),
            })
        }
    }

    fn apply(&self) -> InfraResult<()> {
        if self.dir.join(&self.plan_file).is_file() {
            let output = self.terraform(vec![
                "apply".into(),
                self.plan_file.display().to_string(),
            ])?;
            if output.success() {
                return Ok(());
            }
            warn!(plan = %self.plan_file.display(), "saved plan could not be applied, applying fresh");
        } else {
            info!(plan = %self.plan_file.display(), "no saved plan, applying fresh");
        }
        let mut args = vec!["apply".to_string(), "-auto-approve".to_string()];
        args.extend(self.var_args());
        self.expect_success("apply", args)
    }

    fn destroy(&self, auto_approve: bool, prompt: ConfirmPrompt) -> InfraResult<()> {
        if !auto_approve {
            let typed = prompt(DESTROY_CONFIRMATION).map_err(InfraError::Prompt)?;
            if typed.trim() != DESTROY_CONFIRMATION {
                return Err(InfraError::Aborted);
            }
        }
        let mut args = vec!["destroy".to_string(), "-auto-approve".to_string()];
        args.extend(self.var_args());
        self.expect_success("destroy", args)
    }

    fn clean(&self) -> InfraResult<()> {
        remove_if_present(&self.dir.join(CACHE_DIR))?;
        remove_if_present(&self.dir.join(&self.plan_file))
    }
}

fn remove_if_present(path: &Path) -> InfraResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            info!(path = %path.display(), "removed");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(InfraError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}
