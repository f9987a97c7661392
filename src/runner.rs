// Process execution seam.
// Every external tool (the image CLI, `file`, `terraform`) is started through
// `CommandRunner` with a discrete argument vector; nothing goes through a
// shell. Tests swap in the mockall-generated `MockCommandRunner`.

use std::env;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Exit status the coreutils `timeout` wrapper uses when it kills a command.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for output pipes after a kill. A process that left the
/// group can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A single external command: program, argument vector and extra environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Hand the terminal to the child instead of capturing its output.
    pub stream: bool,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program and arguments joined for log lines. Never executed.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What came back from a finished (or killed) command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Set when the runner killed the process because its deadline passed.
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Either our own deadline fired or an outer `timeout` wrapper did.
    pub fn is_timeout(&self) -> bool {
        self.timed_out || self.code == Some(TIMEOUT_EXIT_CODE)
    }

    /// Best single line to show when the command failed.
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if text.is_empty() {
            "no output".to_string()
        } else {
            text.to_string()
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Whether `program` resolves to an executable file.
    fn is_available(&self, program: &str) -> bool;

    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Clone, Debug)]
pub struct SystemRunner {
    search_path: Option<OsString>,
}

impl SystemRunner {
    /// Capture `PATH` once; lookups never consult the live environment.
    pub fn from_env() -> Self {
        Self {
            search_path: env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn is_available(&self, program: &str) -> bool {
        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            return is_executable(candidate);
        }
        self.search_path
            .as_ref()
            .map(|paths| env::split_paths(paths).any(|dir| is_executable(&dir.join(program))))
            .unwrap_or(false)
    }

    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        debug!(command = %invocation.display(), "spawning");
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        if invocation.stream {
            command.stdin(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        // Deadline-bound commands lead their own process group so expiry can
        // take down everything they forked.
        if invocation.timeout.is_some() {
            own_process_group(&mut command);
        }

        let started = Instant::now();
        let mut child = command.spawn()?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match invocation.timeout {
            Some(limit) => wait_until(&mut child, started + limit)?,
            None => Some(child.wait()?),
        };
        let timed_out = status.is_none();
        if timed_out {
            warn!(command = %invocation.program, "killed after deadline");
        }

        let output = CommandOutput {
            code: status.and_then(|s| s.code()),
            timed_out,
            stdout: stdout.map(|rx| collect(rx, timed_out)).unwrap_or_default(),
            stderr: stderr.map(|rx| collect(rx, timed_out)).unwrap_or_default(),
        };
        debug!(
            command = %invocation.program,
            code = ?output.code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished"
        );
        Ok(output)
    }
}

/// Poll until the child exits or `deadline` passes; on expiry the child's
/// process group is killed, the child reaped and `None` returned.
fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_process_group(child);
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child's pid is its group id since it was spawned with process_group(0).
    if let Err(err) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        warn!(pid = child.id(), error = %err, "killpg failed, killing child only");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Output of a drain thread. After a kill the wait is bounded by
/// `DRAIN_GRACE` and whatever is still unread is dropped.
fn collect(rx: Receiver<String>, timed_out: bool) -> String {
    if timed_out {
        rx.recv_timeout(DRAIN_GRACE).unwrap_or_default()
    } else {
        rx.recv().unwrap_or_default()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
