use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::fetch::LayerFetcher;
use crate::isolate::{IsolationBackend, Isolator};
use crate::launch::ProcessLauncher;
use crate::manifest::resolve_manifest;
use crate::platform::Platform;
use crate::reference::ImageReference;
use crate::registry::{HttpRegistry, Registry};
use crate::rootfs::{Workspace, assemble};
use nix::fcntl::OFlag;
use nix::sched::{CloneFlags, clone};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::pipe2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::FromRawFd;
use std::path::Path;
use tracing::{debug, info};

const STACK_SIZE: usize = 1024 * 1024; // 1MB stack

/// Where a run is in the pipeline. Runs only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Authenticated,
    ManifestResolved,
    LayersFetched,
    FilesystemAssembled,
    Isolated,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Authenticated => "authenticated",
            Stage::ManifestResolved => "manifest-resolved",
            Stage::LayersFetched => "layers-fetched",
            Stage::FilesystemAssembled => "filesystem-assembled",
            Stage::Isolated => "isolated",
            Stage::Executing => "executing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct RunState {
    stage: Stage,
    failed_in: Option<Stage>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            stage: Stage::Init,
            failed_in: None,
        }
    }

    // The helper process picks the run up where its parent left it.
    fn resume_at(stage: Stage) -> Self {
        Self {
            stage,
            failed_in: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The stage that was current when the run failed.
    pub fn failed_in(&self) -> Option<Stage> {
        self.failed_in
    }

    pub fn advance(&mut self, to: Stage) {
        debug_assert!(
            to > self.stage && self.stage < Stage::Completed,
            "illegal transition {} -> {to}",
            self.stage
        );
        info!(from = %self.stage, to = %to, "stage");
        self.stage = to;
    }

    /// Records `err` against the current stage and passes it on.
    pub fn fail(&mut self, err: Error) -> Error {
        if self.stage < Stage::Completed {
            debug!(stage = %self.stage, "run failed: {err}");
            self.failed_in = Some(self.stage);
            self.stage = Stage::Failed;
        }
        err
    }
}

/// Everything needed for one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub image: ImageReference,
    pub command: String,
    pub args: Vec<String>,
    pub registry: RegistryConfig,
    pub platform: Platform,
    pub pid_namespace: bool,
}

/// Authenticates, resolves, downloads and unpacks `image` into
/// `workspace.rootfs()`.
pub fn pull_image<R: Registry + ?Sized>(
    registry: &R,
    image: &ImageReference,
    platform: &Platform,
    workspace: &Workspace,
    state: &mut RunState,
) -> Result<()> {
    let repository = image.repository();

    let token = registry.token(&repository).map_err(|e| state.fail(e))?;
    state.advance(Stage::Authenticated);

    let manifest = resolve_manifest(registry, &token, image, platform).map_err(|e| state.fail(e))?;
    state.advance(Stage::ManifestResolved);

    let fetcher = LayerFetcher::new(registry, workspace.layers_dir());
    let layers = fetcher
        .fetch_all(&token, &repository, &manifest.layers)
        .map_err(|e| state.fail(e))?;
    state.advance(Stage::LayersFetched);

    let paths: Vec<&Path> = layers.iter().map(|l| l.path.as_path()).collect();
    assemble(&paths, workspace.rootfs()).map_err(|e| state.fail(e))?;
    state.advance(Stage::FilesystemAssembled);

    info!(%image, layers = layers.len(), root = %workspace.rootfs().display(), "image assembled");
    Ok(())
}

/// Runs `launcher` inside `root` from a helper process and returns its exit
/// code.
///
/// The helper is the process that gets isolated; the caller keeps its own
/// root so it can still clean up afterwards. If the helper fails before or
/// while starting the command, that failure is returned here as the same
/// [`Error`] the helper saw.
pub fn supervise<B: IsolationBackend>(
    isolator: &Isolator<B>,
    root: &Path,
    launcher: &ProcessLauncher,
) -> Result<i32> {
    let (report_rx, report_tx) = report_pipe()?;
    let mut stack = vec![0u8; STACK_SIZE];

    let child_pid = unsafe {
        clone(
            Box::new(|| container_init(isolator, root, launcher, &report_tx)),
            &mut stack,
            CloneFlags::empty(),
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| Error::Isolation(format!("clone: {e}")))?;
    drop(report_tx);

    info!(pid = child_pid.as_raw(), "container started");

    let status =
        waitpid(child_pid, None).map_err(|e| Error::Isolation(format!("waitpid: {e}")))?;
    if let Some(failure) = read_report(report_rx) {
        return Err(failure.into_error());
    }
    helper_exit_code(status, launcher.command())
}

// The write end is close-on-exec, so only the helper itself holds it once the
// command runs.
fn report_pipe() -> Result<(File, File)> {
    let (rx, tx) = pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::Isolation(format!("pipe: {e}")))?;
    // SAFETY: both descriptors were just created and have no other owner.
    Ok(unsafe { (File::from_raw_fd(rx), File::from_raw_fd(tx)) })
}

fn helper_exit_code(status: WaitStatus, command: &str) -> Result<i32> {
    match status {
        WaitStatus::Exited(_, code) => Ok(code),
        WaitStatus::Signaled(_, signal, _) => Err(Error::ChildExit {
            command: command.to_string(),
            status: format!("container init killed by {signal}"),
            code: None,
        }),
        other => Err(Error::ChildExit {
            command: command.to_string(),
            status: format!("{other:?}"),
            code: None,
        }),
    }
}

/// A helper-side failure, serialized to the parent.
#[derive(Debug, Serialize, Deserialize)]
enum HelperFailure {
    Isolation(String),
    Spawn {
        command: String,
        errno: Option<i32>,
        message: String,
    },
    ChildExit {
        command: String,
        status: String,
        code: Option<i32>,
    },
}

impl HelperFailure {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::Spawn { command, source } => Self::Spawn {
                command: command.clone(),
                errno: source.raw_os_error(),
                message: source.to_string(),
            },
            Error::ChildExit {
                command,
                status,
                code,
            } => Self::ChildExit {
                command: command.clone(),
                status: status.clone(),
                code: *code,
            },
            Error::Isolation(message) => Self::Isolation(message.clone()),
            other => Self::Isolation(other.to_string()),
        }
    }

    fn into_error(self) -> Error {
        match self {
            Self::Isolation(message) => Error::Isolation(message),
            Self::Spawn {
                command,
                errno,
                message,
            } => Error::Spawn {
                command,
                source: errno
                    .map_or_else(|| io::Error::other(message), io::Error::from_raw_os_error),
            },
            Self::ChildExit {
                command,
                status,
                code,
            } => Error::ChildExit {
                command,
                status,
                code,
            },
        }
    }
}

fn send_report<W: Write>(mut report: W, err: &Error) {
    if let Err(e) = serde_json::to_writer(&mut report, &HelperFailure::from_error(err)) {
        debug!("cannot report failure to parent: {e}");
    }
}

fn read_report<R: Read>(mut report: R) -> Option<HelperFailure> {
    let mut buf = String::new();
    report.read_to_string(&mut buf).ok()?;
    if buf.is_empty() {
        return None;
    }
    serde_json::from_str(&buf).ok()
}

// Runs in the helper process; its return value is the helper's exit status.
fn container_init<B: IsolationBackend, W: Write>(
    isolator: &Isolator<B>,
    root: &Path,
    launcher: &ProcessLauncher,
    report: W,
) -> isize {
    let mut state = RunState::resume_at(Stage::FilesystemAssembled);

    if let Err(e) = isolator.enter(root) {
        send_report(report, &e);
        return state.fail(e).exit_code() as isize;
    }
    state.advance(Stage::Isolated);

    state.advance(Stage::Executing);
    match launcher.run() {
        Ok(child) => {
            state.advance(Stage::Completed);
            child.exit_code as isize
        }
        Err(e) => {
            send_report(report, &e);
            state.fail(e).exit_code() as isize
        }
    }
}

/// Pulls `options.image` and runs the command in it. Returns the command's
/// exit code; the run directory is gone by the time this returns.
pub fn run_container<B: IsolationBackend>(options: &RunOptions, backend: B) -> Result<i32> {
    let mut state = RunState::new();
    let workspace = Workspace::create().map_err(|e| state.fail(e))?;

    let registry = HttpRegistry::new(options.registry.clone());
    pull_image(
        &registry,
        &options.image,
        &options.platform,
        &workspace,
        &mut state,
    )?;

    let isolator = Isolator::new(backend, options.pid_namespace);
    let launcher = ProcessLauncher::new(&options.command, options.args.clone());
    let code = supervise(&isolator, workspace.rootfs(), &launcher).map_err(|e| state.fail(e))?;
    state.advance(Stage::Completed);

    info!(exit_code = code, "container exited");
    Ok(code)
}
