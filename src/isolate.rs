use crate::error::{Error, Result};
use nix::fcntl::OFlag;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// The privileged primitives isolation is built from.
#[cfg_attr(test, mockall::automock)]
pub trait IsolationBackend {
    /// Make `root` the filesystem root of the calling process and move into it.
    fn change_root(&self, root: &Path) -> Result<()>;

    /// Place children spawned from now on into a fresh PID namespace.
    fn new_pid_namespace(&self) -> Result<()>;
}

/// chroot(2) + unshare(2).
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxBackend;

#[cfg(target_os = "linux")]
impl IsolationBackend for LinuxBackend {
    fn change_root(&self, root: &Path) -> Result<()> {
        nix::unistd::chroot(root)
            .map_err(|e| Error::Isolation(format!("chroot to {}: {e}", root.display())))?;
        nix::unistd::chdir("/").map_err(|e| Error::Isolation(format!("chdir to new root: {e}")))?;
        Ok(())
    }

    fn new_pid_namespace(&self) -> Result<()> {
        nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWPID)
            .map_err(|e| Error::Isolation(format!("unshare PID namespace: {e}")))
    }
}

/// Backend that isolates nothing. Usable without privileges.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl IsolationBackend for NoopBackend {
    fn change_root(&self, root: &Path) -> Result<()> {
        debug!(root = %root.display(), "noop backend: root left unchanged");
        Ok(())
    }

    fn new_pid_namespace(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub fn default_backend() -> LinuxBackend {
    LinuxBackend
}

/// Confines the calling process to an assembled root filesystem.
pub struct Isolator<B> {
    backend: B,
    pid_namespace: bool,
}

impl<B: IsolationBackend> Isolator<B> {
    pub fn new(backend: B, pid_namespace: bool) -> Self {
        Self {
            backend,
            pid_namespace,
        }
    }

    /// Changes the process root to `root` and, if configured, unshares the
    /// PID namespace.
    ///
    /// Irreversible: afterwards every path, relative ones included, resolves
    /// inside `root`.
    pub fn enter(&self, root: &Path) -> Result<()> {
        create_null_placeholder(root)?;
        self.backend.change_root(root)?;
        debug!(root = %root.display(), "changed root");
        if self.pid_namespace {
            self.backend.new_pid_namespace()?;
            debug!("unshared PID namespace");
        }
        Ok(())
    }
}

/// Ensures `<root>/dev/null` exists. It is an ordinary empty file, not a
/// device; layers that ship a real node keep it.
///
/// This runs before the root change, so nothing here may follow a link the
/// image planted: `dev` must be a real directory and `null` is opened with
/// `O_NOFOLLOW`.
fn create_null_placeholder(root: &Path) -> Result<()> {
    let dev = root.join("dev");
    match fs::symlink_metadata(&dev) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(Error::Isolation(format!(
                "{} in the image is not a directory",
                dev.display()
            )));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir(&dev)
                .map_err(|e| Error::Isolation(format!("cannot create {}: {e}", dev.display())))?;
        }
        Err(e) => {
            return Err(Error::Isolation(format!("cannot inspect {}: {e}", dev.display())));
        }
    }

    let null = dev.join("null");
    if fs::symlink_metadata(&null).is_ok() {
        return Ok(());
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o666)
        .custom_flags(OFlag::O_NOFOLLOW.bits())
        .open(&null)
        .map_err(|e| Error::Isolation(format!("cannot create {}: {e}", null.display())))?;
    // The process umask may have stripped write bits.
    file.set_permissions(fs::Permissions::from_mode(0o666))
        .map_err(|e| Error::Isolation(format!("cannot chmod {}: {e}", null.display())))?;
    Ok(())
}
