use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, DirBuilder, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tar::Archive;
use tempfile::TempDir;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Private scratch space of one run: downloaded layers and the root
/// filesystem they are unpacked into.
///
/// Everything is removed when the workspace is dropped.
pub struct Workspace {
    dir: TempDir,
    layers: PathBuf,
    rootfs: PathBuf,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        Self::create_in(std::env::temp_dir())
    }

    pub fn create_in(parent: impl AsRef<Path>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pullrun-")
            .tempdir_in(parent)
            .map_err(|e| Error::io("failed to create run directory", e))?;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::io("failed to restrict run directory", e))?;

        let layers = dir.path().join("layers");
        fs::create_dir(&layers).map_err(|e| Error::io("failed to create layer directory", e))?;
        let rootfs = dir.path().join("rootfs");

        debug!(path = %dir.path().display(), "created run directory");
        Ok(Self { dir, layers, rootfs })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn layers_dir(&self) -> &Path {
        &self.layers
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }
}

/// Unpacks `layers`, in order, into `root`.
///
/// Later layers overwrite whatever earlier ones wrote at the same path.
/// Whiteout markers are not interpreted. On error `root` is left
/// half-populated and must be discarded.
pub fn assemble<P: AsRef<Path>>(layers: &[P], root: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .map_err(|e| Error::Extraction {
            layer: root.to_path_buf(),
            reason: format!("cannot create root directory: {e}"),
        })?;

    for layer in layers {
        let layer = layer.as_ref();
        unpack_layer(layer, root).map_err(|reason| Error::Extraction {
            layer: layer.to_path_buf(),
            reason,
        })?;
        debug!(layer = %layer.display(), root = %root.display(), "unpacked layer");
    }
    Ok(())
}

fn unpack_layer(layer: &Path, root: &Path) -> std::result::Result<(), String> {
    let mut file = File::open(layer).map_err(|e| format!("cannot open layer: {e}"))?;

    let mut magic = [0u8; 2];
    let read = file
        .read(&mut magic)
        .map_err(|e| format!("cannot read layer: {e}"))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| format!("cannot rewind layer: {e}"))?;

    let reader = BufReader::new(file);
    if read == magic.len() && magic == GZIP_MAGIC {
        unpack(Archive::new(GzDecoder::new(reader)), root)
    } else {
        unpack(Archive::new(reader), root)
    }
}

fn unpack<R: Read>(mut archive: Archive<R>, root: &Path) -> std::result::Result<(), String> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);
    archive.set_unpack_xattrs(false);
    archive.unpack(root).map_err(|e| e.to_string())
}
