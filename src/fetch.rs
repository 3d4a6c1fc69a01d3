use crate::auth::AuthToken;
use crate::digest::{Digest, HashingWriter};
use crate::error::{Error, Result};
use crate::manifest::Descriptor;
use crate::registry::Registry;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A verified layer blob on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLayer {
    pub digest: Digest,
    pub path: PathBuf,
}

/// Downloads layer blobs into a directory owned by the current run.
pub struct LayerFetcher<'a, R: ?Sized> {
    registry: &'a R,
    dir: &'a Path,
}

impl<'a, R: Registry + ?Sized> LayerFetcher<'a, R> {
    pub fn new(registry: &'a R, dir: &'a Path) -> Self {
        Self { registry, dir }
    }

    /// Streams one blob to disk and checks it against `descriptor`.
    ///
    /// The file only appears under its final name once its digest (and its
    /// size, when the descriptor declares one) match. On any failure nothing
    /// is left behind.
    pub fn fetch(
        &self,
        token: &AuthToken,
        repository: &str,
        descriptor: &Descriptor,
    ) -> Result<FetchedLayer> {
        let digest: Digest = descriptor.digest.parse().map_err(|reason| Error::Fetch {
            digest: descriptor.digest.clone(),
            reason,
        })?;
        let fetch_err = |reason: String| Error::Fetch {
            digest: digest.to_string(),
            reason,
        };

        let mut body = self.registry.blob(token, repository, &digest)?;
        let partial = NamedTempFile::new_in(self.dir)
            .map_err(|e| fetch_err(format!("cannot create file in {}: {e}", self.dir.display())))?;

        let mut writer = HashingWriter::new(partial, digest.algorithm());
        io::copy(&mut body, &mut writer)
            .map_err(|e| fetch_err(format!("download interrupted: {e}")))?;
        writer
            .flush()
            .map_err(|e| fetch_err(format!("write failed: {e}")))?;
        let (partial, actual, written) = writer.finish();

        if actual != digest {
            return Err(Error::Integrity {
                digest: digest.to_string(),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        if descriptor.size > 0 && written != descriptor.size {
            return Err(Error::Integrity {
                digest: digest.to_string(),
                expected: format!("{} bytes", descriptor.size),
                actual: format!("{written} bytes"),
            });
        }

        let path = self.dir.join(digest.file_name());
        partial
            .persist(&path)
            .map_err(|e| fetch_err(format!("cannot store {}: {}", path.display(), e.error)))?;
        debug!(%digest, bytes = written, path = %path.display(), "fetched layer");

        Ok(FetchedLayer { digest, path })
    }

    /// Fetches every layer in manifest order.
    pub fn fetch_all(
        &self,
        token: &AuthToken,
        repository: &str,
        layers: &[Descriptor],
    ) -> Result<Vec<FetchedLayer>> {
        layers
            .iter()
            .map(|descriptor| self.fetch(token, repository, descriptor))
            .collect()
    }
}
