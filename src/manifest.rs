//! Manifest documents and their resolution to a single-platform image.

use crate::auth::AuthToken;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::reference::ImageReference;
use crate::registry::Registry;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// `Accept` header value for manifest requests.
pub const ACCEPT_MANIFESTS: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

/// Single-platform image manifest. Layers are in application order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Multi-platform indirection (Docker manifest list or OCI index).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub manifests: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestDocument {
    Image(Manifest),
    List(ManifestList),
}

impl ManifestDocument {
    /// Decodes a manifest body. The kind is taken from `content_type` when it
    /// names a manifest type, else from the body's `mediaType`, else from the
    /// shape of the document.
    pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::Manifest(format!("manifest is not valid JSON: {e}")))?;

        match value.get("schemaVersion").and_then(Value::as_u64) {
            Some(2) => {}
            Some(v) => {
                return Err(Error::Manifest(format!("unsupported schemaVersion {v}")));
            }
            None => return Err(Error::Manifest("missing schemaVersion".to_string())),
        }

        let media_type = content_type
            .filter(|ct| is_manifest_type(ct))
            .or_else(|| value.get("mediaType").and_then(Value::as_str));
        let is_list = match media_type {
            Some(DOCKER_MANIFEST_LIST | OCI_INDEX) => true,
            Some(DOCKER_MANIFEST | OCI_MANIFEST) => false,
            _ => value.get("manifests").is_some_and(Value::is_array),
        };

        if is_list {
            serde_json::from_value(value)
                .map(Self::List)
                .map_err(|e| Error::Manifest(format!("malformed manifest list: {e}")))
        } else {
            serde_json::from_value(value)
                .map(Self::Image)
                .map_err(|e| Error::Manifest(format!("malformed manifest: {e}")))
        }
    }
}

fn is_manifest_type(media_type: &str) -> bool {
    matches!(
        media_type,
        DOCKER_MANIFEST | DOCKER_MANIFEST_LIST | OCI_MANIFEST | OCI_INDEX
    )
}

/// Picks the entry to run on `platform`: the first match in list order.
pub fn select_platform<'a>(
    list: &'a ManifestList,
    platform: &Platform,
) -> Option<&'a ManifestEntry> {
    list.manifests
        .iter()
        .find(|entry| entry.platform.as_ref().is_some_and(|p| platform.accepts(p)))
}

/// Resolves `image` to a single-platform manifest, following at most one
/// manifest list.
pub fn resolve_manifest<R: Registry + ?Sized>(
    registry: &R,
    token: &AuthToken,
    image: &ImageReference,
    platform: &Platform,
) -> Result<Manifest> {
    let repository = image.repository();
    let pinned = image.digest.as_ref();
    let list = match fetch_document(registry, token, &repository, &image.reference(), pinned)? {
        ManifestDocument::Image(manifest) => return Ok(manifest),
        ManifestDocument::List(list) => list,
    };

    let entry = select_platform(&list, platform).ok_or_else(|| Error::UnsupportedPlatform {
        platform: platform.to_string(),
        available: list
            .manifests
            .iter()
            .filter_map(|e| e.platform.as_ref().map(Platform::to_string))
            .collect(),
    })?;
    let digest: Digest = entry.digest.parse().map_err(|reason: String| {
        Error::Manifest(format!("manifest list entry for {platform} is unusable: {reason}"))
    })?;
    debug!(%platform, %digest, "selected manifest list entry");

    let reference = digest.to_string();
    match fetch_document(registry, token, &repository, &reference, Some(&digest))? {
        ManifestDocument::Image(manifest) => Ok(manifest),
        ManifestDocument::List(_) => Err(Error::Manifest(format!(
            "manifest list entry {digest} is itself a manifest list"
        ))),
    }
}

/// Fetches and decodes one manifest document. A body requested by digest
/// must hash to `expected`.
fn fetch_document<R: Registry + ?Sized>(
    registry: &R,
    token: &AuthToken,
    repository: &str,
    reference: &str,
    expected: Option<&Digest>,
) -> Result<ManifestDocument> {
    let raw = registry.manifest(token, repository, reference)?;

    if let Some(expected) = expected {
        let actual = expected.recompute(&raw.body);
        if actual != *expected {
            return Err(Error::Integrity {
                digest: expected.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    ManifestDocument::decode(raw.content_type.as_deref(), &raw.body)
}
