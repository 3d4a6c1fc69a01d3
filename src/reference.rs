use crate::digest::Digest;
use crate::error::{Error, Result};
use std::fmt;

pub const DEFAULT_TAG: &str = "latest";

/// Namespace Docker Hub files single-component names under.
const OFFICIAL_NAMESPACE: &str = "library";

/// An image as named on the command line: `name[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub name: String,
    pub tag: String,
    pub digest: Option<Digest>,
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                let digest = digest.parse::<Digest>().map_err(|e| invalid(e.as_str()))?;
                (rest, Some(digest))
            }
            None => (input, None),
        };

        // A ':' before the last '/' belongs to a host:port, not a tag.
        let name_start = rest.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match rest[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&rest[..split], &rest[split + 1..])
            }
            None => (rest, DEFAULT_TAG),
        };

        if name.is_empty() {
            return Err(invalid("image name is empty"));
        }
        if tag.is_empty() {
            return Err(invalid("tag is empty"));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("image name contains whitespace or control characters"));
        }
        if let Some((first, _)) = name.split_once('/') {
            if first.contains(['.', ':']) || first == "localhost" {
                return Err(invalid(
                    "names a registry host; select the registry with --registry instead",
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }

    /// Repository path used in registry URLs and token scopes.
    pub fn repository(&self) -> String {
        if self.name.contains('/') {
            self.name.clone()
        } else {
            format!("{OFFICIAL_NAMESPACE}/{}", self.name)
        }
    }

    /// What to ask the manifest endpoint for: the digest pin if any, else the tag.
    pub fn reference(&self) -> String {
        match &self.digest {
            Some(digest) => digest.to_string(),
            None => self.tag.clone(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
