use crate::auth::{self, AuthToken};
use crate::config::RegistryConfig;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::http::{self, HttpClient};
use crate::manifest::ACCEPT_MANIFESTS;
use std::io::Read;
use tracing::debug;

/// A manifest body exactly as the registry served it.
#[derive(Debug, Clone)]
pub struct RawManifest {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// The three distribution endpoints a pull needs.
#[cfg_attr(test, mockall::automock)]
pub trait Registry {
    /// Obtain a pull token for `repository`.
    fn token(&self, repository: &str) -> Result<AuthToken>;

    /// Fetch the manifest (or manifest list) named by a tag or digest.
    fn manifest(&self, token: &AuthToken, repository: &str, reference: &str)
    -> Result<RawManifest>;

    /// Open the body of a blob for streaming.
    fn blob(&self, token: &AuthToken, repository: &str, digest: &Digest)
    -> Result<Box<dyn Read>>;
}

/// [`Registry`] speaking the distribution HTTP API.
pub struct HttpRegistry {
    config: RegistryConfig,
    client: HttpClient,
}

impl HttpRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let client = HttpClient::new(&config);
        Self { config, client }
    }
}

impl Registry for HttpRegistry {
    fn token(&self, repository: &str) -> Result<AuthToken> {
        let url = self.config.token_url(repository);
        let mut resp = self
            .client
            .get(&url, &[])
            .map_err(|e| Error::Auth(format!("token request to {url} failed: {e}")))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(Error::Auth(format!("token endpoint answered HTTP {status}")));
        }
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| Error::Auth(format!("failed to read token response: {e}")))?;
        let token = auth::decode_token(&body)?;
        debug!(repository, "obtained pull token");
        Ok(token)
    }

    fn manifest(
        &self,
        token: &AuthToken,
        repository: &str,
        reference: &str,
    ) -> Result<RawManifest> {
        let url = self.config.manifest_url(repository, reference);
        let bearer = token.bearer();
        let mut resp = self
            .client
            .get(
                &url,
                &[("Authorization", bearer.as_str()), ("Accept", ACCEPT_MANIFESTS)],
            )
            .map_err(|e| Error::Network {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(Error::Manifest(format!(
                "{repository}:{reference} not available: HTTP {status}"
            )));
        }
        let content_type = http::content_type(&resp);
        let body = resp.body_mut().read_to_vec().map_err(|e| Error::Network {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        debug!(
            repository,
            reference,
            content_type = content_type.as_deref().unwrap_or("-"),
            bytes = body.len(),
            "fetched manifest"
        );
        Ok(RawManifest { content_type, body })
    }

    fn blob(
        &self,
        token: &AuthToken,
        repository: &str,
        digest: &Digest,
    ) -> Result<Box<dyn Read>> {
        let url = self.config.blob_url(repository, &digest.to_string());
        let bearer = token.bearer();
        let resp = self
            .client
            .get(&url, &[("Authorization", bearer.as_str())])
            .map_err(|e| Error::Fetch {
                digest: digest.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(Error::Fetch {
                digest: digest.to_string(),
                reason: format!("HTTP {}", resp.status().as_u16()),
            });
        }
        Ok(Box::new(resp.into_body().into_reader()))
    }
}
