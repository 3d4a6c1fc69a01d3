use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";
pub const DEFAULT_SERVICE: &str = "registry.docker.io";

/// Where to pull images from and how patiently.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the distribution API, without the `/v2` suffix.
    pub registry_url: String,
    /// Base URL of the token service, without the `/token` suffix.
    pub auth_url: String,
    /// `service` parameter sent to the token endpoint.
    pub service: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl RegistryConfig {
    pub fn token_url(&self, repository: &str) -> String {
        format!(
            "{}/token?service={}&scope=repository:{}:pull",
            self.auth_url.trim_end_matches('/'),
            self.service,
            repository
        )
    }

    pub fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url.trim_end_matches('/'),
            repository,
            reference
        )
    }

    pub fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.registry_url.trim_end_matches('/'),
            repository,
            digest
        )
    }
}

/// Bounded exponential backoff for retryable network failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_distribution_layout() {
        let config = RegistryConfig {
            registry_url: "http://127.0.0.1:5000/".into(),
            auth_url: "http://127.0.0.1:5001".into(),
            service: "test.registry".into(),
            ..RegistryConfig::default()
        };

        assert_eq!(
            config.token_url("library/alpine"),
            "http://127.0.0.1:5001/token?service=test.registry&scope=repository:library/alpine:pull"
        );
        assert_eq!(
            config.manifest_url("library/alpine", "3.19"),
            "http://127.0.0.1:5000/v2/library/alpine/manifests/3.19"
        );
        assert_eq!(
            config.blob_url("library/alpine", "sha256:abc"),
            "http://127.0.0.1:5000/v2/library/alpine/blobs/sha256:abc"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 10,
            base: Duration::from_millis(100),
            max: Duration::from_millis(700),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(700));
        assert_eq!(policy.delay(40), Duration::from_millis(700));
    }

    #[test]
    fn none_disables_retries() {
        assert_eq!(RetryPolicy::none().attempts, 0);
    }
}
