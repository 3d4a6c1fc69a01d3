use crate::config::{RegistryConfig, RetryPolicy};
use tracing::{debug, warn};
use ureq::Body;
use ureq::http::Response;

/// Blocking HTTP client with bounded retry.
///
/// Status codes are never turned into errors here; callers check them.
pub struct HttpClient {
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &RegistryConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            retry: config.retry.clone(),
        }
    }

    /// GET `url`, retrying transport failures and 429/5xx answers.
    pub fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response<Body>, ureq::Error> {
        let mut retry = 0;
        loop {
            debug!("GET {url}");
            let mut request = self.agent.get(url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let outcome = request.call();

            let reason = match &outcome {
                Ok(resp) if is_retryable_status(resp.status().as_u16()) => {
                    Some(format!("HTTP {}", resp.status().as_u16()))
                }
                Ok(_) => None,
                Err(e) => Some(e.to_string()),
            };
            let Some(reason) = reason else {
                return outcome;
            };
            if retry >= self.retry.attempts {
                return outcome;
            }
            let delay = self.retry.delay(retry);
            warn!(
                url,
                attempt = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "{reason}, retrying"
            );
            std::thread::sleep(delay);
            retry += 1;
        }
    }
}

fn is_retryable_status(code: u16) -> bool {
    code == 429 || code >= 500
}

/// `Content-Type` without parameters.
pub fn content_type(resp: &Response<Body>) -> Option<String> {
    resp.headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }
}
