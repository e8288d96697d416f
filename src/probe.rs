//! Bounded-time connectivity probe against a candidate server address
//!
//! One GET to `http://{host}:{port}/`, raced against a timer. The server
//! answers the probe with a body containing "connection success"; anything
//! else is classified, never treated as fatal.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

/// Default probe deadline.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for probe and workflow requests (avoids handshake
/// overhead across calls).
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

pub fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Outcome of one probe. `Success` is the only outcome after which the
/// endpoint may be committed; the prober itself persists nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Success,
    /// The server answered, but not with the expected probe body.
    UnexpectedResponse,
    /// The timer fired before the request settled.
    Timeout,
    /// Network error, DNS failure or connection refused.
    Unreachable,
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeResult::Success => write!(f, "Connection successful"),
            ProbeResult::UnexpectedResponse => write!(f, "Unexpected response from server"),
            ProbeResult::Timeout => write!(f, "Timed out waiting for the server"),
            ProbeResult::Unreachable => write!(f, "Could not reach the server"),
        }
    }
}

/// Classify a settled response body, lower-cased.
pub fn classify_body(body: &str) -> ProbeResult {
    if body.to_lowercase().contains("connection success") {
        ProbeResult::Success
    } else {
        ProbeResult::UnexpectedResponse
    }
}

/// Probe `http://{host}:{port}/` with the given deadline. Whichever of the
/// request and the timer settles first wins; the losing request future is
/// dropped, which closes its connection.
pub async fn probe(host: &str, port: &str, timeout: Duration) -> ProbeResult {
    let url = format!("http://{}:{}/", host.trim(), port.trim());
    log::info!("Probing {}", url);

    let request = async {
        match http_client().get(&url).send().await {
            Ok(response) => match response.text().await {
                Ok(body) => classify_body(&body),
                Err(e) => {
                    log::warn!("Probe body read failed: {}", e);
                    ProbeResult::Unreachable
                }
            },
            Err(e) => {
                log::warn!("Probe request failed: {}", e);
                ProbeResult::Unreachable
            }
        }
    };

    let result = tokio::select! {
        outcome = request => outcome,
        _ = tokio::time::sleep(timeout) => ProbeResult::Timeout,
    };

    log::info!("Probe result for {}: {:?}", url, result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_body_match_is_case_insensitive() {
        assert_eq!(classify_body("Connection Success!"), ProbeResult::Success);
        assert_eq!(
            classify_body("...CONNECTION SUCCESS..."),
            ProbeResult::Success
        );
    }

    #[test]
    fn other_bodies_classify_as_unexpected() {
        assert_eq!(classify_body("hello"), ProbeResult::UnexpectedResponse);
        assert_eq!(classify_body(""), ProbeResult::UnexpectedResponse);
    }

    #[test]
    fn result_display_is_user_readable() {
        assert!(ProbeResult::Timeout.to_string().contains("Timed out"));
        assert!(ProbeResult::Unreachable.to_string().contains("reach"));
    }
}
