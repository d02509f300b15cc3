use std::time::Duration;
use tracing::warn;

use crate::errors::GatewayError;

const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 529];

pub fn is_transient(status: reqwest::StatusCode) -> bool {
    TRANSIENT_STATUSES.contains(&status.as_u16())
}

/// 1s, 2s, 4s, ... capped at 32s.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(5))
}

/// Sends a request, retrying rate limits and overloads with exponential backoff.
///
/// `build_request` is called fresh on each attempt because `RequestBuilder`
/// is not cloneable. Network failures and other statuses fail immediately.
pub async fn send_with_retry(
    build_request: impl Fn() -> reqwest::RequestBuilder,
    provider_name: &str,
    max_retries: u32,
) -> Result<reqwest::Response, GatewayError> {
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        let response = build_request()
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "could not read body".into());

        if !is_transient(status) {
            return Err(GatewayError::Status { status: status.as_u16(), body });
        }

        last_error = format!("{} API error ({}): {}", provider_name, status, body);
        if attempt < max_retries {
            let delay = backoff(attempt);
            warn!(
                provider = provider_name,
                %status,
                attempt = attempt + 1,
                of = max_retries + 1,
                ?delay,
                "transient error, retrying: {}",
                body.chars().take(200).collect::<String>(),
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(GatewayError::RetriesExhausted { attempts: max_retries + 1, last: last_error })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(reqwest::StatusCode::from_u16(529).unwrap()));
        assert!(!is_transient(reqwest::StatusCode::UNAUTHORIZED));
        assert!(!is_transient(reqwest::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(9), Duration::from_secs(32));
    }
}
