//! Health polling against the engine's HTTP endpoint.
//!
//! The engine is considered serviceable when
//! `GET <url>/_cluster/health?wait_for_status=yellow` answers HTTP 200. Until
//! then the probe is retried at a fixed interval; transport-level failures
//! (the engine not yet accepting connections) are swallowed and retried.
//!
//! The wait is bounded two ways: the outer cancellation token ends it with a
//! plain [`SearchboxError::Cancelled`], while expiry of the configured
//! timeout (layered over a child of the outer token, never replacing it)
//! produces the distinguished [`SearchboxError::HealthTimeout`] wrapping the
//! last observed cause.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::{SearchboxError, SearchboxResult};

/// Fixed delay between probe attempts.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-request budget, kept well under the poll timeout so a hung connection
/// cannot stall the loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll until the engine reports a serviceable status, the wait budget
/// expires, or the outer token fires.
pub(crate) async fn wait_for_healthy(
    base_url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> SearchboxResult<()> {
    let status_url = format!("{base_url}/_cluster/health?wait_for_status=yellow");
    let poll_token = cancel.child_token();
    let last_cause = Arc::new(Mutex::new(String::from("no probe completed")));

    let agent = probe_agent();
    let poll = poll_until_ok(agent, status_url, Arc::clone(&last_cause), poll_token.clone());

    tokio::select! {
        _ = cancel.cancelled() => Err(SearchboxError::Cancelled),
        outcome = tokio::time::timeout(timeout, poll) => match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                poll_token.cancel();
                let cause = last_cause.lock().map(|c| c.clone()).unwrap_or_default();
                Err(SearchboxError::HealthTimeout { timeout, cause })
            }
        },
    }
}

fn probe_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(REQUEST_TIMEOUT))
        .build();
    ureq::Agent::new_with_config(config)
}

async fn poll_until_ok(
    agent: ureq::Agent,
    url: String,
    last_cause: Arc<Mutex<String>>,
    poll_token: CancellationToken,
) -> SearchboxResult<()> {
    loop {
        if poll_token.is_cancelled() {
            return Err(SearchboxError::Cancelled);
        }
        let probe_agent = agent.clone();
        let probe_url = url.clone();
        let outcome = tokio::task::spawn_blocking(move || probe_once(&probe_agent, &probe_url))
            .await
            .map_err(|e| SearchboxError::Internal(format!("health probe task failed: {e}")))?;

        match outcome {
            Ok(200) => return Ok(()),
            Ok(status) => {
                if let Ok(mut cause) = last_cause.lock() {
                    *cause = format!("engine reported HTTP {status}");
                }
            }
            Err(err) => {
                // Not yet accepting connections; retried silently.
                tracing::trace!(error = %err, "health probe not yet reachable");
                if let Ok(mut cause) = last_cause.lock() {
                    *cause = format!("probe failed: {err}");
                }
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn probe_once(agent: &ureq::Agent, url: &str) -> Result<u16, ureq::Error> {
    let response = agent.get(url).call()?;
    Ok(response.status().as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    /// Answer `responses.len()` connections with the given HTTP statuses,
    /// then stop accepting.
    fn serve_statuses(responses: Vec<u16>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for status in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let reason = if status == 200 { "OK" } else { "Service Unavailable" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn succeeds_after_transient_non_ok_statuses() {
        let url = serve_statuses(vec![503, 503, 200]);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        wait_for_healthy(&url, Duration::from_secs(10), &cancel)
            .await
            .unwrap();

        // Two failed polls cost at least two poll intervals.
        assert!(started.elapsed() >= POLL_INTERVAL * 2);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn connection_failures_are_retried_until_timeout() {
        // Bind then drop to get a port that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(400);
        let started = Instant::now();
        let err = wait_for_healthy(&format!("http://{addr}"), timeout, &cancel)
            .await
            .unwrap_err();

        assert!(
            matches!(err, SearchboxError::HealthTimeout { timeout: t, .. } if t == timeout),
            "got {err}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn never_healthy_times_out_with_last_cause() {
        let url = serve_statuses(vec![503; 32]);
        let cancel = CancellationToken::new();

        let err = wait_for_healthy(&url, Duration::from_millis(400), &cancel)
            .await
            .unwrap_err();
        match err {
            SearchboxError::HealthTimeout { cause, .. } => {
                assert!(cause.contains("503"), "cause was: {cause}");
            }
            other => panic!("expected HealthTimeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn outer_cancellation_is_not_a_timeout() {
        let url = serve_statuses(vec![503; 32]);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let err = wait_for_healthy(&url, Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled(), "got {err}");
    }
}
