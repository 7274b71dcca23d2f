//! Single-shot HTTP health probe.
//!
//! Performs one HTTP GET against an instance's health path and classifies
//! the outcome. Connection errors map to `Unreachable`, expired deadlines
//! to `Timeout`, and non-2xx responses carry their status code.

use std::time::{Duration, Instant};

use tracing::debug;

/// Why a probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The probe did not complete within its deadline.
    Timeout,
    /// The connection could not be established.
    Unreachable,
    /// The endpoint answered with a non-2xx status.
    Status(u16),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "timeout"),
            ProbeFailure::Unreachable => write!(f, "unreachable"),
            ProbeFailure::Status(code) => write!(f, "status {code}"),
        }
    }
}

/// Outcome of a single probe, with observed latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The health endpoint returned 2xx.
    Pass { latency: Duration },
    /// The probe failed; `reason` says how.
    Fail {
        reason: ProbeFailure,
        latency: Duration,
    },
}

impl ProbeOutcome {
    /// Whether this outcome counts as a success for hysteresis.
    pub fn is_pass(&self) -> bool {
        matches!(self, ProbeOutcome::Pass { .. })
    }
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Pass` for a 2xx response, `Fail { Status }` for any other
/// status, `Fail { Unreachable }` if the connection cannot be established,
/// and `Fail { Timeout }` if the whole exchange exceeds `timeout`.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeOutcome {
    let uri = format!("http://{address}{path}");
    let started = Instant::now();

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return Err(ProbeFailure::Unreachable);
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return Err(ProbeFailure::Unreachable);
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "switchyard-probe/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .expect("static request parts are valid");

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "probe non-2xx");
                Err(ProbeFailure::Status(resp.status().as_u16()))
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                Err(ProbeFailure::Unreachable)
            }
        }
    })
    .await;

    let latency = started.elapsed();
    match result {
        Ok(Ok(())) => ProbeOutcome::Pass { latency },
        Ok(Err(reason)) => ProbeOutcome::Fail { reason, latency },
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeOutcome::Fail {
                reason: ProbeFailure::Timeout,
                latency,
            }
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn parse_duration_seconds() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_duration_milliseconds() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
    }

    #[test]
    fn parse_duration_minutes() {
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn parse_duration_plain_number_as_seconds() {
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn parse_duration_garbage_is_none() {
        assert_eq!(parse_duration("soon"), None);
    }

    #[tokio::test]
    async fn probe_to_closed_port_is_unreachable() {
        let outcome = http_probe("127.0.0.1:1", "/healthz", Duration::from_millis(200)).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Fail {
                reason: ProbeFailure::Unreachable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn probe_to_silent_server_times_out() {
        // A listener that accepts but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                // Hold the socket open without responding.
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    drop(socket);
                });
            }
        });

        let outcome =
            http_probe(&addr.to_string(), "/healthz", Duration::from_millis(100)).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Fail {
                reason: ProbeFailure::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn probe_classifies_status_codes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    use tokio::io::AsyncReadExt;
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                        .await;
                });
            }
        });

        let outcome = http_probe(&addr.to_string(), "/healthz", Duration::from_secs(1)).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Fail {
                reason: ProbeFailure::Status(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn probe_passes_on_2xx() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    use tokio::io::AsyncReadExt;
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                        .await;
                });
            }
        });

        let outcome = http_probe(&addr.to_string(), "/healthz", Duration::from_secs(1)).await;
        assert!(outcome.is_pass());
    }

    #[test]
    fn failure_reasons_display() {
        assert_eq!(ProbeFailure::Timeout.to_string(), "timeout");
        assert_eq!(ProbeFailure::Unreachable.to_string(), "unreachable");
        assert_eq!(ProbeFailure::Status(503).to_string(), "status 503");
    }
}
