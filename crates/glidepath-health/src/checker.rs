//! Probe execution and threshold tracking.

use std::time::Duration;

use tracing::{debug, warn};

use glide_core::{ProbeAction, ProbeSpec};
use glidepath_state::HealthVerdict;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// HTTP 2xx/3xx, or the TCP connect succeeded.
    Healthy,
    /// HTTP status outside 200..400.
    Unhealthy,
    /// Connection error or timeout.
    Failed,
}

impl ProbeResult {
    pub fn is_success(self) -> bool {
        self == ProbeResult::Healthy
    }
}

/// Where and how to probe one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub action: ProbeAction,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn new(host: &str, spec: &ProbeSpec) -> Self {
        Self {
            host: host.to_string(),
            action: spec.action.clone(),
            timeout: Duration::from_secs(u64::from(spec.timeout_seconds.max(1))),
        }
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.action.port())
    }
}

/// Consecutive probe results for one revision.
#[derive(Debug)]
pub struct HealthTracker {
    verdict: HealthVerdict,
    consecutive_failures: u32,
    consecutive_successes: u32,
    success_threshold: u32,
    failure_threshold: u32,
}

impl HealthTracker {
    pub fn new(spec: &ProbeSpec) -> Self {
        Self::with_thresholds(spec.success_threshold, spec.failure_threshold)
    }

    pub fn with_thresholds(success_threshold: u32, failure_threshold: u32) -> Self {
        Self {
            verdict: HealthVerdict::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            success_threshold: success_threshold.max(1),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Record a probe result and return the verdict after it.
    pub fn record(&mut self, result: ProbeResult) -> HealthVerdict {
        if result.is_success() {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            if self.consecutive_successes >= self.success_threshold
                && self.verdict != HealthVerdict::Passing
            {
                debug!(successes = self.consecutive_successes, "verdict passing");
                self.verdict = HealthVerdict::Passing;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.failure_threshold
                && self.verdict != HealthVerdict::Failing
            {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.failure_threshold,
                    "verdict failing"
                );
                self.verdict = HealthVerdict::Failing;
            }
        }
        self.verdict
    }

    pub fn verdict(&self) -> HealthVerdict {
        self.verdict
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }
}

/// Run the probe a target describes.
pub async fn probe(target: &ProbeTarget) -> ProbeResult {
    let address = target.address();
    match &target.action {
        ProbeAction::HttpGet { path, .. } => http_probe(&address, path, target.timeout).await,
        ProbeAction::TcpSocket { .. } => tcp_probe(&address, target.timeout).await,
    }
}

/// HTTP GET probe. Any status in 200..400 counts as success.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "glidepath-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "invalid probe request");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status.is_redirection() {
                    ProbeResult::Healthy
                } else {
                    debug!(%status, %uri, "probe returned failure status");
                    ProbeResult::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%uri, "probe timed out");
        ProbeResult::Failed
    })
}

/// TCP probe: success when a connection opens within `timeout`.
pub async fn tcp_probe(address: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
        Ok(Ok(_)) => ProbeResult::Healthy,
        Ok(Err(e)) => {
            debug!(error = %e, %address, "tcp probe failed");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%address, "tcp probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP status on an ephemeral port.
    async fn serve_status(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[test]
    fn tracker_starts_unknown() {
        let tracker = HealthTracker::new(&ProbeSpec::new(ProbeAction::TcpSocket { port: 27017 }));
        assert_eq!(tracker.verdict(), HealthVerdict::Unknown);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn default_thresholds_pass_on_first_success() {
        let mut tracker =
            HealthTracker::new(&ProbeSpec::new(ProbeAction::TcpSocket { port: 27017 }));
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthVerdict::Passing);
    }

    #[test]
    fn failing_needs_consecutive_failures() {
        let mut tracker = HealthTracker::with_thresholds(1, 3);
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Unhealthy);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.verdict(), HealthVerdict::Passing);

        // A success in between resets the count.
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.verdict(), HealthVerdict::Passing);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthVerdict::Failing);
    }

    #[test]
    fn recovery_needs_success_threshold() {
        let mut tracker = HealthTracker::with_thresholds(3, 1);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthVerdict::Failing);
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.verdict(), HealthVerdict::Failing);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthVerdict::Passing);
        assert_eq!(tracker.consecutive_successes(), 3);
    }

    #[test]
    fn zero_thresholds_clamp_to_one() {
        let mut tracker = HealthTracker::with_thresholds(0, 0);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthVerdict::Failing);
    }

    #[test]
    fn target_address_uses_probe_port() {
        let spec = ProbeSpec::new(ProbeAction::HttpGet {
            path: "/health".to_string(),
            port: 8079,
        });
        let target = ProbeTarget::new("front-end-canary.shop.svc", &spec);
        assert_eq!(target.address(), "front-end-canary.shop.svc:8079");
        assert_eq!(target.timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn http_probe_success_and_redirect() {
        let ok = serve_status("200 OK").await;
        assert_eq!(
            http_probe(&ok, "/health", Duration::from_secs(2)).await,
            ProbeResult::Healthy
        );
        let redirect = serve_status("302 Found").await;
        assert_eq!(
            http_probe(&redirect, "/health", Duration::from_secs(2)).await,
            ProbeResult::Healthy
        );
    }

    #[tokio::test]
    async fn http_probe_server_error_is_unhealthy() {
        let addr = serve_status("503 Service Unavailable").await;
        assert_eq!(
            http_probe(&addr, "/health", Duration::from_secs(2)).await,
            ProbeResult::Unhealthy
        );
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_returns_failed() {
        let result = http_probe("127.0.0.1:1", "/health", Duration::from_millis(200)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn tcp_probe_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert_eq!(
            tcp_probe(&addr, Duration::from_secs(1)).await,
            ProbeResult::Healthy
        );
        drop(listener);
        assert_eq!(
            tcp_probe("127.0.0.1:1", Duration::from_millis(200)).await,
            ProbeResult::Failed
        );
    }
}
