use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::StimulusError;

/// Bounded retry: how many attempts and how long to sleep between them.
///
/// The sleep starts at `backoff` and doubles after every failed attempt,
/// up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy with a constant `backoff`; see [`RetryPolicy::with_max_backoff`].
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts,
            backoff,
            max_backoff: backoff,
        }
    }

    /// Let the sleep grow up to `max_backoff`.
    pub const fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        let grown = self.backoff.saturating_mul(1u32 << doublings);
        grown.min(self.max_backoff.max(self.backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_millis(50)).with_max_backoff(Duration::from_millis(500))
    }
}

/// What happened during an injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectReport {
    /// Chunks fully written before the connection ended.
    pub chunks_written: usize,
    /// The target hung up before all chunks were written.
    pub closed_early: bool,
}

/// Connect to `host:port`, retrying while the connection is refused.
async fn connect_with_retry(
    host: &str,
    port: u16,
    retry: RetryPolicy,
) -> Result<TcpStream, StimulusError> {
    let target = format!("{host}:{port}");
    let attempts = retry.attempts.max(1);
    let mut last = None;

    for attempt in 1..=attempts {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                tracing::trace!(%target, attempt, "connected");
                return Ok(stream);
            }
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                tracing::trace!(%target, attempt, "connection refused");
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(retry.delay(attempt)).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StimulusError::UnreachableTarget {
        target,
        attempts,
        last: last.unwrap_or_else(|| ErrorKind::ConnectionRefused.into()),
    })
}

/// Wait until something accepts connections on `host:port`.
///
/// The probe connection is closed again immediately.
pub async fn probe(host: &str, port: u16, retry: RetryPolicy) -> Result<(), StimulusError> {
    let stream = connect_with_retry(host, port, retry).await?;
    drop(stream);
    Ok(())
}

/// Connect to `host:port` and write `chunks` in order, sleeping
/// `inter_chunk_delay` between writes.
///
/// Refused connections are retried as `retry` allows. The target
/// closing the connection mid-way (broken pipe, reset) ends the injection
/// without error; the socket is closed on every path.
pub async fn connect_and_inject<C>(
    host: &str,
    port: u16,
    chunks: &[C],
    inter_chunk_delay: Duration,
    retry: RetryPolicy,
) -> Result<InjectReport, StimulusError>
where
    C: AsRef<[u8]>,
{
    let mut stream = connect_with_retry(host, port, retry).await?;
    let mut report = InjectReport {
        chunks_written: 0,
        closed_early: false,
    };

    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 && !inter_chunk_delay.is_zero() {
            tokio::time::sleep(inter_chunk_delay).await;
        }
        match stream.write_all(chunk.as_ref()).await {
            Ok(()) => report.chunks_written += 1,
            Err(e) if is_hangup(&e) => {
                tracing::debug!(
                    host, port, chunk = i, error = %e,
                    "target hung up during injection"
                );
                report.closed_early = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !report.closed_early {
        // The peer may already be gone; closing is all that matters.
        let _ = stream.shutdown().await;
    }
    tracing::debug!(host, port, ?report, "injection finished");
    Ok(report)
}

fn is_hangup(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(10))
    }

    /// Bind and release an ephemeral port so nothing is listening on it.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_inject_writes_all_chunks_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let chunks: Vec<&[u8]> = vec![b"\x00\x01", b"", b"garbage"];
        let delay = Duration::from_millis(1);
        let report = connect_and_inject("127.0.0.1", port, &chunks, delay, quick())
            .await
            .unwrap();
        assert_eq!(report.chunks_written, 3);
        assert!(!report.closed_early);
        assert_eq!(server.await.unwrap(), b"\x00\x01garbage");
    }

    #[tokio::test]
    async fn test_empty_injection_just_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received.len()
        });

        let chunks: Vec<Vec<u8>> = Vec::new();
        let report = connect_and_inject("127.0.0.1", port, &chunks, Duration::ZERO, quick())
            .await
            .unwrap();
        assert_eq!(report.chunks_written, 0);
        assert_eq!(server.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_target_is_unreachable() {
        let port = closed_port().await;
        let chunks = [b"x"];
        let err = connect_and_inject("127.0.0.1", port, &chunks, Duration::ZERO, quick())
            .await
            .unwrap_err();
        match err {
            StimulusError::UnreachableTarget { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected UnreachableTarget, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hangup_mid_injection_is_benign() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        // Keep writing until the closed socket pushes back.
        let chunk = vec![0xa5u8; 64 * 1024];
        let chunks = vec![chunk; 64];
        let delay = Duration::from_millis(5);
        let report = connect_and_inject("127.0.0.1", port, &chunks, delay, quick())
            .await
            .unwrap();
        server.await.unwrap();
        assert!(report.closed_early);
        assert!(report.chunks_written < chunks.len());
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let retry = RetryPolicy::new(10, Duration::from_millis(10))
            .with_max_backoff(Duration::from_millis(50));
        let delays: Vec<_> = (1..=5).map(|attempt| retry.delay(attempt)).collect();
        assert_eq!(
            delays,
            [10, 20, 40, 50, 50].map(Duration::from_millis).to_vec()
        );
        assert_eq!(retry.delay(u32::MAX), Duration::from_millis(50));
    }

    #[test]
    fn test_constant_backoff_stays_constant() {
        let retry = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(retry.delay(1), retry.delay(3));
    }

    #[tokio::test]
    async fn test_probe_waits_for_late_listener() {
        let port = closed_port().await;
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let _ = listener.accept().await;
        });

        probe("127.0.0.1", port, RetryPolicy::new(100, Duration::from_millis(10)))
            .await
            .unwrap();
        late.await.unwrap();
    }
}
