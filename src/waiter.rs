//! Bounded polling for resources that become usable asynchronously.
//!
//! Semantics:
//! - The first attempt runs immediately; later attempts run every `interval`.
//! - A failed attempt is logged at `debug` and does not stop the loop.
//! - The loop gives up once `timeout` has elapsed, returning [`ProvisionError::Timeout`] with the
//!   last observed failure. It never times out before `timeout`.
//! - Cancellation interrupts the sleep between attempts and returns [`ProvisionError::Cancelled`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::credential::ConnectionCredential;
use crate::error::ProvisionError;

/// Poll `attempt` until it succeeds, times out, or `cancel` fires.
pub async fn poll_until_ready<T, F, Fut>(
    what: &str,
    mut attempt: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<T, ProvisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProvisionError>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut attempts = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        attempts += 1;
        let last = match attempt().await {
            Ok(value) => return Ok(value),
            Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
            Err(e) => e,
        };
        debug!(
            target: "hub_transport::provision",
            attempt = attempts,
            error = %last,
            "waiting the {what} to be ready..."
        );

        let now = Instant::now();
        if now >= deadline {
            return Err(ProvisionError::Timeout {
                elapsed: now - start,
                timeout,
                last: Box::new(last),
            });
        }

        let nap = interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
        }
    }
}

/// Wait for a connection credential to become readable.
pub async fn wait_for_credential<F, Fut>(
    getter: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ConnectionCredential, ProvisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ConnectionCredential, ProvisionError>>,
{
    poll_until_ready("transport connection credential", getter, interval, timeout, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::credential::PrincipalCredential;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    fn credential() -> ConnectionCredential {
        ConnectionCredential {
            bootstrap_server: "kafka:9092".into(),
            ca_cert: None,
            principal: PrincipalCredential::Anonymous,
        }
    }

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_poll_after_two_intervals() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let cred = wait_for_credential(
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProvisionError::not_ready("user secret missing"))
                    } else {
                        Ok(credential())
                    }
                }
            },
            Duration::from_secs(2),
            Duration::from_secs(600),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(cred, credential());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_or_after_the_limit() {
        let start = Instant::now();
        let err = wait_for_credential(
            || async { Err(ProvisionError::not_ready("still provisioning")) },
            Duration::from_secs(2),
            Duration::from_secs(601),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(601), "timed out early: {elapsed:?}");
        match err {
            ProvisionError::Timeout { timeout, last, elapsed: reported } => {
                assert_eq!(timeout, Duration::from_secs(601));
                assert!(reported >= timeout);
                assert!(last.is_not_ready());
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let (canceller, token) = cancel_pair();
        let handle = tokio::spawn(async move {
            wait_for_credential(
                || async { Err(ProvisionError::not_ready("nope")) },
                Duration::from_secs(2),
                Duration::from_secs(600),
                &token,
            )
            .await
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
        let res = handle.await.unwrap();
        assert!(res.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_are_logged_at_debug() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let calls = Arc::new(AtomicUsize::new(0));
        wait_for_credential(
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProvisionError::not_ready("kafka user not found"))
                    } else {
                        Ok(credential())
                    }
                }
            },
            Duration::from_secs(2),
            Duration::from_secs(600),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("DEBUG"));
        assert!(logs.contains("kafka user not found"));
        assert!(logs.contains("waiting the transport connection credential to be ready"));
    }
}
