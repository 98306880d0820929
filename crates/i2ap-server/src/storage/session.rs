//! Session-per-operation plumbing shared by the FTP and SFTP stores
//!
//! Both client libraries are synchronous. Every store operation opens a
//! session on a blocking thread, runs, and closes it. Transient failures are
//! retried with a linearly growing delay; a missing object is reported
//! immediately.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{StorageError, StorageResult};

/// Maximum number of attempts for one remote operation
pub const MAX_RETRIES: u32 = 3;

/// Base delay between attempts; attempt `n` waits `n` times this
pub const RETRY_DELAY_SECS: u64 = 5;

/// A blocking connection that lives for one operation
pub(crate) trait BlockingSession: Sized {
    type Settings: Clone + Send + 'static;

    /// Protocol name for logs and error messages
    const PROTOCOL: &'static str;

    fn open(settings: &Self::Settings) -> StorageResult<Self>;

    /// Log out; failures here only get a warning
    fn close(self);
}

/// Run `op` in a fresh session, retrying transient failures.
pub(crate) async fn run_with_retry<S, T, F>(
    settings: &S::Settings,
    retry_delay: Duration,
    operation: &'static str,
    op: F,
) -> StorageResult<T>
where
    S: BlockingSession + 'static,
    T: Send + 'static,
    F: Fn(&mut S) -> StorageResult<T> + Send + Sync + 'static,
{
    let op = Arc::new(op);

    for attempt in 1..=MAX_RETRIES {
        debug!("{} {} attempt {}/{}", S::PROTOCOL, operation, attempt, MAX_RETRIES);

        let settings = settings.clone();
        let op = Arc::clone(&op);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut session = S::open(&settings)?;
            let result = op(&mut session);
            session.close();
            result
        })
        .await;

        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_not_found() => return Err(e),
            Ok(Err(e)) if attempt < MAX_RETRIES => {
                let delay = retry_delay * attempt;
                warn!(
                    "{} {} attempt {}/{} failed: {}. Retrying in {:?}...",
                    S::PROTOCOL,
                    operation,
                    attempt,
                    MAX_RETRIES,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            },
            Ok(Err(e)) => {
                return Err(StorageError::Backend(format!(
                    "{} {} failed after {} attempts: {}",
                    S::PROTOCOL,
                    operation,
                    MAX_RETRIES,
                    e
                )));
            },
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "{} {} task panicked: {}",
                    S::PROTOCOL,
                    operation,
                    e
                )));
            },
        }
    }

    Err(StorageError::Backend(format!(
        "{} {} was never attempted",
        S::PROTOCOL,
        operation
    )))
}

/// Host and port from an endpoint such as `sftp://files.example.com:2222/`
pub(crate) fn split_endpoint(endpoint: Option<&str>, scheme: &str, default_port: u16) -> (String, u16) {
    let endpoint = endpoint.unwrap_or("localhost");
    let endpoint = endpoint
        .strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
        .unwrap_or(endpoint)
        .trim_end_matches('/');
    match endpoint.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(default_port)),
        None => (endpoint.to_string(), default_port),
    }
}

pub(crate) fn remote_path(bucket: &str, key: &str) -> String {
    format!("/{}/{}", bucket.trim_matches('/'), key.trim_start_matches('/'))
}

pub(crate) fn bucket_dir(bucket: &str) -> String {
    format!("/{}", bucket.trim_matches('/'))
}

/// Directories that must exist before `path` can be written, outermost first
pub(crate) fn parent_dirs(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    (1..parts.len())
        .map(|n| format!("/{}", parts[..n].join("/")))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky;

    static OPENED: AtomicU32 = AtomicU32::new(0);

    impl BlockingSession for Flaky {
        type Settings = ();
        const PROTOCOL: &'static str = "TEST";

        fn open(_: &()) -> StorageResult<Self> {
            OPENED.fetch_add(1, Ordering::SeqCst);
            Ok(Flaky)
        }

        fn close(self) {}
    }

    #[test]
    fn test_remote_paths() {
        assert_eq!(remote_path("stage/", "/a/b.csv"), "/stage/a/b.csv");
        assert_eq!(bucket_dir("/stage/"), "/stage");
        assert_eq!(parent_dirs("/stage/a/b/c.csv"), vec!["/stage", "/stage/a", "/stage/a/b"]);
        assert!(parent_dirs("/top.csv").is_empty());
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(
            split_endpoint(Some("sftp://files.example.com:2222/"), "sftp", 22),
            ("files.example.com".to_string(), 2222)
        );
        assert_eq!(
            split_endpoint(Some("files.example.com"), "sftp", 22),
            ("files.example.com".to_string(), 22)
        );
        assert_eq!(split_endpoint(None, "ftp", 21), ("localhost".to_string(), 21));
    }

    #[tokio::test]
    async fn test_retries_until_success_and_stops_on_not_found() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let value = run_with_retry::<Flaky, _, _>(&(), Duration::from_millis(1), "op", move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(StorageError::Backend("reset".into())),
                _ => Ok(7),
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let err = run_with_retry::<Flaky, (), _>(&(), Duration::from_millis(1), "op", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::not_found("b", "k"))
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(OPENED.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_name_the_protocol() {
        let err = run_with_retry::<Flaky, (), _>(&(), Duration::from_millis(1), "put", |_| {
            Err(StorageError::Backend("refused".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Storage backend error: TEST put failed after 3 attempts: Storage backend error: refused"
        );
    }
}
