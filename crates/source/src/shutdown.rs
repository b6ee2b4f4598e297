//! Single-shot shutdown with first-error capture.

use crate::SourceError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single-shot shutter shared by every task of a source.
///
/// The first call to [`shutdown`](Self::shutdown) records its error and
/// cancels the token; later calls only cancel. Tasks observe termination
/// through [`cancelled`](Self::cancelled) or
/// [`is_terminated`](Self::is_terminated) and exit promptly.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    first_error: Arc<Mutex<Option<SourceError>>>,
}

impl Shutdown {
    /// Create a fresh shutter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shutter driven by an external cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, first_error: Arc::default() }
    }

    /// Shut down with an error. Only the first error is kept.
    pub fn shutdown(&self, err: SourceError) {
        {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.token.cancel();
    }

    /// Shut down cleanly, without an error.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The underlying cancellation token.
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Take the recorded first error, if any.
    pub fn take_first_error(&self) -> Option<SourceError> {
        self.first_error.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_terminated());

        shutdown.shutdown(SourceError::InvalidData("first".into()));
        shutdown.shutdown(SourceError::InvalidData("second".into()));

        assert!(shutdown.is_terminated());
        let err = shutdown.take_first_error().unwrap();
        assert!(err.to_string().contains("first"));
        assert!(shutdown.take_first_error().is_none());
    }

    #[test]
    fn terminate_records_no_error() {
        let shutdown = Shutdown::new();
        shutdown.terminate();
        assert!(shutdown.is_terminated());
        assert!(shutdown.take_first_error().is_none());
    }

    #[tokio::test]
    async fn cancelled_resolves_for_clones() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        shutdown.terminate();
        observer.cancelled().await;
    }
}
