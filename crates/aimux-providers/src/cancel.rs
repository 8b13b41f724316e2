//! Abort signals.
//!
//! An [`AbortController`] owns the sending half; any number of cloned
//! [`AbortSignal`]s observe it. The first reason wins. [`compose`] merges a
//! request timeout with an optional caller signal into one future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::watch;

/// Reason used when the per-request timeout fires.
pub fn timeout_reason(timeout_ms: u64) -> String {
    format!("AI provider request exceeded {}ms", timeout_ms)
}

/// Reason used when the caller's signal fires.
pub const CALLER_ABORT_REASON: &str = "AI request aborted by caller";

/// Sending half. Dropping it without aborting leaves signals pending forever.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<Option<String>>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        AbortController { tx }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort with `reason`. Returns `false` if already aborted; the first
    /// reason is kept.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(reason);
                true
            }
        })
    }

    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Receiving half, cheap to clone.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        AbortController::new().signal()
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolve with the abort reason once the signal fires.
    pub async fn aborted(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Controller dropped without aborting.
                return std::future::pending().await;
            }
        }
    }
}

/// A request timeout merged with an optional caller signal.
///
/// Resolves with the reason of whichever fires first. The caller signal is
/// checked synchronously on every poll, so an abort is observed on the very
/// next poll. Dropping it clears the timer.
pub struct ComposedAbort {
    external: Option<AbortSignal>,
    wait: Pin<Box<dyn Future<Output = String> + Send>>,
}

impl std::fmt::Debug for ComposedAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedAbort")
            .field("external", &self.external.is_some())
            .finish()
    }
}

impl ComposedAbort {
    /// Reason if the caller has already aborted.
    pub fn caller_aborted(&self) -> Option<String> {
        self.external
            .as_ref()
            .filter(|s| s.is_aborted())
            .map(|_| CALLER_ABORT_REASON.to_string())
    }
}

impl Future for ComposedAbort {
    type Output = String;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<String> {
        if let Some(reason) = self.caller_aborted() {
            return Poll::Ready(reason);
        }
        self.wait.as_mut().poll(cx)
    }
}

/// Combine a timeout with an optional external signal.
///
/// The timer starts on first poll, so this may be called outside a runtime.
pub fn compose(timeout_ms: u64, external: Option<&AbortSignal>) -> ComposedAbort {
    let external = external.cloned();
    let watched = external.clone();
    let wait = Box::pin(async move {
        let caller = async {
            match &watched {
                Some(signal) => {
                    signal.aborted().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => timeout_reason(timeout_ms),
            _ = caller => CALLER_ABORT_REASON.to_string(),
        }
    });
    ComposedAbort { external, wait }
}
