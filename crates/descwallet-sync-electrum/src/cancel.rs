//! Sync cancellation
//!
//! A [`CancelToken`] is handed to the sync engine and kept by whoever may
//! stop the scan. The first [`CancelToken::cancel`] wins and records why the
//! scan was stopped; later calls keep the original reason.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why a sync was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller asked for the scan to stop
    Requested,
    /// The wallet was closed while scanning
    WalletClosed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "cancel requested"),
            CancelReason::WalletClosed => write!(f, "wallet closed"),
        }
    }
}

/// Shared, one-shot cancellation flag for a sync run
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<Option<CancelReason>>>,
}

impl CancelToken {
    /// Token for a fresh run
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Reason the run was stopped, if it was
    pub fn reason(&self) -> Option<CancelReason> {
        *self.state.borrow()
    }

    /// Returns `true` once the run has been stopped
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Stop the run; returns `false` if it was already stopped
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Resolves once the run has been stopped
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.state.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.unwrap_or(CancelReason::Requested),
            // the sender lives in `self`, so the channel cannot close here
            Err(_) => CancelReason::Requested,
        };
        reason
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
