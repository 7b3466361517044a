//! Sync progress tracking

use descwallet_core::KeychainKind;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sync stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// Asking the server for the tip
    Connecting,
    /// Walking the scripts of one keychain
    Scanning(KeychainKind),
    /// Downloading transactions and block times
    FetchingTransactions,
    /// Complete
    Complete,
}

impl SyncStage {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Scanning(KeychainKind::External) => "Scanning Receive Addresses",
            Self::Scanning(KeychainKind::Internal) => "Scanning Change Addresses",
            Self::FetchingTransactions => "Fetching Transactions",
            Self::Complete => "Synced",
        }
    }
}

/// Shared view of a running sync
#[derive(Debug, Clone)]
pub struct SyncProgress {
    inner: Arc<RwLock<ProgressInner>>,
}

#[derive(Debug, Clone)]
struct ProgressInner {
    stage: SyncStage,
    tip_height: u32,
    scripts_scanned: u64,
    transactions_total: u64,
    transactions_fetched: u64,
    start_time: Option<Instant>,
}

impl SyncProgress {
    /// Create new progress tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressInner {
                stage: SyncStage::Connecting,
                tip_height: 0,
                scripts_scanned: 0,
                transactions_total: 0,
                transactions_fetched: 0,
                start_time: None,
            })),
        }
    }

    /// Start tracking a new run
    pub fn start(&self) {
        let mut inner = self.inner.write();
        inner.stage = SyncStage::Connecting;
        inner.scripts_scanned = 0;
        inner.transactions_total = 0;
        inner.transactions_fetched = 0;
        inner.start_time = Some(Instant::now());
    }

    /// Set stage
    pub fn set_stage(&self, stage: SyncStage) {
        self.inner.write().stage = stage;
    }

    /// Set tip height
    pub fn set_tip(&self, height: u32) {
        self.inner.write().tip_height = height;
    }

    /// Count one scanned script
    pub fn script_scanned(&self) {
        self.inner.write().scripts_scanned += 1;
    }

    /// Number of transactions to download
    pub fn set_transactions_total(&self, total: u64) {
        self.inner.write().transactions_total = total;
    }

    /// Count one downloaded transaction
    pub fn transaction_fetched(&self) {
        self.inner.write().transactions_fetched += 1;
    }

    /// Get current stage
    pub fn stage(&self) -> SyncStage {
        self.inner.read().stage
    }

    /// Tip height reported by the server
    pub fn tip_height(&self) -> u32 {
        self.inner.read().tip_height
    }

    /// Scripts queried so far
    pub fn scripts_scanned(&self) -> u64 {
        self.inner.read().scripts_scanned
    }

    /// Download percentage, 100 once complete
    pub fn percentage(&self) -> f64 {
        let inner = self.inner.read();
        match inner.stage {
            SyncStage::Complete => 100.0,
            SyncStage::FetchingTransactions if inner.transactions_total > 0 => {
                (inner.transactions_fetched as f64 / inner.transactions_total as f64) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Time since [`Self::start`]
    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.read().start_time.map(|t| t.elapsed())
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}
