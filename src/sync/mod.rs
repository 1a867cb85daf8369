mod pending;
mod reconciler;
mod worker;

// Buffered writes
pub use pending::{PendingQueue, PendingStatus, PendingWrite, Release};

// Remote contract
pub use reconciler::{
    ItemOutcome, ItemStatus, LogReconciler, ReconcileBatch, ReconcileError, Reconciler,
};

// Worker
pub use worker::{BatchResult, SyncReport, SyncSkip, SyncWorker};
