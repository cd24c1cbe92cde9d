use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;

use super::{ApiErrorKind, QuestCompletionApi};
use crate::sync::{next_reconcile_delay, ReconcileTrigger};

/// Handle to the background reconcile task.
pub struct ReconcileLoop {
    handle: JoinHandle<()>,
}

impl ReconcileLoop {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Reconcile once for [`ReconcileTrigger::AppStart`], then every `interval`
/// (plus jitter) until stopped.
pub fn spawn_reconcile_loop(api: Arc<QuestCompletionApi>, interval: Duration) -> ReconcileLoop {
    let handle = tokio::spawn(async move {
        let mut trigger = ReconcileTrigger::AppStart;
        loop {
            match api.reconcile(trigger).await {
                Ok(view) => debug!(
                    "Background reconcile ({}) finished: {:?}, pending {:?}",
                    trigger, view.status, view.pending
                ),
                Err(err) if err.kind == ApiErrorKind::Unauthenticated => {
                    debug!("Background reconcile ({}) skipped: {}", trigger, err)
                }
                Err(err) => warn!("Background reconcile ({}) failed: {}", trigger, err),
            }
            trigger = ReconcileTrigger::Periodic;
            tokio::time::sleep(next_reconcile_delay(interval)).await;
        }
    });
    ReconcileLoop { handle }
}
