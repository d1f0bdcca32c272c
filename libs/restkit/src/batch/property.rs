//! State shared by the sub-requests of one batch change set.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::api::Api;
use crate::error::Error;
use crate::submit::{ChangeSet, ChangeSetItem, SubmitResult};

/// What every sub-request of a change set observes once it completes.
pub type ChangeSetOutcome = Result<Arc<SubmitResult>, Arc<ChangeSetFailure>>;

#[derive(thiserror::Error, Debug)]
pub enum ChangeSetFailure {
    /// Sub-requests failed while staging; the change set was never submitted.
    #[error("{} sub-request(s) of the change set failed", .0.len())]
    SubRequests(Vec<Arc<Error>>),

    #[error("change set submission failed: {0}")]
    Submit(Error),

    /// The completion signal went away without an outcome.
    #[error("change set was abandoned before it completed")]
    Abandoned,
}

/// Counts outstanding sub-requests and submits the staged change set when the
/// last one completes.
///
/// The decrement that reaches zero is the only one that submits, so a change
/// set is submitted at most once no matter how its sub-requests interleave.
pub struct ChangeSetProperty {
    pending: AtomicUsize,
    change_set: Mutex<ChangeSet>,
    exceptions: Mutex<Vec<Arc<Error>>>,
    outcome: watch::Sender<Option<ChangeSetOutcome>>,
}

impl ChangeSetProperty {
    #[must_use]
    pub fn new(expected: usize) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            pending: AtomicUsize::new(expected),
            change_set: Mutex::new(ChangeSet::new()),
            exceptions: Mutex::new(Vec::new()),
            outcome,
        }
    }

    /// Stages `item` and returns its position in the change set.
    pub fn add_item(&self, item: ChangeSetItem) -> usize {
        self.change_set.lock().push(item)
    }

    /// Records a sub-request failure. Any recorded failure prevents submission.
    pub fn add_exception(&self, error: Error) -> Arc<Error> {
        let error = Arc::new(error);
        self.exceptions.lock().push(Arc::clone(&error));
        error
    }

    #[must_use]
    pub fn exceptions(&self) -> Vec<Arc<Error>> {
        self.exceptions.lock().clone()
    }

    /// Sub-requests that have not completed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Marks one sub-request as done. The call that completes the last one
    /// submits the change set (or skips it when failures were recorded) and
    /// publishes the outcome.
    ///
    /// # Errors
    /// `Error::Precondition` when called more often than there are sub-requests.
    #[instrument(skip_all)]
    pub async fn complete_one(&self, api: &Api, cancel: &CancellationToken) -> Result<(), Error> {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| {
                Error::precondition("change set completed more times than it has sub-requests")
            })?;
        if previous > 1 {
            debug!(remaining = previous - 1, "sub-request completed");
            return Ok(());
        }

        let outcome = self.finish(api, cancel).await;
        self.outcome.send_replace(Some(outcome));
        Ok(())
    }

    async fn finish(&self, api: &Api, cancel: &CancellationToken) -> ChangeSetOutcome {
        let exceptions = self.exceptions();
        if !exceptions.is_empty() {
            warn!(
                failed = exceptions.len(),
                "change set not submitted because sub-requests failed"
            );
            return Err(Arc::new(ChangeSetFailure::SubRequests(exceptions)));
        }

        let change_set = std::mem::take(&mut *self.change_set.lock());
        if change_set.is_empty() {
            debug!("empty change set completed without submission");
            return Ok(Arc::new(SubmitResult::new(change_set)));
        }
        match api.submit(change_set, cancel).await {
            Ok(result) => Ok(Arc::new(result)),
            Err(e) => Err(Arc::new(ChangeSetFailure::Submit(e))),
        }
    }

    /// Waits until the last sub-request has completed.
    pub async fn outcome(&self) -> ChangeSetOutcome {
        let mut rx = self.outcome.subscribe();
        let published = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        published.unwrap_or_else(|| Err(Arc::new(ChangeSetFailure::Abandoned)))
    }
}
