//! Turning raw [`AsyncFlowState`] snapshots into presentation states.

use std::sync::Arc;

use crate::flow::{same, AsyncFlowState};

/// The five presentation states a consumed async flow can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowStatus {
    Success,
    /// Pending with nothing to show yet.
    Loading,
    /// Pending, but data from before is still available through the
    /// accessor.
    Updating,
    Error,
    Skipped,
}

/// The flags a component branches on when it would rather not suspend.
///
/// `current_data` is only ever populated for [`FlowStatus::Success`].  Stale
/// data, whether retained from an earlier success or carried by a pending
/// or failed snapshot, is only reachable through the
/// [`Accessor`](crate::Accessor), so that reading `current_data` can never
/// show a possibly outdated value by accident.
#[derive(Debug)]
pub struct FlowState<T> {
    status: FlowStatus,
    success: Option<Arc<AsyncFlowState<T>>>,
}

impl<T> Clone for FlowState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            success: self.success.clone(),
        }
    }
}

impl<T> FlowState<T> {
    pub fn skipped() -> Self {
        Self::flag(FlowStatus::Skipped)
    }

    fn flag(status: FlowStatus) -> Self {
        Self {
            status,
            success: None,
        }
    }

    /// Same status over the very same snapshot.
    pub(crate) fn same(&self, other: &Self) -> bool {
        self.status == other.status && same(self.success.as_ref(), other.success.as_ref())
    }

    pub(crate) fn changed(prev: Option<&Self>, next: Option<&Self>) -> bool {
        !matches!((prev, next), (Some(prev), Some(next)) if prev.same(next))
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn is_loading(&self) -> bool {
        self.status == FlowStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == FlowStatus::Error
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.status, FlowStatus::Loading | FlowStatus::Updating)
    }

    pub fn is_success(&self) -> bool {
        self.status == FlowStatus::Success
    }

    pub fn is_skipped(&self) -> bool {
        self.status == FlowStatus::Skipped
    }

    pub fn current_data(&self) -> Option<&T> {
        self.success.as_deref().and_then(AsyncFlowState::data)
    }
}

/// Classify `snapshot`, or a skipped source when it is `None`.
///
/// `previous` is the last snapshot this consumer committed for the same
/// source; only a successful one has any effect.  A pending snapshot
/// becomes [`FlowStatus::Updating`] whenever something is there to show:
/// a previous success (which outranks the data a pending snapshot may carry
/// itself), the snapshot's own data, or, while `is_hydrating`, the guarantee
/// that the server already rendered it.
pub fn classify<T>(
    snapshot: Option<&Arc<AsyncFlowState<T>>>,
    previous: Option<&AsyncFlowState<T>>,
    is_hydrating: bool,
) -> FlowState<T> {
    let Some(snapshot) = snapshot else {
        return FlowState::skipped();
    };
    match &**snapshot {
        AsyncFlowState::Pending { data } => {
            let had_success = previous.is_some_and(AsyncFlowState::is_success);
            if had_success || data.is_some() || is_hydrating {
                FlowState::flag(FlowStatus::Updating)
            } else {
                FlowState::flag(FlowStatus::Loading)
            }
        }
        AsyncFlowState::Error { .. } => FlowState::flag(FlowStatus::Error),
        AsyncFlowState::Success { .. } => FlowState {
            status: FlowStatus::Success,
            success: Some(snapshot.clone()),
        },
    }
}
