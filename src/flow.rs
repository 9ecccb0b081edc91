//! The boundary with externally-owned value containers.
//!
//! Nothing in this crate creates or destroys a flow.  A flow is owned by
//! whatever produces the data, and the hooks provided by this crate only
//! attach listeners to it for as long as the consuming component stays
//! mounted.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::BoxFuture;
use leptos::prelude::Signal;
use serde::{Deserialize, Serialize};

/// Callback handed to [`Flow::subscribe`], invoked whenever the flow may
/// have emitted a new value.  It may be called from any thread.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// A push-based container holding a single current value.
///
/// Emissions must be identity-stable: a new emission is a new `Arc`, and
/// consumers decide whether anything changed purely by comparing the
/// pointers of successive snapshots.
pub trait Flow: Send + Sync {
    type Value;

    /// The current value.
    fn snapshot(&self) -> Arc<Self::Value>;

    /// Register a listener that is notified after every emission.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// A [`Flow`] whose value is the state of some asynchronous operation.
pub trait AsyncFlow<T>: Flow<Value = AsyncFlowState<T>> {
    /// A future that completes once the flow is no longer pending.
    ///
    /// This is what a render waits on when it has to suspend; the value
    /// itself is re-read from [`Flow::snapshot`] when the render retries.
    fn as_future(&self) -> BoxFuture<'static, ()>;
}

/// Snapshot of an [`AsyncFlow`].
///
/// The serialized form carries a `status` tag with the optional `data` and
/// `error` fields alongside, which is the shape recalled values take in the
/// hydration script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AsyncFlowState<T> {
    Pending {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<T>,
    },
    Success {
        data: T,
    },
    Error {
        error: SourceError,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<T>,
    },
}

impl<T> AsyncFlowState<T> {
    pub fn pending() -> Self {
        Self::Pending { data: None }
    }

    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    pub fn error(error: impl Into<SourceError>) -> Self {
        Self::Error {
            error: error.into(),
            data: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whatever data the snapshot carries, stale or settled.
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Pending { data } | Self::Error { data, .. } => data.as_ref(),
            Self::Success { data } => Some(data),
        }
    }
}

/// The failure an [`AsyncFlow`] settled with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for SourceError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for SourceError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Detaches a listener from a flow when dropped.
#[must_use = "dropping a subscription detaches the listener immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to detach.
    pub fn noop() -> Self {
        Self { detach: None }
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Sentinel passed in place of a flow to mean "no subscription, no data,
/// no error".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipToken;

/// Identity of a flow, derived from the address of its `Arc`.
///
/// Two handles to the same flow share a key; an equal but distinct flow
/// does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceKey(usize);

impl SourceKey {
    pub fn of<S: ?Sized>(flow: &Arc<S>) -> Self {
        Self(Arc::as_ptr(flow) as *const () as usize)
    }
}

/// Either a flow to subscribe to, or [`SkipToken`].
pub enum Source<S: ?Sized> {
    Flow(Arc<S>),
    Skip,
}

impl<S: ?Sized> Source<S> {
    pub fn key(&self) -> Option<SourceKey> {
        match self {
            Self::Flow(flow) => Some(SourceKey::of(flow)),
            Self::Skip => None,
        }
    }

    pub fn flow(&self) -> Option<&Arc<S>> {
        match self {
            Self::Flow(flow) => Some(flow),
            Self::Skip => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

impl<S: ?Sized> Clone for Source<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Flow(flow) => Self::Flow(flow.clone()),
            Self::Skip => Self::Skip,
        }
    }
}

impl<S: ?Sized> From<SkipToken> for Source<S> {
    fn from(_: SkipToken) -> Self {
        Self::Skip
    }
}

impl<T, F> From<Arc<F>> for Source<dyn AsyncFlow<T>>
where
    T: 'static,
    F: AsyncFlow<T> + 'static,
{
    fn from(flow: Arc<F>) -> Self {
        Self::Flow(flow)
    }
}

impl<V, F> From<Arc<F>> for Source<dyn Flow<Value = V>>
where
    V: 'static,
    F: Flow<Value = V> + 'static,
{
    fn from(flow: Arc<F>) -> Self {
        Self::Flow(flow)
    }
}

impl<S: ?Sized> fmt::Debug for Source<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flow(flow) => f.debug_tuple("Flow").field(&SourceKey::of(flow)).finish(),
            Self::Skip => f.write_str("Skip"),
        }
    }
}

/// Anything a hook accepts as its source: a fixed [`Source`], or a
/// [`Signal`] of one when the component switches between flows over time.
pub trait IntoSource<S: ?Sized + Send + Sync + 'static> {
    fn into_source(self) -> Signal<Source<S>>;
}

impl<S> IntoSource<S> for Source<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn into_source(self) -> Signal<Source<S>> {
        Signal::stored(self)
    }
}

impl<S> IntoSource<S> for Signal<Source<S>>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn into_source(self) -> Signal<Source<S>> {
        self
    }
}

/// [`IntoSource`] for a list of sources.
pub trait IntoSources<S: ?Sized + Send + Sync + 'static> {
    fn into_sources(self) -> Signal<Vec<Source<S>>>;
}

impl<S> IntoSources<S> for Vec<Source<S>>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn into_sources(self) -> Signal<Vec<Source<S>>> {
        Signal::stored(self)
    }
}

impl<S> IntoSources<S> for Signal<Vec<Source<S>>>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn into_sources(self) -> Signal<Vec<Source<S>>> {
        self
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn same<T: ?Sized>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
