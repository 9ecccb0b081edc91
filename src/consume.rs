//! Consuming an [`AsyncFlow`] from a component.
//!
//! [`use_async_flow`] hands back two signals.  The [`FlowState`] is a plain
//! description of where the flow is at, and reading it never interrupts
//! anything.  The [`Accessor`] is how the data is actually read, and is the
//! one place where a read suspends or fails: calling it while the flow is
//! still loading returns [`Interrupt::Suspend`], and calling it on a failed
//! flow returns [`Interrupt::Error`].  A component that would rather show
//! its own spinner or error message never calls the accessor and branches on
//! the flags instead.
//!
//! Data from the last successful snapshot is retained while the flow
//! refetches or fails, and the accessor keeps returning it in the meantime.
//! This is deliberately not exposed through [`FlowState::current_data`].
//!
//! ```ignore
//! let (accessor, _) = use_async_flow(source);
//! view! {
//!     <Suspense>
//!         {move || {
//!             let accessor = accessor.get();
//!             Suspend::new(async move {
//!                 match accessor {
//!                     Some(accessor) => accessor.read().await.map(|value| value.to_string()),
//!                     None => Ok(String::new()),
//!                 }
//!             })
//!         }}
//!     </Suspense>
//! }
//! ```

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use leptos::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    classify::{classify, FlowState},
    error::FlowError,
    flow::{lock, AsyncFlow, AsyncFlowState, IntoSource, Source, SourceKey},
    parallel::Parallel,
    phase::Phase,
    subscribe::{use_flow_store, FlowRead, ServerRecord},
    suspend::{Interrupt, Suspension},
};

/// What [`use_async_flow`] returns: the accessor (absent for a skipped
/// source) and the presentation state.
pub type Consumed<T> = (Signal<Option<Accessor<T>>>, Signal<FlowState<T>>);

/// Lazily reads the data of a consumed flow.
///
/// An accessor is memoized: it stays the same (see [`ptr_eq`](Self::ptr_eq))
/// for as long as the source and its snapshot do, so it may be handed to
/// child components without causing them to render again.  Outside of
/// hydration it reads the live snapshot at call time, so calling it later
/// than the render that produced it still observes the newest value.
pub struct Accessor<T> {
    inner: Arc<AccessorInner<T>>,
}

struct AccessorInner<T> {
    flow: Arc<dyn AsyncFlow<T>>,
    key: SourceKey,
    // what the hydrating pass must keep reading
    snapshot: Arc<AsyncFlowState<T>>,
    retained: Arc<Mutex<Option<Retained<T>>>>,
    phase: ArcRwSignal<Phase>,
    id: Option<String>,
    record: Option<Arc<ServerRecord<AsyncFlowState<T>>>>,
    group: Option<Parallel>,
}

impl<T> Accessor<T>
where
    T: Clone + Serialize + 'static,
{
    /// The data of the flow, or the reason the read cannot complete.
    ///
    /// - a successful snapshot returns its data;
    /// - a pending or failed snapshot returns the data retained from the
    ///   last success, or failing that the data the snapshot carries;
    /// - a pending snapshot without any data suspends on the flow, except
    ///   during hydration where this is a fatal
    ///   [`FlowError::PendingDuringHydration`];
    /// - a failed snapshot without any data returns its error.
    pub fn get(&self) -> Result<T, Interrupt> {
        let inner = &self.inner;
        let phase = inner.phase.get_untracked();
        let snapshot = if phase == Phase::Hydrating {
            inner.snapshot.clone()
        } else {
            inner.flow.snapshot()
        };
        if let Some(record) = &inner.record {
            record.register(inner.key, &snapshot);
        }

        let fallback = |own: &Option<T>| {
            lock(&inner.retained)
                .as_ref()
                .filter(|retained| retained.key == inner.key)
                .and_then(|retained| retained.success.data().cloned())
                .or_else(|| own.clone())
        };
        match &*snapshot {
            AsyncFlowState::Success { data } => Ok(data.clone()),
            AsyncFlowState::Pending { data } => match fallback(data) {
                Some(data) => Ok(data),
                None if phase == Phase::Hydrating => Err(FlowError::PendingDuringHydration {
                    id: inner.id.clone().unwrap_or_default(),
                }
                .into()),
                None => {
                    if let Some(group) = &inner.group {
                        group.mark_suspended();
                    }
                    Err(Interrupt::Suspend(Suspension::new(inner.flow.as_future())))
                }
            },
            AsyncFlowState::Error { error, data } => {
                fallback(data).ok_or_else(|| Interrupt::Error(error.clone()))
            }
        }
    }

    /// [`get`](Self::get), waiting out every suspension.
    ///
    /// This is what a `Suspend` inside a `<Suspense/>` awaits.
    pub async fn read(&self) -> Result<T, Interrupt> {
        loop {
            match self.get() {
                Err(Interrupt::Suspend(suspension)) => suspension.await,
                result => return result,
            }
        }
    }

    /// [`read`](Self::read), giving up after `duration` with
    /// [`FlowError::Timeout`] so a server render cannot hang on a flow
    /// that never settles.
    #[cfg(feature = "ssr")]
    pub async fn read_timeout(&self, duration: std::time::Duration) -> Result<T, Interrupt> {
        tokio::time::timeout(duration, self.read())
            .await
            .unwrap_or_else(|_| {
                leptos::logging::warn!("gave up waiting on flow {:?}", self.inner.id);
                Err(FlowError::Timeout.into())
            })
    }
}

impl<T> Accessor<T> {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn changed(prev: Option<&Option<Self>>, next: Option<&Option<Self>>) -> bool {
        match (prev, next) {
            (Some(Some(prev)), Some(Some(next))) => !prev.ptr_eq(next),
            (Some(None), Some(None)) => false,
            _ => true,
        }
    }
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("key", &self.inner.key)
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// Subscribe to an async flow and classify its current snapshot.
///
/// Calling this never interrupts anything.  Both signals only change when
/// the source or its snapshot does.
pub fn use_async_flow<T>(source: impl IntoSource<dyn AsyncFlow<T>>) -> Consumed<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    consume_in(source.into_source(), None)
}

/// The last successful snapshot committed for a source.
struct Retained<T> {
    key: SourceKey,
    success: Arc<AsyncFlowState<T>>,
}

fn previous_for<T>(
    retained: &Mutex<Option<Retained<T>>>,
    key: Option<SourceKey>,
) -> Option<Arc<AsyncFlowState<T>>> {
    let key = key?;
    lock(retained)
        .as_ref()
        .filter(|retained| retained.key == key)
        .map(|retained| retained.success.clone())
}

fn commit<T>(retained: &Mutex<Option<Retained<T>>>, read: &FlowRead<dyn AsyncFlow<T>>) {
    let mut retained = lock(retained);
    let Some(key) = read.key() else {
        *retained = None;
        return;
    };
    if retained.as_ref().is_some_and(|retained| retained.key != key) {
        *retained = None;
    }
    if let Some(snapshot) = read.snapshot.as_ref().filter(|snapshot| snapshot.is_success()) {
        *retained = Some(Retained {
            key,
            success: snapshot.clone(),
        });
    }
}

pub(crate) fn consume_in<T>(
    source: Signal<Source<dyn AsyncFlow<T>>>,
    group: Option<Parallel>,
) -> Consumed<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let retained = Arc::new(Mutex::new(None::<Retained<T>>));
    // recorded only once committed, so a read classifies against the state
    // the previous commit left behind
    let store = use_flow_store(source, {
        let retained = retained.clone();
        move |read| commit(&retained, read)
    });

    let state = ArcMemo::new_with_compare(
        {
            let read = store.read.clone();
            let phase = store.phase.clone();
            let retained = retained.clone();
            move |_| {
                let is_ssr_phase = phase.get().is_ssr();
                read.with(|read| {
                    let previous = previous_for(&retained, read.key());
                    classify(read.snapshot.as_ref(), previous.as_deref(), is_ssr_phase)
                })
            }
        },
        FlowState::changed,
    );

    let accessor = ArcMemo::new_with_compare(
        {
            let read = store.read.clone();
            let phase = store.phase.clone();
            let id = store.id.clone();
            let record = store.record.clone();
            move |prev: Option<&Option<Accessor<T>>>| {
                read.with(|read| {
                    let (Some(flow), Some(snapshot)) = (&read.flow, &read.snapshot) else {
                        return None;
                    };
                    let key = SourceKey::of(flow);
                    if let Some(Some(prev)) = prev {
                        if prev.inner.key == key && Arc::ptr_eq(&prev.inner.snapshot, snapshot) {
                            return Some(prev.clone());
                        }
                    }
                    Some(Accessor {
                        inner: Arc::new(AccessorInner {
                            flow: flow.clone(),
                            key,
                            snapshot: snapshot.clone(),
                            retained: retained.clone(),
                            phase: phase.clone(),
                            id: id.clone(),
                            record: record.clone(),
                            group: group.clone(),
                        }),
                    })
                })
            }
        },
        Accessor::changed,
    );

    (
        Signal::derive(move || accessor.get()),
        Signal::derive(move || state.get()),
    )
}
