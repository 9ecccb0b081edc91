//! Subscribing to a single [`Flow`].
//!
//! The store behind every hook in this crate is an [`ArcMemo`] over the
//! flow's snapshot.  A listener attached to the flow notifies an
//! [`ArcTrigger`] the memo tracks, and the memo only reports a change when
//! the snapshot `Arc` is a different one, so whatever depends on it
//! re-runs once per new emission and never for a notification that
//! carried nothing new.
//!
//! The listener is attached by an [`Effect`], so it only exists once the
//! hook has committed and is detached through [`on_cleanup`] when the owner
//! goes away.  Server renders never subscribe.

use std::sync::{Arc, Mutex};

use leptos::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    flow::{lock, same, Flow, IntoSource, Source, SourceKey},
    hydration::HydrationRegistry,
    phase::{next_id, Phase},
};

/// Read the current value of `source`, as a signal that changes whenever
/// the flow emits a different value.  [`Source::Skip`] reads as `None` and
/// subscribes to nothing.
///
/// When a [`HydrationRegistry`] is in context, the value rendered on the
/// server is registered under this subscription's id, and the hydrating
/// pass on the client reads the value recalled for that id instead of the
/// live one.  The live value is picked up right after hydration commits.
pub fn use_flow<S>(source: impl IntoSource<S>) -> Signal<Option<Arc<S::Value>>>
where
    S: Flow + ?Sized + 'static,
    S::Value: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let store = use_flow_store(source.into_source(), |_| ());
    let read = store.read;
    Signal::derive(move || read.with(|read| read.snapshot.clone()))
}

/// One read of a source: the flow, if any, and the snapshot it had.
pub(crate) struct FlowRead<S: Flow + ?Sized> {
    pub(crate) flow: Option<Arc<S>>,
    pub(crate) snapshot: Option<Arc<S::Value>>,
}

impl<S: Flow + ?Sized> Clone for FlowRead<S> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<S: Flow + ?Sized> FlowRead<S> {
    pub(crate) fn key(&self) -> Option<SourceKey> {
        self.flow.as_ref().map(SourceKey::of)
    }

    fn changed(prev: Option<&Self>, next: Option<&Self>) -> bool {
        match (prev, next) {
            (Some(prev), Some(next)) => {
                prev.key() != next.key() || !same(prev.snapshot.as_ref(), next.snapshot.as_ref())
            }
            _ => true,
        }
    }
}

/// The value recalled from the server for the source the hook started on.
struct Recalled<V> {
    key: SourceKey,
    value: Arc<V>,
}

/// Server-side registration of the value a hook rendered.
pub(crate) struct ServerRecord<V> {
    registry: HydrationRegistry,
    id: String,
    last: Mutex<Option<Arc<V>>>,
}

impl<V: Serialize> ServerRecord<V> {
    /// Queue `value` for the client, unless it is the one already queued.
    pub(crate) fn register(&self, key: SourceKey, value: &Arc<V>) {
        let mut last = lock(&self.last);
        if last.as_ref().is_some_and(|last| Arc::ptr_eq(last, value)) {
            return;
        }
        match self.registry.register_value(&self.id, Some(key), &**value) {
            Ok(()) => *last = Some(value.clone()),
            Err(error) => leptos::logging::warn!("{error}"),
        }
    }
}

pub(crate) struct FlowStore<S: Flow + ?Sized + 'static>
where
    S::Value: Send + Sync,
{
    pub(crate) read: ArcMemo<FlowRead<S>>,
    pub(crate) phase: ArcRwSignal<Phase>,
    pub(crate) id: Option<String>,
    pub(crate) record: Option<Arc<ServerRecord<S::Value>>>,
}

/// Create the store for `source`.
///
/// `on_commit` runs after every committed change of the read, the first
/// time right after the hook mounted; it never runs on the server.
pub(crate) fn use_flow_store<S>(
    source: Signal<Source<S>>,
    on_commit: impl Fn(&FlowRead<S>) + 'static,
) -> FlowStore<S>
where
    S: Flow + ?Sized + 'static,
    S::Value: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let phase = ArcRwSignal::new(Phase::current());
    let initial = phase.get_untracked();
    let id = next_id(initial);
    let registry = HydrationRegistry::current();
    let trigger = ArcTrigger::new();

    let record = match (initial, &registry, &id) {
        (Phase::Server, Some(registry), Some(id)) => Some(Arc::new(ServerRecord {
            registry: registry.clone(),
            id: id.clone(),
            last: Mutex::new(None),
        })),
        _ => None,
    };

    // peeked only; the registry gives the value up once the hook committed
    let recalled = match (initial, &registry, &id) {
        (Phase::Hydrating, Some(registry), Some(id)) => source
            .with_untracked(|source| source.key())
            .and_then(|key| {
                registry.recall_as::<S::Value>(id).map(|value| Recalled {
                    key,
                    value: Arc::new(value),
                })
            }),
        _ => None,
    };
    let recalled = Arc::new(Mutex::new(recalled));

    let read = ArcMemo::new_with_compare(
        {
            let trigger = trigger.clone();
            let recalled = recalled.clone();
            let record = record.clone();
            move |_| {
                trigger.track();
                let flow = source.with(|source| source.flow().cloned());
                let snapshot = flow.as_ref().map(|flow| {
                    let key = SourceKey::of(flow);
                    let recalled = lock(&recalled)
                        .as_ref()
                        .filter(|recalled| recalled.key == key)
                        .map(|recalled| recalled.value.clone());
                    recalled.unwrap_or_else(|| {
                        let value = flow.snapshot();
                        if let Some(record) = &record {
                            record.register(key, &value);
                        }
                        value
                    })
                });
                FlowRead { flow, snapshot }
            }
        },
        FlowRead::changed,
    );

    if initial != Phase::Server {
        Effect::new({
            let read = read.clone();
            let phase = phase.clone();
            let trigger = trigger.clone();
            let id = id.clone();
            move || {
                read.with(|read| on_commit(read));
                let released = lock(&recalled).take();
                if released.is_some() {
                    if let (Some(registry), Some(id)) = (&registry, &id) {
                        registry.hydrate(id);
                    }
                    trigger.notify();
                }
                if phase.get_untracked() == Phase::Hydrating {
                    phase.set(Phase::Client);
                }
            }
        });

        Effect::new({
            let read = read.clone();
            move || {
                let Some(flow) = source.with(|source| source.flow().cloned()) else {
                    return;
                };
                let subscription = flow.subscribe(Arc::new({
                    let trigger = trigger.clone();
                    move || trigger.notify()
                }));
                // an emission between the read and this subscription would
                // otherwise go unnoticed
                let seen = read.with_untracked(|read| read.snapshot.clone());
                if !same(seen.as_ref(), Some(&flow.snapshot())) {
                    trigger.notify();
                }
                on_cleanup(move || drop(subscription));
            }
        });
    }

    FlowStore {
        read,
        phase,
        id,
        record,
    }
}
