#![allow(dead_code)]

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use futures::{future::BoxFuture, FutureExt};
use hydration_context::{
    PinnedFuture, PinnedStream, SerializedDataId, SharedContext, SsrSharedContext,
};
use leptos::{
    error::{Error, ErrorId},
    prelude::{Effect, Owner},
};
use leptos_flow::{AsyncFlow, AsyncFlowState, Flow, Listener, Source, Subscription};
use tokio::sync::watch;

/// A client owner, rendering from scratch.
pub fn init_renderer() -> Owner {
    let _ = any_spawner::Executor::init_tokio();
    let owner = Owner::new();
    owner.set();
    owner
}

/// A root owner rendering on the server.
pub fn server_root() -> Owner {
    let _ = any_spawner::Executor::init_tokio();
    let owner = Owner::new_root(Some(Arc::new(SsrSharedContext::new())));
    owner.set();
    owner
}

/// A root owner for the hydrating pass in the browser.
pub fn hydrating_root() -> Owner {
    let _ = any_spawner::Executor::init_tokio();
    let owner = Owner::new_root(Some(Arc::new(HydratingContext::default())));
    owner.set();
    owner
}

/// Let the effects scheduled so far run.
pub async fn tick() {
    for _ in 0..4 {
        any_spawner::Executor::tick().await;
        tokio::task::yield_now().await;
    }
}

/// Every value `read` returned, one per run of an effect tracking it.
pub fn record<T: Send + 'static>(read: impl Fn() -> T + 'static) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    Effect::new({
        let seen = seen.clone();
        move || seen.lock().unwrap().push(read())
    });
    seen
}

pub fn seen<T: Clone>(log: &Mutex<Vec<T>>) -> Vec<T> {
    log.lock().unwrap().clone()
}

/// Shared context of a browser that is hydrating server output, without
/// any resources of its own.
pub struct HydratingContext {
    id: AtomicUsize,
    hydrating: AtomicBool,
}

impl Default for HydratingContext {
    fn default() -> Self {
        Self {
            id: AtomicUsize::new(0),
            hydrating: AtomicBool::new(true),
        }
    }
}

impl fmt::Debug for HydratingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydratingContext").finish_non_exhaustive()
    }
}

impl SharedContext for HydratingContext {
    fn is_browser(&self) -> bool {
        true
    }

    fn next_id(&self) -> SerializedDataId {
        SerializedDataId::new(self.id.fetch_add(1, Ordering::Relaxed))
    }

    fn write_async(&self, _id: SerializedDataId, _fut: PinnedFuture<String>) {}

    fn read_data(&self, _id: &SerializedDataId) -> Option<String> {
        None
    }

    fn await_data(&self, _id: &SerializedDataId) -> Option<String> {
        None
    }

    fn pending_data(&self) -> Option<PinnedStream<String>> {
        None
    }

    fn during_hydration(&self) -> bool {
        self.hydrating.load(Ordering::Relaxed)
    }

    fn hydration_complete(&self) {
        self.hydrating.store(false, Ordering::Relaxed)
    }

    fn get_is_hydrating(&self) -> bool {
        self.hydrating.load(Ordering::Relaxed)
    }

    fn set_is_hydrating(&self, is_hydrating: bool) {
        self.hydrating.store(is_hydrating, Ordering::Relaxed)
    }

    fn take_errors(&self) -> Vec<(SerializedDataId, ErrorId, Error)> {
        Vec::new()
    }

    fn errors(&self, _boundary_id: &SerializedDataId) -> Vec<(ErrorId, Error)> {
        Vec::new()
    }

    fn seal_errors(&self, _boundary_id: &SerializedDataId) {}

    fn register_error(&self, _error_boundary: SerializedDataId, _error_id: ErrorId, _error: Error) {}

    fn defer_stream(&self, _wait_for: PinnedFuture<()>) {}

    fn await_deferred(&self) -> Option<PinnedFuture<()>> {
        None
    }

    fn set_incomplete_chunk(&self, _id: SerializedDataId) {}

    fn get_incomplete_chunk(&self, _id: &SerializedDataId) -> bool {
        false
    }
}

#[derive(Default)]
struct Listeners {
    next: AtomicUsize,
    entries: Arc<Mutex<Vec<(usize, Listener)>>>,
}

impl Listeners {
    fn add(&self, listener: Listener) -> Subscription {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, listener));
        let entries = self.entries.clone();
        Subscription::new(move || entries.lock().unwrap().retain(|(entry, _)| *entry != id))
    }

    fn notify(&self) {
        // listeners may subscribe or unsubscribe while being notified
        let listeners = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener();
        }
    }

    fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// An in-memory flow holding a plain value.
pub struct TestFlow<V> {
    value: Mutex<Arc<V>>,
    listeners: Listeners,
    snapshots: AtomicUsize,
}

impl<V: Send + Sync + 'static> TestFlow<V> {
    pub fn new(value: V) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(Arc::new(value)),
            listeners: Listeners::default(),
            snapshots: AtomicUsize::new(0),
        })
    }

    pub fn source(self: &Arc<Self>) -> Source<dyn Flow<Value = V>> {
        Source::Flow(self.clone())
    }

    /// Replace the value without notifying anybody.
    pub fn replace(&self, value: V) {
        *self.value.lock().unwrap() = Arc::new(value);
    }

    pub fn emit(&self, value: V) {
        self.replace(value);
        self.listeners.notify();
    }

    /// Notify the listeners without emitting anything new.
    pub fn notify(&self) {
        self.listeners.notify();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::Relaxed)
    }
}

impl<V: Send + Sync> Flow for TestFlow<V> {
    type Value = V;

    fn snapshot(&self) -> Arc<V> {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        self.value.lock().unwrap().clone()
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.add(listener)
    }
}

/// An in-memory async flow; its future resolves through a watch channel
/// once the state is set to anything but pending.
pub struct TestAsyncFlow<T> {
    state: watch::Sender<Arc<AsyncFlowState<T>>>,
    listeners: Listeners,
    snapshots: AtomicUsize,
    futures: AtomicUsize,
}

impl<T: Send + Sync + 'static> TestAsyncFlow<T> {
    pub fn new(state: AsyncFlowState<T>) -> Arc<Self> {
        let (state, _) = watch::channel(Arc::new(state));
        Arc::new(Self {
            state,
            listeners: Listeners::default(),
            snapshots: AtomicUsize::new(0),
            futures: AtomicUsize::new(0),
        })
    }

    pub fn pending() -> Arc<Self> {
        Self::new(AsyncFlowState::pending())
    }

    pub fn success(data: T) -> Arc<Self> {
        Self::new(AsyncFlowState::success(data))
    }

    pub fn source(self: &Arc<Self>) -> Source<dyn AsyncFlow<T>> {
        Source::Flow(self.clone())
    }

    pub fn set(&self, state: AsyncFlowState<T>) {
        self.state.send_replace(Arc::new(state));
        self.listeners.notify();
    }

    /// Notify the listeners without emitting anything new.
    pub fn notify(&self) {
        self.listeners.notify();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::Relaxed)
    }

    /// How many times a future was requested, i.e. how many times a read
    /// wanted to suspend on this flow.
    pub fn future_count(&self) -> usize {
        self.futures.load(Ordering::Relaxed)
    }
}

impl<T: Send + Sync> Flow for TestAsyncFlow<T> {
    type Value = AsyncFlowState<T>;

    fn snapshot(&self) -> Arc<AsyncFlowState<T>> {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        self.state.borrow().clone()
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.listeners.add(listener)
    }
}

impl<T: Send + Sync + 'static> AsyncFlow<T> for TestAsyncFlow<T> {
    fn as_future(&self) -> BoxFuture<'static, ()> {
        self.futures.fetch_add(1, Ordering::Relaxed);
        let mut receiver = self.state.subscribe();
        async move {
            let _ = receiver.wait_for(|state| !state.is_pending()).await;
        }
        .boxed()
    }
}
