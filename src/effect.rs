//! Running side effects on flow values, outside of rendering.

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use leptos::prelude::*;

use crate::{
    flow::{lock, Flow, IntoSource, SourceKey},
    phase::Phase,
};

/// Cleanup returned by an effect handler, run before the handler runs again
/// and when the owner is cleaned up.
pub type Teardown = Box<dyn FnOnce() + Send + Sync>;

type Handler<V> = Rc<dyn Fn(&V) -> Option<Teardown>>;

/// Handle to a running [`use_flow_effect`].
pub struct FlowEffect<V: ?Sized> {
    handler: Rc<RefCell<Handler<V>>>,
}

impl<V: ?Sized> FlowEffect<V> {
    /// Use `handler` from the next run on.  The flow is not subscribed to
    /// again and nothing runs right away.
    pub fn set_handler(&self, handler: impl Fn(&V) -> Option<Teardown> + 'static) {
        *self.handler.borrow_mut() = Rc::new(handler);
    }
}

/// Call `handler` with the value of `source` once mounted, and again after
/// every emission of a different value.
///
/// Emissions are coalesced: however many happen before the effect gets to
/// run, the handler runs once, with the latest value.  Switching to another
/// source, or to skip, runs the last teardown first.  Cleaning up the owner
/// detaches the subscription, cancels a scheduled run and runs the last
/// teardown.  Nothing happens during server renders.
pub fn use_flow_effect<S, H>(source: impl IntoSource<S>, handler: H) -> FlowEffect<S::Value>
where
    S: Flow + ?Sized + 'static,
    H: Fn(&S::Value) -> Option<Teardown> + 'static,
{
    let source = source.into_source();
    let handler: Rc<RefCell<Handler<S::Value>>> = Rc::new(RefCell::new(Rc::new(handler)));
    let effect = FlowEffect {
        handler: handler.clone(),
    };
    if Phase::current() == Phase::Server {
        return effect;
    }

    let trigger = ArcTrigger::new();
    let teardown = Arc::new(Mutex::new(None::<Teardown>));
    let disposed = Arc::new(AtomicBool::new(false));

    Effect::new({
        let trigger = trigger.clone();
        move || {
            let Some(flow) = source.with(|source| source.flow().cloned()) else {
                return;
            };
            let subscription = flow.subscribe(Arc::new({
                let trigger = trigger.clone();
                move || trigger.notify()
            }));
            on_cleanup(move || drop(subscription));
        }
    });

    Effect::new({
        let teardown = teardown.clone();
        let disposed = disposed.clone();
        move |delivered: Option<Option<(SourceKey, Arc<S::Value>)>>| {
            trigger.track();
            let current = source.with(|source| {
                source
                    .flow()
                    .map(|flow| (SourceKey::of(flow), flow.snapshot()))
            });
            let delivered = delivered.flatten();
            if disposed.load(Ordering::Acquire) {
                return delivered;
            }
            if let (Some((key, value)), Some((delivered_key, delivered_value))) =
                (&current, &delivered)
            {
                if key == delivered_key && Arc::ptr_eq(value, delivered_value) {
                    return delivered;
                }
            }

            let previous = lock(&teardown).take();
            if let Some(previous) = previous {
                previous();
            }
            if let Some((_, value)) = &current {
                let handler = handler.borrow().clone();
                let next = handler(value);
                *lock(&teardown) = next;
            }
            current
        }
    });

    on_cleanup(move || {
        disposed.store(true, Ordering::Release);
        let last = lock(&teardown).take();
        if let Some(last) = last {
            last();
        }
    });

    effect
}
