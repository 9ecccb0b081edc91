//! Consuming several async flows in one component without a waterfall.
//!
//! Read one after another, each pending flow would only be discovered once
//! the accessor of the flow before it stopped suspending: the first read
//! suspends on the first flow, the retry suspends on the second, and so on.
//! [`Parallel`] avoids this by looking at the raw snapshot of every flow in
//! the group first.  On the first mount, every flow that is pending without
//! any data has its future requested, and [`Parallel::finish`] suspends once
//! on all of them together.
//!
//! [`ParallelFlows::get`] and [`ParallelTuple::get`] finish the group before
//! handing out any consumer.  When driving [`Parallel`] by hand, calling the
//! accessor of one entry before [`Parallel::finish`] suspends on that one
//! flow alone, and the remaining flows then load one after another as
//! before.  This is a slower path, not an error.

use std::{
    fmt, mem,
    sync::{Arc, Mutex, MutexGuard},
};

use leptos::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    consume::{consume_in, Consumed},
    error::FlowError,
    flow::{lock, AsyncFlow, AsyncFlowState, IntoSource, IntoSources, Source},
    phase::Phase,
    suspend::{Interrupt, Suspension},
};

type Scan = Arc<dyn Fn() -> Option<Suspension> + Send + Sync>;

/// A group of async flows consumed by one component.
#[derive(Clone)]
pub struct Parallel {
    inner: Arc<Mutex<Group>>,
}

struct Group {
    // only the first mount collects, and never while hydrating
    collect: bool,
    suspended: bool,
    arity: Option<usize>,
    scans: Vec<Scan>,
}

/// Start a group of flows.
pub fn use_parallel() -> Parallel {
    Parallel {
        inner: Arc::new(Mutex::new(Group {
            // suspending while hydrating would break the server output just
            // like an accessor would
            collect: Phase::current() != Phase::Hydrating,
            suspended: false,
            arity: None,
            scans: Vec::new(),
        })),
    }
}

impl Parallel {
    fn lock(&self) -> MutexGuard<'_, Group> {
        lock(&self.inner)
    }

    /// Have [`finish`](Self::finish) inspect the raw snapshot of `source`,
    /// requesting its future if it still has to load for the first mount.
    pub fn scan<T>(&self, source: impl IntoSource<dyn AsyncFlow<T>>)
    where
        T: Send + Sync + 'static,
    {
        let source = source.into_source();
        self.lock().scans.push(Arc::new(move || {
            let flow = source.try_get_untracked()?.flow()?.clone();
            matches!(&*flow.snapshot(), AsyncFlowState::Pending { data: None })
                .then(|| Suspension::new(flow.as_future()))
        }));
    }

    /// [`scan`](Self::scan) `source`, then consume it as part of this group.
    pub fn consume<T>(&self, source: impl IntoSource<dyn AsyncFlow<T>>) -> Consumed<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let source = source.into_source();
        self.scan(source);
        consume_in(source, Some(self.clone()))
    }

    /// Suspend once on every flow the scans found still loading, if the
    /// group is still collecting.
    ///
    /// Collection stops the first time nothing was found, and never starts
    /// for a group created while hydrating.
    pub fn finish(&self) -> Result<(), Interrupt> {
        let scans = {
            let group = self.lock();
            if !group.collect {
                return Ok(());
            }
            group.scans.clone()
        };
        let pending = scans.iter().filter_map(|scan| scan()).collect::<Vec<_>>();
        let mut group = self.lock();
        if pending.is_empty() {
            group.collect = false;
            Ok(())
        } else {
            group.suspended = true;
            Err(Interrupt::Suspend(Suspension::all(pending)))
        }
    }

    /// Note that a read in this group suspended.
    pub(crate) fn mark_suspended(&self) {
        self.lock().suspended = true;
    }

    /// Check the number of flows against the last accepted count.
    ///
    /// A change is a fatal [`FlowError::ArityChanged`], except on the first
    /// check after a read that suspended, where the previous count may come
    /// from an initial render racing its own loading.  A failed check keeps
    /// the previous count.
    pub fn check_arity(&self, current: usize) -> Result<(), FlowError> {
        let mut group = self.lock();
        let exempt = mem::take(&mut group.suspended);
        match group.arity {
            Some(previous) if previous != current && !exempt => {
                Err(FlowError::ArityChanged { previous, current })
            }
            _ => {
                group.arity = Some(current);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Parallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = self.lock();
        f.debug_struct("Parallel")
            .field("collect", &group.collect)
            .field("suspended", &group.suspended)
            .field("arity", &group.arity)
            .field("scans", &group.scans.len())
            .finish()
    }
}

/// Consumers for a list of flows of the same type, see [`use_async_flows`].
pub struct ParallelFlows<T: Send + Sync + 'static> {
    group: Parallel,
    sources: Signal<Vec<Source<dyn AsyncFlow<T>>>>,
    owner: Option<Owner>,
    consumed: Arc<Mutex<Vec<Consumed<T>>>>,
}

impl<T: Send + Sync + 'static> Clone for ParallelFlows<T> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
            sources: self.sources,
            owner: self.owner.clone(),
            consumed: self.consumed.clone(),
        }
    }
}

/// Consume every flow of `sources`, suspending once on all of those that
/// still have to load on the first mount.
///
/// The number of sources must stay the same for as long as the component
/// is mounted, see [`Parallel::check_arity`].
pub fn use_async_flows<T>(sources: impl IntoSources<dyn AsyncFlow<T>>) -> ParallelFlows<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let flows = ParallelFlows {
        group: use_parallel(),
        sources: sources.into_sources(),
        owner: Owner::current(),
        consumed: Arc::new(Mutex::new(Vec::new())),
    };
    flows.grow(flows.sources.with_untracked(Vec::len));
    flows
}

impl<T> ParallelFlows<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// One consumer per source, once none of them has to load for the
    /// first mount any more.
    pub fn get(&self) -> Result<Vec<Consumed<T>>, Interrupt> {
        let count = self.sources.with(Vec::len);
        self.group.check_arity(count)?;
        self.grow(count);
        self.group.finish()?;
        Ok(lock(&self.consumed)[..count].to_vec())
    }

    pub fn group(&self) -> &Parallel {
        &self.group
    }

    fn grow(&self, count: usize) {
        let start = lock(&self.consumed).len();
        if start >= count {
            return;
        }
        let create = || {
            (start..count)
                .map(|index| {
                    let sources = self.sources;
                    self.group.consume(Signal::derive(move || {
                        sources.with(|sources| sources.get(index).cloned().unwrap_or(Source::Skip))
                    }))
                })
                .collect::<Vec<_>>()
        };
        let created = match &self.owner {
            Some(owner) => owner.with(create),
            None => create(),
        };
        lock(&self.consumed).extend(created);
    }
}

/// Consumers for a tuple of flows of possibly different types, see
/// [`use_async_flow_tuple`].
#[derive(Clone)]
pub struct ParallelTuple<O> {
    group: Parallel,
    consumed: O,
}

impl<O: Clone> ParallelTuple<O> {
    /// The consumers, once none of the flows has to load for the first
    /// mount any more.
    pub fn get(&self) -> Result<O, Interrupt> {
        self.group.finish()?;
        Ok(self.consumed.clone())
    }

    pub fn group(&self) -> &Parallel {
        &self.group
    }
}

/// A tuple of sources of possibly different types, see
/// [`use_async_flow_tuple`].
pub trait FlowTuple {
    type Output: Clone;

    #[doc(hidden)]
    fn consume_all(self, group: &Parallel) -> Self::Output;
}

macro_rules! flow_tuple {
    ($($name:ident: $ty:ident),+) => {
        impl<$($ty),+> FlowTuple for ($(Source<dyn AsyncFlow<$ty>>,)+)
        where
            $($ty: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,)+
        {
            type Output = ($(Consumed<$ty>,)+);

            fn consume_all(self, group: &Parallel) -> Self::Output {
                let ($($name,)+) = self;
                ($(group.consume($name),)+)
            }
        }
    };
}

flow_tuple!(a: A);
flow_tuple!(a: A, b: B);
flow_tuple!(a: A, b: B, c: C);
flow_tuple!(a: A, b: B, c: C, d: D);

/// [`use_async_flows`] for flows of different types.
///
/// ```ignore
/// let pair = use_async_flow_tuple((count.into(), name.into()));
/// let ((count, _), (name, _)) = pair.get()?;
/// ```
pub fn use_async_flow_tuple<L: FlowTuple>(sources: L) -> ParallelTuple<L::Output> {
    let group = use_parallel();
    let consumed = sources.consume_all(&group);
    ParallelTuple { group, consumed }
}
