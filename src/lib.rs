//! This crate provides the binding layer that lets Leptos components consume
//! values held by externally-owned flows, both plain push-based containers
//! and ones that track an asynchronous operation, while producing the same
//! output on the server as on the client during hydration.
//!
//! ## Use case
//!
//! Data is often owned by something that has no idea a renderer exists: a
//! store fed by a websocket, a cache of fetched records, a background task
//! refreshing a list.  Reading such a value from a component is easy enough,
//! but doing it right is not.  The component has to re-render when the
//! value changes and only then, it must never show a mix of two emissions
//! within one render, and it has to let go of the container when it is
//! unmounted.  When rendering happens on the server first, the value the
//! server used must also be carried over to the client, otherwise the first
//! client pass renders something different and hydration breaks.
//!
//! Asynchronous flows add another layer on top.  A component either wants
//! to suspend until the data is there and let a `<Suspense/>` show the
//! fallback, or branch on loading and error flags to show its own.
//! Previously loaded data should remain on screen while a refetch happens,
//! and a component consuming several flows should not discover them one
//! suspension at a time.
//!
//! # Overview
//!
//! - [`use_flow`] subscribes to a [`Flow`] and returns its current value as
//!   a [`Signal`](leptos::prelude::Signal).
//! - [`use_async_flow`] subscribes to an [`AsyncFlow`] and returns an
//!   [`Accessor`], which suspends or fails when read, together with a
//!   [`FlowState`] for components that would rather branch on flags.
//! - [`use_async_flows`] and [`use_async_flow_tuple`] consume several async
//!   flows with a single combined suspension on first mount.
//! - [`use_flow_effect`] runs a side effect whenever a flow emits, outside
//!   of rendering.
//! - [`use_is_ssr_phase`] reports whether the current render is producing
//!   or reproducing server output.
//! - [`HydrationRegistry`](hydration::HydrationRegistry) records the values
//!   rendered on the server and replays them on the client.
//!
//! The hooks are plain Leptos reactive code: they must be called under a
//! reactive [`Owner`](leptos::prelude::Owner), subscribe from an effect, and
//! let go of the flow when that owner is cleaned up.  The rendering phase is
//! taken from the owner's shared context, the same way Leptos tells a
//! server render from hydration.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use leptos::prelude::*;
//! use leptos_flow::{use_flow, Flow, Listener, Source, Subscription};
//!
//! struct Counter {
//!     value: Mutex<Arc<u32>>,
//!     listeners: Mutex<Vec<Listener>>,
//! }
//!
//! impl Flow for Counter {
//!     type Value = u32;
//!
//!     fn snapshot(&self) -> Arc<u32> {
//!         self.value.lock().unwrap().clone()
//!     }
//!
//!     fn subscribe(&self, listener: Listener) -> Subscription {
//!         self.listeners.lock().unwrap().push(listener);
//!         Subscription::noop()
//!     }
//! }
//!
//! # tokio_test::block_on(tokio::task::LocalSet::new().run_until(async {
//! let _ = any_spawner::Executor::init_tokio();
//! let owner = Owner::new();
//! owner.set();
//!
//! let counter = Arc::new(Counter {
//!     value: Mutex::new(Arc::new(1)),
//!     listeners: Mutex::new(Vec::new()),
//! });
//! let value = use_flow(Source::Flow(counter.clone()));
//! assert_eq!(value.get_untracked().as_deref(), Some(&1));
//!
//! // the listener is attached once the hook has mounted
//! any_spawner::Executor::tick().await;
//! *counter.value.lock().unwrap() = Arc::new(2);
//! for listener in counter.listeners.lock().unwrap().iter() {
//!     listener();
//! }
//! assert_eq!(value.get_untracked().as_deref(), Some(&2));
//! # }));
//! ```
//!
//! The documentation under individual modules and types go more into the
//! details, please check them out.
//!
//! # Feature Flags
#![cfg_attr(
    feature = "document-features",
    cfg_attr(doc, doc = ::document_features::document_features!())
)]

mod classify;
mod consume;
mod effect;
mod error;
mod flow;
pub mod hydration;
mod parallel;
mod phase;
mod subscribe;
mod suspend;


pub use classify::{classify, FlowState, FlowStatus};
pub use consume::{use_async_flow, Accessor, Consumed};
pub use effect::{use_flow_effect, FlowEffect, Teardown};
pub use error::FlowError;
pub use flow::{
    AsyncFlow, AsyncFlowState, Flow, IntoSource, IntoSources, Listener, SkipToken, Source,
    SourceError, SourceKey, Subscription,
};
pub use parallel::{
    use_async_flow_tuple, use_async_flows, use_parallel, FlowTuple, Parallel, ParallelFlows,
    ParallelTuple,
};
pub use phase::{use_is_ssr_phase, Phase};
pub use subscribe::use_flow;
pub use suspend::{Interrupt, Suspension};
