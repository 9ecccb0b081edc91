//! Where the current render sits relative to hydration.
//!
//! The phase is read from the [`SharedContext`] of the current reactive
//! [`Owner`], which is how Leptos itself tells a server render from the
//! hydrating pass in the browser.  An owner without a shared context
//! renders on the client from scratch.

use hydration_context::SharedContext;
use leptos::prelude::*;

/// The rendering phase a hook was created in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Producing the markup on the server.
    Server,
    /// The first client pass over server-rendered markup.
    Hydrating,
    /// Any client render after hydration, or without it.
    Client,
}

impl Phase {
    /// The phase of the current reactive owner.
    pub fn current() -> Self {
        match Owner::current_shared_context() {
            Some(context) if !context.is_browser() => Self::Server,
            Some(context) if context.during_hydration() => Self::Hydrating,
            _ => Self::Client,
        }
    }

    /// Whether this phase produces or reproduces server output.
    pub fn is_ssr(self) -> bool {
        self != Self::Client
    }
}

/// A per-hook phase that moves from [`Phase::Hydrating`] to
/// [`Phase::Client`] once the hook has committed, and never changes
/// otherwise.
pub(crate) fn use_phase() -> ArcRwSignal<Phase> {
    let phase = ArcRwSignal::new(Phase::current());
    if phase.get_untracked() == Phase::Hydrating {
        Effect::new({
            let phase = phase.clone();
            move || phase.set(Phase::Client)
        });
    }
    phase
}

/// The id shared by this hook on the server and in the hydrating pass.
///
/// Taken from the same sequence Leptos hands out to its own resources, so
/// it matches as long as both sides create their hooks in the same order.
pub(crate) fn next_id(phase: Phase) -> Option<String> {
    if phase == Phase::Client {
        return None;
    }
    Owner::current_shared_context().map(|context| context.next_id().into_inner().to_string())
}

/// Whether this render happens before the client took over: true for
/// server renders and for the hydrating pass, false for every render after
/// that.
///
/// The value only ever changes across the hydration boundary, right after
/// the hydrating pass committed, so anything derived from it renders the
/// server output first and re-renders with `false` afterwards.
pub fn use_is_ssr_phase() -> Signal<bool> {
    let phase = use_phase();
    Signal::derive(move || phase.get().is_ssr())
}
