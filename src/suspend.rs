//! How a read reports that it cannot complete yet.
//!
//! An [`Accessor`](crate::Accessor) returns `Err(Interrupt)` when it has no
//! value to give: a suspension to wait on, a user-data error
//! for an error boundary, or a fatal [`FlowError`].  The [`Suspension`] is
//! an ordinary future, so a `Suspend` inside a Leptos `<Suspense/>` simply
//! awaits it and reads again, which is what
//! [`Accessor::read`](crate::Accessor::read) does.
//!
//! `Interrupt` implements [`std::error::Error`], so a `Result` carrying it
//! renders into the nearest `<ErrorBoundary/>` like any other error.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{join_all, BoxFuture, Shared},
    FutureExt,
};
use thiserror::Error;

use crate::{error::FlowError, flow::SourceError};

/// Why a read stopped early.
#[derive(Clone, Debug, Error)]
pub enum Interrupt {
    /// Read again once this settles.
    #[error("waiting on a pending flow")]
    Suspend(Suspension),
    /// The flow settled with an error; passed through unwrapped.
    #[error(transparent)]
    Error(SourceError),
    #[error(transparent)]
    Fatal(FlowError),
}

impl Interrupt {
    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Self::Suspend(suspension) => Some(suspension),
            _ => None,
        }
    }

    pub fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend(_))
    }
}

impl From<FlowError> for Interrupt {
    fn from(error: FlowError) -> Self {
        Self::Fatal(error)
    }
}

impl From<SourceError> for Interrupt {
    fn from(error: SourceError) -> Self {
        Self::Error(error)
    }
}

impl From<Suspension> for Interrupt {
    fn from(suspension: Suspension) -> Self {
        Self::Suspend(suspension)
    }
}

/// A cloneable handle to something a read is waiting on.
///
/// Every clone completes at the same time, so the reader, the parallel
/// coordinator and any test may all hold on to the same suspension.
#[derive(Clone)]
pub struct Suspension {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl Suspension {
    pub fn new(fut: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// Completes once every one of `suspensions` has completed.
    pub fn all(suspensions: impl IntoIterator<Item = Suspension>) -> Self {
        Self::new(join_all(suspensions).map(|_| ()))
    }

    /// Whether the underlying future has already completed.  Only ever
    /// becomes true after the suspension was polled to completion.
    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }
}

impl Future for Suspension {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("settled", &self.is_settled())
            .finish()
    }
}
