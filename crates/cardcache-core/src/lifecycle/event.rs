use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::ProxyError;
use crate::http::{Request, Response};

/// Events the host delivers to a worker.
#[derive(Debug)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Install => EventKind::Install,
            Event::Activate => EventKind::Activate,
            Event::Fetch(_) => EventKind::Fetch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Install => f.write_str("install"),
            EventKind::Activate => f.write_str("activate"),
            EventKind::Fetch => f.write_str("fetch"),
        }
    }
}

/// What a settled event produced
#[derive(Debug)]
pub enum Outcome {
    /// Every manifest asset was stored
    Installed { cached: usize },
    /// Clients were claimed; lists any namespaces deleted on the way
    Activated { purged: Vec<String> },
    /// The answer to an intercepted request. `None` means neither the cache
    /// nor the network produced a response.
    Responded(Option<Response>),
}

/// Keeps a dispatched event pending until its action finishes.
///
/// Nothing runs until the host settles the token.
#[must_use = "an event does nothing until its WaitUntil is settled"]
pub struct WaitUntil {
    kind: EventKind,
    action: BoxFuture<'static, Result<Outcome, ProxyError>>,
}

impl WaitUntil {
    pub(crate) fn new<F>(kind: EventKind, action: F) -> Self
    where
        F: Future<Output = Result<Outcome, ProxyError>> + Send + 'static,
    {
        Self {
            kind,
            action: action.boxed(),
        }
    }

    /// A token that settles immediately with `error`
    pub(crate) fn rejected(kind: EventKind, error: ProxyError) -> Self {
        Self::new(kind, futures::future::ready(Err(error)))
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub async fn settle(self) -> Result<Outcome, ProxyError> {
        self.action.await
    }
}

impl fmt::Debug for WaitUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitUntil").field("kind", &self.kind).finish()
    }
}

/// Host operations a worker can request while handling an event.
#[async_trait]
pub trait ClientControl: Send + Sync {
    /// Activate as soon as installation succeeds instead of waiting for open
    /// app instances to close.
    async fn skip_waiting(&self);

    /// Take control of every currently open app instance.
    async fn claim(&self) -> Result<(), ProxyError>;
}
