//! Typed events and listener registries.
//!
//! Each service exposes one registration method per event kind
//! (`on_message`, `on_connected`, `on_error`, `on_flow_output`). Listeners are
//! async closures; a registry invokes them one after another in registration
//! order and awaits each before starting the next.
//!
//! A listener that returns an error or panics does not affect the others.
//! The failure is handed back to the caller of [`ListenerRegistry::dispatch`],
//! which turns it into an [`ErrorEvent`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use brokerlink_types::MessageId;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type of a listener invocation.
pub type ListenerResult = Result<(), ListenerError>;

type BoxedListener<E> = Arc<dyn Fn(E) -> BoxFuture<'static, ListenerResult> + Send + Sync>;

/// A listener panicked while handling an event.
#[derive(Debug, Clone, Error)]
#[error("listener panicked: {0}")]
pub struct ListenerPanic(pub String);

impl ListenerPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ListenerPanic(reason)
    }
}

/// What raised an [`ErrorEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// A `message` or `flow-output` listener failed.
    Listener,
    /// The transport failed to deliver a record.
    Transport,
    /// The output monitor could not classify a record.
    Classification,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOrigin::Listener => write!(f, "listener"),
            ErrorOrigin::Transport => write!(f, "transport"),
            ErrorOrigin::Classification => write!(f, "classification"),
        }
    }
}

/// Payload of an `error` event.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub origin: ErrorOrigin,
    /// The record being processed, when the failure is tied to one.
    pub message: Option<MessageId>,
    /// The original failure.
    pub cause: Arc<dyn std::error::Error + Send + Sync>,
}

impl ErrorEvent {
    pub fn new(
        origin: ErrorOrigin,
        message: Option<MessageId>,
        cause: Arc<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            origin,
            message,
            cause,
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(id) => write!(f, "{} error at {}: {}", self.origin, id, self.cause),
            None => write!(f, "{} error: {}", self.origin, self.cause),
        }
    }
}

/// Payload of a `connected` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub topics: Vec<String>,
    pub group_id: String,
}

/// A listener that failed during dispatch.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    /// Registration index of the failing listener.
    pub index: usize,
    pub cause: Arc<dyn std::error::Error + Send + Sync>,
}

/// Append-only list of async listeners for one event kind.
pub struct ListenerRegistry<E> {
    listeners: RwLock<Vec<BoxedListener<E>>>,
}

impl<E> ListenerRegistry<E>
where
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Append a listener.
    pub fn register<F, Fut>(&self, listener: F)
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let boxed: BoxedListener<E> = Arc::new(move |event| listener(event).boxed());
        self.listeners.write().push(boxed);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke every listener with `event`, in registration order.
    ///
    /// The listener list is captured before the first invocation, so a
    /// listener registered meanwhile is first called for the next event.
    pub async fn dispatch(&self, event: E) -> Vec<ListenerFailure> {
        let listeners: Vec<BoxedListener<E>> = self.listeners.read().clone();
        let mut failures = Vec::new();

        for (index, listener) in listeners.iter().enumerate() {
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event.clone()))) {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(payload) => Err(payload),
            };

            let cause: Arc<dyn std::error::Error + Send + Sync> = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => Arc::from(err),
                Err(payload) => Arc::new(ListenerPanic::from_payload(payload)),
            };
            failures.push(ListenerFailure { index, cause });
        }

        failures
    }
}

impl ListenerRegistry<ErrorEvent> {
    /// Deliver an error event. Failing error listeners are only logged.
    pub(crate) async fn emit(&self, service: &'static str, event: ErrorEvent) {
        for failure in self.dispatch(event).await {
            warn!(
                service,
                listener = failure.index,
                error = %failure.cause,
                "Error listener failed"
            );
        }
    }

    /// Turn each listener failure into an error event.
    pub(crate) async fn report(
        &self,
        service: &'static str,
        message: Option<MessageId>,
        failures: Vec<ListenerFailure>,
    ) {
        for failure in failures {
            warn!(
                service,
                listener = failure.index,
                record = ?message,
                error = %failure.cause,
                "Listener failed"
            );
            let event = ErrorEvent::new(ErrorOrigin::Listener, message.clone(), failure.cause);
            self.emit(service, event).await;
        }
    }
}

impl<E> Default for ListenerRegistry<E>
where
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
