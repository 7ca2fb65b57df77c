//! Subscriber handler trait and closure adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::events::Event;

/// Error type handlers surface to the dispatcher. The dispatcher logs and
/// counts these; it never propagates them to the publisher.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A bus subscriber. Handlers run concurrently with other handlers of the
/// same event and must therefore be `Send + Sync`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a handler. Mainly for tests and small leaf
/// subscribers; pipeline stages implement [`EventHandler`] directly.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
