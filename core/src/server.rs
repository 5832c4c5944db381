//! The contract between the network and the servers registered on it.

use std::future::Future;

use async_trait::async_trait;

use crate::http::{RequestDescriptor, ResponseDescriptor};

/// A simulated server reachable through the network under a URL prefix.
///
/// The returned response is the one and only answer to `request`. Handlers
/// do their own authentication and must not assume the transport retried or
/// deduplicated anything: the same logical operation can arrive twice if the
/// client retried after a lost response.
#[async_trait]
pub trait ServerHandler: Send + Sync {
    async fn handle_request(&self, request: RequestDescriptor) -> ResponseDescriptor;
}

/// Adapts an async closure into a `ServerHandler`.
pub struct FnHandler<F>(F);

/// Build a handler from `Fn(RequestDescriptor) -> impl Future<Output = ResponseDescriptor>`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResponseDescriptor> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ServerHandler for FnHandler<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResponseDescriptor> + Send + 'static,
{
    async fn handle_request(&self, request: RequestDescriptor) -> ResponseDescriptor {
        (self.0)(request).await
    }
}
