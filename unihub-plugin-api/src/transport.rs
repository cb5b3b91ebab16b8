//! Transport abstraction between plugin code and the host
//!
//! The host hands each view one transport bound to that view's plugin id.
//! Plugin code only ever sees the transport, never the broker itself.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("transport failure: {0}")]
    Other(String),
}

/// Boxed future returned by [`Transport::call`]
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, TransportError>> + Send + 'a>>;

/// Sends one encoded request and resolves with the encoded response
pub trait Transport: Send + Sync {
    fn call(&self, payload: Vec<u8>) -> TransportFuture<'_>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn call(&self, payload: Vec<u8>) -> TransportFuture<'_> {
        (**self).call(payload)
    }
}
