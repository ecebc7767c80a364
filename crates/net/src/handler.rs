//! Request handling seam between the connection drivers and applications.

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;

/// An asynchronous request handler.
///
/// The server buffers each request body before dispatch, so handlers see
/// complete [`Bytes`]. The response body stays generic; the connection
/// driver collects whatever [`Body`] the handler produces.
#[async_trait]
pub trait Handler: Send + Sync {
    type RespBody: Body + Send + 'static;
    type Error: Into<Box<dyn Error + Send + Sync>> + Send;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<Self::RespBody>, Self::Error>;
}

/// A [`Handler`] backed by a plain async function or closure.
#[derive(Debug)]
pub struct HandlerFn<F> {
    func: F,
}

/// Wraps an async function into a [`Handler`].
///
/// ```
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use http_body_util::Full;
/// use trellis_net::handler::make_handler;
///
/// let handler = make_handler(|_req: Request<Bytes>| async {
///     Ok::<_, std::convert::Infallible>(Response::new(Full::new(Bytes::from_static(b"ok"))))
/// });
/// # let _ = handler;
/// ```
pub fn make_handler<F, Fut, B, E>(func: F) -> HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, E>> + Send,
    B: Body + Send + 'static,
    E: Into<Box<dyn Error + Send + Sync>> + Send,
{
    HandlerFn { func }
}

#[async_trait]
impl<F, Fut, B, E> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, E>> + Send,
    B: Body + Send + 'static,
    E: Into<Box<dyn Error + Send + Sync>> + Send,
{
    type RespBody = B;
    type Error = E;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<Self::RespBody>, Self::Error> {
        (self.func)(request).await
    }
}
