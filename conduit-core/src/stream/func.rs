//! Adapters turning plain closures into sinks and sources

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Sink, Source};
use crate::error::{Error, Result};

/// Operation handed to the callable behind a [`FuncSink`]
#[derive(Debug, Clone)]
pub enum SinkOp<T> {
    Pour(T),
    /// `None` for a clean close, `Some(err)` for `close_with_error`.
    Close(Option<Error>),
}

/// Sink backed by a single callable
///
/// The callable runs even when the token is already cancelled.
///
/// ```rust,ignore
/// let sink = FuncSink::new(|op| match op {
///     SinkOp::Pour(v) => { println!("got {v}"); Ok(()) }
///     SinkOp::Close(_) => Ok(()),
/// });
/// ```
pub struct FuncSink<F> {
    f: F,
}

impl<F> FuncSink<F> {
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F> Sink<T> for FuncSink<F>
where
    T: Send + 'static,
    F: Fn(SinkOp<T>) -> Result<()> + Send + Sync,
{
    async fn pour(&self, _token: &CancellationToken, value: T) -> Result<()> {
        (self.f)(SinkOp::Pour(value))
    }

    fn close(&self) -> Result<()> {
        (self.f)(SinkOp::Close(None))
    }

    fn close_with_error(&self, err: Error) -> Result<()> {
        (self.f)(SinkOp::Close(Some(err)))
    }
}

/// Source backed by a callable producing the next value
pub struct FuncSource<F> {
    f: F,
}

impl<F> FuncSource<F> {
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F> Source<T> for FuncSource<F>
where
    T: Send + 'static,
    F: FnMut() -> Result<T> + Send,
{
    async fn next(&mut self, _token: &CancellationToken) -> Result<T> {
        (self.f)()
    }
}
