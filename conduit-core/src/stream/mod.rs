//! The producer/consumer contract every component is built on.
//!
//! A [`Sink`] accepts values pushed to it one at a time and can be closed,
//! either cleanly or with an error. A [`Source`] yields values on demand and
//! ends with [`Error::EndOfStream`] (or the error its producer closed with).
//!
//! Every method that may suspend takes a [`CancellationToken`]; cancelling the
//! token makes the call return [`Error::Cancelled`] promptly.

pub mod func;
pub mod mfr;
pub mod vec;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

pub use func::{FuncSink, FuncSource, SinkOp};
pub use mfr::{Reduce, SinkFilter, SinkMap, SourceFilter, SourceMap};
pub use vec::{VecSink, VecSource};

/// Marker trait for values flowing through streams.
///
/// No component inspects a value; it only needs to be cloned for fan-out and
/// moved across tasks.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}

/// Push side of a stream
#[async_trait]
pub trait Sink<T>: Send + Sync {
    /// Deliver one value. Fails with [`Error::Closed`] after the sink was closed.
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()>;

    /// Stop accepting values; readers see [`Error::EndOfStream`] once drained.
    fn close(&self) -> Result<()>;

    /// Like [`close`](Self::close), but readers see `err` once drained.
    fn close_with_error(&self, err: Error) -> Result<()> {
        let _ = err;
        self.close()
    }
}

/// Pull side of a stream
#[async_trait]
pub trait Source<T>: Send {
    /// Next value in arrival order, [`Error::EndOfStream`] when the producer
    /// is closed and drained, or [`Error::Cancelled`] if `token` fires first.
    async fn next(&mut self, token: &CancellationToken) -> Result<T>;
}

#[async_trait]
impl<T, S> Sink<T> for Arc<S>
where
    T: Send + 'static,
    S: Sink<T> + ?Sized,
{
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()> {
        (**self).pour(token, value).await
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn close_with_error(&self, err: Error) -> Result<()> {
        (**self).close_with_error(err)
    }
}

#[async_trait]
impl<T, S> Source<T> for Box<S>
where
    T: Send + 'static,
    S: Source<T> + ?Sized,
{
    async fn next(&mut self, token: &CancellationToken) -> Result<T> {
        (**self).next(token).await
    }
}

/// Copy every value from `src` into `dst`, then close `dst`.
///
/// Stops at the first error. End of stream closes `dst` cleanly and returns the
/// number of values copied. A source failure closes `dst` with that failure and
/// is returned. A sink failure is returned without closing `dst`.
pub async fn pump<T>(
    token: &CancellationToken,
    src: &mut (dyn Source<T> + '_),
    dst: &(dyn Sink<T> + '_),
) -> Result<usize>
where
    T: Send + 'static,
{
    let mut copied = 0usize;

    loop {
        match src.next(token).await {
            Ok(value) => {
                dst.pour(token, value).await?;
                copied += 1;
            }
            Err(Error::EndOfStream) => {
                debug!(copied = copied, "Source drained, closing sink");
                dst.close()?;
                return Ok(copied);
            }
            Err(err) => {
                debug!(copied = copied, error = %err, "Source failed, closing sink with error");
                dst.close_with_error(err.clone())?;
                return Err(err);
            }
        }
    }
}
