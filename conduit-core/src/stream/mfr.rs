//! Map, filter and reduce adapters over sinks and sources
//!
//! Each adapter wraps one sink or source and applies a plain callable to the
//! values passing through it. Closing a wrapped sink closes the inner sink;
//! end of stream and errors from a wrapped source pass through untouched.
//!
//! ```rust,ignore
//! let numbers = VecSource::new(vec![0u32, 1, 2, 3, 4]);
//! let mut letters = SourceMap::new(numbers, |n: u32| Ok(char::from(b'a' + n as u8)));
//! assert_eq!(letters.next(&token).await?, 'a');
//! ```

use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Sink, Source, Value};
use crate::broadcast::{new_broadcast, Broadcast, BroadcastSink, SinkId};
use crate::error::{Error, Result};

/// Source yielding `f(v)` for every `v` of the inner source
pub struct SourceMap<S, F, T> {
    src: S,
    f: F,
    _input: PhantomData<fn(T)>,
}

impl<S, F, T> SourceMap<S, F, T> {
    pub fn new<U>(src: S, f: F) -> Self
    where
        S: Source<T>,
        F: FnMut(T) -> Result<U>,
    {
        Self {
            src,
            f,
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, T, U> Source<U> for SourceMap<S, F, T>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Source<T>,
    F: FnMut(T) -> Result<U> + Send,
{
    async fn next(&mut self, token: &CancellationToken) -> Result<U> {
        let value = self.src.next(token).await?;
        (self.f)(value)
    }
}

/// Sink pouring `f(v)` into the inner sink for every poured `v`
pub struct SinkMap<S, F, U> {
    sink: S,
    f: F,
    _output: PhantomData<fn() -> U>,
}

impl<S, F, U> SinkMap<S, F, U> {
    pub fn new<T>(sink: S, f: F) -> Self
    where
        S: Sink<U>,
        F: Fn(T) -> Result<U>,
    {
        Self {
            sink,
            f,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, T, U> Sink<T> for SinkMap<S, F, U>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Sink<U>,
    F: Fn(T) -> Result<U> + Send + Sync,
{
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()> {
        let mapped = (self.f)(value)?;
        self.sink.pour(token, mapped).await
    }

    fn close(&self) -> Result<()> {
        self.sink.close()
    }

    fn close_with_error(&self, err: Error) -> Result<()> {
        self.sink.close_with_error(err)
    }
}

/// Source skipping every value the predicate rejects
pub struct SourceFilter<S, F> {
    src: S,
    f: F,
}

impl<S, F> SourceFilter<S, F> {
    pub fn new<T>(src: S, f: F) -> Self
    where
        S: Source<T>,
        F: FnMut(&T) -> Result<bool>,
    {
        Self { src, f }
    }
}

#[async_trait]
impl<S, F, T> Source<T> for SourceFilter<S, F>
where
    T: Send + 'static,
    S: Source<T>,
    F: FnMut(&T) -> Result<bool> + Send,
{
    async fn next(&mut self, token: &CancellationToken) -> Result<T> {
        loop {
            let value = self.src.next(token).await?;
            if (self.f)(&value)? {
                return Ok(value);
            }
        }
    }
}

/// Sink forwarding only the values the predicate accepts
pub struct SinkFilter<S, F> {
    sink: S,
    f: F,
}

impl<S, F> SinkFilter<S, F> {
    pub fn new<T>(sink: S, f: F) -> Self
    where
        S: Sink<T>,
        F: Fn(&T) -> Result<bool>,
    {
        Self { sink, f }
    }
}

#[async_trait]
impl<S, F, T> Sink<T> for SinkFilter<S, F>
where
    T: Send + 'static,
    S: Sink<T>,
    F: Fn(&T) -> Result<bool> + Send + Sync,
{
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()> {
        if (self.f)(&value)? {
            self.sink.pour(token, value).await
        } else {
            Ok(())
        }
    }

    fn close(&self) -> Result<()> {
        self.sink.close()
    }

    fn close_with_error(&self, err: Error) -> Result<()> {
        self.sink.close_with_error(err)
    }
}

/// Sink folding poured values into an accumulator and broadcasting each new
/// accumulator to its registered sinks
///
/// The reducer sees `None` on the first pour. A reducer error leaves the
/// accumulator unchanged and notifies nobody.
pub struct Reduce<A, F> {
    acc: Mutex<Option<A>>,
    f: F,
    broadcast: Broadcast<A>,
    sink: BroadcastSink<A>,
}

impl<A: Value, F> Reduce<A, F> {
    pub fn new<T>(f: F) -> Self
    where
        F: Fn(Option<&A>, T) -> Result<A>,
    {
        let (sink, broadcast) = new_broadcast();

        Self {
            acc: Mutex::new(None),
            f,
            broadcast,
            sink,
        }
    }

    /// Current accumulator, `None` before the first pour
    pub async fn value(&self) -> Option<A> {
        self.acc.lock().await.clone()
    }

    pub async fn register<S>(&self, sink: S) -> SinkId
    where
        S: Sink<A> + 'static,
    {
        self.broadcast.register(sink).await
    }

    pub async fn deregister(&self, id: SinkId) {
        self.broadcast.deregister(id).await;
    }
}

#[async_trait]
impl<A, F, T> Sink<T> for Reduce<A, F>
where
    A: Value,
    T: Send + 'static,
    F: Fn(Option<&A>, T) -> Result<A> + Send + Sync,
{
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()> {
        let mut acc = self.acc.lock().await;
        let next = (self.f)(acc.as_ref(), value)?;
        *acc = Some(next.clone());
        self.sink.pour(token, next).await
    }

    /// Registered sinks stay open, as with the broadcast façade.
    fn close(&self) -> Result<()> {
        debug!("Reduce sink closed");
        Ok(())
    }
}
