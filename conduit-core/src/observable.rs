//! Last-value cache with change notification
//!
//! An [`Observable`] holds one value and a [`Broadcast`]. `set` stores the new
//! value and fans it out to the registered sinks while holding the value lock,
//! so notifications leave in `set` order. Sinks registered later only see
//! later changes; the current value is not replayed to them.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{new_broadcast, Broadcast, BroadcastSink, SinkId};
use crate::error::Result;
use crate::stream::{Sink, Value};

pub struct Observable<T> {
    broadcast: Broadcast<T>,
    sink: BroadcastSink<T>,
    value: Mutex<T>,
}

impl<T: Value> Observable<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (sink, broadcast) = new_broadcast();

        Self {
            broadcast,
            sink,
            value: Mutex::new(initial),
        }
    }

    /// Store `value` and notify every registered sink
    ///
    /// The value is stored even if a sink fails; the fan-out error is returned.
    pub async fn set(&self, value: T) -> Result<()> {
        self.set_with(&CancellationToken::new(), value).await
    }

    /// Like [`set`](Self::set), with a token bounding the fan-out
    pub async fn set_with(&self, token: &CancellationToken, value: T) -> Result<()> {
        let mut current = self.value.lock().await;
        *current = value.clone();
        self.sink.pour(token, value).await
    }

    /// The argument of the most recent `set`, or the initial value
    pub async fn value(&self) -> T {
        self.value.lock().await.clone()
    }

    /// Subscribe to future changes
    pub async fn register<S>(&self, sink: S) -> SinkId
    where
        S: Sink<T> + 'static,
    {
        self.broadcast.register(sink).await
    }

    pub async fn deregister(&self, id: SinkId) {
        self.broadcast.deregister(id).await;
    }

    #[must_use]
    pub const fn broadcast(&self) -> &Broadcast<T> {
        &self.broadcast
    }
}
