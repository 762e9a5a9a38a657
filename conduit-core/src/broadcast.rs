//! One-to-many fan-out behind a single sink
//!
//! [`new_broadcast`] returns a façade [`BroadcastSink`] and a [`Broadcast`]
//! registry handle. Every value poured into the façade is delivered
//! concurrently to each sink registered at that moment, one tokio task per
//! sink, and the pour returns once all of them have finished.
//!
//! The registry lock is held for the whole fan-out: registration and
//! deregistration wait for an in-flight pour, and successive pours reach each
//! sink in pour order.
//!
//! On the first sink failure the fan-out token is cancelled so the remaining
//! sinks can stop at their next cancellation check. A single failure is
//! returned as-is; several are returned as [`Error::Aggregate`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::stream::{Sink, Value};

/// Handle identifying one registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

struct Registry<T> {
    sinks: Mutex<HashMap<SinkId, Arc<dyn Sink<T>>>>,
    next_id: AtomicU64,
}

/// Create a broadcast façade sink and its registry handle
#[must_use]
pub fn new_broadcast<T: Value>() -> (BroadcastSink<T>, Broadcast<T>) {
    let registry = Arc::new(Registry {
        sinks: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(0),
    });

    (
        BroadcastSink {
            registry: registry.clone(),
        },
        Broadcast { registry },
    )
}

/// Registry side of a broadcast
pub struct Broadcast<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T: Value> Broadcast<T> {
    /// Add a sink; it receives every value poured after this returns
    pub async fn register<S>(&self, sink: S) -> SinkId
    where
        S: Sink<T> + 'static,
    {
        let id = SinkId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));

        let mut sinks = self.registry.sinks.lock().await;
        sinks.insert(id, Arc::new(sink));

        debug!(sink_id = %id, registered = sinks.len(), "Sink registered");
        id
    }

    /// Remove a sink. Unknown or already removed ids are ignored.
    pub async fn deregister(&self, id: SinkId) {
        let mut sinks = self.registry.sinks.lock().await;

        if sinks.remove(&id).is_some() {
            debug!(sink_id = %id, registered = sinks.len(), "Sink deregistered");
        } else {
            debug!(sink_id = %id, "Ignoring deregistration of unknown sink");
        }
    }

    /// Number of registered sinks
    pub async fn len(&self) -> usize {
        self.registry.sinks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Façade sink fanning values out to every registered sink
pub struct BroadcastSink<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for BroadcastSink<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

#[async_trait]
impl<T: Value> Sink<T> for BroadcastSink<T> {
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()> {
        let sinks = self.registry.sinks.lock().await;
        if sinks.is_empty() {
            return Ok(());
        }

        let fanout = token.child_token();
        let mut tasks = JoinSet::new();

        for (&id, sink) in sinks.iter() {
            let sink = sink.clone();
            let value = value.clone();
            let token = fanout.clone();
            tasks.spawn(async move { (id, sink.pour(&token, value).await) });
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((id, Err(err))) => {
                    warn!(sink_id = %id, error = %err, "Broadcast sink failed");
                    err
                }
                Err(join_err) => {
                    warn!(error = %join_err, "Broadcast sink task aborted");
                    Error::msg(format!("broadcast sink task failed: {join_err}"))
                }
            };

            if errors.is_empty() {
                fanout.cancel();
            }
            errors.push(err);
        }
        drop(sinks);

        if errors.len() > 1 {
            return Err(Error::Aggregate(errors));
        }
        errors.pop().map_or(Ok(()), Err)
    }

    /// Closing the façade does not close the registered sinks.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use super::*;
    use crate::stream::{FuncSink, SinkOp, VecSink};

    #[derive(Debug)]
    struct UnexpectedValue(i32);

    impl fmt::Display for UnexpectedValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "expected end of stream but got {}", self.0)
        }
    }

    impl std::error::Error for UnexpectedValue {}

    /// Sink expecting exactly `rx`, failing on anything beyond it
    fn checking_sink(rx: Vec<i32>) -> FuncSink<impl Fn(SinkOp<i32>) -> Result<()> + Send + Sync> {
        let seen = SyncMutex::new(0usize);
        FuncSink::new(move |op: SinkOp<i32>| match op {
            SinkOp::Pour(v) => {
                let mut i = seen.lock();
                if *i >= rx.len() {
                    return Err(Error::other(UnexpectedValue(v)));
                }
                if v != rx[*i] {
                    return Err(Error::msg(format!("expected value {} but got {v}", rx[*i])));
                }
                *i += 1;
                Ok(())
            }
            SinkOp::Close(_) => Ok(()),
        })
    }

    /// Sink that parks until cancelled, reporting whether it saw the cancel
    struct WaitForCancel {
        cancelled: Arc<SyncMutex<bool>>,
    }

    #[async_trait]
    impl Sink<i32> for WaitForCancel {
        async fn pour(&self, token: &CancellationToken, _value: i32) -> Result<()> {
            tokio::select! {
                () = token.cancelled() => {
                    *self.cancelled.lock() = true;
                    Err(Error::Cancelled)
                }
                () = tokio::time::sleep(Duration::from_secs(5)) => Ok(()),
            }
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Sink that blocks each pour until released
    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Sink<i32> for Gate {
        async fn pour(&self, _token: &CancellationToken, _value: i32) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_sinks() {
        let token = CancellationToken::new();
        let (sink, bcast) = new_broadcast::<i32>();

        let first = bcast.register(checking_sink(vec![1, 2, 3])).await;
        let second = bcast.register(checking_sink(vec![1, 2, 3])).await;
        assert_ne!(first, second);
        assert_eq!(bcast.len().await, 2);

        for v in [1, 2, 3] {
            sink.pour(&token, v).await.unwrap();
        }
        sink.close().unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_aggregates_failures() {
        let token = CancellationToken::new();
        let (sink, bcast) = new_broadcast::<i32>();

        bcast.register(checking_sink(vec![0, 1])).await;
        bcast.register(checking_sink(vec![0, 1])).await;

        sink.pour(&token, 0).await.unwrap();
        sink.pour(&token, 1).await.unwrap();

        let err = sink.pour(&token, 2).await.unwrap_err();
        let errors = err.errors();
        assert!(!errors.is_empty());
        for err in errors {
            assert!(
                err.to_string().starts_with("expected end of stream but got 2")
                    || err.is_cancelled(),
                "unexpected error: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_single_failure_reported_and_others_delivered() {
        let token = CancellationToken::new();
        let (sink, bcast) = new_broadcast::<i32>();

        let ok_a = Arc::new(VecSink::new());
        let ok_b = Arc::new(VecSink::new());
        bcast.register(ok_a.clone()).await;
        bcast.register(ok_b.clone()).await;
        bcast
            .register(FuncSink::new(|_: SinkOp<i32>| -> Result<()> {
                Err(Error::msg("rejected"))
            }))
            .await;

        let err = sink.pour(&token, 42).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert_eq!(ok_a.items(), vec![42]);
        assert_eq!(ok_b.items(), vec![42]);
    }

    #[tokio::test]
    async fn test_failure_cancels_siblings() {
        let token = CancellationToken::new();
        let (sink, bcast) = new_broadcast::<i32>();

        let cancelled = Arc::new(SyncMutex::new(false));
        bcast
            .register(WaitForCancel {
                cancelled: cancelled.clone(),
            })
            .await;
        bcast
            .register(FuncSink::new(|_: SinkOp<i32>| -> Result<()> {
                Err(Error::msg("boom"))
            }))
            .await;

        let err = timeout(Duration::from_secs(1), sink.pour(&token, 1))
            .await
            .expect("fan-out must finish once siblings are cancelled")
            .unwrap_err();

        assert!(*cancelled.lock());
        assert!(!token.is_cancelled(), "caller token must stay untouched");
        match err {
            Error::Aggregate(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].to_string(), "boom");
                assert!(errors[1].is_cancelled());
            }
            other => panic!("expected aggregate, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_deregister() {
        let token = CancellationToken::new();
        let (sink, bcast) = new_broadcast::<i32>();

        let kept = Arc::new(VecSink::new());
        let removed = Arc::new(VecSink::new());
        bcast.register(kept.clone()).await;
        let id = bcast.register(removed.clone()).await;

        sink.pour(&token, 1).await.unwrap();
        bcast.deregister(id).await;
        bcast.deregister(id).await;
        sink.pour(&token, 2).await.unwrap();

        assert_eq!(kept.items(), vec![1, 2]);
        assert_eq!(removed.items(), vec![1]);
        assert_eq!(bcast.len().await, 1);
    }

    #[tokio::test]
    async fn test_pour_without_sinks() {
        let (sink, bcast) = new_broadcast::<i32>();
        assert!(bcast.is_empty().await);
        sink.pour(&CancellationToken::new(), 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_does_not_propagate() {
        let (sink, bcast) = new_broadcast::<i32>();
        let registered = Arc::new(VecSink::new());
        bcast.register(registered.clone()).await;

        sink.close().unwrap();
        sink.close().unwrap();

        assert!(!registered.is_closed());
        sink.pour(&CancellationToken::new(), 5).await.unwrap();
        assert_eq!(registered.items(), vec![5]);
    }

    #[tokio::test]
    async fn test_registration_waits_for_inflight_pour() {
        let (sink, bcast) = new_broadcast::<i32>();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        bcast
            .register(Gate {
                entered: entered.clone(),
                release: release.clone(),
            })
            .await;

        let pour = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.pour(&CancellationToken::new(), 1).await })
        };
        entered.notified().await;

        let late = Arc::new(VecSink::new());
        assert!(
            timeout(Duration::from_millis(50), bcast.register(late.clone()))
                .await
                .is_err(),
            "registration must wait for the in-flight pour"
        );

        release.notify_one();
        pour.await.unwrap().unwrap();

        bcast.register(late.clone()).await;
        assert!(late.is_empty());
    }

    #[tokio::test]
    async fn test_each_sink_sees_pour_order() {
        let token = CancellationToken::new();
        let (sink, bcast) = new_broadcast::<i32>();
        let recorders: Vec<_> = (0..4).map(|_| Arc::new(VecSink::new())).collect();
        for recorder in &recorders {
            bcast.register(recorder.clone()).await;
        }

        for v in 0..50 {
            sink.pour(&token, v).await.unwrap();
        }

        let expected: Vec<i32> = (0..50).collect();
        for recorder in &recorders {
            assert_eq!(recorder.items(), expected);
        }
    }

    #[tokio::test]
    async fn test_panicking_sink_reported_as_error() {
        let (sink, bcast) = new_broadcast::<i32>();
        bcast
            .register(FuncSink::new(|_: SinkOp<i32>| -> Result<()> {
                panic!("sink exploded")
            }))
            .await;

        let err = sink.pour(&CancellationToken::new(), 1).await.unwrap_err();
        assert!(err.to_string().starts_with("broadcast sink task failed"));
    }
}
