//! Append-only in-memory log with bounded and live reads
//!
//! Values are stored in an arena indexed by their sequence number. Sequence
//! numbers start at 0 and grow by one per [`append`](MemoryLog::append); the
//! log never shrinks, so bounding memory is the caller's responsibility.
//!
//! Readers go through [`MemoryLog::query`], which returns a [`Cursor`]. A
//! cursor walks the log forward one entry at a time. A live cursor that reaches
//! the tail parks on the log's "arrived" signal until the next append or until
//! its cancellation token fires.
//!
//! # Example
//!
//! ```rust,ignore
//! let log = MemoryLog::new();
//! log.append("a").await?;
//!
//! let mut cursor = log.query([live(true)]);
//! assert_eq!(cursor.next(&token).await?, "a");
//! // blocks until the next append
//! let b = cursor.next(&token).await?;
//! ```

mod query;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::observable::Observable;
use crate::stream::Value;

pub use query::{gt, immediate, limit, live, Cursor, QuerySpec};

/// Position of an entry in a [`MemoryLog`]
pub type Seq = u64;

struct LogInner<T> {
    /// Entry `i` holds the value appended with sequence number `i`.
    entries: RwLock<Vec<T>>,
    /// Woken after every append.
    arrived: Notify,
    /// Serializes appenders so sequence notifications leave in append order.
    append_gate: Mutex<()>,
    seq: Observable<Option<Seq>>,
}

impl<T: Clone> LogInner<T> {
    fn entry(&self, seq: Seq) -> Option<T> {
        let index = usize::try_from(seq).ok()?;
        self.entries.read().get(index).cloned()
    }
}

/// Append-only, in-memory sequence of values
pub struct MemoryLog<T> {
    inner: Arc<LogInner<T>>,
}

impl<T> Clone for MemoryLog<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Value> Default for MemoryLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Value> MemoryLog<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LogInner {
                entries: RwLock::new(Vec::new()),
                arrived: Notify::new(),
                append_gate: Mutex::new(()),
                seq: Observable::new(None),
            }),
        }
    }

    /// Sequence number of the latest entry, `None` while the log is empty
    #[must_use]
    pub fn seq(&self) -> &Observable<Option<Seq>> {
        &self.inner.seq
    }

    /// Add `value` at the tail and return its sequence number
    ///
    /// Wakes every live cursor parked at the tail, then publishes the new
    /// sequence number through [`seq`](Self::seq). A failing sequence
    /// observer is logged; the entry is appended regardless.
    ///
    /// Waits for every sequence observer; use [`append_with`](Self::append_with)
    /// to bound that wait.
    pub async fn append(&self, value: T) -> Result<Seq> {
        self.append_with(&CancellationToken::new(), value).await
    }

    /// Like [`append`](Self::append), with a token bounding the wait
    ///
    /// Cancelled while queued behind another appender, nothing is appended and
    /// [`Error::Cancelled`] is returned. Cancelled while sequence observers are
    /// being notified, the entry stays appended and its sequence number is
    /// returned.
    pub async fn append_with(&self, token: &CancellationToken, value: T) -> Result<Seq> {
        let _gate = tokio::select! {
            gate = self.inner.append_gate.lock() => gate,
            () = token.cancelled() => return Err(Error::Cancelled),
        };

        let seq = {
            let mut entries = self.inner.entries.write();
            entries.push(value);
            (entries.len() - 1) as Seq
        };
        self.inner.arrived.notify_waiters();

        debug!(seq = seq, "Appended to memory log");

        if let Err(err) = self.inner.seq.set_with(token, Some(seq)).await {
            warn!(seq = seq, error = %err, "Sequence observer failed");
        }

        Ok(seq)
    }

    /// Value stored under `seq`
    pub fn get(&self, seq: Seq) -> Result<T> {
        self.inner.entry(seq).ok_or(Error::OutOfBounds { seq })
    }

    /// Number of entries appended so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a cursor positioned before the first entry
    ///
    /// Specs apply in order; a later spec overrides an earlier one.
    pub fn query<I>(&self, specs: I) -> Cursor<T>
    where
        I: IntoIterator<Item = QuerySpec>,
    {
        let mut cursor = Cursor::new(self.inner.clone());
        for spec in specs {
            cursor.apply(spec);
        }
        cursor
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::pipe::{new_pipe, PipeOptions};
    use crate::stream::{FuncSink, SinkOp, Source, VecSink};

    fn cancel_after(token: &CancellationToken, millis: u64) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            token.cancel();
        });
    }

    #[tokio::test]
    async fn test_get_returns_appended_values() {
        let log = MemoryLog::new();
        for (i, v) in ["a", "b", "c", "d"].into_iter().enumerate() {
            assert_eq!(log.append(v).await.unwrap(), i as Seq);
        }

        assert_eq!(log.len(), 4);
        assert_eq!(log.get(0).unwrap(), "a");
        assert_eq!(log.get(3).unwrap(), "d");
        assert!(log.get(4).unwrap_err().is_out_of_bounds());
    }

    #[tokio::test]
    async fn test_get_on_empty_log() {
        let log: MemoryLog<i32> = MemoryLog::new();
        assert!(log.is_empty());
        match log.get(0) {
            Err(Error::OutOfBounds { seq }) => assert_eq!(seq, 0),
            other => panic!("expected out of bounds, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_seq_observable_fires_on_every_append() {
        let log = MemoryLog::new();
        assert_eq!(log.seq().value().await, None);

        let seen = StdArc::new(VecSink::new());
        log.seq().register(seen.clone()).await;

        log.append("first").await.unwrap();
        assert_eq!(log.seq().value().await, Some(0));
        log.append("second").await.unwrap();
        assert_eq!(log.seq().value().await, Some(1));

        assert_eq!(seen.items(), vec![Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn test_failing_seq_observer_does_not_lose_append() {
        let log = MemoryLog::new();
        log.seq()
            .register(FuncSink::new(|_: SinkOp<Option<Seq>>| -> Result<()> {
                Err(Error::msg("observer down"))
            }))
            .await;

        assert_eq!(log.append(1).await.unwrap(), 0);
        assert_eq!(log.get(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stalled_observer_bounded_by_token() {
        let log = MemoryLog::new();
        // Rendezvous pipe nobody reads from.
        let (_unread, stalled) = new_pipe::<Option<Seq>>(PipeOptions::default());
        log.seq().register(stalled).await;

        for expected in 0..2 {
            let token = CancellationToken::new();
            cancel_after(&token, 20);

            let seq = timeout(Duration::from_secs(1), log.append_with(&token, expected))
                .await
                .expect("append must return once its token fires")
                .unwrap();
            assert_eq!(seq, expected);
        }

        assert_eq!(log.len(), 2);
        assert_eq!(log.seq().value().await, Some(1));
    }

    #[tokio::test]
    async fn test_append_with_cancelled_while_queued() {
        let log = MemoryLog::new();
        let (_unread, stalled) = new_pipe::<Option<Seq>>(PipeOptions::default());
        log.seq().register(stalled).await;

        // Parks on the unread observer while holding the append gate.
        let blocked = log.clone();
        tokio::spawn(async move { blocked.append(1).await });
        while log.is_empty() {
            tokio::task::yield_now().await;
        }

        let token = CancellationToken::new();
        cancel_after(&token, 20);
        let err = timeout(Duration::from_secs(1), log.append_with(&token, 2))
            .await
            .expect("queued append must return once its token fires")
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_clone_shares_entries() {
        let log = MemoryLog::new();
        let other = log.clone();
        log.append(10).await.unwrap();

        assert_eq!(other.get(0).unwrap(), 10);

        let token = CancellationToken::new();
        let mut cursor = other.query([]);
        assert_eq!(cursor.next(&token).await.unwrap(), 10);
    }
}
