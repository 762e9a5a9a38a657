use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{LogInner, Seq};
use crate::error::{Error, Result};
use crate::stream::{Source, Value};

/// One cursor configuration option, see [`MemoryLog::query`](super::MemoryLog::query)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySpec {
    /// Deliver at most this many values, then end
    Limit(usize),
    /// Wait at the tail for new entries instead of ending
    Live(bool),
    /// Replay the entry the cursor sits on before advancing
    Immediate(bool),
    /// Start strictly after this sequence number
    Gt(Seq),
}

#[must_use]
pub const fn limit(n: usize) -> QuerySpec {
    QuerySpec::Limit(n)
}

#[must_use]
pub const fn live(live: bool) -> QuerySpec {
    QuerySpec::Live(live)
}

#[must_use]
pub const fn immediate(immediate: bool) -> QuerySpec {
    QuerySpec::Immediate(immediate)
}

#[must_use]
pub const fn gt(seq: Seq) -> QuerySpec {
    QuerySpec::Gt(seq)
}

/// Forward-only reader over a [`MemoryLog`](super::MemoryLog)
///
/// A fresh cursor sits before the first entry. Each successful `next`
/// moves it onto the entry it returned; it never skips or revisits an entry,
/// except for the single replay requested with [`immediate`].
pub struct Cursor<T> {
    log: Arc<LogInner<T>>,
    /// Sequence number the next advance delivers; the cursor sits on
    /// `next_seq - 1`, or before the head when this is 0.
    next_seq: Seq,
    /// `None` means unlimited.
    remaining: Option<usize>,
    live: bool,
    immediate: bool,
}

impl<T> Cursor<T> {
    pub(super) const fn new(log: Arc<LogInner<T>>) -> Self {
        Self {
            log,
            next_seq: 0,
            remaining: None,
            live: false,
            immediate: false,
        }
    }

    pub(super) fn apply(&mut self, spec: QuerySpec) {
        match spec {
            QuerySpec::Limit(n) => self.remaining = Some(n),
            QuerySpec::Live(live) => self.live = live,
            QuerySpec::Immediate(immediate) => self.immediate = immediate,
            QuerySpec::Gt(seq) => self.next_seq = seq.saturating_add(1),
        }
    }

    /// Entry the cursor currently sits on, `None` before the head
    #[must_use]
    pub const fn position(&self) -> Option<Seq> {
        self.next_seq.checked_sub(1)
    }
}

#[async_trait]
impl<T: Value> Source<T> for Cursor<T> {
    async fn next(&mut self, token: &CancellationToken) -> Result<T> {
        if self.remaining == Some(0) {
            return Err(Error::EndOfStream);
        }

        // Before the head there is nothing to replay.
        let target = match self.position() {
            Some(current) if self.immediate => current,
            _ => self.next_seq,
        };

        loop {
            let notified = self.log.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entry = self.log.entry(target);
            if let Some(value) = entry {
                self.next_seq = target + 1;
                self.immediate = false;
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                }
                return Ok(value);
            }

            if !self.live {
                return Err(Error::EndOfStream);
            }

            tokio::select! {
                () = notified.as_mut() => {}
                () = token.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}
