//! Cancellable point-to-point transport
//!
//! [`new_pipe`] returns a connected ([`PipeSource`], [`PipeSink`]) pair sharing
//! one queue. The queue capacity is chosen through [`PipeOptions`]:
//!
//! - capacity 0 (the default) is a rendezvous: `pour` only returns `Ok` once the
//!   consumer has taken the value
//! - capacity `n` lets up to `n` values wait in the queue
//! - [`PipeOptions::unbounded`] never makes `pour` wait
//!
//! A pour racing with `close` either enqueues its value or fails with
//! [`Error::Closed`]; a value is never delivered twice and never half-delivered.
//! After close the consumer drains the queue, then sees the terminal condition.
//!
//! # Example
//!
//! ```rust,ignore
//! let (mut src, sink) = new_pipe::<u32>(PipeOptions::default().with_buffer(2));
//! let token = CancellationToken::new();
//!
//! sink.pour(&token, 1).await?;
//! sink.close()?;
//!
//! assert_eq!(src.next(&token).await?, 1);
//! assert!(src.next(&token).await.unwrap_err().is_end_of_stream());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PipeConfig;
use crate::error::{Error, Result};
use crate::stream::{Sink, Source, Value};

/// How many values may wait in a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many queued values; 0 means synchronous hand-off.
    Bounded(usize),
    Unbounded,
}

/// Construction options for [`new_pipe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    capacity: Capacity,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            capacity: Capacity::Bounded(0),
        }
    }
}

impl PipeOptions {
    /// Let up to `n` values wait in the queue
    #[must_use]
    pub const fn with_buffer(mut self, n: usize) -> Self {
        self.capacity = Capacity::Bounded(n);
        self
    }

    /// Never make `pour` wait for room
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.capacity = Capacity::Unbounded;
        self
    }

    #[must_use]
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }
}

impl From<&PipeConfig> for PipeOptions {
    fn from(config: &PipeConfig) -> Self {
        if config.unbounded {
            Self::default().unbounded()
        } else {
            Self::default().with_buffer(config.buffer)
        }
    }
}

struct PipeState<T> {
    queue: VecDeque<T>,
    capacity: Capacity,
    /// Set once by the first close; reported after the queue drains.
    terminal: Option<Error>,
    /// Values enqueued so far, minus withdrawn ones. Doubles as the ticket
    /// counter for rendezvous pours.
    pushed: u64,
    /// Values handed to the consumer so far
    taken: u64,
}

impl<T> PipeState<T> {
    const fn is_rendezvous(&self) -> bool {
        matches!(self.capacity, Capacity::Bounded(0))
    }

    fn has_room(&self) -> bool {
        match self.capacity {
            Capacity::Bounded(0) => self.queue.is_empty(),
            Capacity::Bounded(n) => self.queue.len() < n,
            Capacity::Unbounded => true,
        }
    }

    /// Whether the rendezvous value with `ticket` still sits in the queue
    const fn is_pending(&self, ticket: u64) -> bool {
        self.pushed > ticket && self.taken <= ticket
    }
}

struct Shared<T> {
    state: Mutex<PipeState<T>>,
    /// Woken on every state change; waiters re-check the state.
    changed: Notify,
}

/// Create a connected source/sink pair
#[must_use]
pub fn new_pipe<T: Value>(options: PipeOptions) -> (PipeSource<T>, PipeSink<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            queue: VecDeque::new(),
            capacity: options.capacity,
            terminal: None,
            pushed: 0,
            taken: 0,
        }),
        changed: Notify::new(),
    });

    (
        PipeSource {
            shared: shared.clone(),
        },
        PipeSink { shared },
    )
}

/// Consumer half of a pipe
pub struct PipeSource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> PipeSource<T> {
    /// Number of values currently waiting in the queue
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

#[async_trait]
impl<T: Value> Source<T> for PipeSource<T> {
    async fn next(&mut self, token: &CancellationToken) -> Result<T> {
        let shared = &self.shared;

        loop {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = shared.state.lock();
                if let Some(value) = state.queue.pop_front() {
                    state.taken += 1;
                    drop(state);
                    shared.changed.notify_waiters();
                    return Ok(value);
                }
                if let Some(err) = &state.terminal {
                    return Err(err.clone());
                }
            }

            tokio::select! {
                () = notified.as_mut() => {}
                () = token.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}

/// Producer half of a pipe
///
/// Cloning yields another producer feeding the same queue.
pub struct PipeSink<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PipeSink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> PipeSink<T> {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().terminal.is_some()
    }

    fn terminate(&self, terminal: Error) {
        let mut state = self.shared.state.lock();
        if state.terminal.is_some() {
            return;
        }

        // Untaken rendezvous values were never delivered; their pours fail.
        let withdrawn = if state.is_rendezvous() {
            let n = state.queue.len();
            state.queue.clear();
            state.pushed = state.taken;
            n
        } else {
            0
        };

        debug!(
            buffered = state.queue.len(),
            withdrawn = withdrawn,
            terminal = %terminal,
            "Pipe closed"
        );
        state.terminal = Some(terminal);
        drop(state);

        self.shared.changed.notify_waiters();
    }

    /// Wait until the consumer has taken the value holding `ticket`
    async fn await_handoff(&self, token: &CancellationToken, ticket: u64) -> Result<()> {
        let shared = &self.shared;

        loop {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = shared.state.lock();
                if state.taken > ticket {
                    return Ok(());
                }
                if state.terminal.is_some() {
                    return Err(Error::Closed);
                }
            }

            tokio::select! {
                () = notified.as_mut() => {}
                () = token.cancelled() => {
                    let mut state = shared.state.lock();
                    if state.taken > ticket {
                        return Ok(());
                    }
                    if state.is_pending(ticket) {
                        state.queue.pop_back();
                        state.pushed -= 1;
                        drop(state);
                        shared.changed.notify_waiters();
                    }
                    return Err(Error::Cancelled);
                }
            }
        }
    }
}

#[async_trait]
impl<T: Value> Sink<T> for PipeSink<T> {
    async fn pour(&self, token: &CancellationToken, value: T) -> Result<()> {
        let shared = &self.shared;

        let (ticket, rendezvous) = loop {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = shared.state.lock();
                if state.terminal.is_some() {
                    return Err(Error::Closed);
                }
                if state.has_room() {
                    let ticket = state.pushed;
                    state.queue.push_back(value);
                    state.pushed += 1;
                    let rendezvous = state.is_rendezvous();
                    drop(state);
                    shared.changed.notify_waiters();
                    break (ticket, rendezvous);
                }
            }

            tokio::select! {
                () = notified.as_mut() => {}
                () = token.cancelled() => return Err(Error::Cancelled),
            }
        };

        if rendezvous {
            self.await_handoff(token, ticket).await
        } else {
            Ok(())
        }
    }

    fn close(&self) -> Result<()> {
        self.terminate(Error::EndOfStream);
        Ok(())
    }

    fn close_with_error(&self, err: Error) -> Result<()> {
        self.terminate(err);
        Ok(())
    }
}
