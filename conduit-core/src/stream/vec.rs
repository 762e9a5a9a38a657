//! In-memory fixtures for feeding and capturing streams

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{Sink, Source};
use crate::error::{Error, Result};

/// Source yielding a fixed list of values, then end of stream
#[derive(Debug, Clone, Default)]
pub struct VecSource<T> {
    items: VecDeque<T>,
}

impl<T> VecSource<T> {
    #[must_use]
    pub fn new(items: impl Into<VecDeque<T>>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Values not yet handed out
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl<T> Source<T> for VecSource<T>
where
    T: Send + 'static,
{
    async fn next(&mut self, _token: &CancellationToken) -> Result<T> {
        self.items.pop_front().ok_or(Error::EndOfStream)
    }
}

/// Sink recording every poured value
///
/// Closing only marks the sink; later pours are still recorded.
#[derive(Debug)]
pub struct VecSink<T> {
    state: Mutex<VecSinkState<T>>,
}

#[derive(Debug)]
struct VecSinkState<T> {
    items: Vec<T>,
    closed: bool,
    close_error: Option<Error>,
}

impl<T> Default for VecSinkState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            closed: false,
            close_error: None,
        }
    }
}

impl<T> VecSink<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VecSinkState::default()),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Error passed to `close_with_error`, if any
    #[must_use]
    pub fn close_error(&self) -> Option<Error> {
        self.state.lock().close_error.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> VecSink<T> {
    /// Snapshot of the values poured so far
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }
}

#[async_trait]
impl<T> Sink<T> for VecSink<T>
where
    T: Send + 'static,
{
    async fn pour(&self, _token: &CancellationToken, value: T) -> Result<()> {
        self.state.lock().items.push(value);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn close_with_error(&self, err: Error) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.close_error = Some(err);
        Ok(())
    }
}
