//! Concurrency-safe streaming primitives
//!
//! - [`stream`]: the [`Sink`]/[`Source`] contract plus closure, map/filter/reduce and
//!   in-memory adapters
//! - [`pipe`]: cancellable point-to-point transport
//! - [`broadcast`]: one-to-many fan-out with error aggregation
//! - [`observable`]: last-value cache with change notification
//! - [`memlog`]: append-only in-memory log with live, tailing reads

pub mod broadcast;
pub mod config;
pub mod error;
pub mod logging;
pub mod memlog;
pub mod observable;
pub mod pipe;
pub mod stream;

pub use broadcast::{new_broadcast, Broadcast, BroadcastSink, SinkId};
pub use config::Config;
pub use error::{is_end_of_stream, Error, Result};
pub use memlog::{Cursor, MemoryLog, QuerySpec, Seq};
pub use observable::Observable;
pub use pipe::{new_pipe, Capacity, PipeOptions, PipeSink, PipeSource};
pub use stream::{pump, FuncSink, FuncSource, Sink, SinkOp, Source, Value, VecSink, VecSource};
pub use tokio_util::sync::CancellationToken;
