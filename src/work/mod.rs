//! Single-threaded serialization engine.
//!
//! Every mutation of coordinator state is a unit of work executed by exactly one
//! thread in submission order:
//!
//! - [`WorkQueue`]: cloneable submission handle (`submit`, `call`, `call_blocking`)
//! - [`WorkQueueWorker`]: owns the thread; `stop` drains and returns the state
//! - [`ResultSink`]: capability a unit completes to answer its caller

pub mod queue;
pub mod sink;

pub use queue::{Work, WorkQueue, WorkQueueWorker};
pub use sink::{complete, map_sink, oneshot_sink, FnSink, ResultSink, Sink};
