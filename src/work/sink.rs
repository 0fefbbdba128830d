use tokio::sync::oneshot;

use crate::error::{CoordinatorError, Result};

/// Destination for the outcome of a unit of work.
///
/// Units only ever see this capability, never the transport handle behind it,
/// so a sink can be a gRPC reply, a stream envelope, or a test channel.
pub trait ResultSink<T>: Send + 'static {
    fn set_value(self: Box<Self>, value: T);

    fn set_error(self: Box<Self>, error: CoordinatorError);
}

pub type Sink<T> = Box<dyn ResultSink<T>>;

/// Deliver a `Result` to a sink.
pub fn complete<T: 'static>(sink: Sink<T>, result: Result<T>) {
    match result {
        Ok(value) => sink.set_value(value),
        Err(error) => sink.set_error(error),
    }
}

impl<T: Send + 'static> ResultSink<T> for oneshot::Sender<Result<T>> {
    fn set_value(self: Box<Self>, value: T) {
        if (*self).send(Ok(value)).is_err() {
            tracing::debug!("Result receiver dropped before completion");
        }
    }

    fn set_error(self: Box<Self>, error: CoordinatorError) {
        if (*self).send(Err(error)).is_err() {
            tracing::debug!("Result receiver dropped before completion");
        }
    }
}

/// Sink backed by a closure that receives the final `Result`.
pub struct FnSink<F>(pub F);

impl<T, F> ResultSink<T> for FnSink<F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    fn set_value(self: Box<Self>, value: T) {
        (self.0)(Ok(value))
    }

    fn set_error(self: Box<Self>, error: CoordinatorError) {
        (self.0)(Err(error))
    }
}

/// Sink paired with the receiver that observes it.
pub fn oneshot_sink<T: Send + 'static>() -> (Sink<T>, oneshot::Receiver<Result<T>>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(tx), rx)
}

/// Adapt a sink of `U` into a sink of `T`.
pub fn map_sink<T, U, F>(sink: Sink<U>, f: F) -> Sink<T>
where
    T: 'static,
    U: 'static,
    F: FnOnce(T) -> U + Send + 'static,
{
    Box::new(FnSink(move |result: Result<T>| complete(sink, result.map(f))))
}
