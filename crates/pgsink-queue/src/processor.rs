use core::fmt;
use core::future::Future;

/// Work applied to every dequeued item.
///
/// Each attempt receives its own clone of the item so a failed attempt can be
/// repeated. Any `Fn(T) -> impl Future<Output = Result<(), E>>` closure is a
/// processor.
pub trait Processor<T>: Send + Sync + 'static {
    type Error: fmt::Display + Send;

    fn process(&self, item: T) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<T, F, Fut, E> Processor<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: fmt::Display + Send,
{
    type Error = E;

    fn process(&self, item: T) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self(item)
    }
}

/// Probe deciding whether the downstream store can take writes.
///
/// Probe failures must be reported as `false`, never as a panic.
pub trait HealthCheck: Send + Sync + 'static {
    fn check(&self) -> impl Future<Output = bool> + Send;
}

impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
{
    fn check(&self) -> impl Future<Output = bool> + Send {
        self()
    }
}
