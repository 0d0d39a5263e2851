/// A unit of work that runs exactly once.
///
/// Arguments are bound by closure capture before the task is built, so
/// running it takes nothing and returns nothing. Every
/// `FnOnce() + Send + 'static` closure is a `Runnable`.
pub trait Runnable: Send + 'static {
    /// Consumes the task and runs it to completion.
    fn run(self: Box<Self>);
}

impl<F> Runnable for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// A boxed task as stored in the queue.
pub type Task = Box<dyn Runnable>;
