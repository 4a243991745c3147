use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::Context as _;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use futures::channel::oneshot;

use crate::foundation::error::{MixerError, MixerResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling class of a submitted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Latency-sensitive work (uploads, allocations, readback maps). Always runs before any
    /// queued normal task.
    High,
    Normal,
}

/// The result of work submitted to the execution context.
///
/// Resolves when the task has run. Errors raised by the task, a panic inside it, or a task
/// dropped unexecuted all surface as `Err`.
#[must_use = "a task future does nothing unless awaited"]
pub struct TaskFuture<T> {
    state: TaskState<T>,
}

enum TaskState<T> {
    Pending(oneshot::Receiver<MixerResult<T>>),
    Ready(Option<MixerResult<T>>),
}

impl<T> Unpin for TaskFuture<T> {}

impl<T> TaskFuture<T> {
    /// An already-resolved future.
    pub fn ready(value: MixerResult<T>) -> Self {
        Self {
            state: TaskState::Ready(Some(value)),
        }
    }

    /// Block the calling thread until the task has run.
    ///
    /// Must not be called from the execution context for work queued behind the caller.
    pub fn wait(self) -> MixerResult<T> {
        pollster::block_on(self)
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = MixerResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            TaskState::Ready(value) => Poll::Ready(
                value
                    .take()
                    .unwrap_or_else(|| Err(MixerError::gpu("task future polled after completion"))),
            ),
            TaskState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(out)) => Poll::Ready(out),
                Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(MixerError::gpu(
                    "execution context dropped the task before running it",
                ))),
            },
        }
    }
}

/// A single dedicated thread that runs every submitted task in order, high priority first.
pub(crate) struct Executor {
    name: String,
    high: Option<Sender<Job>>,
    normal: Option<Sender<Job>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl Executor {
    pub(crate) fn new(name: &str, capacity: usize) -> MixerResult<Self> {
        let capacity = capacity.max(1);
        let (high_tx, high_rx) = channel::bounded::<Job>(capacity);
        let (normal_tx, normal_rx) = channel::bounded::<Job>(capacity);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(high_rx, normal_rx))
            .context("failed to spawn gpu execution context")?;
        Ok(Self {
            name: name.to_string(),
            high: Some(high_tx),
            normal: Some(normal_tx),
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is the execution context.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Number of tasks waiting to run.
    pub(crate) fn queued(&self) -> usize {
        self.high.as_ref().map_or(0, Sender::len) + self.normal.as_ref().map_or(0, Sender::len)
    }

    /// Queue `f` and return a future for its result.
    ///
    /// Submitting blocks while the queue for `priority` is full. Submissions from the execution
    /// context itself never block: when the queue is full they run inline.
    pub(crate) fn begin_invoke<R, F>(&self, priority: Priority, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> MixerResult<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let name = self.name.clone();
        let job: Job = Box::new(move || {
            let out = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
                let msg = panic_message(payload.as_ref());
                tracing::error!(context = %name, panic = %msg, "execution context task panicked");
                Err(MixerError::gpu(format!("task panicked: {msg}")))
            });
            let _ = tx.send(out);
        });

        let sender = match priority {
            Priority::High => self.high.as_ref(),
            Priority::Normal => self.normal.as_ref(),
        };
        let Some(sender) = sender else {
            return TaskFuture::ready(Err(MixerError::gpu("execution context is shut down")));
        };

        if self.is_current() {
            match sender.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    tracing::debug!(context = %self.name, "queue full, running task inline");
                    job();
                }
                Err(TrySendError::Disconnected(job)) => drop(job),
            }
        } else if let Err(err) = sender.send(job) {
            drop(err.into_inner());
        }

        TaskFuture {
            state: TaskState::Pending(rx),
        }
    }

    /// Run `f` on the execution context and wait for it. Runs inline when already there.
    pub(crate) fn invoke<R, F>(&self, priority: Priority, f: F) -> MixerResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> MixerResult<R> + Send + 'static,
    {
        if self.is_current() {
            return f();
        }
        self.begin_invoke(priority, f).wait()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.high.take();
        self.normal.take();
        if let Some(handle) = self.handle.take() {
            // The last handle may be released by a task on the context itself; that thread exits
            // on its own once the channels report disconnection.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(context = %self.name, "execution context thread panicked");
            }
        }
    }
}

fn run(high: Receiver<Job>, normal: Receiver<Job>) {
    loop {
        while let Ok(job) = high.try_recv() {
            job();
        }
        channel::select! {
            recv(high) -> msg => match msg {
                Ok(job) => job(),
                Err(_) => break,
            },
            recv(normal) -> msg => match msg {
                Ok(job) => {
                    while let Ok(urgent) = high.try_recv() {
                        urgent();
                    }
                    job();
                }
                Err(_) => break,
            },
        }
    }
    for job in high.try_iter().chain(normal.try_iter()) {
        job();
    }
    tracing::debug!("execution context stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/executor.rs"]
mod tests;
