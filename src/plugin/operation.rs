//! Single-shot operation results

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{DataStoreError, Result};

/// Callback form of an operation completion
pub type CompletionCallback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Where an accepted operation reports its result
pub(crate) enum Completion<T> {
    Reply(oneshot::Sender<Result<T>>),
    Callback(CompletionCallback<T>),
}

impl<T> Completion<T> {
    pub(crate) fn callback<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Completion::Callback(Box::new(callback))
    }

    /// Report the result. Consumes self, so it runs at most once.
    pub(crate) fn complete(self, result: Result<T>) {
        match self {
            Completion::Reply(tx) => {
                // Caller may have dropped the Operation
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => callback(result),
        }
    }
}

/// Handle to a lifecycle operation that was queued when it was created.
///
/// Awaiting it yields the operation's result. Dropping it does not cancel
/// the operation.
#[must_use = "operations run regardless, but their result is lost unless awaited"]
pub struct Operation<T> {
    state: OperationState<T>,
}

enum OperationState<T> {
    Pending(oneshot::Receiver<Result<T>>),
    Ready(Option<Result<T>>),
}

impl<T> Operation<T> {
    pub(crate) fn channel() -> (Completion<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            Completion::Reply(tx),
            Self {
                state: OperationState::Pending(rx),
            },
        )
    }

    /// An operation rejected before it was queued
    pub(crate) fn ready(result: Result<T>) -> Self {
        Self {
            state: OperationState::Ready(Some(result)),
        }
    }
}

// No field is structurally pinned
impl<T> Unpin for Operation<T> {}

impl<T> Future for Operation<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            OperationState::Pending(rx) => Pin::new(rx).poll(cx).map(|reply| {
                reply.unwrap_or_else(|_| {
                    Err(DataStoreError::Fatal("lifecycle controller stopped".into()))
                })
            }),
            OperationState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(DataStoreError::Fatal("operation polled after completion".into()))
            })),
        }
    }
}
