//! Mutation event publisher
//!
//! Long-lived broadcast point for mutation events. The publisher lives as long
//! as the plugin that owns it and is independent of the storage engine
//! lifecycle: stopping or clearing the engine never completes it.
//!
//! - `send` with no subscribers is a no-op (nothing is buffered for later)
//! - subscribers see events sent after they subscribed, never earlier ones
//! - the only completion signals are `finish` and `fail`

use futures::{FutureExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

use crate::error::{DataStoreError, Result};
use crate::model::MutationEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// How a publisher ended
#[derive(Debug, Clone, PartialEq)]
pub enum PublisherCompletion {
    Finished,
    Failed(DataStoreError),
}

#[derive(Debug, Clone)]
enum PublisherSignal {
    Event(MutationEvent),
    Completion(PublisherCompletion),
}

/// Broadcast channel of mutation events shared by all observers of a plugin
pub struct DataStorePublisher {
    sender: broadcast::Sender<PublisherSignal>,
    /// Set once; guarded so no event can follow the completion signal
    completion: Mutex<Option<PublisherCompletion>>,
}

impl DataStorePublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a publisher whose subscribers may fall `capacity` events behind
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            completion: Mutex::new(None),
        }
    }

    /// Deliver an event to every current subscriber.
    ///
    /// Fails only once the publisher has completed.
    pub fn send(&self, event: MutationEvent) -> Result<()> {
        let completion = self.lock_completion();
        if completion.is_some() {
            return Err(DataStoreError::PublisherFinished);
        }
        trace!(
            model = %event.model_name(),
            model_id = %event.model_id(),
            mutation = %event.mutation_type(),
            "Publishing mutation event"
        );
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(PublisherSignal::Event(event));
        Ok(())
    }

    /// Subscribe to every model's events
    pub fn subscribe(&self) -> MutationSubscription {
        self.subscribe_filtered(None)
    }

    /// Subscribe to the events of one model
    pub fn subscribe_to_model(&self, model_name: impl Into<String>) -> MutationSubscription {
        self.subscribe_filtered(Some(model_name.into()))
    }

    fn subscribe_filtered(&self, model_name: Option<String>) -> MutationSubscription {
        let completion = self.lock_completion();
        let receiver = self.sender.subscribe();
        MutationSubscription {
            inner: BroadcastStream::new(receiver),
            model_name,
            pending: completion.clone(),
            finished: false,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Complete every subscription normally (full plugin teardown)
    pub fn finish(&self) {
        self.complete(PublisherCompletion::Finished);
    }

    /// Complete every subscription with an error fatal to the plugin instance
    pub fn fail(&self, error: DataStoreError) {
        self.complete(PublisherCompletion::Failed(error));
    }

    pub fn is_finished(&self) -> bool {
        self.lock_completion().is_some()
    }

    pub fn completion(&self) -> Option<PublisherCompletion> {
        self.lock_completion().clone()
    }

    fn complete(&self, completion: PublisherCompletion) {
        let mut slot = self.lock_completion();
        if slot.is_some() {
            debug!("Publisher already completed, ignoring {:?}", completion);
            return;
        }
        info!(completion = ?completion, "Publisher completed");
        *slot = Some(completion.clone());
        let _ = self.sender.send(PublisherSignal::Completion(completion));
    }

    fn lock_completion(&self) -> MutexGuard<'_, Option<PublisherCompletion>> {
        self.completion.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DataStorePublisher {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// A subscriber's view of the publisher.
    ///
    /// Yields `Ok(event)` per mutation, one `Err` if the publisher failed, and
    /// ends once the publisher completes. Dropping it unsubscribes.
    pub struct MutationSubscription {
        #[pin]
        inner: BroadcastStream<PublisherSignal>,
        model_name: Option<String>,
        // Completion that happened before this subscription existed
        pending: Option<PublisherCompletion>,
        finished: bool,
    }
}

impl MutationSubscription {
    /// Wait for the next event; `None` once the publisher finished
    pub async fn recv(&mut self) -> Option<Result<MutationEvent>> {
        self.next().await
    }

    /// Take the next event if one is already queued.
    ///
    /// Returns `None` both when nothing is queued and when the stream ended;
    /// check `is_finished` to tell them apart.
    pub fn try_recv(&mut self) -> Option<Result<MutationEvent>> {
        self.next().now_or_never().flatten()
    }

    /// Whether a completion signal has been observed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }
}

impl Stream for MutationSubscription {
    type Item = Result<MutationEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.finished {
            return Poll::Ready(None);
        }
        if let Some(completion) = this.pending.take() {
            *this.finished = true;
            return Poll::Ready(completion_item(completion));
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(PublisherSignal::Event(event)))) => {
                    let wanted = this
                        .model_name
                        .as_deref()
                        .map(|name| name == event.model_name())
                        .unwrap_or(true);
                    if wanted {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Ok(PublisherSignal::Completion(completion)))) => {
                    *this.finished = true;
                    return Poll::Ready(completion_item(completion));
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "Mutation subscriber lagged, skipped events");
                }
                Poll::Ready(None) => {
                    // Publisher dropped with its owner
                    *this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn completion_item(completion: PublisherCompletion) -> Option<Result<MutationEvent>> {
    match completion {
        PublisherCompletion::Finished => None,
        PublisherCompletion::Failed(error) => Some(Err(error)),
    }
}
