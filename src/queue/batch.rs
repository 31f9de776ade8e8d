//! # Batch Accumulator
//!
//! Size- and time-triggered batching for items headed into a queue. Items
//! accumulate until either the batch size threshold is reached or the batch
//! timeout fires, whichever comes first; each trigger dispatches exactly
//! one flush.
//!
//! Flushes never run concurrently. Items added while a flush is dispatching
//! land in a fresh batch and are picked up by a follow-up pass, so nothing
//! is stranded waiting for a timer that no longer exists. Timer tasks are
//! never aborted: a timer that fires after a size-triggered flush already
//! drained the batch finds nothing to do and clears itself.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::Result;
use crate::events::{EventPublisher, JobEvent, JobEventKind};
use crate::queue::job::QueueName;

/// One item held by the accumulator until dispatch.
#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    pub id: Uuid,
    pub payload: T,
}

impl<T> BatchItem<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }
}

/// Dispatches a single accumulated item. Item failures are isolated: one
/// failing item never aborts the rest of its flush.
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync {
    async fn process(&self, item: BatchItem<T>) -> Result<()>;
}

struct AccumulatorInner<T> {
    config: BatchConfig,
    /// Queue the accumulated items are destined for; used for event labels
    target_queue: QueueName,
    processor: Arc<dyn BatchProcessor<T>>,
    events: EventPublisher,
    batch: Mutex<Vec<BatchItem<T>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    processing: AtomicBool,
    active_tasks: AtomicUsize,
}

pub struct BatchAccumulator<T> {
    inner: Arc<AccumulatorInner<T>>,
}

impl<T> Clone for BatchAccumulator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> BatchAccumulator<T> {
    pub fn new(
        config: BatchConfig,
        target_queue: QueueName,
        processor: Arc<dyn BatchProcessor<T>>,
        events: EventPublisher,
    ) -> Self {
        Self {
            inner: Arc::new(AccumulatorInner {
                config,
                target_queue,
                processor,
                events,
                batch: Mutex::new(Vec::new()),
                timer: Mutex::new(None),
                processing: AtomicBool::new(false),
                active_tasks: AtomicUsize::new(0),
            }),
        }
    }

    /// Add an item to the current batch. Triggers an immediate flush when
    /// the batch reaches the size threshold, otherwise arms the timeout
    /// timer if none is pending.
    pub async fn add_to_batch(&self, payload: T) -> Uuid {
        let item = BatchItem::new(payload);
        let id = item.id;

        let size = {
            let mut batch = self.inner.batch.lock();
            batch.push(item);
            batch.len()
        };

        if size >= self.inner.config.batch_size {
            self.flush().await;
        } else {
            self.ensure_timer();
        }
        id
    }

    fn ensure_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let accumulator = self.clone();
        let timeout = self.inner.config.batch_timeout();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Clear the slot before flushing: the flush this task runs
            // must never hold a handle to the task running it.
            accumulator.inner.timer.lock().take();
            accumulator.flush().await;
        }));
    }

    /// Dispatch everything accumulated so far. Exactly one flush runs at a
    /// time; a trigger arriving mid-flush is absorbed by the running
    /// flush's follow-up pass. A stale timer firing after the batch has
    /// drained is a no-op.
    pub async fn flush(&self) {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        loop {
            self.drain().await;
            self.inner.processing.store(false, Ordering::SeqCst);

            // An add can land between the final drain and the release
            // above; its own flush lost the guard to this one. Take the
            // guard back and run the follow-up ourselves.
            if self.inner.batch.lock().is_empty() {
                break;
            }
            if self
                .inner
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                break;
            }
        }
    }

    async fn drain(&self) {
        loop {
            let batch = std::mem::take(&mut *self.inner.batch.lock());
            if batch.is_empty() {
                break;
            }

            tracing::debug!(
                queue = %self.inner.target_queue,
                batch_size = batch.len(),
                "dispatching batch"
            );

            let mut items = batch.into_iter();
            loop {
                let chunk: Vec<_> = items
                    .by_ref()
                    .take(self.inner.config.max_concurrent.max(1))
                    .collect();
                if chunk.is_empty() {
                    break;
                }

                self.inner.active_tasks.fetch_add(chunk.len(), Ordering::SeqCst);
                let results = join_all(chunk.into_iter().map(|item| {
                    let processor = Arc::clone(&self.inner.processor);
                    async move {
                        let id = item.id;
                        (id, processor.process(item).await)
                    }
                }))
                .await;
                self.inner
                    .active_tasks
                    .fetch_sub(results.len(), Ordering::SeqCst);

                for (id, result) in results {
                    if let Err(err) = result {
                        tracing::warn!(
                            queue = %self.inner.target_queue,
                            item_id = %id,
                            error = %err,
                            "batch item dispatch failed"
                        );
                        self.inner.events.publish(JobEvent::new(
                            self.inner.target_queue,
                            id,
                            JobEventKind::Failed {
                                attempts_made: 1,
                                error: err.to_string(),
                                terminal: true,
                                retry_delay_ms: None,
                            },
                        ));
                    }
                }
            }
        }
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    pub fn current_batch_size(&self) -> usize {
        self.inner.batch.lock().len()
    }

    pub fn active_task_count(&self) -> usize {
        self.inner.active_tasks.load(Ordering::SeqCst)
    }
}
