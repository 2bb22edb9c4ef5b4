use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::error::{SubmitError, ThrottleError, ThrottleResult};
use crate::events::{EventBus, RejectReason, ThrottleEvent};
use crate::throttle_config::{ConfigUpdate, ThrottleConfig};
use crate::token_bucket::TokenBucket;

/// Default buffer size of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Outcome handle returned by [`Throttler::submit`].
pub type SubmitFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, SubmitError<E>>> + Send>>;

type Job = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Type-erased queued unit of work together with its outcome sink.
trait PendingWork: Send {
    /// Runs the work and settles the outcome. The error string only feeds
    /// the `failed` event.
    fn run(self: Box<Self>) -> Job;

    fn reject(self: Box<Self>, err: ThrottleError);
}

struct Work<F, T, E> {
    work: F,
    outcome: oneshot::Sender<Result<T, SubmitError<E>>>,
}

impl<F, Fut, T, E> PendingWork for Work<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    fn run(self: Box<Self>) -> Job {
        let Work { work, outcome } = *self;
        Box::pin(async move {
            match work().await {
                Ok(value) => {
                    // The submitter may have stopped waiting; that is not a failure.
                    let _ = outcome.send(Ok(value));
                    Ok(())
                }
                Err(err) => {
                    let message = err.to_string();
                    let _ = outcome.send(Err(SubmitError::Failed(err)));
                    Err(message)
                }
            }
        })
    }

    fn reject(self: Box<Self>, err: ThrottleError) {
        let _ = self.outcome.send(Err(SubmitError::Rejected(err)));
    }
}

struct QueuedTransaction {
    id: String,
    enqueued_at: SystemTime,
    priority: bool,
    work: Box<dyn PendingWork>,
}

/// Point-in-time view of the throttler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStatus {
    pub rate_per_minute: u32,
    pub current_tokens: u32,
    pub max_tokens: u32,
    pub queue_size: usize,
    pub max_queue_size: u32,
    pub processed_count: u64,
    pub rejected_count: u64,
    pub is_processing: bool,
}

struct State {
    config: ThrottleConfig,
    bucket: TokenBucket,
    queue: VecDeque<QueuedTransaction>,
    processed_count: u64,
    rejected_count: u64,
    is_processing: bool,
    stopped: bool,
}

impl State {
    /// Priority items go behind earlier priority items but ahead of every
    /// normal item. Returns the 1-based position.
    fn enqueue(&mut self, item: QueuedTransaction) -> usize {
        let index = if item.priority {
            self.queue.iter().take_while(|queued| queued.priority).count()
        } else {
            self.queue.len()
        };
        self.queue.insert(index, item);
        index + 1
    }

    fn queue_full(&self) -> bool {
        self.queue.len() >= self.config.max_queue_size as usize
    }
}

struct Inner {
    state: Mutex<State>,
    events: EventBus,
    refill_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self
            .refill_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the state consistent, so a panic
    // elsewhere does not invalidate it.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Token-bucket admission control over outbound payment submissions.
///
/// Cheap to clone; all clones share one bucket, queue and refill timer.
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct Throttler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("status", &self.status())
            .finish()
    }
}

impl Throttler {
    /// Create a new throttler and start its refill timer.
    pub fn new(config: ThrottleConfig) -> ThrottleResult<Self> {
        Self::with_event_capacity(config, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(
        config: ThrottleConfig,
        event_capacity: usize,
    ) -> ThrottleResult<Self> {
        config.check()?;
        // The refill timer and drain loop are Tokio tasks.
        tokio::runtime::Handle::try_current()
            .map_err(|e| ThrottleError::Internal(format!("throttler needs a Tokio runtime: {e}")))?;

        let state = State {
            config,
            bucket: TokenBucket::new(config.rate_per_minute),
            queue: VecDeque::new(),
            processed_count: 0,
            rejected_count: 0,
            is_processing: false,
            stopped: false,
        };
        let throttler = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                events: EventBus::new(event_capacity),
                refill_task: Mutex::new(None),
            }),
        };
        throttler.start_refill_timer(config.refill_interval());

        info!(
            rate_per_minute = config.rate_per_minute,
            max_queue_size = config.max_queue_size,
            refill_interval_ms = config.refill_interval_ms,
            "throttler started"
        );
        Ok(throttler)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    fn emit(&self, event: ThrottleEvent) {
        self.inner.events.emit(event);
    }

    /// (Re)starts the recurring refill tick, cancelling any previous timer.
    /// Does nothing once the throttler is stopped.
    fn start_refill_timer(&self, period: Duration) {
        // Held across the stopped check so `stop` cannot slip in between
        // the check and the store.
        let mut slot = lock(&self.inner.refill_task);
        if self.state().stopped {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let first_tick = time::Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Throttler { inner }.refill();
            }
        });

        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn refill(&self) {
        let should_drain = {
            let mut state = self.state();
            if state.stopped {
                return;
            }
            let grew = state.bucket.refill();
            if grew {
                debug!(tokens = state.bucket.available_tokens(), "bucket refilled");
            }
            grew && !state.queue.is_empty()
        };

        if should_drain {
            self.trigger_drain();
        }
    }

    /// Starts the drain loop unless it is already running or cannot make progress.
    fn trigger_drain(&self) {
        {
            let mut state = self.state();
            if state.is_processing || state.queue.is_empty() || !state.bucket.has_tokens() {
                return;
            }
            state.is_processing = true;
        }

        let throttler = self.clone();
        tokio::spawn(async move { throttler.drain().await });
    }

    async fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state();
                let next = if state.bucket.has_tokens() {
                    state.queue.pop_front()
                } else {
                    None
                };
                match next {
                    Some(item) => {
                        state.bucket.try_consume();
                        state.processed_count += 1;
                        Some(item)
                    }
                    None => {
                        // Cleared under the same lock that observed the exit
                        // condition, so a concurrent refill can restart us.
                        state.is_processing = false;
                        None
                    }
                }
            };
            let Some(item) = next else {
                break;
            };

            let QueuedTransaction {
                id,
                enqueued_at,
                work,
                ..
            } = item;
            let waited_ms = enqueued_at
                .elapsed()
                .unwrap_or_default()
                .as_millis() as u64;
            debug!(id = %id, waited_ms, "dispatching queued transaction");

            // Run on its own task so a panicking unit of work cannot take
            // the drain loop down with it.
            match tokio::spawn(work.run()).await {
                Ok(Ok(())) => self.emit(ThrottleEvent::Processed {
                    id,
                    success: true,
                    immediate: false,
                }),
                Ok(Err(error)) => {
                    warn!(id = %id, error = %error, "queued transaction failed");
                    self.emit(ThrottleEvent::Failed { id, error });
                }
                Err(join_error) => {
                    warn!(id = %id, error = %join_error, "queued transaction aborted");
                    self.emit(ThrottleEvent::Failed {
                        id,
                        error: ThrottleError::Abandoned.to_string(),
                    });
                }
            }
        }
    }

    fn reject_now<T, E>(&self, id: String, reason: RejectReason) -> SubmitFuture<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let err = match reason {
            RejectReason::QueueFull => ThrottleError::QueueFull,
            RejectReason::QueueCleared => ThrottleError::QueueCleared,
            RejectReason::Stopped => ThrottleError::Stopped,
        };
        warn!(id = %id, reason = ?reason, "transaction rejected");
        self.emit(ThrottleEvent::Rejected { id, reason });
        Box::pin(async move { Err(SubmitError::Rejected(err)) })
    }

    /// Admit a unit of work.
    ///
    /// The admission decision is taken before this returns: the work is
    /// either rejected, started right away on its own task, or queued for
    /// the drain loop. Dropping the returned future does not cancel work
    /// that was already admitted.
    pub fn submit<F, Fut, T, E>(
        &self,
        id: impl Into<String>,
        work: F,
        priority: bool,
    ) -> SubmitFuture<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let id = id.into();
        let mut state = self.state();

        if state.stopped {
            state.rejected_count += 1;
            drop(state);
            return self.reject_now(id, RejectReason::Stopped);
        }

        if state.queue_full() {
            state.rejected_count += 1;
            drop(state);
            return self.reject_now(id, RejectReason::QueueFull);
        }

        if state.queue.is_empty() && state.bucket.try_consume() {
            state.processed_count += 1;
            let tokens = state.bucket.available_tokens();
            drop(state);

            debug!(id = %id, tokens, "transaction admitted immediately");
            self.emit(ThrottleEvent::Processed {
                id,
                success: true,
                immediate: true,
            });
            let task = tokio::spawn(work());
            return Box::pin(async move {
                match task.await {
                    Ok(result) => result.map_err(SubmitError::Failed),
                    Err(_) => Err(SubmitError::Rejected(ThrottleError::Abandoned)),
                }
            });
        }

        let (outcome, handle) = oneshot::channel();
        let position = state.enqueue(QueuedTransaction {
            id: id.clone(),
            enqueued_at: SystemTime::now(),
            priority,
            work: Box::new(Work { work, outcome }),
        });
        let queue_size = state.queue.len();
        drop(state);

        debug!(id = %id, position, queue_size, priority, "transaction queued");
        self.emit(ThrottleEvent::Queued {
            id,
            queue_position: position,
        });
        self.trigger_drain();

        Box::pin(async move {
            handle
                .await
                .unwrap_or_else(|_| Err(SubmitError::Rejected(ThrottleError::Abandoned)))
        })
    }

    /// Apply a partial configuration change.
    ///
    /// A new rate resizes the bucket immediately; a new refill interval
    /// restarts the timer without touching the current tokens.
    pub fn update_config(&self, update: ConfigUpdate) -> ThrottleResult<ThrottleConfig> {
        update
            .validate()
            .map_err(|e| ThrottleError::InvalidConfig(e.to_string()))?;

        let (config, restart) = {
            let mut state = self.state();
            state.config = state.config.merged(&update);
            if update.rate_per_minute.is_some() {
                let rate = state.config.rate_per_minute;
                state.bucket.set_rate(rate);
            }
            let restart = update
                .refill_interval_ms
                .map(|_| state.config.refill_interval());
            (state.config, restart)
        };

        if let Some(period) = restart {
            self.start_refill_timer(period);
        }

        info!(
            rate_per_minute = config.rate_per_minute,
            max_queue_size = config.max_queue_size,
            refill_interval_ms = config.refill_interval_ms,
            "throttling configuration updated"
        );
        self.emit(ThrottleEvent::ConfigUpdated { config });
        Ok(config)
    }

    pub fn config(&self) -> ThrottleConfig {
        self.state().config
    }

    pub fn status(&self) -> ThrottleStatus {
        let state = self.state();
        ThrottleStatus {
            rate_per_minute: state.config.rate_per_minute,
            current_tokens: state.bucket.available_tokens(),
            max_tokens: state.bucket.capacity(),
            queue_size: state.queue.len(),
            max_queue_size: state.config.max_queue_size,
            processed_count: state.processed_count,
            rejected_count: state.rejected_count,
            is_processing: state.is_processing,
        }
    }

    pub fn queue_length(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether a new submission would be accepted (run or queued).
    pub fn has_capacity(&self) -> bool {
        let state = self.state();
        !state.stopped && (state.bucket.has_tokens() || !state.queue_full())
    }

    /// Reject every queued item with [`ThrottleError::QueueCleared`].
    /// In-flight work is not affected. Returns the number of items removed.
    pub fn clear_queue(&self) -> usize {
        let cleared: Vec<QueuedTransaction> = {
            let mut state = self.state();
            let cleared: Vec<_> = state.queue.drain(..).collect();
            state.rejected_count += cleared.len() as u64;
            cleared
        };

        let count = cleared.len();
        for item in cleared {
            self.emit(ThrottleEvent::Rejected {
                id: item.id,
                reason: RejectReason::QueueCleared,
            });
            item.work.reject(ThrottleError::QueueCleared);
        }

        if count > 0 {
            info!(cleared = count, "transaction queue cleared");
        }
        count
    }

    /// Cancel the refill timer and flush the queue. The instance stays inert.
    pub fn stop(&self) {
        self.state().stopped = true;
        if let Some(handle) = lock(&self.inner.refill_task).take() {
            handle.abort();
        }
        let cleared = self.clear_queue();
        info!(cleared, "throttler stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThrottleEvent> {
        self.inner.events.subscribe()
    }

    /// True when both handles share the same instance.
    pub fn ptr_eq(&self, other: &Throttler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
