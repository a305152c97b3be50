//! Streaming poll engine.
//!
//! [`StreamingClient`] owns at most one background task that long-polls the
//! events endpoint, decodes each batch, advances its cursor and fans events
//! out to registered listeners. Transport failures are retried after a
//! back-off; an undecodable batch ends the task.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ApiClient, ApiRequest};
use crate::retry::{sleep_unless_cancelled, RetryPolicy};
use crate::stream::listeners::{EventListener, ListenerId, ListenerRegistry};
use crate::stream::proto::{decode_event, parse_event_batch, DecodeError, EventType};

/// Path of the long-poll events endpoint.
pub const EVENTS_PATH: &str = "/Collaboration/v1/Events";

/// Which events a streaming task asks the service for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFilter {
    types: BTreeSet<EventType>,
    channels: Option<BTreeSet<String>>,
    regex: Option<String>,
}

impl StreamFilter {
    pub fn new(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            types: types.into_iter().collect(),
            channels: None,
            regex: None,
        }
    }

    /// Filter for every event type on every channel.
    pub fn all_events() -> Self {
        Self::new(EventType::ALL)
    }

    /// Restricts events to the given channel ids.
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Applies a server-side regular expression to message text.
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    pub fn types(&self) -> &BTreeSet<EventType> {
        &self.types
    }

    pub fn channels(&self) -> Option<&BTreeSet<String>> {
        self.channels.as_ref()
    }

    pub fn regex(&self) -> Option<&str> {
        self.regex.as_deref()
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.types.is_empty() {
            return Err(StreamError::NoEventTypes);
        }
        Ok(())
    }

    pub(crate) fn poll_request(&self, last_event: u64) -> ApiRequest {
        let types = self
            .types
            .iter()
            .map(|kind| kind.request_form())
            .collect::<Vec<_>>()
            .join(",");
        let channels = self
            .channels
            .iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");

        ApiRequest::get(EVENTS_PATH)
            .with_query("last-event", last_event.to_string())
            .with_query("types", types)
            .with_query("channels", channels)
            .with_query("regex", self.regex.clone().unwrap_or_default())
    }
}

/// Highest event id a streaming task has processed. Never decreases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventCursor(u64);

impl EventCursor {
    pub fn last_event(self) -> u64 {
        self.0
    }

    pub fn advance(&mut self, event_id: u64) {
        self.0 = self.0.max(event_id);
    }
}

/// Lifecycle of the client's streaming task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Idle,
    Running {
        generation: u64,
    },
    /// The task ended itself after an undecodable batch.
    Terminated {
        generation: u64,
        reason: String,
    },
}

#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    /// Delay policy between failed poll iterations.
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("at least one event type must be requested")]
    NoEventTypes,

    #[error("streaming requires a running tokio runtime")]
    NoRuntime,
}

struct ActiveStream {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Event streaming on top of an [`ApiClient`].
///
/// Only one streaming task runs per client; starting another supersedes it.
/// Dropping the client cancels the task.
pub struct StreamingClient {
    api: ApiClient,
    listeners: Arc<ListenerRegistry>,
    options: StreamOptions,
    active: Mutex<Option<ActiveStream>>,
    generation: Arc<AtomicU64>,
    status: Arc<watch::Sender<StreamStatus>>,
}

impl StreamingClient {
    pub fn new(api: ApiClient) -> Self {
        Self::with_options(api, StreamOptions::default())
    }

    pub fn with_options(api: ApiClient, options: StreamOptions) -> Self {
        let (status, _) = watch::channel(StreamStatus::Idle);
        Self {
            api,
            listeners: Arc::new(ListenerRegistry::new()),
            options,
            active: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            status: Arc::new(status),
        }
    }

    /// Underlying request executor, shared with the streaming task.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn add_listener<L: EventListener>(&self, listener: L) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Starts streaming with `filter`, superseding any running task.
    ///
    /// The previous task is signalled before the new one is spawned and the
    /// new task starts from `last-event=0`. Returns the generation number the
    /// new task reports in [`StreamStatus`].
    pub fn start_streaming(&self, filter: StreamFilter) -> Result<u64, StreamError> {
        filter.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StreamError::NoRuntime)?;

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            debug!(event = "stream_superseded", generation = previous.generation);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let worker = PollWorker {
            api: self.api.clone(),
            listeners: Arc::clone(&self.listeners),
            filter,
            retry_policy: self.options.retry_policy.clone(),
            cancel: cancel.clone(),
            generation,
            current_generation: Arc::clone(&self.generation),
            status: Arc::clone(&self.status),
        };

        self.status.send_replace(StreamStatus::Running { generation });
        let task = runtime.spawn(worker.run());
        info!(event = "stream_started", generation);

        *active = Some(ActiveStream {
            generation,
            cancel,
            task,
        });
        Ok(generation)
    }

    /// Signals the running task to stop and returns without waiting for it.
    pub fn stop_streaming(&self) {
        let Some(active) = self.active.lock().take() else {
            return;
        };

        active.cancel.cancel();
        self.status.send_if_modified(|status| {
            let current = matches!(
                status,
                StreamStatus::Running { generation } if *generation == active.generation
            );
            if current {
                *status = StreamStatus::Idle;
            }
            current
        });
        info!(event = "stream_stop_requested", generation = active.generation);
    }

    /// True while a task is running and has been neither stopped nor ended
    /// by a decode failure.
    pub fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| !active.cancel.is_cancelled() && !active.task.is_finished())
    }

    /// Watches the streaming lifecycle, including self-termination.
    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

struct PollWorker {
    api: ApiClient,
    listeners: Arc<ListenerRegistry>,
    filter: StreamFilter,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    status: Arc<watch::Sender<StreamStatus>>,
}

impl PollWorker {
    async fn run(self) {
        let generation = self.generation;
        let mut cursor = EventCursor::default();
        let mut failures = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let request = self.filter.poll_request(cursor.last_event());
            let body = match self.api.send(&request, true).await {
                Ok(body) => {
                    failures = 0;
                    body
                }
                Err(err) => {
                    failures += 1;
                    let delay = self.retry_policy.delay_for_attempt(failures);
                    warn!(
                        event = "poll_failed",
                        generation,
                        consecutive_failures = failures,
                        delay_ms = delay.as_millis() as u64,
                        last_event = cursor.last_event(),
                        retryable = err.is_retryable(),
                        error = %err
                    );
                    if !sleep_unless_cancelled(delay, &self.cancel).await {
                        break;
                    }
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                break;
            }

            let delivery = catch_unwind(AssertUnwindSafe(|| {
                deliver_batch(&body, &mut cursor, &self.listeners, &self.cancel)
            }));
            let failure = match delivery {
                Ok(Ok(0)) => continue,
                Ok(Ok(delivered)) => {
                    debug!(
                        event = "batch_delivered",
                        generation,
                        delivered,
                        last_event = cursor.last_event()
                    );
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("listener panicked: {}", panic_message(panic.as_ref())),
            };

            error!(
                event = "stream_terminated",
                generation,
                last_event = cursor.last_event(),
                error = %failure
            );
            self.cancel.cancel();
            self.publish_terminated(failure);
            return;
        }

        info!(event = "stream_stopped", generation, last_event = cursor.last_event());
    }

    fn publish_terminated(&self, reason: String) {
        let generation = self.generation;
        let current = &self.current_generation;
        self.status.send_if_modified(|status| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            *status = StreamStatus::Terminated { generation, reason };
            true
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Decodes `body` and delivers each event in array order.
///
/// The cursor advances before each delivery. Decoding stops at the first bad
/// element; events before it have already been delivered. Delivery also stops
/// once `cancel` fires.
pub(crate) fn deliver_batch(
    body: &str,
    cursor: &mut EventCursor,
    listeners: &ListenerRegistry,
    cancel: &CancellationToken,
) -> Result<usize, DecodeError> {
    let batch = parse_event_batch(body)?;
    let mut delivered = 0;

    for raw in &batch {
        if cancel.is_cancelled() {
            break;
        }
        let event = decode_event(raw)?;
        cursor.advance(event.event_id());
        listeners.notify(&event);
        delivered += 1;
    }

    Ok(delivered)
}
