//! Long-poll watcher streaming configuration changes to a listener.
//!
//! Each subscription runs one independent loop: long-poll the listener
//! endpoint with the last-known content digest; on a change signal, fetch
//! the full content, recompute the digest, and offer a [`ChangeEvent`] to
//! the listener; on failure, offer the error and wait out the retry
//! interval before polling again. An unchanged answer re-polls immediately,
//! because the long poll itself bounds the request duration.
//!
//! Event delivery is deliberately lossy. In [`DeliveryMode::LatestOnly`] at
//! most one undelivered change is in flight and a newer change replaces an
//! unread older one; in [`DeliveryMode::Buffered`] up to the configured
//! number of events queue in order and further events are dropped while the
//! queue is full. Errors always go to a single-slot channel and a second
//! unconsumed error is dropped.
//!
//! Cancellation is cooperative and weak: the loop observes [`Listener::stop`]
//! (or the listener being dropped) only between rounds and during retry
//! waits, never by interrupting an in-flight request. Stopping is therefore
//! eventually effective, bounded by the long-poll timeout.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::{self, ConfigClient};
use crate::http::HttpError;

/// Default wait between rounds after a failed cycle.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Default long-poll timeout requested from the server.
const DEFAULT_POLLING_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Lower bound on the retry interval; anything shorter hammers the server.
const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);
/// Lower bound on the long-poll timeout.
const MIN_POLLING_TIMEOUT: Duration = Duration::from_secs(1);

/// Policy for delivering change events to a slow consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Keep only the most recent undelivered event; older unread events are
    /// replaced. A consumer always observes the latest delivered content.
    LatestOnly,
    /// Queue up to this many events in arrival order; events arriving while
    /// the queue is full are dropped.
    Buffered(usize),
}

/// Options governing one watcher subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenOptions {
    /// Wait between polling rounds after a failed cycle.
    pub retry_interval: Duration,
    /// Long-poll timeout requested from the server.
    pub polling_timeout: Duration,
    /// Change-event delivery policy.
    pub delivery: DeliveryMode,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            polling_timeout: DEFAULT_POLLING_TIMEOUT,
            delivery: DeliveryMode::LatestOnly,
        }
    }
}

impl ListenOptions {
    /// Clamps out-of-range values, keeping the watcher well-behaved even
    /// with hostile settings.
    pub(crate) fn sanitise(mut self) -> Self {
        if self.retry_interval < MIN_RETRY_INTERVAL {
            warn!(
                configured = ?self.retry_interval,
                clamped = ?MIN_RETRY_INTERVAL,
                "retry interval too small, clamping"
            );
            self.retry_interval = MIN_RETRY_INTERVAL;
        }
        if self.polling_timeout < MIN_POLLING_TIMEOUT {
            warn!(
                configured = ?self.polling_timeout,
                clamped = ?MIN_POLLING_TIMEOUT,
                "polling timeout too small, clamping"
            );
            self.polling_timeout = MIN_POLLING_TIMEOUT;
        }
        if self.delivery == DeliveryMode::Buffered(0) {
            warn!("buffered delivery requires a non-zero capacity, clamping to 1");
            self.delivery = DeliveryMode::Buffered(1);
        }
        self
    }
}

/// One configuration change observed by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Namespace of the changed entry.
    pub namespace: String,
    /// Group of the changed entry.
    pub group: String,
    /// Data id of the changed entry.
    pub data_id: String,
    /// Newly fetched content.
    pub content: String,
    /// Digest of the new content, as sent in subsequent polls.
    pub digest: String,
}

/// Identity of one watched entry.
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub(crate) namespace: String,
    pub(crate) group: String,
    pub(crate) data_id: String,
}

/// Sending half of the change channel, shaped by the delivery mode.
enum ChangeTx {
    Latest(watch::Sender<Option<ChangeEvent>>),
    Buffered(mpsc::Sender<ChangeEvent>),
}

impl ChangeTx {
    /// Offers an event without ever blocking the watcher loop.
    fn offer(&self, event: ChangeEvent) {
        match self {
            ChangeTx::Latest(tx) => {
                // Unread older values are replaced; delivery errors just mean
                // the listener is gone and the loop will notice cancellation.
                tx.send_replace(Some(event));
            }
            ChangeTx::Buffered(tx) => match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    debug!(data_id = %event.data_id, "change queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {}
            },
        }
    }
}

/// Receiving half of the change channel.
enum ChangeRx {
    Latest(watch::Receiver<Option<ChangeEvent>>),
    Buffered(mpsc::Receiver<ChangeEvent>),
}

impl ChangeRx {
    async fn recv(&mut self) -> Option<ChangeEvent> {
        match self {
            ChangeRx::Latest(rx) => loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(event) = rx.borrow_and_update().clone() {
                    return Some(event);
                }
            },
            ChangeRx::Buffered(rx) => rx.recv().await,
        }
    }
}

/// Handle on one running watcher.
///
/// Dropping the listener cancels the watcher the same way [`Listener::stop`]
/// does, except without waiting for the loop to wind down.
pub struct Listener {
    changes: ChangeRx,
    errors: mpsc::Receiver<HttpError>,
    guard: DropGuard,
    task: JoinHandle<()>,
}

impl Listener {
    /// Waits for the next change event.
    ///
    /// Returns `None` once the watcher has stopped and all pending events
    /// were consumed.
    pub async fn next_change(&mut self) -> Option<ChangeEvent> {
        self.changes.recv().await
    }

    /// Waits for the next error event.
    ///
    /// Errors are best-effort: the channel holds one slot and the watcher
    /// drops errors that arrive while it is occupied. Returns `None` once
    /// the watcher has stopped.
    pub async fn next_error(&mut self) -> Option<HttpError> {
        self.errors.recv().await
    }

    /// Stops the watcher and waits for its loop to exit.
    ///
    /// The in-flight poll round, if any, is never interrupted, so this can
    /// take up to the long-poll timeout against an idle server.
    pub async fn stop(self) {
        let Self {
            changes: _changes,
            errors: _errors,
            guard,
            task,
        } = self;
        drop(guard);
        let _ = task.await;
    }
}

/// Spawns the watcher loop for one subscription.
pub(crate) fn spawn_watcher(
    client: ConfigClient,
    subscription: Subscription,
    options: ListenOptions,
) -> Listener {
    let options = options.sanitise();
    let (change_tx, change_rx) = match options.delivery {
        DeliveryMode::LatestOnly => {
            let (tx, rx) = watch::channel(None);
            (ChangeTx::Latest(tx), ChangeRx::Latest(rx))
        }
        DeliveryMode::Buffered(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (ChangeTx::Buffered(tx), ChangeRx::Buffered(rx))
        }
    };
    let (error_tx, error_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_watch_loop(
        client,
        subscription,
        options,
        change_tx,
        error_tx,
        cancel.clone(),
    ));

    Listener {
        changes: change_rx,
        errors: error_rx,
        guard: cancel.drop_guard(),
        task,
    }
}

/// The per-subscription polling loop.
async fn run_watch_loop(
    client: ConfigClient,
    subscription: Subscription,
    options: ListenOptions,
    changes: ChangeTx,
    errors: mpsc::Sender<HttpError>,
    cancel: CancellationToken,
) {
    let mut digest = String::new();
    info!(
        data_id = %subscription.data_id,
        group = %subscription.group,
        namespace = %subscription.namespace,
        "config watcher started"
    );

    // Cancellation is only observed here and in the retry waits; an
    // in-flight round always completes.
    while !cancel.is_cancelled() {
        let changed = match client
            .poll_change(
                &subscription.namespace,
                &subscription.group,
                &subscription.data_id,
                &digest,
                options.polling_timeout,
            )
            .await
        {
            Ok(changed) => changed,
            Err(err) => {
                warn!(data_id = %subscription.data_id, error = %err, "config poll failed");
                offer_error(&errors, err);
                if !wait_retry(options.retry_interval, &cancel).await {
                    break;
                }
                continue;
            }
        };

        if !changed {
            continue;
        }

        match client
            .get_config(
                &subscription.namespace,
                &subscription.group,
                &subscription.data_id,
            )
            .await
        {
            Ok(content) => {
                digest = config::content_digest(&content);
                debug!(
                    data_id = %subscription.data_id,
                    digest = %digest,
                    "configuration changed"
                );
                changes.offer(ChangeEvent {
                    namespace: subscription.namespace.clone(),
                    group: subscription.group.clone(),
                    data_id: subscription.data_id.clone(),
                    content,
                    digest: digest.clone(),
                });
            }
            Err(err) => {
                warn!(data_id = %subscription.data_id, error = %err, "config fetch failed");
                offer_error(&errors, err);
                if !wait_retry(options.retry_interval, &cancel).await {
                    break;
                }
            }
        }
    }

    info!(data_id = %subscription.data_id, "config watcher stopped");
}

/// Offers an error to the single-slot channel, dropping it when occupied.
fn offer_error(errors: &mpsc::Sender<HttpError>, err: HttpError) {
    if errors.try_send(err).is_err() {
        debug!("error slot occupied or listener gone, dropping error");
    }
}

/// Sleeps for the retry interval; returns `false` when cancelled mid-wait.
async fn wait_retry(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
