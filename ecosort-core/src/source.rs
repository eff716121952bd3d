//! Push and poll feeds normalised into one sequence of detection batches.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::model::{Detection, DetectionBatch, Endpoint, FeedKind, PushMessage};
use crate::plugin::BackendPlugin;
use crate::ports::{PortError, PredictionPort, PushConnection, PushPort};

/// Default period of the poll feed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// Default pause before the push feed reconnects.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
/// Default bound on one poll request.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Default bound on the push channel handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default silence after which an open push channel is dropped and reconnected.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Path of the push channel on the backend.
pub const PUSH_PATH: &str = "/ws/frontend";

/// Receiver of detection batches.
pub trait BatchSink: Send + Sync + 'static {
    /// Hand over one batch.
    fn deliver(&self, batch: DetectionBatch);
}

impl<F> BatchSink for F
where
    F: Fn(DetectionBatch) + Send + Sync + 'static,
{
    fn deliver(&self, batch: DetectionBatch) {
        self(batch);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Connection state of the push channel.
pub enum ChannelStatus {
    /// Feed not started.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Receiving messages.
    Connected,
    /// Connection failed or closed; reason attached.
    Disconnected(String),
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Idle => formatter.write_str("idle"),
            ChannelStatus::Connecting => formatter.write_str("connecting"),
            ChannelStatus::Connected => formatter.write_str("connected"),
            ChannelStatus::Disconnected(reason) => write!(formatter, "disconnected ({reason})"),
        }
    }
}

/// Handle to one running feed.
///
/// Stopping closes the delivery gate before aborting the task, so no batch reaches the sink once
/// [`FeedHandle::stop`] returns. Calling it from inside the sink is fine.
#[derive(Clone)]
pub struct FeedHandle {
    kind: FeedKind,
    gate: Arc<AtomicBool>,
    task: Arc<AbortHandle>,
}

impl FeedHandle {
    /// Which feed this handle controls.
    #[must_use]
    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Stop the feed. Repeated calls are no-ops.
    pub fn stop(&self) {
        if self.gate.swap(false, Ordering::SeqCst) {
            self.task.abort();
            info!(feed = %self.kind, "feed stopped");
        }
    }

    /// Whether [`FeedHandle::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        !self.gate.load(Ordering::SeqCst)
    }
}

/// Handles for whichever feeds [`DetectionSource::start`] launched.
#[derive(Clone, Default)]
pub struct SourceHandle {
    /// Push feed, when enabled.
    pub push: Option<FeedHandle>,
    /// Poll feed, when enabled.
    pub poll: Option<FeedHandle>,
}

impl SourceHandle {
    /// Stop every feed. Idempotent.
    pub fn stop(&self) {
        for feed in [&self.push, &self.poll].into_iter().flatten() {
            feed.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which feeds to run and how.
pub struct FeedOptions {
    /// Run the push feed.
    pub push: bool,
    /// Run the poll feed.
    pub poll: bool,
    /// Period of the poll feed.
    pub poll_interval: Duration,
    /// Bound on one poll request; an expired request counts as a failed tick.
    pub poll_timeout: Duration,
    /// Pause before reconnecting the push channel; `None` gives up after the first connection.
    pub reconnect_delay: Option<Duration>,
    /// Bound on the push channel handshake.
    pub connect_timeout: Duration,
    /// Drop an open push channel after this long without a message; `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            push: true,
            poll: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            reconnect_delay: Some(DEFAULT_RECONNECT_DELAY),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Latest frame pushed by the backend, base64 JPEG.
pub type Frame = Arc<str>;

/// Spawns feeds against a resolved endpoint and reports channel health.
pub struct DetectionSource {
    plugin: BackendPlugin,
    status: Arc<watch::Sender<ChannelStatus>>,
    frames: Arc<watch::Sender<Option<Frame>>>,
}

impl DetectionSource {
    /// Source backed by `plugin`'s ports.
    #[must_use]
    pub fn new(plugin: BackendPlugin) -> Self {
        let (status, _status_rx) = watch::channel(ChannelStatus::Idle);
        let (frames, _frames_rx) = watch::channel(None);
        Self {
            plugin,
            status: Arc::new(status),
            frames: Arc::new(frames),
        }
    }

    /// Push channel status updates.
    #[must_use]
    pub fn channel_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// Most recent frame from push updates.
    #[must_use]
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frames.subscribe()
    }

    /// Start the feeds selected by `options`, all delivering into `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S: BatchSink>(
        &self,
        endpoint: &Endpoint,
        sink: S,
        options: FeedOptions,
    ) -> SourceHandle {
        let sink: Arc<dyn BatchSink> = Arc::new(sink);
        SourceHandle {
            push: options
                .push
                .then(|| self.start_push(endpoint, Arc::clone(&sink), &options)),
            poll: options
                .poll
                .then(|| self.start_poll(endpoint, Arc::clone(&sink), &options)),
        }
    }

    /// Start only the push feed, with the reconnect and timeout settings of `options`.
    pub fn start_push(
        &self,
        endpoint: &Endpoint,
        sink: Arc<dyn BatchSink>,
        options: &FeedOptions,
    ) -> FeedHandle {
        let gate = Arc::new(AtomicBool::new(true));
        let feed = PushFeed {
            port: Arc::clone(&self.plugin.push_port),
            endpoint: endpoint.clone(),
            sink,
            gate: Arc::clone(&gate),
            status: Arc::clone(&self.status),
            frames: Arc::clone(&self.frames),
            reconnect_delay: options.reconnect_delay,
            connect_timeout: non_zero_or(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT),
            idle_timeout: options.idle_timeout.filter(|limit| !limit.is_zero()),
        };
        let task = tokio::spawn(feed.run()).abort_handle();
        info!(%endpoint, "push feed started");
        FeedHandle {
            kind: FeedKind::Push,
            gate,
            task: Arc::new(task),
        }
    }

    /// Start only the poll feed. A zero interval or timeout falls back to its default.
    pub fn start_poll(
        &self,
        endpoint: &Endpoint,
        sink: Arc<dyn BatchSink>,
        options: &FeedOptions,
    ) -> FeedHandle {
        let period = non_zero_or(options.poll_interval, DEFAULT_POLL_INTERVAL);
        let gate = Arc::new(AtomicBool::new(true));
        let feed = PollFeed {
            port: Arc::clone(&self.plugin.prediction_port),
            endpoint: endpoint.clone(),
            sink,
            gate: Arc::clone(&gate),
            period,
            request_timeout: non_zero_or(options.poll_timeout, DEFAULT_POLL_TIMEOUT),
        };
        let task = tokio::spawn(feed.run()).abort_handle();
        info!(%endpoint, period_ms = period.as_millis(), "poll feed started");
        FeedHandle {
            kind: FeedKind::Poll,
            gate,
            task: Arc::new(task),
        }
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}

fn deliver(gate: &AtomicBool, sink: &dyn BatchSink, batch: DetectionBatch) {
    if gate.load(Ordering::SeqCst) {
        sink.deliver(batch);
    }
}

struct PushFeed {
    port: Arc<dyn PushPort>,
    endpoint: Endpoint,
    sink: Arc<dyn BatchSink>,
    gate: Arc<AtomicBool>,
    status: Arc<watch::Sender<ChannelStatus>>,
    frames: Arc<watch::Sender<Option<Frame>>>,
    reconnect_delay: Option<Duration>,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl PushFeed {
    async fn run(self) {
        loop {
            self.status.send_replace(ChannelStatus::Connecting);
            let limit = self.connect_timeout;
            let connected = timeout(limit, self.port.connect(&self.endpoint))
                .await
                .unwrap_or_else(|_elapsed| Err(PortError::Timeout(limit.as_millis())));
            let reason = match connected {
                Ok(connection) => {
                    self.status.send_replace(ChannelStatus::Connected);
                    info!(endpoint = %self.endpoint, "push channel connected");
                    self.receive(connection).await
                }
                Err(err) => err.to_string(),
            };

            warn!(endpoint = %self.endpoint, %reason, "push channel down");
            self.status.send_replace(ChannelStatus::Disconnected(reason));

            match self.reconnect_delay {
                Some(delay) => sleep(delay).await,
                None => break,
            }
        }
    }

    /// Drain `connection` until it closes or stays silent past the idle bound.
    async fn receive(&self, mut connection: Box<dyn PushConnection>) -> String {
        loop {
            let next = match self.idle_timeout {
                Some(limit) => match timeout(limit, connection.next_message()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        return format!("no message for {} ms", limit.as_millis());
                    }
                },
                None => connection.next_message().await,
            };
            match next {
                Some(Ok(message)) => self.handle(message),
                Some(Err(err)) => warn!(error = %err, "skipping unreadable push message"),
                None => return "connection closed".to_owned(),
            }
        }
    }

    fn handle(&self, message: PushMessage) {
        if !message.is_update() {
            trace!(kind = %message.kind, "ignoring push message");
            return;
        }
        if let Some(frame) = message.frame {
            self.frames.send_replace(Some(Frame::from(frame)));
        }
        let batch = DetectionBatch::new(FeedKind::Push, message.detections);
        trace!(detections = batch.detections.len(), "push batch");
        deliver(&self.gate, self.sink.as_ref(), batch);
    }
}

struct PollFeed {
    port: Arc<dyn PredictionPort>,
    endpoint: Endpoint,
    sink: Arc<dyn BatchSink>,
    gate: Arc<AtomicBool>,
    period: Duration,
    request_timeout: Duration,
}

impl PollFeed {
    async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately; the first poll happens one period after start
        ticker.tick().await;

        while self.gate.load(Ordering::SeqCst) {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(detections) if detections.is_empty() => trace!("poll returned no detections"),
                Ok(detections) => {
                    debug!(detections = detections.len(), "poll batch");
                    deliver(
                        &self.gate,
                        self.sink.as_ref(),
                        DetectionBatch::new(FeedKind::Poll, detections),
                    );
                }
                Err(err) => warn!(error = %err, "poll tick failed"),
            }
        }
    }

    async fn poll_once(&self) -> Result<Vec<Detection>, PortError> {
        timeout(
            self.request_timeout,
            self.port.current_predictions(&self.endpoint),
        )
        .await
        .unwrap_or_else(|_elapsed| Err(PortError::Timeout(self.request_timeout.as_millis())))
    }
}
