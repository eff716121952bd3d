use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ecosort_core::{
    BackendLocator, BackendPlugin, BinIndex, CandidateList, ChannelStatus, Detection,
    DetectionSource, Endpoint, FeedOptions, HealthPort, KioskConfig, PortError, PredictionPort,
    PushConnection, PushMessage, PushPort, SortingService, WasteClass, queue_sink,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

/// Backend reachable only at `healthy_host`, with a scripted poll sequence and a push
/// channel that sends a fixed list of messages.
struct LabBackend {
    healthy_host: &'static str,
    polls: Mutex<VecDeque<Vec<Detection>>>,
    pushes: Mutex<VecDeque<PushMessage>>,
}

impl LabBackend {
    fn new(healthy_host: &'static str) -> Arc<Self> {
        Arc::new(Self {
            healthy_host,
            polls: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(VecDeque::new()),
        })
    }
}

#[async_trait]
impl HealthPort for LabBackend {
    async fn health(&self, endpoint: &Endpoint) -> Result<(), PortError> {
        if endpoint.host == self.healthy_host {
            Ok(())
        } else {
            Err(PortError::Status(502))
        }
    }
}

#[async_trait]
impl PredictionPort for LabBackend {
    async fn current_predictions(&self, _endpoint: &Endpoint) -> Result<Vec<Detection>, PortError> {
        Ok(self
            .polls
            .lock()
            .expect("poll script")
            .pop_front()
            .unwrap_or_default())
    }
}

struct LabConnection {
    messages: VecDeque<PushMessage>,
}

#[async_trait]
impl PushConnection for LabConnection {
    async fn next_message(&mut self) -> Option<Result<PushMessage, PortError>> {
        sleep(Duration::from_millis(50)).await;
        self.messages.pop_front().map(Ok)
    }
}

#[async_trait]
impl PushPort for LabBackend {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn PushConnection>, PortError> {
        if endpoint.host != self.healthy_host {
            return Err(PortError::Channel("unreachable".to_owned()));
        }
        let messages = mem::take(&mut *self.pushes.lock().expect("push script"));
        Ok(Box::new(LabConnection { messages }))
    }
}

fn update(class: &str, confidence: f32) -> PushMessage {
    PushMessage {
        kind: "update".to_owned(),
        frame: None,
        detections: vec![Detection::new(class, confidence)],
    }
}

#[tokio::test(start_paused = true)]
async fn discovered_backend_drives_a_bin_open_and_closed() {
    let backend = LabBackend::new("10.0.0.2");
    backend
        .pushes
        .lock()
        .expect("push script")
        .extend([update("paper", 0.4), update("cardboard", 0.93)]);
    let plugin = BackendPlugin::from_shared(Arc::clone(&backend));

    let candidates = CandidateList::new(
        [Endpoint::new("10.0.0.1", 8150), Endpoint::new("10.0.0.2", 8150)],
        Endpoint::fallback(),
    );
    let locator = BackendLocator::new(Arc::clone(&plugin.health_port), candidates);
    let endpoint = locator.locate().await;
    assert_eq!(
        endpoint,
        Endpoint::new("10.0.0.2", 8150),
        "the only healthy candidate is chosen"
    );
    assert!(locator.verify(&endpoint).await, "chosen backend verifies");

    let config = KioskConfig::default();
    let service = Arc::new(SortingService::from_config(&config));
    let mut states = service.subscribe_bin_states();
    let (queue, batches) = mpsc::unbounded_channel();
    let runner = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.run(batches).await }
    });

    let source = DetectionSource::new(plugin);
    let status = source.channel_status();
    let handle = source.start(
        &endpoint,
        queue_sink(queue),
        FeedOptions {
            poll: false,
            reconnect_delay: None,
            ..FeedOptions::default()
        },
    );

    states.changed().await.expect("service alive");
    let opened_at = Instant::now();
    assert_eq!(
        states.borrow_and_update().open_bin(),
        Some(BinIndex(2)),
        "confident cardboard opens its bin"
    );
    assert_eq!(
        service.get_mapping().bin_for(WasteClass::Cardboard),
        Some(BinIndex(2)),
        "cardboard maps to the paper bin by default"
    );

    states.changed().await.expect("service alive");
    assert_eq!(states.borrow_and_update().open_bin(), None, "bin closes when idle");
    assert!(
        opened_at.elapsed() > config.policy.idle_window,
        "bin stayed open for the idle window"
    );

    assert!(
        matches!(*status.borrow(), ChannelStatus::Disconnected(_)),
        "closed push channel is reported"
    );
    handle.stop();
    runner.abort();
}

#[tokio::test(start_paused = true)]
async fn poll_feed_alone_reaches_the_controller() {
    let backend = LabBackend::new("localhost");
    backend
        .polls
        .lock()
        .expect("poll script")
        .extend([vec![Detection::new("metal", 0.75)]]);
    let plugin = BackendPlugin::from_shared(backend);

    let locator = BackendLocator::new(
        Arc::clone(&plugin.health_port),
        CandidateList::new([Endpoint::new("10.9.9.9", 8150)], Endpoint::fallback()),
    );
    let endpoint = locator.locate().await;
    assert_eq!(endpoint, Endpoint::fallback(), "nothing answered, fallback chosen");

    let service = Arc::new(SortingService::from_config(&KioskConfig::default()));
    service.set_mapping(WasteClass::Metal, BinIndex(1));
    let mut states = service.subscribe_bin_states();
    let (queue, batches) = mpsc::unbounded_channel();
    let runner = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.run(batches).await }
    });

    let source = DetectionSource::new(plugin);
    let handle = source.start(
        &endpoint,
        queue_sink(queue),
        FeedOptions {
            push: false,
            ..FeedOptions::default()
        },
    );

    let started = Instant::now();
    states.changed().await.expect("service alive");
    assert_eq!(
        states.borrow_and_update().open_bin(),
        Some(BinIndex(1)),
        "remapped metal opens bin 1"
    );
    assert!(
        started.elapsed() >= Duration::from_millis(2000),
        "first poll waits one interval"
    );

    handle.stop();
    runner.abort();
}
