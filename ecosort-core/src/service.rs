//! High-level service facade combining mapping, controller, and the batch queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::actuation::{ActuationController, ActuationPolicy, TICK_INTERVAL, Transition};
use crate::config::KioskConfig;
use crate::mapping::{Mapping, MappingStore};
use crate::model::{BinBoard, BinIndex, DetectionBatch, WasteClass};
use crate::source::BatchSink;

/// Sink that forwards every batch into the service's queue.
#[must_use]
pub fn queue_sink(queue: mpsc::UnboundedSender<DetectionBatch>) -> impl BatchSink {
    move |batch: DetectionBatch| {
        if queue.send(batch).is_err() {
            debug!("batch queue closed, dropping batch");
        }
    }
}

/// Public entry point for the display layer and the feed consumer.
pub struct SortingService {
    mapping: Arc<MappingStore>,
    controller: Mutex<ActuationController>,
    board: watch::Receiver<BinBoard>,
    last_batch: watch::Sender<Option<DetectionBatch>>,
}

impl SortingService {
    /// Create a service over `mapping` with `bin_count` closed bins.
    #[must_use]
    pub fn new(mapping: Arc<MappingStore>, policy: ActuationPolicy, bin_count: usize) -> Self {
        let controller = ActuationController::new(policy, bin_count);
        let board = controller.subscribe();
        let (last_batch, _last_batch_rx) = watch::channel(None);
        Self {
            mapping,
            controller: Mutex::new(controller),
            board,
            last_batch,
        }
    }

    /// Create a service from resolved configuration.
    #[must_use]
    pub fn from_config(config: &KioskConfig) -> Self {
        Self::new(
            Arc::new(MappingStore::new(config.mapping.clone())),
            config.policy,
            config.bin_count,
        )
    }

    /// Copy of the current class-to-bin mapping.
    #[must_use]
    pub fn get_mapping(&self) -> Mapping {
        self.mapping.get()
    }

    /// Route `class` to `bin` for future decisions.
    pub fn set_mapping(&self, class: WasteClass, bin: BinIndex) {
        self.mapping.set(class, bin);
    }

    /// Current bin snapshot.
    #[must_use]
    pub fn bin_states(&self) -> BinBoard {
        self.board.borrow().clone()
    }

    /// Receiver notified whenever a bin opens or closes.
    #[must_use]
    pub fn subscribe_bin_states(&self) -> watch::Receiver<BinBoard> {
        self.board.clone()
    }

    /// Most recent non-empty batch, for display.
    #[must_use]
    pub fn last_batch(&self) -> watch::Receiver<Option<DetectionBatch>> {
        self.last_batch.subscribe()
    }

    /// Active controller policy.
    #[must_use]
    pub fn policy(&self) -> ActuationPolicy {
        self.controller().policy()
    }

    /// Feed one batch to the controller.
    pub fn apply_batch(&self, batch: &DetectionBatch, now: Instant) -> Option<Transition> {
        if !batch.is_empty() {
            self.last_batch.send_replace(Some(batch.clone()));
        }
        let mapping = self.mapping.get();
        self.controller().on_batch(batch, &mapping, now)
    }

    /// Run the idle check.
    pub fn tick(&self, now: Instant) -> Option<Transition> {
        self.controller().on_tick(now)
    }

    /// Consume `batches` and tick the idle evaluator until the queue closes.
    ///
    /// A zero tick interval falls back to [`TICK_INTERVAL`].
    pub async fn run(&self, mut batches: mpsc::UnboundedReceiver<DetectionBatch>) {
        let period = Some(self.policy().tick_interval)
            .filter(|period| !period.is_zero())
            .unwrap_or(TICK_INTERVAL);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("actuation loop started");

        loop {
            tokio::select! {
                received = batches.recv() => match received {
                    Some(batch) => {
                        self.apply_batch(&batch, Instant::now());
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
            }
        }

        info!("batch queue closed, actuation loop stopped");
    }

    fn controller(&self) -> MutexGuard<'_, ActuationController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
