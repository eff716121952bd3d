//! Debounced class-to-bin actuation.
//!
//! Every batch either opens the bin mapped to its strongest detection or does nothing. Closing is
//! driven by recency: once no qualifying detection has been seen for longer than the idle window,
//! the open bin shuts. State is published as whole [`BinBoard`] snapshots so observers never see
//! two bins open at once.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::mapping::Mapping;
use crate::model::{BinBoard, BinIndex, Detection, DetectionBatch};

/// Minimum confidence, exclusive, for a detection to move a lid.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
/// How long after the last qualifying detection an open bin stays open.
pub const IDLE_WINDOW: Duration = Duration::from_millis(1000);
/// Period of the idle evaluator.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Physical bins on the standard kiosk.
pub const DEFAULT_BIN_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Tunables for the controller.
pub struct ActuationPolicy {
    /// Exclusive confidence threshold.
    pub threshold: f32,
    /// Recency bound on qualifying detections.
    pub idle_window: Duration,
    /// Period of the idle evaluator.
    pub tick_interval: Duration,
}

impl Default for ActuationPolicy {
    fn default() -> Self {
        Self {
            threshold: CONFIDENCE_THRESHOLD,
            idle_window: IDLE_WINDOW,
            tick_interval: TICK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A state change applied to the board.
pub enum Transition {
    /// `bin` opened; `closed` is the bin that was open before, if any.
    Opened {
        /// Newly open bin.
        bin: BinIndex,
        /// Bin closed in the same step.
        closed: Option<BinIndex>,
    },
    /// `bin` closed after the idle window elapsed.
    Closed {
        /// Bin that shut.
        bin: BinIndex,
    },
}

/// Strongest detection in a batch. Equal confidences resolve to the earliest entry.
#[must_use]
pub fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, candidate| match best {
        Some(current) if candidate.confidence <= current.confidence => Some(current),
        Some(current) if candidate.confidence.is_nan() => Some(current),
        _ => Some(candidate),
    })
}

/// Sole mutator of bin state.
pub struct ActuationController {
    policy: ActuationPolicy,
    board: watch::Sender<BinBoard>,
    last_qualifying_at: Option<Instant>,
}

impl ActuationController {
    /// Controller for `bin_count` closed bins.
    #[must_use]
    pub fn new(policy: ActuationPolicy, bin_count: usize) -> Self {
        let (board, _initial) = watch::channel(BinBoard::new(bin_count));
        Self {
            policy,
            board,
            last_qualifying_at: None,
        }
    }

    /// Active policy.
    #[must_use]
    pub fn policy(&self) -> ActuationPolicy {
        self.policy
    }

    /// Current snapshot.
    #[must_use]
    pub fn board(&self) -> BinBoard {
        self.board.borrow().clone()
    }

    /// Receiver notified on every published change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BinBoard> {
        self.board.subscribe()
    }

    /// Last time a detection qualified.
    #[must_use]
    pub fn last_qualifying_at(&self) -> Option<Instant> {
        self.last_qualifying_at
    }

    /// Apply one batch at time `now`.
    pub fn on_batch(
        &mut self,
        batch: &DetectionBatch,
        mapping: &Mapping,
        now: Instant,
    ) -> Option<Transition> {
        let Some(best) = best_detection(&batch.detections) else {
            return self.close_if_idle(now);
        };

        if best.confidence.is_nan() || best.confidence <= self.policy.threshold {
            trace!(
                feed = %batch.feed,
                class = %best.class,
                confidence = best.confidence,
                "below threshold"
            );
            return None;
        }

        let Some(bin) = mapping.bin_for_label(&best.class) else {
            debug!(feed = %batch.feed, class = %best.class, "class not mapped to a bin");
            return None;
        };

        if self.board.borrow().get(bin).is_none() {
            warn!(%bin, class = %best.class, "mapped bin does not exist on this kiosk");
            return None;
        }

        self.last_qualifying_at = Some(now);
        self.open(bin, now)
    }

    /// Periodic idle check.
    pub fn on_tick(&mut self, now: Instant) -> Option<Transition> {
        self.close_if_idle(now)
    }

    fn open(&mut self, bin: BinIndex, now: Instant) -> Option<Transition> {
        let mut transition = None;
        self.board.send_if_modified(|board| {
            let previous = board.open_bin();
            if previous == Some(bin) {
                return false;
            }
            let closed = board.close_all();
            board.mark_open(bin, now);
            transition = Some(Transition::Opened { bin, closed });
            true
        });

        if let Some(Transition::Opened { bin, closed }) = transition {
            info!(%bin, closed = ?closed, "bin opened");
        }
        transition
    }

    fn close_if_idle(&mut self, now: Instant) -> Option<Transition> {
        let idle = self
            .last_qualifying_at
            .is_none_or(|seen| now.saturating_duration_since(seen) > self.policy.idle_window);
        if !idle {
            return None;
        }

        let mut transition = None;
        self.board.send_if_modified(|board| {
            let closed = board.close_all();
            transition = closed.map(|bin| Transition::Closed { bin });
            closed.is_some()
        });

        if let Some(Transition::Closed { bin }) = transition {
            info!(%bin, "bin closed after idle window");
        }
        transition
    }
}
