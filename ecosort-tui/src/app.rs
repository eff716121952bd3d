use std::sync::Arc;

use ecosort_core::{
    mapping::Mapping,
    model::{BinBoard, BinIndex, DetectionBatch, Endpoint, WasteClass},
    service::SortingService,
    source::{ChannelStatus, FeedOptions, Frame},
};
use tokio::sync::watch;

pub(crate) struct App {
    pub(crate) service: Arc<SortingService>,

    pub(crate) endpoint: Endpoint,
    pub(crate) verified: bool,
    pub(crate) feeds: FeedOptions,

    pub(crate) board: BinBoard,
    pub(crate) mapping: Mapping,
    pub(crate) class_list_index: usize,

    pub(crate) channel: ChannelStatus,
    pub(crate) frame_bytes: Option<usize>,
    pub(crate) last_batch: Option<DetectionBatch>,

    pub(crate) error_message: Option<String>,

    channel_rx: watch::Receiver<ChannelStatus>,
    frames_rx: watch::Receiver<Option<Frame>>,
    last_batch_rx: watch::Receiver<Option<DetectionBatch>>,
}

impl App {
    pub(crate) fn new(
        service: Arc<SortingService>,
        endpoint: Endpoint,
        feeds: FeedOptions,
        channel_rx: watch::Receiver<ChannelStatus>,
        frames_rx: watch::Receiver<Option<Frame>>,
    ) -> Self {
        let last_batch_rx = service.last_batch();
        let mut app = Self {
            board: service.bin_states(),
            mapping: service.get_mapping(),
            service,
            endpoint,
            verified: false,
            feeds,
            class_list_index: 0,
            channel: ChannelStatus::Idle,
            frame_bytes: None,
            last_batch: None,
            error_message: None,
            channel_rx,
            frames_rx,
            last_batch_rx,
        };
        app.refresh();
        app
    }

    /// Pull the latest shared state into the render copy.
    pub(crate) fn refresh(&mut self) {
        self.board = self.service.bin_states();
        self.mapping = self.service.get_mapping();
        self.channel = self.channel_rx.borrow().clone();
        // base64 carries 3 bytes per 4 characters
        self.frame_bytes = self
            .frames_rx
            .borrow()
            .as_ref()
            .map(|frame| frame.len() / 4 * 3);
        self.last_batch = self.last_batch_rx.borrow().clone();
    }

    pub(crate) fn selected_class(&self) -> Option<WasteClass> {
        WasteClass::ALL.get(self.class_list_index).copied()
    }

    pub(crate) fn assign_selected(&mut self, bin: BinIndex) {
        let Some(class) = self.selected_class() else {
            return;
        };
        if bin.0 >= self.board.len() {
            self.error_message = Some(format!(
                "There is no bin {} (this kiosk has {})",
                bin.0 + 1,
                self.board.len()
            ));
            return;
        }

        self.service.set_mapping(class, bin);
        self.mapping = self.service.get_mapping();
        self.error_message = None;
    }
}
