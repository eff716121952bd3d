//! Domain data structures for detections, waste classes, bins, and backend endpoints.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Port the classification backend listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8150;

/// Host used when discovery finds nothing.
pub const FALLBACK_HOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Material classes the vision model is trained to recognise.
pub enum WasteClass {
    /// Plastic bottles, wrappers and packaging.
    Plastic,
    /// Glass bottles and jars.
    Glass,
    /// Cans and other metal scrap.
    Metal,
    /// Paper sheets and print.
    Paper,
    /// Cardboard boxes.
    Cardboard,
    /// Food and other organic waste.
    Biological,
}

impl WasteClass {
    /// Every class, in the order the display lists them.
    pub const ALL: [WasteClass; 6] = [
        WasteClass::Plastic,
        WasteClass::Glass,
        WasteClass::Metal,
        WasteClass::Paper,
        WasteClass::Cardboard,
        WasteClass::Biological,
    ];

    /// Wire name used by the detector.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WasteClass::Plastic => "plastic",
            WasteClass::Glass => "glass",
            WasteClass::Metal => "metal",
            WasteClass::Paper => "paper",
            WasteClass::Cardboard => "cardboard",
            WasteClass::Biological => "biological",
        }
    }
}

impl fmt::Display for WasteClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown waste class: {0}")]
/// A class name outside the enumerated set.
pub struct UnknownWasteClass(pub String);

impl FromStr for WasteClass {
    type Err = UnknownWasteClass;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let name = raw.trim();
        WasteClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownWasteClass(name.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Zero-based index of a physical bin.
pub struct BinIndex(pub usize);

impl fmt::Display for BinIndex {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One class + confidence observation produced by the remote detector.
pub struct Detection {
    /// Class label as reported by the model.
    pub class: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Bounding box, passed through untouched.
    #[serde(
        rename = "bbox",
        alias = "boundingBox",
        alias = "bounding_box",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bounding_box: Option<serde_json::Value>,
}

impl Detection {
    /// Build a detection without a bounding box.
    #[must_use]
    pub fn new<S: Into<String>>(class: S, confidence: f32) -> Self {
        Self {
            class: class.into(),
            confidence,
            bounding_box: None,
        }
    }

    /// The enumerated class, if the label names one.
    #[must_use]
    pub fn waste_class(&self) -> Option<WasteClass> {
        self.class.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Transport a batch arrived through.
pub enum FeedKind {
    /// Persistent WebSocket channel.
    Push,
    /// Periodic prediction polling.
    Poll,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Push => formatter.write_str("push"),
            FeedKind::Poll => formatter.write_str("poll"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Detections belonging to one observation instant.
pub struct DetectionBatch {
    /// Feed that produced the batch.
    pub feed: FeedKind,
    /// Wall-clock receive time.
    pub received_at: DateTime<Utc>,
    /// Detections in the order the backend sent them.
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    /// Stamp a new batch with the current time.
    #[must_use]
    pub fn new(feed: FeedKind, detections: Vec<Detection>) -> Self {
        Self {
            feed,
            received_at: Utc::now(),
            detections,
        }
    }

    /// Whether the batch carries no detections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Message pushed by the backend over `/ws/frontend`.
pub struct PushMessage {
    /// Message type; only `update` carries detections.
    #[serde(rename = "type")]
    pub kind: String,
    /// Base64 JPEG of the annotated frame.
    #[serde(default)]
    pub frame: Option<String>,
    /// Detections for the frame.
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl PushMessage {
    /// Whether this is a frame update.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.kind == "update"
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Reasons an endpoint string could not be parsed.
pub enum EndpointParseError {
    /// Nothing left after stripping scheme and path.
    #[error("empty host in endpoint {0:?}")]
    EmptyHost(String),
    /// Port is not a valid `u16`.
    #[error("invalid port in endpoint {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Resolved address of the classification service.
pub struct Endpoint {
    /// Host name or IP literal (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    #[must_use]
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The fixed endpoint used when discovery fails.
    #[must_use]
    pub fn fallback() -> Self {
        Self::new(FALLBACK_HOST, DEFAULT_PORT)
    }

    /// Whether the host is `localhost` or a loopback IP.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }

    /// `http://host:port`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{self}")
    }

    /// Absolute HTTP URL for `path`.
    #[must_use]
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{self}{path}")
    }

    /// Absolute WebSocket URL for `path`.
    #[must_use]
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{self}{path}")
    }

    /// Parse `host`, `host:port`, `[v6]:port` or a URL, using `default_port` when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointParseError`] when the host is empty or the port does not fit a `u16`.
    pub fn parse_with_default_port(raw: &str, default_port: u16) -> Result<Self, EndpointParseError> {
        let trimmed = raw.trim();
        let without_scheme = trimmed
            .split_once("://")
            .map_or(trimmed, |(_scheme, rest)| rest);
        let authority = without_scheme
            .split_once('/')
            .map_or(without_scheme, |(authority, _path)| authority);

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or_else(|| EndpointParseError::EmptyHost(raw.to_owned()))?;
            (host, rest.strip_prefix(':'))
        } else if authority.matches(':').count() == 1 {
            authority
                .split_once(':')
                .map_or((authority, None), |(host, port)| (host, Some(port)))
        } else {
            (authority, None)
        };

        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(raw.to_owned()));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_err| EndpointParseError::InvalidPort(raw.to_owned()))?,
            None => default_port,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(formatter, "[{}]:{}", self.host, self.port)
        } else {
            write!(formatter, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default_port(raw, DEFAULT_PORT)
    }
}

/// Whether `host` names the local machine.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Observable state of one bin.
pub struct BinState {
    /// Which bin.
    pub index: BinIndex,
    /// Whether the lid is open.
    pub is_open: bool,
    /// When the lid last opened, cleared on close.
    pub opened_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Snapshot of every bin, published as one unit.
pub struct BinBoard {
    bins: Vec<BinState>,
}

impl BinBoard {
    /// A board of `count` closed bins.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let bins = (0..count)
            .map(|index| BinState {
                index: BinIndex(index),
                is_open: false,
                opened_at: None,
            })
            .collect();
        Self { bins }
    }

    /// All bins in index order.
    #[must_use]
    pub fn bins(&self) -> &[BinState] {
        &self.bins
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether the board has no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// State of one bin.
    #[must_use]
    pub fn get(&self, index: BinIndex) -> Option<&BinState> {
        self.bins.get(index.0)
    }

    /// The open bin, if any.
    #[must_use]
    pub fn open_bin(&self) -> Option<BinIndex> {
        self.bins.iter().find(|bin| bin.is_open).map(|bin| bin.index)
    }

    pub(crate) fn close_all(&mut self) -> Option<BinIndex> {
        let mut closed = None;
        for bin in self.bins.iter_mut().filter(|bin| bin.is_open) {
            bin.is_open = false;
            bin.opened_at = None;
            closed = Some(bin.index);
        }
        closed
    }

    pub(crate) fn mark_open(&mut self, index: BinIndex, at: Instant) -> bool {
        match self.bins.get_mut(index.0) {
            Some(bin) => {
                bin.is_open = true;
                bin.opened_at = Some(at);
                true
            }
            None => false,
        }
    }
}
