//! Core types and service wiring for the ecosort kiosk client.

/// Class-to-bin actuation with confidence gating and idle close.
pub mod actuation;
/// Kiosk configuration loaded from TOML and the environment.
pub mod config;
/// Discovery of a reachable backend among candidate addresses.
pub mod locator;
/// Editable class-to-bin assignments.
pub mod mapping;
/// Domain models and identifiers shared by all crates.
pub mod model;
/// Bundle of port implementations handed to the service.
pub mod plugin;
/// Traits describing the backend interfaces.
pub mod ports;
/// High-level service facade used by clients.
pub mod service;
/// Push and poll detection feeds.
pub mod source;

pub use actuation::*;
pub use config::*;
pub use locator::*;
pub use mapping::*;
pub use model::*;
pub use plugin::*;
pub use ports::*;
pub use service::*;
pub use source::*;
