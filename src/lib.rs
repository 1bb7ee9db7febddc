//! Client-side integration library for Escea networked domestic fireplace
//! controllers: discovery over UDP broadcast, a per-controller state
//! machine that tracks connectivity and reconciles buffered user intent,
//! and a listener callback surface for observing fleet changes.
//!
//! This crate does not ship a logging backend; it emits records through the
//! `log` facade and leaves initialization to the embedding application.

pub mod config;
pub mod controller;
pub mod datagram;
pub mod discovery;
pub mod error;
pub mod message;

pub use config::Config;
pub use controller::{Controller, ControllerState, DisconnectCause, FanMode, SystemSettings};
pub use discovery::{DiscoveryService, Listener};
pub use error::EsceaError;
