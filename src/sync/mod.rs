//! Cross-device sync fabric
//!
//! Durable sync events with per-device checkpoints, delta reads for
//! reconnecting devices, an offline change queue with last-writer-wins
//! conflict resolution, and the realtime broker that fans committed events
//! out to a user's other connected devices.
//!
//! Durable state is authoritative; realtime delivery is best-effort and a
//! device that missed pushes reconciles through the delta endpoint.

pub mod broker;
pub mod service;

pub use broker::{Broker, RealtimeMessage};
