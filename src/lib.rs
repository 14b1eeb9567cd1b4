//! Rover Gateway - voice and chat control for a serial-linked robot vehicle
//!
//! This library provides the core functionality for the rover gateway:
//! - Vehicle connection lifecycle over USB serial or Bluetooth (SPP/RFCOMM)
//! - Continuous voice command loop (speech recognition, reply, speech)
//! - Command resolution: local rules first, remote chat assistant second
//! - HTTP control surface for attach, detach and permission events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │      Microphone/Speaker  │  HTTP API  │  CLI        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Rover Gateway                        │
//! │   Voice loop  │  Dispatcher  │  Connection manager  │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼────────────┐
//! │ Chat assistant API  │       │  Vehicle (serial link) │
//! └─────────────────────┘       └────────────────────────┘
//! ```

pub mod api;
pub mod assistant;
pub mod config;
pub mod daemon;
pub mod error;
pub mod vehicle;
pub mod voice;

pub use assistant::{CommandDispatcher, FALLBACK_REPLY, RemoteAssistantClient, RuleTable};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use vehicle::{ConnectionManager, ConnectionState, Device, TransportKind};
pub use voice::VoiceCommandLoop;
