// MIT License - Copyright (c) 2026 Peter Wright
//
//! # savant-audio-bridge
//!
//! On/off control of individual output channels of a Savant audio switch
//! over its telnet line protocol.
//!
//! Each [`ChannelController`] switches one configured source onto one output
//! channel. With `fixed` set, powering on forces the channel's output stage
//! to passthru (unity gain, unmuted) after reading the current processed
//! settings, and powering off restores them.
//!
//! The appliance takes one session at a time, so all controllers in a
//! process serialize through a shared [`ConnectionGate`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use savant_audio_bridge::{ChannelConfig, ChannelController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kitchen = ChannelController::new(
//!         ChannelConfig::builder()
//!             .name("Kitchen")
//!             .host("192.168.1.50")
//!             .channel(3)
//!             .source(5)
//!             .fixed(true)
//!             .build(),
//!     )?;
//!
//!     kitchen.set_power(true).await?;
//!     println!("Kitchen on: {}", kitchen.query_power().await?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod gate;
pub mod parser;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod state;

// Re-exports for convenience
pub use config::{ChannelConfig, ChannelConfigBuilder, CompletionPolicy};
pub use controller::ChannelController;
pub use error::{Result, SavantError};
pub use event::{ChannelEvent, EventReceiver};
pub use gate::{ConnectionGate, GateGuard};
pub use parser::{ResponseParser, StatusUpdate};
pub use protocol::{Command, OutputMode, ResponseClass};
pub use sequencer::Step;
pub use state::{ChannelState, ConfigMode, Power, Reading};
