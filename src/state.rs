// MIT License - Copyright (c) 2026 Peter Wright
// Modelled channel state

use std::fmt;

use crate::protocol::OutputMode;

/// Whether the configured source is routed onto the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Power {
    On,
    Off,
    #[default]
    Unknown,
}

impl Power {
    pub fn is_on(&self) -> bool {
        matches!(self, Power::On)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Power::On => "ON",
            Power::Off => "OFF",
            Power::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output processing mode as last reported by the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigMode {
    Processed,
    Passthru,
    #[default]
    Unknown,
}

impl From<OutputMode> for ConfigMode {
    fn from(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Processed => ConfigMode::Processed,
            OutputMode::Passthru => ConfigMode::Passthru,
        }
    }
}

/// An appliance-formatted value (mute `on`/`off`, volume `-10dB`, ...).
///
/// Values are kept verbatim so they can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reading {
    Value(String),
    #[default]
    Unknown,
}

impl Reading {
    pub fn value(&self) -> Option<&str> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Unknown => None,
        }
    }
}

impl From<&str> for Reading {
    fn from(v: &str) -> Self {
        Reading::Value(v.to_string())
    }
}

/// A value together with the one it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracked<T> {
    pub current: T,
    pub previous: T,
}

impl<T> Tracked<T> {
    /// Move `current` into `previous` and store `value`.
    pub fn record(&mut self, value: T) {
        self.previous = std::mem::replace(&mut self.current, value);
    }
}

/// Everything known about one channel, starting out all `Unknown`.
///
/// The `previous` halves hold what the appliance reported just before the
/// latest change, which is what a fixed-config power off restores.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub power: Power,
    pub config_mode: Tracked<ConfigMode>,
    pub mute: Tracked<Reading>,
    pub volume: Tracked<Reading>,
}

/// Mute value the appliance forces when entering passthru.
pub const PASSTHRU_MUTE: &str = "off";
/// Volume value the appliance forces when entering passthru.
pub const PASSTHRU_VOLUME: &str = "0dB";
