// MIT License - Copyright (c) 2026 Peter Wright
// Status line interpreter

use tracing::debug;

use crate::protocol::OutputMode;
use crate::state::{ChannelState, ConfigMode, Power, Reading, PASSTHRU_MUTE, PASSTHRU_VOLUME};

/// A status line recognised for this channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Power(Power),
    ConfigMode(OutputMode),
    Mute(String),
    Volume(String),
}

/// The recognition rules, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// `switch<ch>.<src>`
    SwitchOn,
    /// `switch<ch>.0`
    SwitchOff,
    /// `aoutput-conf<ch>:processed`
    ConfProcessed,
    /// `aoutput-conf<ch>:passthru`
    ConfPassthru,
    /// `aoutput-mute<ch>:<value>`
    Mute,
    /// `aoutput-vol<ch>:<value>`
    Volume,
}

impl Rule {
    pub const ALL: [Rule; 6] = [
        Rule::SwitchOn,
        Rule::SwitchOff,
        Rule::ConfProcessed,
        Rule::ConfPassthru,
        Rule::Mute,
        Rule::Volume,
    ];
}

/// Turns appliance status lines into [`ChannelState`] changes for one
/// channel/source pair. Lines about other channels are ignored.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    source: u32,
    switch_prefix: String,
    conf_prefix: String,
    mute_prefix: String,
    volume_prefix: String,
}

impl ResponseParser {
    pub fn new(channel: u32, source: u32) -> Self {
        Self {
            source,
            switch_prefix: format!("switch{}.", channel),
            conf_prefix: format!("aoutput-conf{}:", channel),
            mute_prefix: format!("aoutput-mute{}:", channel),
            volume_prefix: format!("aoutput-vol{}:", channel),
        }
    }

    /// Test a single rule against a trimmed line.
    pub fn match_rule(&self, rule: Rule, line: &str) -> Option<StatusUpdate> {
        match rule {
            Rule::SwitchOn => {
                // Source 0 means disconnected; it never reads as "on".
                let id = self.switch_source(line)?;
                (id != 0 && id == self.source).then_some(StatusUpdate::Power(Power::On))
            }
            Rule::SwitchOff => {
                (self.switch_source(line)? == 0).then_some(StatusUpdate::Power(Power::Off))
            }
            Rule::ConfProcessed => line
                .strip_prefix(&self.conf_prefix)?
                .starts_with(OutputMode::Processed.as_str())
                .then_some(StatusUpdate::ConfigMode(OutputMode::Processed)),
            Rule::ConfPassthru => line
                .strip_prefix(&self.conf_prefix)?
                .starts_with(OutputMode::Passthru.as_str())
                .then_some(StatusUpdate::ConfigMode(OutputMode::Passthru)),
            Rule::Mute => line
                .strip_prefix(&self.mute_prefix)
                .map(|v| StatusUpdate::Mute(v.to_string())),
            Rule::Volume => line
                .strip_prefix(&self.volume_prefix)
                .map(|v| StatusUpdate::Volume(v.to_string())),
        }
    }

    /// First matching rule wins.
    pub fn classify(&self, line: &str) -> Option<StatusUpdate> {
        Rule::ALL
            .iter()
            .find_map(|rule| self.match_rule(*rule, line))
    }

    /// Interpret one line and fold it into `state`.
    ///
    /// Returns the recognised update, or `None` for lines that do not
    /// concern this channel (logged, never an error).
    pub fn apply(&self, state: &mut ChannelState, line: &str) -> Option<StatusUpdate> {
        let line = line.trim();
        let Some(update) = self.classify(line) else {
            debug!("Ignoring unmatched line: {}", line);
            return None;
        };

        match &update {
            StatusUpdate::Power(power) => state.power = *power,
            StatusUpdate::ConfigMode(OutputMode::Processed) => {
                state.config_mode.record(ConfigMode::Processed);
            }
            StatusUpdate::ConfigMode(OutputMode::Passthru) => {
                // Appliance side effect of passthru: unmuted, unity gain
                state.config_mode.record(ConfigMode::Passthru);
                state.mute.record(Reading::from(PASSTHRU_MUTE));
                state.volume.record(Reading::from(PASSTHRU_VOLUME));
            }
            StatusUpdate::Mute(value) => state.mute.record(Reading::from(value.as_str())),
            StatusUpdate::Volume(value) => state.volume.record(Reading::from(value.as_str())),
        }
        Some(update)
    }

    /// Source id from `switch<ch>.<digits>`, if the line is about this channel.
    fn switch_source(&self, line: &str) -> Option<u32> {
        let rest = line.strip_prefix(&self.switch_prefix)?;
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse().ok()
    }
}
