// MIT License - Copyright (c) 2026 Peter Wright
// Transaction command sequences

use tracing::warn;

use crate::config::ChannelConfig;
use crate::protocol::{Command, OutputMode, ResponseClass};
use crate::state::{ChannelState, ConfigMode};

/// One command of a transaction and the reply class that completes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub command: Command,
    pub expect: ResponseClass,
}

impl Step {
    pub fn new(command: Command) -> Self {
        let expect = command.expected_response();
        Self { command, expect }
    }
}

/// Query the channel's current routing.
pub fn query(config: &ChannelConfig) -> Vec<Step> {
    vec![Step::new(Command::SwitchGet {
        channel: config.channel,
    })]
}

/// Build the ordered steps that move the channel to `target_on`.
///
/// `state` must be the state as it stood before this transaction.
pub fn build(config: &ChannelConfig, state: &ChannelState, target_on: bool) -> Vec<Step> {
    if target_on {
        power_on(config)
    } else {
        power_off(config, state)
    }
}

/// With a fixed config, the current mode, mute and volume are read first so
/// the replies leave them in the `previous` slots once passthru is forced.
fn power_on(config: &ChannelConfig) -> Vec<Step> {
    let channel = config.channel;
    let mut steps = Vec::with_capacity(5);
    if config.fixed {
        steps.push(Step::new(Command::ConfGet { channel }));
        steps.push(Step::new(Command::MuteGet { channel }));
        steps.push(Step::new(Command::VolumeGet { channel }));
        steps.push(Step::new(Command::ConfSet {
            channel,
            mode: OutputMode::Passthru,
        }));
    }
    steps.push(Step::new(Command::SwitchSet {
        channel,
        source: config.source,
    }));
    steps
}

/// Restores the saved processed settings only if passthru replaced them.
fn power_off(config: &ChannelConfig, state: &ChannelState) -> Vec<Step> {
    let channel = config.channel;
    let mut steps = vec![Step::new(Command::SwitchDisconnect { channel })];

    if !config.fixed || state.config_mode.previous != ConfigMode::Processed {
        return steps;
    }

    steps.push(Step::new(Command::ConfSet {
        channel,
        mode: OutputMode::Processed,
    }));
    match state.mute.previous.value() {
        Some(value) => steps.push(Step::new(Command::MuteSet {
            channel,
            value: value.to_string(),
        })),
        None => warn!("[{}] No saved mute value, not restoring mute", config.name),
    }
    match state.volume.previous.value() {
        Some(value) => steps.push(Step::new(Command::VolumeSet {
            channel,
            value: value.to_string(),
        })),
        None => warn!("[{}] No saved volume value, not restoring volume", config.name),
    }
    steps
}
