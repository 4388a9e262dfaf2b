// MIT License - Copyright (c) 2026 Peter Wright
// Channel controller

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::{ChannelConfig, CompletionPolicy};
use crate::error::Result;
use crate::event::{event_channel, ChannelEvent, EventReceiver, EventSender};
use crate::gate::ConnectionGate;
use crate::parser::ResponseParser;
use crate::sequencer::{self, Step};
use crate::session::ApplianceSession;
use crate::state::ChannelState;

/// On/off control of one appliance channel.
///
/// Each operation is one transaction: acquire the gate, connect, run the
/// command sequence (stopping at the first failure), close, release. Nothing
/// is rolled back when a sequence stops partway, and nothing is retried.
///
/// # Example
///
/// ```no_run
/// use savant_audio_bridge::{ChannelConfig, ChannelController};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ChannelConfig::builder()
///         .name("Patio")
///         .host("192.168.1.50")
///         .port(8085)
///         .channel(3)
///         .source(5)
///         .fixed(true)
///         .build();
///
///     let controller = ChannelController::new(config)?;
///     if !controller.query_power().await? {
///         controller.set_power(true).await?;
///     }
///     Ok(())
/// }
/// ```
pub struct ChannelController {
    config: ChannelConfig,
    parser: ResponseParser,
    state: RwLock<ChannelState>,
    gate: ConnectionGate,
    event_tx: EventSender,
}

impl ChannelController {
    /// Create a controller sharing the process-wide gate.
    pub fn new(config: ChannelConfig) -> Result<Self> {
        Self::with_gate(config, ConnectionGate::global())
    }

    /// Create a controller on an explicit gate.
    pub fn with_gate(config: ChannelConfig, gate: ConnectionGate) -> Result<Self> {
        config.validate()?;
        let (event_tx, _event_rx) = event_channel(64);
        Ok(Self {
            parser: ResponseParser::new(config.channel, config.source),
            config,
            state: RwLock::new(ChannelState::default()),
            gate,
            event_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConnectionGate {
        &self.gate
    }

    /// Subscribe to this channel's events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Snapshot of the modelled channel state.
    pub async fn state(&self) -> ChannelState {
        self.state.read().await.clone()
    }

    /// Ask the appliance whether our source is routed onto the channel.
    ///
    /// Under [`CompletionPolicy::BestEffort`] a failed query still returns
    /// `Ok` with the last known power (`false` when unknown).
    pub async fn query_power(&self) -> Result<bool> {
        let operation = "query power";
        let outcome = self
            .transact(operation, |_| sequencer::query(&self.config))
            .await;
        let on = self.state.read().await.power.is_on();
        self.complete(operation, outcome).map(|()| on)
    }

    /// Switch the channel on or off, saving and restoring the output
    /// configuration when the channel is configured as fixed.
    ///
    /// Under [`CompletionPolicy::BestEffort`] this returns `Ok` even when the
    /// transaction failed; the caller should re-query if it cares.
    pub async fn set_power(&self, on: bool) -> Result<()> {
        let operation = if on { "power on" } else { "power off" };
        let outcome = self
            .transact(operation, |state| sequencer::build(&self.config, state, on))
            .await;
        self.complete(operation, outcome)
    }

    /// Run one transaction under the gate. The steps are built from the
    /// state as it stands once the gate is held.
    async fn transact<F>(&self, operation: &'static str, build: F) -> Result<()>
    where
        F: FnOnce(&ChannelState) -> Vec<Step>,
    {
        let _guard = self.gate.acquire().await;

        let before = self.state.read().await.clone();
        let steps = build(&before);
        debug!(
            "[{}] {}: {} command(s)",
            self.config.name,
            operation,
            steps.len()
        );

        let result = self.execute(&steps).await;

        let power = self.state.read().await.power;
        if power != before.power {
            info!("[{}] Power {} -> {}", self.config.name, before.power, power);
            let _ = self.event_tx.send(ChannelEvent::PowerChanged {
                channel: self.config.name.clone(),
                power,
            });
        }
        result
    }

    async fn execute(&self, steps: &[Step]) -> Result<()> {
        let mut session = ApplianceSession::connect(&self.config).await?;

        let mut result = Ok(());
        for step in steps {
            if let Err(e) = session.send(step, &self.parser, &self.state).await {
                result = Err(e);
                break;
            }
        }

        session.close().await;
        result
    }

    /// Log a failed transaction and apply the completion policy.
    fn complete(&self, operation: &'static str, outcome: Result<()>) -> Result<()> {
        let Err(e) = outcome else {
            debug!("[{}] {} complete", self.config.name, operation);
            return Ok(());
        };

        if e.is_unreachable() {
            error!("[{}] {} failed, appliance unreachable: {}", self.config.name, operation, e);
        } else {
            error!("[{}] {} failed: {}", self.config.name, operation, e);
        }
        let _ = self.event_tx.send(ChannelEvent::TransactionFailed {
            channel: self.config.name.clone(),
            operation,
            error: e.to_string(),
        });

        match self.config.completion {
            CompletionPolicy::BestEffort => Ok(()),
            CompletionPolicy::Strict => Err(e),
        }
    }
}
