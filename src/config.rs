// MIT License - Copyright (c) 2026 Peter Wright
// Channel configuration

use std::time::Duration;

use crate::error::{Result, SavantError};

/// What a controller reports to its caller when a transaction fails.
///
/// The gate is released and the failure logged under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Always complete: failures are logged and the operation returns `Ok`
    /// with whatever state is known. Automation hosts that expect their
    /// completion callback to fire unconditionally rely on this.
    #[default]
    BestEffort,
    /// Return the transaction error to the caller.
    Strict,
}

/// Configuration for one channel of a Savant audio switch.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Display name, used in logs and by the MQTT bridge
    pub name: String,
    /// Appliance host name or IP address
    pub host: String,
    /// Appliance control port (telnet, default: 23)
    pub port: u16,
    /// Output channel this controller switches (the `to` id)
    pub channel: u32,
    /// Input source routed onto the channel when powered on (the `from` id)
    pub source: u32,
    /// Force passthru while on and restore the processed settings on power off
    pub fixed: bool,
    /// Bound on connect and on each command/response round trip
    pub timeout: Duration,
    /// Failure reporting policy
    pub completion: CompletionPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "Savant".to_string(),
            host: "192.168.1.100".to_string(),
            port: 23,
            channel: 1,
            source: 1,
            fixed: false,
            timeout: Duration::from_millis(5000),
            completion: CompletionPolicy::BestEffort,
        }
    }
}

impl ChannelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// `host:port` as passed to the socket layer.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Presence checks only; the appliance is the authority on ids.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SavantError::InvalidConfig {
                details: format!("[{}] host is empty", self.name),
            });
        }
        if self.port == 0 {
            return Err(SavantError::InvalidConfig {
                details: format!("[{}] port is 0", self.name),
            });
        }
        if self.source == 0 {
            return Err(SavantError::InvalidConfig {
                details: format!("[{}] source is 0, which is the disconnected id", self.name),
            });
        }
        if self.timeout.is_zero() {
            return Err(SavantError::InvalidConfig {
                details: format!("[{}] timeout is 0", self.name),
            });
        }
        Ok(())
    }
}

/// Builder for ChannelConfig.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfigBuilder {
    config: ChannelConfig,
}

impl ChannelConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn channel(mut self, channel: u32) -> Self {
        self.config.channel = channel;
        self
    }

    pub fn source(mut self, source: u32) -> Self {
        self.config.source = source;
        self
    }

    pub fn fixed(mut self, fixed: bool) -> Self {
        self.config.fixed = fixed;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout = Duration::from_millis(ms);
        self
    }

    pub fn completion(mut self, policy: CompletionPolicy) -> Self {
        self.config.completion = policy;
        self
    }

    pub fn build(self) -> ChannelConfig {
        self.config
    }
}
