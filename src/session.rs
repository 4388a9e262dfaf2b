// MIT License - Copyright (c) 2026 Peter Wright
// One appliance connection

use std::future::Future;
use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{debug, info};

use crate::config::ChannelConfig;
use crate::error::{Result, SavantError};
use crate::parser::ResponseParser;
use crate::protocol::{is_status_line, strip_telnet_negotiation, LINE_TERMINATOR};
use crate::sequencer::Step;
use crate::state::ChannelState;

/// A line-oriented connection to the appliance, open for one transaction.
///
/// Every line read is handed to the [`ResponseParser`] before correlation,
/// so unsolicited status is never lost. Reply correlation (first line of the
/// expected prefix class) lives entirely in [`ApplianceSession::send`].
pub struct ApplianceSession {
    name: String,
    timeout: Duration,
    reader: BufReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
}

impl ApplianceSession {
    /// Open a connection within the configured timeout.
    pub async fn connect(config: &ChannelConfig) -> Result<Self> {
        let addr = config.address();
        info!("[{}] Connecting to {}", config.name, addr);

        let connecting = TcpStream::connect(addr.clone());
        let stream = open_stream(&config.name, addr, config.timeout, connecting).await?;
        let _ = stream.set_nodelay(true);
        debug!("[{}] TCP socket connected", config.name);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            name: config.name.clone(),
            timeout: config.timeout,
            reader: BufReader::new(reader),
            writer: Some(writer),
        })
    }

    /// Write the step's command and wait for its reply line.
    ///
    /// All lines read meanwhile are applied to `state` through `parser`.
    /// The whole round trip is bounded by the session timeout.
    pub async fn send(
        &mut self,
        step: &Step,
        parser: &ResponseParser,
        state: &RwLock<ChannelState>,
    ) -> Result<String> {
        let command = step.command.to_wire_string();
        let writer = self.writer.as_mut().ok_or(SavantError::SessionClosed)?;

        debug!("[{}] Sending command: {}", self.name, command);
        let deadline = Instant::now() + self.timeout;
        let line = format!("{}{}", command, LINE_TERMINATOR);
        match timeout_at(deadline, writer.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("[{}] Failed to write command: {}", self.name, e);
                return Err(transport_error(e));
            }
            Err(_) => return Err(SavantError::ResponseTimeout { command }),
        }

        loop {
            let line = match timeout_at(deadline, self.read_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    debug!("[{}] Connection closed by appliance", self.name);
                    return Err(SavantError::Disconnected);
                }
                Ok(Err(e)) => {
                    debug!("[{}] Read failed: {}", self.name, e);
                    return Err(transport_error(e));
                }
                Err(_) => {
                    debug!("[{}] Command timeout: {}", self.name, command);
                    return Err(SavantError::ResponseTimeout { command });
                }
            };
            if line.is_empty() {
                continue;
            }

            debug!("[{}] Got response: {}", self.name, line);
            parser.apply(&mut *state.write().await, &line);

            if step.expect.matches(&line) {
                return Ok(line);
            }
            if !is_status_line(&line) {
                debug!("[{}] Skipping non-status output: {}", self.name, line);
            }
        }
    }

    /// Shut the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            debug!("[{}] Closing connection", self.name);
            if let Err(e) = writer.shutdown().await {
                debug!("[{}] Shutdown error ignored: {}", self.name, e);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Next trimmed line, or `None` at end of stream.
    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut raw = Vec::new();
        let n = self.reader.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            return Ok(None);
        }
        let cleaned = strip_telnet_negotiation(&raw);
        Ok(Some(String::from_utf8_lossy(&cleaned).trim().to_string()))
    }
}

/// Await `connecting`, bounded by `limit`.
async fn open_stream<F>(name: &str, addr: String, limit: Duration, connecting: F) -> Result<TcpStream>
where
    F: Future<Output = std::io::Result<TcpStream>>,
{
    match timeout(limit, connecting).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => {
            debug!("[{}] TCP connect failed: {}", name, e);
            Err(SavantError::Connect { addr, source: e })
        }
        Err(_) => {
            debug!("[{}] TCP connect timed out after {:?}", name, limit);
            Err(SavantError::ConnectTimeout { addr })
        }
    }
}

/// A connection torn down under us is a protocol failure, not a local I/O fault.
fn transport_error(e: std::io::Error) -> SavantError {
    match e.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => SavantError::Disconnected,
        _ => SavantError::Io(e),
    }
}
