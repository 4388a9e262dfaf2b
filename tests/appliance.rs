// Controller tests against a simulated Savant switch
//
// The simulator listens on a loopback port, answers the switch/aoutput
// command set the way the appliance does (including the passthru side
// effects), and records every command it receives per connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use savant_audio_bridge::{
    ChannelConfig, ChannelController, ChannelEvent, CompletionPolicy, ConfigMode, ConnectionGate,
    Power, SavantError,
};

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    /// Commands the appliance never answers
    silent: Vec<String>,
    /// Commands on which the appliance drops the connection
    drop_on: Vec<String>,
    /// Commands on which the appliance resets the connection
    reset_on: Vec<String>,
    /// Unsolicited lines sent ahead of every reply
    preamble: Vec<String>,
}

#[derive(Default)]
struct SimState {
    route: HashMap<u32, u32>,
    conf: HashMap<u32, String>,
    mute: HashMap<u32, String>,
    vol: HashMap<u32, String>,
}

fn split_channel(rest: &str, sep: char) -> Option<(u32, &str)> {
    let (ch, arg) = rest.split_once(sep)?;
    Some((ch.parse().ok()?, arg))
}

impl SimState {
    fn route(&self, ch: u32) -> u32 {
        self.route.get(&ch).copied().unwrap_or(0)
    }

    fn conf(&self, ch: u32) -> String {
        self.conf.get(&ch).cloned().unwrap_or_else(|| "processed".to_string())
    }

    fn mute(&self, ch: u32) -> String {
        self.mute.get(&ch).cloned().unwrap_or_else(|| "off".to_string())
    }

    fn vol(&self, ch: u32) -> String {
        self.vol.get(&ch).cloned().unwrap_or_else(|| "-10dB".to_string())
    }

    fn execute(&mut self, cmd: &str) -> Option<String> {
        if let Some(rest) = cmd.strip_prefix("switch-get") {
            let ch: u32 = rest.parse().ok()?;
            return Some(format!("switch{}.{}", ch, self.route(ch)));
        }
        if let Some(rest) = cmd.strip_prefix("switch-set") {
            let (ch, arg) = split_channel(rest, '.')?;
            let src = if arg == "disconnect" { 0 } else { arg.parse().ok()? };
            self.route.insert(ch, src);
            return Some(format!("switch{}.{}", ch, src));
        }
        if let Some(rest) = cmd.strip_prefix("aoutput-conf-get") {
            let ch: u32 = rest.parse().ok()?;
            return Some(format!("aoutput-conf{}:{}", ch, self.conf(ch)));
        }
        if let Some(rest) = cmd.strip_prefix("aoutput-conf-set") {
            let (ch, mode) = split_channel(rest, ':')?;
            if mode == "passthru" {
                self.mute.insert(ch, "off".to_string());
                self.vol.insert(ch, "0dB".to_string());
            }
            self.conf.insert(ch, mode.to_string());
            return Some(format!("aoutput-conf{}:{}", ch, mode));
        }
        if let Some(rest) = cmd.strip_prefix("aoutput-mute-get") {
            let ch: u32 = rest.parse().ok()?;
            return Some(format!("aoutput-mute{}:{}", ch, self.mute(ch)));
        }
        if let Some(rest) = cmd.strip_prefix("aoutput-mute-set") {
            let (ch, value) = split_channel(rest, ':')?;
            self.mute.insert(ch, value.to_string());
            return Some(format!("aoutput-mute{}:{}", ch, value));
        }
        if let Some(rest) = cmd.strip_prefix("aoutput-vol-get") {
            let ch: u32 = rest.parse().ok()?;
            return Some(format!("aoutput-vol{}:{}", ch, self.vol(ch)));
        }
        if let Some(rest) = cmd.strip_prefix("aoutput-vol-set") {
            let (ch, value) = split_channel(rest, ':')?;
            self.vol.insert(ch, value.to_string());
            return Some(format!("aoutput-vol{}:{}", ch, value));
        }
        None
    }
}

type CommandLog = Arc<Mutex<Vec<(usize, String)>>>;

struct Appliance {
    port: u16,
    log: CommandLog,
    state: Arc<Mutex<SimState>>,
}

impl Appliance {
    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(SimState::default()));
        let script = Arc::new(script);

        let (log_srv, state_srv) = (log.clone(), state.clone());
        tokio::spawn(async move {
            let mut conn_id = 0;
            while let Ok((sock, _)) = listener.accept().await {
                conn_id += 1;
                tokio::spawn(serve(
                    sock,
                    conn_id,
                    log_srv.clone(),
                    state_srv.clone(),
                    script.clone(),
                ));
            }
        });

        Self { port, log, state }
    }

    fn config(&self, channel: u32, source: u32, fixed: bool) -> ChannelConfig {
        ChannelConfig::builder()
            .name(format!("Channel {channel}"))
            .host("127.0.0.1")
            .port(self.port)
            .channel(channel)
            .source(source)
            .fixed(fixed)
            .timeout_ms(400)
            .build()
    }

    /// Commands received since the last call.
    fn take_commands(&self) -> Vec<String> {
        self.log.lock().unwrap().drain(..).map(|(_, c)| c).collect()
    }

    fn connection_log(&self) -> Vec<(usize, String)> {
        self.log.lock().unwrap().clone()
    }
}

async fn serve(
    sock: TcpStream,
    conn_id: usize,
    log: CommandLog,
    state: Arc<Mutex<SimState>>,
    script: Arc<Script>,
) {
    let (reader, mut writer) = sock.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let cmd = line.trim().to_string();
        if cmd.is_empty() {
            continue;
        }
        log.lock().unwrap().push((conn_id, cmd.clone()));
        if script.drop_on.contains(&cmd) {
            return;
        }
        if script.reset_on.contains(&cmd) {
            // Zero linger turns the close into an RST
            if let Ok(sock) = lines.into_inner().into_inner().reunite(writer) {
                #[allow(deprecated)]
                let _ = sock.set_linger(Some(Duration::ZERO));
            }
            return;
        }
        if script.silent.contains(&cmd) {
            continue;
        }

        let reply = state.lock().unwrap().execute(&cmd);
        let mut out = String::new();
        for l in &script.preamble {
            out.push_str(l);
            out.push_str("\r\n");
        }
        if let Some(r) = reply {
            out.push_str(&r);
            out.push_str("\r\n");
        }
        if writer.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn controller(config: ChannelConfig) -> (ChannelController, ConnectionGate) {
    let gate = ConnectionGate::new();
    let controller = ChannelController::with_gate(config, gate.clone()).unwrap();
    (controller, gate)
}

fn assert_gate_idle(gate: &ConnectionGate, transactions: u64) {
    assert!(!gate.is_held());
    assert_eq!(gate.acquisitions(), transactions);
    assert_eq!(gate.releases(), transactions);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fixed_channel_save_and_restore() {
    let appliance = Appliance::start(Script::default()).await;
    let (ctl, gate) = controller(appliance.config(3, 5, true));
    let mut events = ctl.subscribe();

    assert!(!ctl.query_power().await.unwrap());
    assert_eq!(appliance.take_commands(), vec!["switch-get3"]);
    assert_eq!(ctl.state().await.power, Power::Off);

    ctl.set_power(true).await.unwrap();
    assert_eq!(
        appliance.take_commands(),
        vec![
            "aoutput-conf-get3",
            "aoutput-mute-get3",
            "aoutput-vol-get3",
            "aoutput-conf-set3:passthru",
            "switch-set3.5",
        ]
    );
    let state = ctl.state().await;
    assert_eq!(state.power, Power::On);
    assert_eq!(state.config_mode.current, ConfigMode::Passthru);
    assert_eq!(state.config_mode.previous, ConfigMode::Processed);
    assert_eq!(state.mute.previous.value(), Some("off"));
    assert_eq!(state.volume.previous.value(), Some("-10dB"));
    assert_eq!(state.volume.current.value(), Some("0dB"));

    ctl.set_power(false).await.unwrap();
    assert_eq!(
        appliance.take_commands(),
        vec![
            "switch-set3.disconnect",
            "aoutput-conf-set3:processed",
            "aoutput-mute-set3:off",
            "aoutput-vol-set3:-10dB",
        ]
    );
    assert_eq!(ctl.state().await.power, Power::Off);
    {
        let sim = appliance.state.lock().unwrap();
        assert_eq!(sim.conf(3), "processed");
        assert_eq!(sim.vol(3), "-10dB");
        assert_eq!(sim.route(3), 0);
    }

    assert_gate_idle(&gate, 3);

    // Off (from query), On, Off
    let mut powers = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChannelEvent::PowerChanged { power, .. } = event {
            powers.push(power);
        }
    }
    assert_eq!(powers, vec![Power::Off, Power::On, Power::Off]);
}

#[tokio::test]
async fn test_unfixed_channel_single_commands() {
    let appliance = Appliance::start(Script::default()).await;
    let (ctl, gate) = controller(appliance.config(2, 7, false));

    ctl.set_power(true).await.unwrap();
    assert_eq!(appliance.take_commands(), vec!["switch-set2.7"]);
    assert!(ctl.query_power().await.unwrap());
    appliance.take_commands();

    ctl.set_power(false).await.unwrap();
    assert_eq!(appliance.take_commands(), vec!["switch-set2.disconnect"]);
    assert!(!ctl.query_power().await.unwrap());

    assert_gate_idle(&gate, 4);
}

#[tokio::test]
async fn test_fixed_channel_already_passthru_skips_restore() {
    let appliance = Appliance::start(Script::default()).await;
    appliance
        .state
        .lock()
        .unwrap()
        .conf
        .insert(4, "passthru".to_string());
    let (ctl, _gate) = controller(appliance.config(4, 1, true));

    ctl.set_power(true).await.unwrap();
    assert_eq!(appliance.take_commands().len(), 5);
    assert_eq!(ctl.state().await.config_mode.previous, ConfigMode::Passthru);

    ctl.set_power(false).await.unwrap();
    assert_eq!(appliance.take_commands(), vec!["switch-set4.disconnect"]);
}

#[tokio::test]
async fn test_unsolicited_status_is_applied() {
    let appliance = Appliance::start(Script {
        preamble: vec![
            "aoutput-vol3:-30dB".to_string(),
            "ainput-gain5:0dB".to_string(),
            "aoutput-mute9:on".to_string(),
        ],
        ..Script::default()
    })
    .await;
    let (ctl, _gate) = controller(appliance.config(3, 5, false));

    assert!(!ctl.query_power().await.unwrap());
    let state = ctl.state().await;
    assert_eq!(state.power, Power::Off);
    assert_eq!(state.volume.current.value(), Some("-30dB"));
    assert_eq!(state.mute.current.value(), None);
}

#[tokio::test]
async fn test_response_timeout_aborts_remaining_commands() {
    let appliance = Appliance::start(Script {
        silent: vec!["aoutput-vol-get3".to_string()],
        ..Script::default()
    })
    .await;
    let (ctl, gate) = controller(appliance.config(3, 5, true));
    let mut events = ctl.subscribe();

    // Best effort: the caller still gets a completion
    ctl.set_power(true).await.unwrap();
    assert_eq!(
        appliance.take_commands(),
        vec!["aoutput-conf-get3", "aoutput-mute-get3", "aoutput-vol-get3"]
    );
    assert_eq!(ctl.state().await.power, Power::Unknown);
    assert!(matches!(
        events.try_recv(),
        Ok(ChannelEvent::TransactionFailed { operation: "power on", .. })
    ));
    assert_gate_idle(&gate, 1);

    // No deadlock: the next transaction runs
    assert!(!ctl.query_power().await.unwrap());
    assert_gate_idle(&gate, 2);
}

#[tokio::test]
async fn test_connection_drop_surfaces_under_strict_policy() {
    let appliance = Appliance::start(Script {
        drop_on: vec!["switch-set3.disconnect".to_string()],
        ..Script::default()
    })
    .await;
    let mut config = appliance.config(3, 5, true);
    config.completion = CompletionPolicy::Strict;
    let (ctl, gate) = controller(config);

    ctl.set_power(true).await.unwrap();
    let err = ctl.set_power(false).await.unwrap_err();
    assert!(matches!(err, SavantError::Disconnected));
    assert_gate_idle(&gate, 2);

    // Partially transitioned: nothing after the failed command was sent
    let commands = appliance.take_commands();
    assert_eq!(commands.last().map(String::as_str), Some("switch-set3.disconnect"));
}

#[tokio::test]
async fn test_connection_reset_is_a_disconnect() {
    let appliance = Appliance::start(Script {
        reset_on: vec!["switch-get3".to_string()],
        ..Script::default()
    })
    .await;
    let mut config = appliance.config(3, 5, false);
    config.completion = CompletionPolicy::Strict;
    let (ctl, gate) = controller(config);

    let err = ctl.query_power().await.unwrap_err();
    assert!(matches!(err, SavantError::Disconnected), "{err:?}");
    assert_gate_idle(&gate, 1);
}

#[tokio::test]
async fn test_strict_timeout_error() {
    let appliance = Appliance::start(Script {
        silent: vec!["switch-get3".to_string()],
        ..Script::default()
    })
    .await;
    let mut config = appliance.config(3, 5, false);
    config.completion = CompletionPolicy::Strict;
    let (ctl, gate) = controller(config);

    let err = ctl.query_power().await.unwrap_err();
    assert!(matches!(err, SavantError::ResponseTimeout { ref command } if command == "switch-get3"));
    assert_gate_idle(&gate, 1);
}

#[tokio::test]
async fn test_channels_sharing_a_gate_never_interleave() {
    let appliance = Appliance::start(Script::default()).await;
    let gate = ConnectionGate::new();
    let a = ChannelController::with_gate(appliance.config(1, 1, true), gate.clone()).unwrap();
    let b = ChannelController::with_gate(appliance.config(2, 2, true), gate.clone()).unwrap();

    let (ra, rb, rc, rd) = tokio::join!(
        a.set_power(true),
        b.set_power(true),
        a.query_power(),
        b.set_power(false),
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();
    rd.unwrap();
    assert_gate_idle(&gate, 4);

    // Each connection's commands form one contiguous block
    let log = appliance.connection_log();
    let mut finished = Vec::new();
    let mut current = None;
    for (conn, _) in &log {
        if current != Some(*conn) {
            assert!(!finished.contains(conn), "connection {conn} resumed after another");
            if let Some(prev) = current {
                finished.push(prev);
            }
            current = Some(*conn);
        }
    }
    assert_eq!(finished.len() + 1, 4);
}
