// MIT License - Copyright (c) 2026 Peter Wright
// Savant switch line protocol

use std::fmt;

/// Line terminator written after every command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Telnet "interpret as command" escape byte.
const IAC: u8 = 0xFF;
/// First of the WILL/WONT/DO/DONT option verbs; these carry one option byte.
const WILL: u8 = 251;
const DONT: u8 = 254;
/// Subnegotiation begin / end.
const SB: u8 = 250;
const SE: u8 = 240;

/// Output processing mode of a channel as written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Appliance DSP applies volume, mute and EQ
    Processed,
    /// Unity gain, unmuted
    Passthru,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Passthru => "passthru",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands understood by the switch.
///
/// Every command addresses a single output channel. The appliance answers
/// each with a status line of the same family (`switch…` or `aoutput-…`);
/// it also emits unsolicited status lines at any time, and nothing on the
/// wire ties a reply to the command that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `switch-get<ch>` — Query which source feeds the channel.
    /// Reply: `switch<ch>.<src>` (`0` when disconnected).
    SwitchGet { channel: u32 },
    /// `switch-set<ch>.<src>` — Route a source onto the channel.
    SwitchSet { channel: u32, source: u32 },
    /// `switch-set<ch>.disconnect` — Disconnect the channel.
    /// Reply: `switch<ch>.0`.
    SwitchDisconnect { channel: u32 },
    /// `aoutput-conf-get<ch>` — Query output mode.
    /// Reply: `aoutput-conf<ch>:{processed|passthru}`.
    ConfGet { channel: u32 },
    /// `aoutput-conf-set<ch>:<mode>` — Set output mode. Passthru also
    /// unmutes and sets the volume to 0dB on the appliance.
    ConfSet { channel: u32, mode: OutputMode },
    /// `aoutput-mute-get<ch>` — Query mute. Reply: `aoutput-mute<ch>:<value>`.
    MuteGet { channel: u32 },
    /// `aoutput-mute-set<ch>:<value>`
    MuteSet { channel: u32, value: String },
    /// `aoutput-vol-get<ch>` — Query volume. Reply: `aoutput-vol<ch>:<value>`.
    VolumeGet { channel: u32 },
    /// `aoutput-vol-set<ch>:<value>`
    VolumeSet { channel: u32, value: String },
}

impl Command {
    /// Convert the command to its wire string representation.
    pub fn to_wire_string(&self) -> String {
        match self {
            Command::SwitchGet { channel } => format!("switch-get{}", channel),
            Command::SwitchSet { channel, source } => format!("switch-set{}.{}", channel, source),
            Command::SwitchDisconnect { channel } => format!("switch-set{}.disconnect", channel),
            Command::ConfGet { channel } => format!("aoutput-conf-get{}", channel),
            Command::ConfSet { channel, mode } => format!("aoutput-conf-set{}:{}", channel, mode),
            Command::MuteGet { channel } => format!("aoutput-mute-get{}", channel),
            Command::MuteSet { channel, value } => format!("aoutput-mute-set{}:{}", channel, value),
            Command::VolumeGet { channel } => format!("aoutput-vol-get{}", channel),
            Command::VolumeSet { channel, value } => format!("aoutput-vol-set{}:{}", channel, value),
        }
    }

    /// The class of line that counts as this command's reply.
    pub fn expected_response(&self) -> ResponseClass {
        match self {
            Command::SwitchGet { .. }
            | Command::SwitchSet { .. }
            | Command::SwitchDisconnect { .. } => ResponseClass::Switch,
            Command::ConfGet { .. }
            | Command::ConfSet { .. }
            | Command::MuteGet { .. }
            | Command::MuteSet { .. }
            | Command::VolumeGet { .. }
            | Command::VolumeSet { .. } => ResponseClass::AudioOutput,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire_string())
    }
}

/// Prefix class used to correlate a reply with the command just sent.
///
/// The protocol carries no request ids: the first line of the right family
/// after a command is taken as its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// `switch…`
    Switch,
    /// `aoutput-…`
    AudioOutput,
}

impl ResponseClass {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::AudioOutput => "aoutput-",
        }
    }

    /// Whether a trimmed line belongs to this class.
    pub fn matches(&self, line: &str) -> bool {
        line.starts_with(self.prefix())
    }
}

/// Whether a trimmed line is appliance status output at all.
pub fn is_status_line(line: &str) -> bool {
    line.starts_with("switch") || line.starts_with("aoutput-") || line.starts_with("ainput-")
}

/// Remove telnet negotiation sequences from a raw line.
///
/// Option verbs (WILL/WONT/DO/DONT) are three bytes, subnegotiation runs up
/// to `IAC SE`, every other command is two bytes. `IAC IAC` is a literal 0xFF.
pub fn strip_telnet_negotiation(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != IAC {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match raw.get(i + 1).copied() {
            Some(IAC) => {
                out.push(IAC);
                i += 2;
            }
            Some(verb) if (WILL..=DONT).contains(&verb) => i += 3,
            Some(SB) => {
                i += 2;
                while i < raw.len() && !(raw[i] == IAC && raw.get(i + 1) == Some(&SE)) {
                    i += 1;
                }
                i += 2;
            }
            Some(_) => i += 2,
            None => i += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_strings() {
        assert_eq!(Command::SwitchGet { channel: 3 }.to_wire_string(), "switch-get3");
        assert_eq!(
            Command::SwitchSet { channel: 3, source: 5 }.to_wire_string(),
            "switch-set3.5"
        );
        assert_eq!(
            Command::SwitchDisconnect { channel: 3 }.to_wire_string(),
            "switch-set3.disconnect"
        );
        assert_eq!(Command::ConfGet { channel: 12 }.to_wire_string(), "aoutput-conf-get12");
        assert_eq!(
            Command::ConfSet {
                channel: 3,
                mode: OutputMode::Passthru
            }
            .to_wire_string(),
            "aoutput-conf-set3:passthru"
        );
        assert_eq!(
            Command::MuteSet {
                channel: 3,
                value: "off".to_string()
            }
            .to_wire_string(),
            "aoutput-mute-set3:off"
        );
        assert_eq!(
            Command::VolumeSet {
                channel: 3,
                value: "-10dB".to_string()
            }
            .to_wire_string(),
            "aoutput-vol-set3:-10dB"
        );
    }

    #[test]
    fn test_expected_response_class() {
        assert_eq!(
            Command::SwitchDisconnect { channel: 1 }.expected_response(),
            ResponseClass::Switch
        );
        assert_eq!(
            Command::VolumeGet { channel: 1 }.expected_response(),
            ResponseClass::AudioOutput
        );
        assert!(ResponseClass::Switch.matches("switch3.0"));
        assert!(!ResponseClass::Switch.matches("aoutput-vol3:0dB"));
        assert!(ResponseClass::AudioOutput.matches("aoutput-mute3:on"));
        assert!(!ResponseClass::AudioOutput.matches("ainput-gain1:0dB"));
    }

    #[test]
    fn test_is_status_line() {
        assert!(is_status_line("switch3.5"));
        assert!(is_status_line("ainput-gain2:0dB"));
        assert!(!is_status_line("Welcome"));
    }

    #[test]
    fn test_strip_telnet_negotiation() {
        let raw = [IAC, 251, 1, b's', b'w', IAC, 253, 3, b'i', IAC, IAC];
        assert_eq!(strip_telnet_negotiation(&raw), b"swi\xFF".to_vec());

        let sub = [IAC, SB, 24, 1, IAC, SE, b'o', b'k'];
        assert_eq!(strip_telnet_negotiation(&sub), b"ok".to_vec());

        assert_eq!(strip_telnet_negotiation(b"switch3.0\r\n"), b"switch3.0\r\n".to_vec());
    }
}
