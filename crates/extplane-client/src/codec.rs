//! ExtPlane command rendering and inbound line decoding.
//!
//! The ExtPlane protocol uses newline-terminated ASCII lines over TCP
//! (default port 51000). Commands flow from client to host; the greeting,
//! warnings and dataref updates flow from host to client.
//!
//! # Line formats
//!
//! ```text
//! Subscribe:     sub <dataref> [<accuracy>]
//! Unsubscribe:   unsub <dataref>
//! Set:           set <dataref> <value> [<value> ...]
//! Set (array):   set <dataref> [<v1>,<v2>,...]
//! Setting:       extplane-set update_interval <seconds>
//! Command:       cmd once|begin|end <command>
//! Key/button:    key <id> | but <id> | rel <id>
//! Disconnect:    disconnect
//!
//! Greeting:      EXTPLANE <version>
//! Update:        u<tag> <dataref> <value>          (tag: i f d ia fa b)
//! Update:        <dataref> <type> <value> [...]    (type: int float ...)
//! ```
//!
//! All encoding/decoding in this module is pure -- no I/O is performed.

use std::fmt;
use std::time::Duration;

use extplane_core::{DataType, Error, Result};

/// Default ExtPlane plugin TCP port.
pub const DEFAULT_PORT: u16 = 51000;

/// Greeting keyword sent by the host when a client connects.
const GREETING: &str = "EXTPLANE";

/// Version line sent by newer plugin builds after the greeting.
const VERSION_PREFIX: &str = "EXTPLANE-VERSION";

/// Warning line prefix (e.g. unknown dataref on subscribe).
const WARNING_PREFIX: &str = "EXTPLANE-WARNING";

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A runtime setting of the ExtPlane plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeSetting {
    /// Minimum interval between two updates for the same dataref.
    UpdateInterval(Duration),
}

impl RuntimeSetting {
    fn key(&self) -> &'static str {
        match self {
            RuntimeSetting::UpdateInterval(_) => "update_interval",
        }
    }

    fn value(&self) -> String {
        match self {
            RuntimeSetting::UpdateInterval(d) => format!("{}", d.as_secs_f64()),
        }
    }
}

/// Family a command belongs to. Lets tests and logs tell commands apart
/// without re-parsing the rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandFamily {
    Subscribe,
    Unsubscribe,
    Set,
    RuntimeSetting,
    /// Simulator commands (`cmd once|begin|end`).
    SimCommand,
    /// Key presses and joystick button press/release.
    Input,
    /// Session control (`disconnect`).
    Session,
}

/// Every command the client can send to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask the host to push updates for a dataref. `accuracy` is the
    /// minimum change that triggers a new update.
    Subscribe { name: String, accuracy: Option<f32> },
    /// Stop updates for a dataref.
    Unsubscribe { name: String },
    /// Write one or more space-separated values.
    Set { name: String, values: Vec<String> },
    /// Write an array dataref using bracket notation.
    SetArray { name: String, values: Vec<String> },
    /// Change a plugin runtime setting.
    RuntimeSetting(RuntimeSetting),
    /// Trigger a simulator command once (begin immediately followed by end).
    Once { name: String },
    /// Start holding a simulator command. Must be paired with [`Command::End`].
    Begin { name: String },
    /// Release a simulator command previously started with [`Command::Begin`].
    End { name: String },
    /// Simulate a key press by key id.
    Key { id: u32 },
    /// Press a joystick button by id.
    ButtonPress { id: u32 },
    /// Release a joystick button by id.
    ButtonRelease { id: u32 },
    /// Ask the host to close the connection.
    Disconnect,
}

impl Command {
    pub fn subscribe(name: impl Into<String>) -> Self {
        Command::Subscribe {
            name: name.into(),
            accuracy: None,
        }
    }

    pub fn subscribe_with_accuracy(name: impl Into<String>, accuracy: f32) -> Self {
        Command::Subscribe {
            name: name.into(),
            accuracy: Some(accuracy),
        }
    }

    pub fn unsubscribe(name: impl Into<String>) -> Self {
        Command::Unsubscribe { name: name.into() }
    }

    pub fn set<S: AsRef<str>>(name: impl Into<String>, values: &[S]) -> Self {
        Command::Set {
            name: name.into(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        }
    }

    pub fn set_array<S: AsRef<str>>(name: impl Into<String>, values: &[S]) -> Self {
        Command::SetArray {
            name: name.into(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        }
    }

    pub fn once(name: impl Into<String>) -> Self {
        Command::Once { name: name.into() }
    }

    pub fn begin(name: impl Into<String>) -> Self {
        Command::Begin { name: name.into() }
    }

    pub fn end(name: impl Into<String>) -> Self {
        Command::End { name: name.into() }
    }

    /// The family this command belongs to.
    pub fn family(&self) -> CommandFamily {
        match self {
            Command::Subscribe { .. } => CommandFamily::Subscribe,
            Command::Unsubscribe { .. } => CommandFamily::Unsubscribe,
            Command::Set { .. } | Command::SetArray { .. } => CommandFamily::Set,
            Command::RuntimeSetting(_) => CommandFamily::RuntimeSetting,
            Command::Once { .. } | Command::Begin { .. } | Command::End { .. } => {
                CommandFamily::SimCommand
            }
            Command::Key { .. } | Command::ButtonPress { .. } | Command::ButtonRelease { .. } => {
                CommandFamily::Input
            }
            Command::Disconnect => CommandFamily::Session,
        }
    }

    /// Render the wire-line for this command, without the line terminator.
    pub fn render(&self) -> String {
        render(self)
    }
}

/// A rendered command ready for the outbound queue.
///
/// Immutable once built; consumed exactly once by the send loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    family: CommandFamily,
    line: String,
}

impl OutboundCommand {
    pub fn new(command: &Command) -> Self {
        OutboundCommand {
            family: command.family(),
            line: render(command),
        }
    }

    pub fn family(&self) -> CommandFamily {
        self.family
    }

    /// The wire-line without terminator.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The bytes written to the socket, terminator included.
    pub fn to_wire(&self) -> Vec<u8> {
        encode_line(&self.line)
    }
}

impl From<Command> for OutboundCommand {
    fn from(command: Command) -> Self {
        OutboundCommand::new(&command)
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}

// ---------------------------------------------------------------------------
// Command rendering
// ---------------------------------------------------------------------------

/// Render a command into the exact line the host expects.
///
/// Example: `render(&Command::subscribe_with_accuracy("sim/x", 0.01))` is
/// `"sub sim/x 0.01"`.
pub fn render(command: &Command) -> String {
    match command {
        Command::Subscribe {
            name,
            accuracy: Some(acc),
        } => format!("sub {name} {acc}"),
        Command::Subscribe {
            name,
            accuracy: None,
        } => format!("sub {name}"),
        Command::Unsubscribe { name } => format!("unsub {name}"),
        Command::Set { name, values } => format!("set {} {}", name, values.join(" ")),
        Command::SetArray { name, values } => format!("set {} [{}]", name, values.join(",")),
        Command::RuntimeSetting(setting) => {
            format!("extplane-set {} {}", setting.key(), setting.value())
        }
        Command::Once { name } => format!("cmd once {name}"),
        Command::Begin { name } => format!("cmd begin {name}"),
        Command::End { name } => format!("cmd end {name}"),
        Command::Key { id } => format!("key {id}"),
        Command::ButtonPress { id } => format!("but {id}"),
        Command::ButtonRelease { id } => format!("rel {id}"),
        Command::Disconnect => "disconnect".to_string(),
    }
}

/// Append the line terminator.
pub fn encode_line(line: &str) -> Vec<u8> {
    format!("{line}\n").into_bytes()
}

/// Check that a command can be put on the wire unambiguously.
///
/// Names and values must be non-empty and must not contain whitespace
/// or control characters, otherwise the host would split them into
/// separate tokens or lines.
pub fn validate(command: &Command) -> Result<()> {
    match command {
        Command::Subscribe { name, accuracy } => {
            validate_name(name)?;
            if let Some(acc) = accuracy {
                if !acc.is_finite() || *acc < 0.0 {
                    return Err(Error::InvalidParameter(format!(
                        "accuracy must be a non-negative number, got {acc}"
                    )));
                }
            }
            Ok(())
        }
        Command::Unsubscribe { name }
        | Command::Once { name }
        | Command::Begin { name }
        | Command::End { name } => validate_name(name),
        Command::Set { name, values } | Command::SetArray { name, values } => {
            validate_name(name)?;
            if values.is_empty() {
                return Err(Error::InvalidParameter(format!(
                    "no values given for {name}"
                )));
            }
            for v in values {
                validate_token("value", v)?;
                if matches!(command, Command::SetArray { .. }) && v.contains(',') {
                    return Err(Error::InvalidParameter(format!(
                        "array element contains ',': {v}"
                    )));
                }
            }
            Ok(())
        }
        Command::RuntimeSetting(RuntimeSetting::UpdateInterval(d)) => {
            if d.is_zero() {
                return Err(Error::InvalidParameter(
                    "update interval must be greater than zero".into(),
                ));
            }
            Ok(())
        }
        Command::Key { .. }
        | Command::ButtonPress { .. }
        | Command::ButtonRelease { .. }
        | Command::Disconnect => Ok(()),
    }
}

/// Check a dataref or simulator command name.
pub fn validate_name(name: &str) -> Result<()> {
    validate_token("name", name)
}

fn validate_token(what: &str, token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(Error::InvalidParameter(format!("empty {what}")));
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidParameter(format!(
            "{what} contains whitespace or control characters: {token:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inbound lines
// ---------------------------------------------------------------------------

/// A decoded dataref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    /// Dataref name.
    pub name: String,
    /// Type announced by the host.
    pub data_type: DataType,
    /// Value components (one for scalars, one per element for arrays).
    pub values: Vec<String>,
}

/// Types of lines received from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Greeting line: `EXTPLANE 1`
    Greeting(u32),
    /// Plugin build version: `EXTPLANE-VERSION 1002`
    ServerVersion(u32),
    /// Warning from the host: `EXTPLANE-WARNING <text>`
    Warning(String),
    /// A dataref update.
    Update(UpdateEvent),
    /// A line that matches no known shape.
    Unrecognized(String),
}

/// Decode a single line received from the host.
///
/// The line should NOT include the trailing `\n`. Leading/trailing
/// whitespace is stripped. Lines that match no known shape decode to
/// [`InboundMessage::Unrecognized`]; lines that look like an update but
/// are malformed (missing value, empty array) return [`Error::Protocol`].
pub fn parse_line(line: &str) -> Result<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::Protocol("empty line".into()));
    }

    let (first, tail) = split_token(line);
    let (second, rest) = split_token(tail);
    let second = (!second.is_empty()).then_some(second);
    let rest = (!rest.is_empty()).then_some(rest);

    match first {
        GREETING => return parse_number(line, second).map(InboundMessage::Greeting),
        VERSION_PREFIX => return parse_number(line, second).map(InboundMessage::ServerVersion),
        WARNING_PREFIX => {
            let text = line[WARNING_PREFIX.len()..].trim().to_string();
            return Ok(InboundMessage::Warning(text));
        }
        _ => {}
    }

    let (Some(second), Some(rest)) = (second, rest) else {
        // A lone `u<tag> <name>` is a truncated update, anything else is noise.
        if DataType::from_update_prefix(first).is_some() && second.is_some() {
            return Err(Error::Protocol(format!("update without value: {line}")));
        }
        return Ok(InboundMessage::Unrecognized(line.to_string()));
    };

    // Host form: `uf sim/x 1.0`
    if let Some(data_type) = DataType::from_update_prefix(first) {
        let values = split_values(rest, data_type)?;
        return Ok(InboundMessage::Update(UpdateEvent {
            name: second.to_string(),
            data_type,
            values,
        }));
    }

    // Named-type form: `sim/x float 1.0`
    if let Ok(data_type) = second.parse::<DataType>() {
        let values = split_values(rest, data_type)?;
        return Ok(InboundMessage::Update(UpdateEvent {
            name: first.to_string(),
            data_type,
            values,
        }));
    }

    Ok(InboundMessage::Unrecognized(line.to_string()))
}

/// Split off the first whitespace-delimited token. Both halves are trimmed.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, ""),
    }
}

fn parse_number(line: &str, token: Option<&str>) -> Result<u32> {
    token
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| Error::Protocol(format!("invalid version in: {line}")))
}

/// Split the value part of an update into components.
///
/// Bracketed values (`[1,2,3]`) are split on commas; anything else on
/// whitespace. Byte data is a single base64 token.
fn split_values(raw: &str, data_type: DataType) -> Result<Vec<String>> {
    let values: Vec<String> = if let Some(inner) = raw
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
    {
        inner
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    } else if data_type.is_array() {
        return Err(Error::Protocol(format!(
            "array value not in [..] notation: {raw}"
        )));
    } else if data_type == DataType::Data {
        vec![raw.to_string()]
    } else {
        raw.split_whitespace().map(str::to_string).collect()
    };

    if values.is_empty() {
        return Err(Error::Protocol(format!("empty value: {raw}")));
    }
    Ok(values)
}
