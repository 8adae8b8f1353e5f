//! Core types used throughout the ExtPlane client.
//!
//! These describe what the simulator host exposes (named data references
//! with typed, string-encoded values) independently of how lines are framed
//! on the wire.

use std::fmt;
use std::str::FromStr;

/// Value type of a data reference as reported by the host.
///
/// The host announces the type in every update line, either as a compact
/// prefix (`uf`, `uia`, ...) or as a type word (`float`, `intarray`, ...).
/// Values are always kept as strings; the type tells consumers how to
/// interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit integer (`ui`).
    Int,
    /// Single-precision float (`uf`).
    Float,
    /// Double-precision float (`ud`).
    Double,
    /// Array of integers (`uia`).
    IntArray,
    /// Array of floats (`ufa`).
    FloatArray,
    /// Opaque byte data, base64-encoded by the host (`ub`). String-valued
    /// datarefs such as aircraft names arrive with this type.
    Data,
    /// Array of strings. Only seen in the named-type form
    /// (`<name> string[] [a,b]`); the host has no compact prefix for it.
    StringArray,
}

impl DataType {
    /// All data types, in protocol order.
    pub const ALL: [DataType; 7] = [
        DataType::Int,
        DataType::Float,
        DataType::Double,
        DataType::IntArray,
        DataType::FloatArray,
        DataType::Data,
        DataType::StringArray,
    ];

    /// The update-line prefix the host uses for this type (e.g. `"uf"`).
    ///
    /// `None` for types that only appear in the named-type form.
    pub fn update_prefix(&self) -> Option<&'static str> {
        match self {
            DataType::Int => Some("ui"),
            DataType::Float => Some("uf"),
            DataType::Double => Some("ud"),
            DataType::IntArray => Some("uia"),
            DataType::FloatArray => Some("ufa"),
            DataType::Data => Some("ub"),
            DataType::StringArray => None,
        }
    }

    /// Look up a type from an update-line prefix (`"ufa"` -> `FloatArray`).
    pub fn from_update_prefix(prefix: &str) -> Option<DataType> {
        DataType::ALL
            .into_iter()
            .find(|t| t.update_prefix() == Some(prefix))
    }

    /// Whether values of this type carry one component per array element.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            DataType::IntArray | DataType::FloatArray | DataType::StringArray
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::IntArray => "intarray",
            DataType::FloatArray => "floatarray",
            DataType::Data => "data",
            DataType::StringArray => "stringarray",
        };
        write!(f, "{s}")
    }
}

/// Error returned when parsing an unknown [`DataType`] word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDataTypeError(String);

impl fmt::Display for ParseDataTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data type: {}", self.0)
    }
}

impl std::error::Error for ParseDataTypeError {}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Ok(DataType::Int),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "intarray" | "int_array" | "int[]" => Ok(DataType::IntArray),
            "floatarray" | "float_array" | "float[]" => Ok(DataType::FloatArray),
            "data" | "string" | "byte" | "bytes" => Ok(DataType::Data),
            "stringarray" | "string_array" | "string[]" => Ok(DataType::StringArray),
            _ => Err(ParseDataTypeError(s.to_string())),
        }
    }
}

/// Snapshot of one data reference.
///
/// Snapshots are immutable once published: the store replaces the whole
/// value on every update, so a reader always sees a type and value that
/// arrived together.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRef {
    /// Fully qualified dataref name (e.g. `"sim/cockpit2/gauges/indicators/airspeed_kts_pilot"`).
    pub name: String,
    /// Value type; `None` until the first update arrives.
    pub data_type: Option<DataType>,
    /// String-encoded value components; `None` until the first update arrives.
    /// Scalar types carry one component, array types one per element.
    pub values: Option<Vec<String>>,
    /// Change threshold requested at subscribe time, if any.
    pub accuracy: Option<f32>,
}

impl DataRef {
    /// Create an entry with no known type or value.
    pub fn new(name: impl Into<String>) -> Self {
        DataRef {
            name: name.into(),
            data_type: None,
            values: None,
            accuracy: None,
        }
    }

    /// Whether at least one update has been received for this dataref.
    pub fn has_value(&self) -> bool {
        self.values.is_some()
    }

    /// The first value component, if any. Convenient for scalar datarefs.
    pub fn first_value(&self) -> Option<&str> {
        self.values.as_ref()?.first().map(String::as_str)
    }

    /// Parse the first value component as `T` (e.g. `f64`, `i32`).
    ///
    /// Returns `None` when there is no value yet or it does not parse.
    pub fn parse_first<T: FromStr>(&self) -> Option<T> {
        self.first_value()?.parse().ok()
    }
}

/// State of the send or receive loop.
///
/// ```text
/// Idle -> Running -> Stopping -> Stopped
///            \______________________^   (I/O failure or end of stream)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoopState {
    /// Not started yet.
    #[default]
    Idle,
    /// Processing commands or lines.
    Running,
    /// A stop was requested and the loop is winding down.
    Stopping,
    /// Terminal. The loop task has exited.
    Stopped,
}

impl LoopState {
    /// Encode for storage in an atomic.
    pub fn as_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Running => 1,
            LoopState::Stopping => 2,
            LoopState::Stopped => 3,
        }
    }

    /// Decode from an atomic. Unknown values map to `Stopped`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- DataType -----------------------------------------------------------

    #[test]
    fn data_type_update_prefixes() {
        assert_eq!(DataType::Int.update_prefix(), Some("ui"));
        assert_eq!(DataType::Float.update_prefix(), Some("uf"));
        assert_eq!(DataType::Double.update_prefix(), Some("ud"));
        assert_eq!(DataType::IntArray.update_prefix(), Some("uia"));
        assert_eq!(DataType::FloatArray.update_prefix(), Some("ufa"));
        assert_eq!(DataType::Data.update_prefix(), Some("ub"));
        assert_eq!(DataType::StringArray.update_prefix(), None);
    }

    #[test]
    fn data_type_from_update_prefix() {
        for t in DataType::ALL {
            if let Some(prefix) = t.update_prefix() {
                assert_eq!(DataType::from_update_prefix(prefix), Some(t));
            }
        }
        assert_eq!(DataType::from_update_prefix("ux"), None);
        assert_eq!(DataType::from_update_prefix(""), None);
    }

    #[test]
    fn data_type_parse_words() {
        assert_eq!("float".parse::<DataType>(), Ok(DataType::Float));
        assert_eq!("INT".parse::<DataType>(), Ok(DataType::Int));
        assert_eq!("float[]".parse::<DataType>(), Ok(DataType::FloatArray));
        assert_eq!("intarray".parse::<DataType>(), Ok(DataType::IntArray));
        assert_eq!("string".parse::<DataType>(), Ok(DataType::Data));
        assert_eq!("string[]".parse::<DataType>(), Ok(DataType::StringArray));
        assert_eq!("STRINGARRAY".parse::<DataType>(), Ok(DataType::StringArray));
        assert_eq!("string_array".parse::<DataType>(), Ok(DataType::StringArray));
        assert!("quaternion".parse::<DataType>().is_err());
    }

    #[test]
    fn data_type_display_parses_back() {
        for t in DataType::ALL {
            assert_eq!(t.to_string().parse::<DataType>(), Ok(t));
        }
    }

    #[test]
    fn data_type_is_array() {
        assert!(DataType::IntArray.is_array());
        assert!(DataType::FloatArray.is_array());
        assert!(DataType::StringArray.is_array());
        assert!(!DataType::Float.is_array());
        assert!(!DataType::Data.is_array());
    }

    #[test]
    fn parse_data_type_error_display() {
        let err = "blob".parse::<DataType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown data type: blob");
    }

    // -- DataRef ------------------------------------------------------------

    #[test]
    fn dataref_new_is_unknown() {
        let dr = DataRef::new("sim/x");
        assert_eq!(dr.name, "sim/x");
        assert!(dr.data_type.is_none());
        assert!(!dr.has_value());
        assert_eq!(dr.first_value(), None);
        assert_eq!(dr.parse_first::<f64>(), None);
    }

    #[test]
    fn dataref_first_value_and_parse() {
        let dr = DataRef {
            values: Some(vec!["120.5".to_string(), "3".to_string()]),
            data_type: Some(DataType::FloatArray),
            ..DataRef::new("sim/y")
        };
        assert!(dr.has_value());
        assert_eq!(dr.first_value(), Some("120.5"));
        assert_eq!(dr.parse_first::<f64>(), Some(120.5));
        assert_eq!(dr.parse_first::<i32>(), None);
    }

    // -- LoopState ----------------------------------------------------------

    #[test]
    fn loop_state_default_is_idle() {
        assert_eq!(LoopState::default(), LoopState::Idle);
    }

    #[test]
    fn loop_state_u8_encoding() {
        for s in [
            LoopState::Idle,
            LoopState::Running,
            LoopState::Stopping,
            LoopState::Stopped,
        ] {
            assert_eq!(LoopState::from_u8(s.as_u8()), s);
        }
        assert_eq!(LoopState::from_u8(200), LoopState::Stopped);
    }

    #[test]
    fn loop_state_display() {
        assert_eq!(LoopState::Running.to_string(), "running");
        assert_eq!(LoopState::Stopped.to_string(), "stopped");
    }
}
