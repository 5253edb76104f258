use parking_lot::Mutex;
use rosc::OscType;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Prefix of every avatar parameter address.
pub const RX_PREFIX: &str = "/avatar/parameters/";

pub fn parameter_address(suffix: &str) -> String {
    format!("{RX_PREFIX}{suffix}")
}

/// OSC argument type carried by one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
}

impl ValueType {
    /// OSCQuery type tag.
    pub fn type_tag(self) -> &'static str {
        match self {
            ValueType::Bool => "T",
            ValueType::Int => "i",
            ValueType::Float => "f",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
        };
        f.write_str(name)
    }
}

/// A value a parameter tracker can hold.
pub trait ParameterValue: Copy + PartialEq + Default + Send + 'static {
    const VALUE_TYPE: ValueType;
    /// Scale registered with the telemetry sink.
    const TELEMETRY_SCALE: f32;

    fn from_osc(arg: &OscType) -> Option<Self>;
    fn normalize(self) -> f32;
}

impl ParameterValue for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;
    const TELEMETRY_SCALE: f32 = 1.0;

    fn from_osc(arg: &OscType) -> Option<Self> {
        match arg {
            OscType::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn normalize(self) -> f32 {
        if self { 1.0 } else { 0.0 }
    }
}

impl ParameterValue for i32 {
    const VALUE_TYPE: ValueType = ValueType::Int;
    const TELEMETRY_SCALE: f32 = 255.0;

    fn from_osc(arg: &OscType) -> Option<Self> {
        match arg {
            OscType::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn normalize(self) -> f32 {
        self as f32
    }
}

impl ParameterValue for f32 {
    const VALUE_TYPE: ValueType = ValueType::Float;
    const TELEMETRY_SCALE: f32 = 1.0;

    fn from_osc(arg: &OscType) -> Option<Self> {
        match arg {
            OscType::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    fn normalize(self) -> f32 {
        self
    }
}
