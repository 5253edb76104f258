//! Zone configuration and process settings.
//!
//! The zone file is TOML: every top-level table is one zone named after the
//! table, and the optional `Defaults` table fills in keys a zone leaves out.
//! Values are read as strings first (numbers, booleans and string arrays are
//! accepted) and then parsed into the typed zone configs.

use crate::algorithms::{SpeedShape, VelocityBand};
use crate::models::parameter_address;
use crate::transport::MOTOR_PORT;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const DEFAULTS_SECTION: &str = "Defaults";
pub const DEFAULT_OSC_PORT: u16 = 9001;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("[{section}] must be a table")]
    NotATable { section: String },
    #[error("[{section}] `{key}` must be a string, number, boolean or list of strings")]
    UnsupportedValue { section: String, key: String },
    #[error("[{zone}] missing required key `{key}`")]
    MissingKey { zone: String, key: String },
    #[error("[{zone}] `{key}` = {value:?} is not a valid number")]
    InvalidNumber { zone: String, key: String, value: String },
    #[error("[{zone}] {value} is not a valid haptic zone type")]
    UnknownZoneType { zone: String, value: String },
    #[error("[{zone}] invalid device ip {value:?}")]
    InvalidDeviceIp { zone: String, value: String },
    #[error("{var} = {value:?} is invalid")]
    InvalidEnv { var: String, value: String },
}

/// One zone section after merging with `Defaults`, values kept as text.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    values: BTreeMap<String, String>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            zone: self.name.clone(),
            key: key.to_string(),
        })
    }

    fn number(&self, key: &str, raw: &str) -> Result<f32, ConfigError> {
        raw.trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ConfigError::InvalidNumber {
                zone: self.name.clone(),
                key: key.to_string(),
                value: raw.to_string(),
            })
    }

    fn require_number(&self, key: &str) -> Result<f32, ConfigError> {
        let raw = self.require(key)?;
        self.number(key, raw)
    }

    fn number_or(&self, key: &str, default: f32) -> Result<f32, ConfigError> {
        match self.get(key) {
            Some(raw) => self.number(key, raw),
            None => Ok(default),
        }
    }

    /// A percentage key, normalized to 0..1.
    fn require_percent(&self, key: &str) -> Result<f32, ConfigError> {
        Ok(self.require_number(key)? / 100.0)
    }
}

fn scalar_text(section: &str, key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    let unsupported =
        || ConfigError::UnsupportedValue { section: section.to_string(), key: key.to_string() };
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(unsupported))
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join(" ")),
        _ => Err(unsupported()),
    }
}

fn table_values(
    section: &str,
    value: &toml::Value,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let table = value
        .as_table()
        .ok_or_else(|| ConfigError::NotATable { section: section.to_string() })?;
    let mut values = BTreeMap::new();
    for (key, v) in table {
        let text = scalar_text(section, key, v)?;
        // blank means unset
        if !text.trim().is_empty() {
            values.insert(key.clone(), text);
        }
    }
    Ok(values)
}

/// Parses the zone file into merged sections, `Defaults` excluded.
pub fn parse_sections(text: &str) -> Result<Vec<Section>, ConfigError> {
    let root: toml::Table = toml::from_str(text)?;
    let defaults = match root.get(DEFAULTS_SECTION) {
        Some(value) => table_values(DEFAULTS_SECTION, value)?,
        None => BTreeMap::new(),
    };

    let mut sections = Vec::new();
    for (name, value) in root.iter().filter(|(name, _)| name.as_str() != DEFAULTS_SECTION) {
        let mut values = table_values(name, value)?;
        for (key, default) in &defaults {
            values.entry(key.clone()).or_insert_with(|| default.clone());
        }
        values.insert("name".to_string(), name.clone());
        sections.push(Section { name: name.clone(), values });
    }
    Ok(sections)
}

/// Settings shared by every single-channel zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneCommon {
    pub name: String,
    pub timeout: Duration,
    pub proximity_address: String,
    pub max_speed_address: String,
    /// Baseline max speed, 0..1.
    pub max_speed: f32,
    pub device_ips: Vec<IpAddr>,
    /// UDP port every device of the zone listens on.
    pub device_port: u16,
    pub shape: SpeedShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VelocityZoneConfig {
    pub common: ZoneCommon,
    pub cutoff_address: Option<String>,
    pub lateral_x_address: Option<String>,
    pub band: VelocityBand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneConfig {
    SimpleProximity(ZoneCommon),
    Velocity(VelocityZoneConfig),
}

impl ZoneConfig {
    pub fn common(&self) -> &ZoneCommon {
        match self {
            ZoneConfig::SimpleProximity(common) => common,
            ZoneConfig::Velocity(cfg) => &cfg.common,
        }
    }

    pub fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let kind = section.require("type")?;
        match kind {
            "SimpleProximityZone" => {
                Ok(ZoneConfig::SimpleProximity(ZoneCommon::from_section(section)?))
            }
            "VelocityZone" => {
                let common = ZoneCommon::from_section(section)?;
                let defaults = VelocityBand::default();
                Ok(ZoneConfig::Velocity(VelocityZoneConfig {
                    common,
                    cutoff_address: section.get("parameter_cutoff").map(parameter_address),
                    lateral_x_address: section.get("parameter_lateral_x").map(parameter_address),
                    band: VelocityBand {
                        limit_proximity_outer: section
                            .number_or("limit_proximity_outer", defaults.limit_proximity_outer)?,
                        limit_proximity_inner: section
                            .number_or("limit_proximity_inner", defaults.limit_proximity_inner)?,
                        velocity_scale: section
                            .number_or("velocity_scale", defaults.velocity_scale)?,
                    },
                }))
            }
            other => Err(ConfigError::UnknownZoneType {
                zone: section.name.clone(),
                value: other.to_string(),
            }),
        }
    }
}

impl ZoneCommon {
    fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let raw_timeout = section.require("timeout")?;
        let timeout = Duration::try_from_secs_f32(section.number("timeout", raw_timeout)?)
            .map_err(|_| ConfigError::InvalidNumber {
                zone: section.name.clone(),
                key: "timeout".into(),
                value: raw_timeout.into(),
            })?;

        let device_ips = section
            .require("device_ips")?
            .split_whitespace()
            .map(|s| {
                s.parse::<IpAddr>().map_err(|_| ConfigError::InvalidDeviceIp {
                    zone: section.name.clone(),
                    value: s.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let device_port = match section.get("device_port") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidNumber {
                zone: section.name.clone(),
                key: "device_port".into(),
                value: raw.into(),
            })?,
            None => MOTOR_PORT,
        };

        Ok(Self {
            name: section.name.clone(),
            timeout,
            proximity_address: parameter_address(section.require("parameter_proximity")?),
            max_speed_address: parameter_address(section.require("parameter_max_speed")?),
            max_speed: section.require_percent("max_speed")?,
            device_ips,
            device_port,
            shape: SpeedShape {
                min_speed: section.require_percent("min_speed")?,
                max_speed_scale: section.require_percent("max_speed_scale")?,
            },
        })
    }
}

pub fn parse_zone_configs(text: &str) -> Result<Vec<ZoneConfig>, ConfigError> {
    parse_sections(text)?.iter().map(ZoneConfig::from_section).collect()
}

pub async fn load_zone_configs(path: &Path) -> Result<Vec<ZoneConfig>, ConfigError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
    parse_zone_configs(&text)
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    pub config_path: PathBuf,
    pub bind_ip: IpAddr,
    /// Where avatar clients send their OSC output by default.
    pub osc_port: u16,
    /// 0 lets the OS pick a free port.
    pub oscquery_port: u16,
    pub service_name: String,
    pub display: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            osc_port: DEFAULT_OSC_PORT,
            oscquery_port: 0,
            service_name: "Giggle OSC Router".to_string(),
            display: true,
        }
    }
}

impl RouterSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(
            var: &str,
            value: Option<String>,
            default: T,
        ) -> Result<T, ConfigError> {
            match value {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv { var: var.to_string(), value: v }),
                None => Ok(default),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            config_path: lookup("GIGGLE_CONFIG").map(PathBuf::from).unwrap_or(defaults.config_path),
            bind_ip: parsed("GIGGLE_BIND_IP", lookup("GIGGLE_BIND_IP"), defaults.bind_ip)?,
            osc_port: parsed("GIGGLE_OSC_PORT", lookup("GIGGLE_OSC_PORT"), defaults.osc_port)?,
            oscquery_port: parsed(
                "GIGGLE_OSCQUERY_PORT",
                lookup("GIGGLE_OSCQUERY_PORT"),
                defaults.oscquery_port,
            )?,
            service_name: lookup("GIGGLE_SERVICE_NAME").unwrap_or(defaults.service_name),
            display: lookup("GIGGLE_DISPLAY").map(|v| v.trim() != "0").unwrap_or(defaults.display),
        })
    }
}
