//! Startup configuration.
//!
//! The host hands the node a small key/value property set at construction:
//! the scratch-size upper bound, which side the volume model follows, the
//! peaks-resampler switch, and optionally any of the named runtime
//! parameters (which are applied exactly as a `Props` update would).

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::param::PropValue;

/// Default upper bound on frames per tick.
pub const DEFAULT_QUANTUM_LIMIT: u32 = 8192;

/// Which side the volume model follows when remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactoryMode {
    /// Volume follows the input side (a playback splitter).
    #[default]
    Split,
    /// Volume follows the output side (a capture merger).
    Merge,
}

/// Startup properties of one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Upper bound on frames per tick; sizes the scratch pools.
    pub quantum_limit: u32,
    pub mode: FactoryMode,
    /// Use the peak-hold resampler variant (monitor scopes).
    pub peaks: bool,
    /// Named runtime parameters applied at construction.
    pub params: Vec<(String, PropValue)>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            quantum_limit: DEFAULT_QUANTUM_LIMIT,
            mode: FactoryMode::default(),
            peaks: false,
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "clock.quantum-limit")]
    quantum_limit: Option<u32>,
    #[serde(rename = "factory.mode")]
    mode: Option<String>,
    #[serde(rename = "resample.peaks")]
    peaks: Option<bool>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl NodeConfig {
    /// Parse a configuration from string key/value pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            match key {
                "clock.quantum-limit" => {
                    config.quantum_limit = value
                        .parse()
                        .map_err(|_| Error::Config(format!("bad quantum limit: {value}")))?;
                }
                "factory.mode" => config.mode = parse_mode(value)?,
                "resample.peaks" => {
                    config.peaks = matches!(value, "true" | "1");
                }
                _ => config
                    .params
                    .push((key.to_string(), PropValue::String(value.to_string()))),
            }
        }
        Ok(config)
    }

    /// Parse a configuration from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        let mut config = Self::default();
        if let Some(limit) = raw.quantum_limit {
            config.quantum_limit = limit;
        }
        if let Some(mode) = raw.mode {
            config.mode = parse_mode(&mode)?;
        }
        if let Some(peaks) = raw.peaks {
            config.peaks = peaks;
        }
        for (key, value) in raw.rest {
            let value = match value {
                serde_json::Value::Bool(b) => PropValue::Bool(b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        PropValue::Int(i as i32)
                    } else {
                        PropValue::Double(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::String(s) => PropValue::String(s),
                _ => continue,
            };
            config.params.push((key, value));
        }
        Ok(config)
    }
}

fn parse_mode(value: &str) -> Result<FactoryMode> {
    match value {
        "split" => Ok(FactoryMode::Split),
        "merge" => Ok(FactoryMode::Merge),
        other => Err(Error::Config(format!("unknown factory mode: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.quantum_limit, DEFAULT_QUANTUM_LIMIT);
        assert_eq!(config.mode, FactoryMode::Split);
        assert!(!config.peaks);
    }

    #[test]
    fn from_pairs_parses_known_keys() {
        let config = NodeConfig::from_pairs([
            ("clock.quantum-limit", "4096"),
            ("factory.mode", "merge"),
            ("resample.quality", "10"),
        ])
        .unwrap();
        assert_eq!(config.quantum_limit, 4096);
        assert_eq!(config.mode, FactoryMode::Merge);
        assert_eq!(
            config.params,
            vec![(
                "resample.quality".to_string(),
                PropValue::String("10".to_string())
            )]
        );
    }

    #[test]
    fn from_json_parses_mixed_types() {
        let config = NodeConfig::from_json(
            r#"{
                "clock.quantum-limit": 2048,
                "resample.peaks": true,
                "channelmix.normalize": false,
                "channelmix.lfe-cutoff": 150.0
            }"#,
        )
        .unwrap();
        assert_eq!(config.quantum_limit, 2048);
        assert!(config.peaks);
        assert_eq!(config.params.len(), 2);
    }

    #[test]
    fn bad_mode_is_rejected() {
        assert!(NodeConfig::from_pairs([("factory.mode", "sideways")]).is_err());
    }
}
