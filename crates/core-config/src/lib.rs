//! Engine configuration loading and parsing.
//!
//! Parses `engine.toml` (or an override path provided by the binary) into
//! [`EngineConfig`]: worker-pool sizing, the per-node in-flight assembly
//! bound, the consumer dispatch priority, and the QoS profile table the
//! transport binding consults by label. Every section and field is optional;
//! absent values fall back to the defaults below, and unknown fields are
//! ignored (TOML deserialization tolerance) so deployments can carry
//! binding-specific keys without breaking the engine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{fs, time::Duration};
use tracing::info;

/// Consumer callback dispatch band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPriority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_workers")]
    pub workers: usize,
    #[serde(default = "PoolConfig::default_resolution_ms", rename = "scheduler-resolution-ms")]
    pub scheduler_resolution_ms: u64,
}

impl PoolConfig {
    fn default_workers() -> usize {
        4
    }

    fn default_resolution_ms() -> u64 {
        1
    }

    pub fn scheduler_resolution(&self) -> Duration {
        Duration::from_millis(self.scheduler_resolution_ms.max(1))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: Self::default_workers(),
            scheduler_resolution_ms: Self::default_resolution_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AssemblyConfig {
    #[serde(default = "AssemblyConfig::default_max_in_flight", rename = "max-in-flight")]
    pub max_in_flight: usize,
    #[serde(default, rename = "dispatch-priority")]
    pub dispatch_priority: DispatchPriority,
}

impl AssemblyConfig {
    fn default_max_in_flight() -> usize {
        1024
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        AssemblyConfig {
            max_in_flight: Self::default_max_in_flight(),
            dispatch_priority: DispatchPriority::default(),
        }
    }
}

/// Reader history bound for one QoS profile label. The engine consults
/// profiles by label only; a real middleware binding maps the label onto its
/// vendor profile and may honor more than `depth`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "ProfileConfig::default_depth")]
    pub depth: usize,
}

impl ProfileConfig {
    fn default_depth() -> usize {
        256
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            depth: Self::default_depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct QosConfig {
    #[serde(default)]
    pub command: ProfileConfig,
    #[serde(default)]
    pub config: ProfileConfig,
    #[serde(default)]
    pub report: ProfileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub qos: QosConfig,
}

impl EngineConfig {
    /// Default search location: `<config-dir>/umaa-engine/engine.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("umaa-engine").join("engine.toml"))
    }

    /// Load configuration. An explicit `path` must exist and parse; without
    /// one, the default location is used when present, else defaults apply.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
        match path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                let config = Self::parse(&raw)
                    .with_context(|| format!("parsing config file {}", p.display()))?;
                info!(target: "engine.config", path = %p.display(), "configuration loaded");
                Ok(config)
            }
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::load(Some(&p)),
                None => {
                    info!(target: "engine.config", "no config file; using defaults");
                    Ok(EngineConfig::default())
                }
            },
        }
    }

    pub fn parse(raw: &str) -> Result<EngineConfig> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_sections_absent() {
        let config = EngineConfig::parse("").expect("empty config parses");
        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.assembly.max_in_flight, 1024);
        assert_eq!(config.assembly.dispatch_priority, DispatchPriority::Medium);
        assert_eq!(config.qos.report.depth, 256);
    }

    #[test]
    fn partial_sections_fill_from_defaults() {
        let raw = r#"
[pool]
workers = 8

[assembly]
dispatch-priority = "high"

[qos.command]
depth = 8
"#;
        let config = EngineConfig::parse(raw).expect("parses");
        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.pool.scheduler_resolution_ms, 1, "unspecified field defaults");
        assert_eq!(config.assembly.dispatch_priority, DispatchPriority::High);
        assert_eq!(config.qos.command.depth, 8);
        assert_eq!(config.qos.config.depth, 256);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = r#"
[pool]
workers = 2
vendor-extension = "ignored"

[binding]
domain-id = 7
"#;
        let config = EngineConfig::parse(raw).expect("unknown fields ignored");
        assert_eq!(config.pool.workers, 2);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/engine.toml"))).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[assembly]\nmax-in-flight = 16").expect("write");
        let config = EngineConfig::load(Some(file.path())).expect("loads");
        assert_eq!(config.assembly.max_in_flight, 16);
    }
}
