//! Load config from file and environment.

use std::path::PathBuf;

use peerdrop_core::EngineConfig;
use serde::Deserialize;
use tracing::warn;

/// Host configuration. File: ~/.config/peerdrop/config.toml or /etc/peerdrop/config.toml.
/// Env overrides: PEERDROP_PORT, PEERDROP_OUT_DIR, PEERDROP_CHUNK_SIZE, PEERDROP_HIGH_WATER,
/// PEERDROP_LOW_WATER.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP port `listen` binds (default 45680).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory received files are written to (default: current directory).
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_port() -> u16 {
    45680
}
fn default_out_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            out_dir: default_out_dir(),
            engine: EngineConfig::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

/// Apply overrides from `lookup` (the process environment in production).
pub fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(p) = parse_var(&lookup, "PEERDROP_PORT") {
        c.port = p;
    }
    if let Some(dir) = lookup("PEERDROP_OUT_DIR") {
        c.out_dir = PathBuf::from(dir);
    }
    if let Some(n) = parse_var(&lookup, "PEERDROP_CHUNK_SIZE") {
        c.engine.chunk_size = n;
    }
    if let Some(n) = parse_var(&lookup, "PEERDROP_HIGH_WATER") {
        c.engine.high_water_mark = n;
    }
    if let Some(n) = parse_var(&lookup, "PEERDROP_LOW_WATER") {
        c.engine.low_water_mark = n;
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerdrop/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerdrop/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => warn!("ignoring {}: {}", p.display(), e),
                },
                Err(e) => warn!("cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.port, 45680);
        assert_eq!(c.out_dir, PathBuf::from("."));
        assert_eq!(c.engine, EngineConfig::default());
    }

    #[test]
    fn file_sets_engine_table() {
        let c: Config = toml::from_str(
            r#"
            port = 9000
            out_dir = "/tmp/in"

            [engine]
            chunk_size = 32768
            low_water_mark = 1024
            "#,
        )
        .unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.out_dir, PathBuf::from("/tmp/in"));
        assert_eq!(c.engine.chunk_size, 32768);
        assert_eq!(c.engine.low_water_mark, 1024);
        assert_eq!(
            c.engine.high_water_mark,
            EngineConfig::default().high_water_mark
        );
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("prot = 1").is_err());
        assert!(toml::from_str::<Config>("[engine]\nchunk = 1").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("PEERDROP_PORT", "7000"),
            ("PEERDROP_OUT_DIR", "/srv/drop"),
            ("PEERDROP_CHUNK_SIZE", "65536"),
            ("PEERDROP_HIGH_WATER", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.port, 7000);
        assert_eq!(c.out_dir, PathBuf::from("/srv/drop"));
        assert_eq!(c.engine.chunk_size, 65536);
        assert_eq!(
            c.engine.high_water_mark,
            EngineConfig::default().high_water_mark
        );
    }
}
