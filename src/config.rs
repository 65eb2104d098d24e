use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;

/// Tunable knobs for the attempt engine. Defaults match the values the
/// exam UI has always used; either can be overridden through the
/// environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Safety-net autosave period while the countdown runs, in ticks.
    pub autosave_interval_secs: u32,
    /// Delay between timer expiry and the automatic submit, so the UI can
    /// show the "time expired" notice before navigating away.
    pub expiry_grace_secs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 30,
            expiry_grace_secs: 5,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            autosave_interval_secs: get_env_parse_or(
                "EXAM_AUTOSAVE_INTERVAL_SECS",
                defaults.autosave_interval_secs,
            )?,
            expiry_grace_secs: get_env_parse_or(
                "EXAM_EXPIRY_GRACE_SECS",
                defaults.expiry_grace_secs,
            )?,
        };

        if config.autosave_interval_secs == 0 {
            return Err(Error::Config(
                "EXAM_AUTOSAVE_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
