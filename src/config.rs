use std::env::var;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

/// Protocol timing. All values are milliseconds.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub dkg_timeout_ms: u64,
    pub shuffle_timeout_ms: u64,
    pub decrypt_timeout_ms: u64,
    /// How long a dealer has to answer a complaint before exclusion.
    pub justification_deadline_ms: u64,
    /// Dispatcher poll interval, also the resolution of the deadline above.
    pub tick_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            dkg_timeout_ms: 10_000,
            shuffle_timeout_ms: 30_000,
            decrypt_timeout_ms: 30_000,
            justification_deadline_ms: 1_000,
            tick_ms: 50,
        }
    }
}

fn env_ms(name: &str, default: u64) -> u64 {
    match var(name) {
        Ok(val) => match val.parse() {
            Ok(ms) => ms,
            Err(_) => {
                warn!("Ignoring {}={}, not a number of milliseconds", name, val);
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    /// Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_env() -> Config {
        let d = Config::default();
        Config {
            dkg_timeout_ms: env_ms("NEVV_DKG_TIMEOUT", d.dkg_timeout_ms),
            shuffle_timeout_ms: env_ms("NEVV_SHUFFLE_TIMEOUT", d.shuffle_timeout_ms),
            decrypt_timeout_ms: env_ms("NEVV_DECRYPT_TIMEOUT", d.decrypt_timeout_ms),
            justification_deadline_ms: env_ms(
                "NEVV_JUSTIFICATION_DEADLINE",
                d.justification_deadline_ms,
            ),
            tick_ms: env_ms("NEVV_TICK", d.tick_ms),
        }
    }

    pub fn dkg_timeout(&self) -> Duration {
        Duration::from_millis(self.dkg_timeout_ms)
    }
    pub fn shuffle_timeout(&self) -> Duration {
        Duration::from_millis(self.shuffle_timeout_ms)
    }
    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_millis(self.decrypt_timeout_ms)
    }
    pub fn justification_deadline(&self) -> Duration {
        Duration::from_millis(self.justification_deadline_ms)
    }
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
