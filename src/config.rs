use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::blockchain::{ChainParams, DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use crate::transaction::is_valid_address;

/// Runtime settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub difficulty: u32,
    /// `None` keeps the ledger in memory only.
    pub data_file: Option<PathBuf>,
    /// Auto-mining is off unless an address is configured.
    pub miner_address: Option<String>,
    pub auto_mine_interval: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; unset or unparseable values fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 8080);
        let mut difficulty = parse_or(&lookup, "DIFFICULTY", DEFAULT_DIFFICULTY);
        if !(1..=MAX_DIFFICULTY).contains(&difficulty) {
            warn!(
                "config: DIFFICULTY={difficulty} outside 1..={MAX_DIFFICULTY}, \
                 using {DEFAULT_DIFFICULTY}"
            );
            difficulty = DEFAULT_DIFFICULTY;
        }
        let data_file = match lookup("DATA_FILE") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(PathBuf::from("ledger_state.json")),
        };
        let miner_address = lookup("MINER_ADDRESS")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .filter(|v| {
                let ok = is_valid_address(v);
                if !ok {
                    warn!("config: ignoring invalid MINER_ADDRESS={v:?}, auto-mining off");
                }
                ok
            });
        let interval_secs: u64 = parse_or(&lookup, "AUTO_MINE_INTERVAL_SECS", 10);

        Self {
            host,
            port,
            difficulty,
            data_file,
            miner_address,
            auto_mine_interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams::with_difficulty(self.difficulty)
    }
}

fn parse_or<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("config: ignoring invalid {key}={raw:?}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let s = settings(&[]);
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.port, 8080);
        assert_eq!(s.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(s.data_file, Some(PathBuf::from("ledger_state.json")));
        assert!(s.miner_address.is_none());
        assert_eq!(s.auto_mine_interval, Duration::from_secs(10));
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let s = settings(&[
            ("PORT", "9000"),
            ("DIFFICULTY", "many"),
            ("DATA_FILE", ""),
            ("MINER_ADDRESS", " GSC1cccccccccccccccccccccccccccccccc "),
            ("AUTO_MINE_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(s.port, 9000);
        assert_eq!(s.difficulty, DEFAULT_DIFFICULTY);
        assert!(s.data_file.is_none());
        assert_eq!(
            s.miner_address.as_deref(),
            Some("GSC1cccccccccccccccccccccccccccccccc")
        );
        assert_eq!(s.auto_mine_interval, Duration::from_secs(1));
        assert_eq!(s.chain_params().difficulty, DEFAULT_DIFFICULTY);
    }

    #[test]
    fn difficulty_outside_hash_width_falls_back() {
        for raw in ["0", "65", "4294967295"] {
            let s = settings(&[("DIFFICULTY", raw)]);
            assert_eq!(s.difficulty, DEFAULT_DIFFICULTY, "DIFFICULTY={raw}");
        }
        assert_eq!(settings(&[("DIFFICULTY", "64")]).difficulty, 64);
        assert_eq!(settings(&[("DIFFICULTY", "1")]).difficulty, 1);
    }

    #[test]
    fn malformed_miner_address_disables_auto_mining() {
        let s = settings(&[("MINER_ADDRESS", "GSC1typo")]);
        assert!(s.miner_address.is_none());
    }
}
