//! Configuration: a single `Params` value built once at process start and
//! passed by reference everywhere else — no hidden globals (design note
//! §9). Grounded in
//! `enterprise::cluster::config::{ClusterConfig, RaftConfig, NetworkConfig}`
//! (a plain `serde`-derived struct with a `Default` impl and
//! `from_file`/`save` helpers) and its no-`clap` CLI parsing over
//! `std::env::args` (see `main.rs`/`commands`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::PolicyName;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown cache_name '{0}'")]
    UnknownPolicy(String),
    #[error("missing value for flag {0}")]
    MissingValue(String),
    #[error("invalid value '{value}' for flag {flag}: {reason}")]
    InvalidValue { flag: String, value: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Propagation latencies, one-way, in microseconds (spec §6 CLI surface
/// `--propagation_latency_{clientedge,crossedge,edgecloud}_us`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PropagationLatencies {
    pub client_edge_us: u64,
    pub cross_edge_us: u64,
    pub edge_cloud_us: u64,
}

impl Default for PropagationLatencies {
    fn default() -> Self {
        Self {
            client_edge_us: 500,
            cross_edge_us: 2_000,
            edge_cloud_us: 20_000,
        }
    }
}

/// Tuning knobs specific to the `covered`/`bestguess` policies (spec §6
/// "policy-specific tuning", e.g. `--covered_topk_edgecnt`,
/// `--covered_peredge_synced_victimcnt`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoveredTuning {
    /// How many top-popularity keys the beacon considers when choosing
    /// placement edges.
    pub topk_edgecnt: usize,
    /// How many locally-evicted victims get synced to the directory per
    /// eviction pass, for `covered`'s cooperation-aware bookkeeping.
    pub peredge_synced_victimcnt: usize,
}

impl Default for CoveredTuning {
    fn default() -> Self {
        Self {
            topk_edgecnt: 3,
            peredge_synced_victimcnt: 8,
        }
    }
}

/// Everything the simulator binary and the library's dispatcher need at
/// startup (spec §6 CLI surface, design note §9 "a `Params` struct
/// constructed once... no hidden globals").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    pub capacity_mb: u64,
    pub cache_name: PolicyName,
    pub hash_name: String,
    pub edgecnt: u32,
    pub propagation: PropagationLatencies,
    pub percacheserver_workercnt: usize,
    pub covered: CoveredTuning,
    pub rng_seed: u64,
    /// Blocked-edge unblock notification timeout (design note §9 open
    /// question: how long a requester waits for a `FinishBlock` before
    /// giving up and retrying the directory lookup on its own).
    pub writelock_wait_timeout: Duration,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            capacity_mb: 64,
            cache_name: PolicyName::Lru,
            hash_name: "fnv1a".to_string(),
            edgecnt: 4,
            propagation: PropagationLatencies::default(),
            percacheserver_workercnt: 4,
            covered: CoveredTuning::default(),
            rng_seed: 0,
            writelock_wait_timeout: Duration::from_millis(200),
        }
    }
}

impl Params {
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_mb * 1024 * 1024
    }

    pub fn from_file(path: &str) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &str) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Parses `--flag value` pairs from an iterator of CLI args (skip
    /// `argv[0]` before calling), overriding a `Default` base. Unknown
    /// flags are ignored rather than rejected, matching the permissive
    /// `std::env::args` scanning the binaries use elsewhere.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> ConfigResult<Self> {
        let mut params = Self::default();
        let mut iter = args.into_iter().peekable();
        while let Some(flag) = iter.next() {
            if !flag.starts_with("--") {
                continue;
            }
            let value = iter
                .next()
                .ok_or_else(|| ConfigError::MissingValue(flag.clone()))?;
            params.apply_flag(&flag[2..], &value)?;
        }
        Ok(params)
    }

    fn apply_flag(&mut self, flag: &str, value: &str) -> ConfigResult<()> {
        let parse_u64 = |v: &str| -> ConfigResult<u64> {
            v.parse().map_err(|_| ConfigError::InvalidValue {
                flag: flag.to_string(),
                value: v.to_string(),
                reason: "expected an integer".to_string(),
            })
        };
        let parse_usize = |v: &str| -> ConfigResult<usize> {
            v.parse().map_err(|_| ConfigError::InvalidValue {
                flag: flag.to_string(),
                value: v.to_string(),
                reason: "expected an integer".to_string(),
            })
        };
        let parse_u32 = |v: &str| -> ConfigResult<u32> {
            v.parse().map_err(|_| ConfigError::InvalidValue {
                flag: flag.to_string(),
                value: v.to_string(),
                reason: "expected an integer".to_string(),
            })
        };

        match flag {
            "capacity_mb" => self.capacity_mb = parse_u64(value)?,
            "cache_name" => {
                self.cache_name = PolicyName::parse(value)
                    .ok_or_else(|| ConfigError::UnknownPolicy(value.to_string()))?
            }
            "hash_name" => self.hash_name = value.to_string(),
            "edgecnt" => self.edgecnt = parse_u32(value)?,
            "propagation_latency_clientedge_us" => self.propagation.client_edge_us = parse_u64(value)?,
            "propagation_latency_crossedge_us" => self.propagation.cross_edge_us = parse_u64(value)?,
            "propagation_latency_edgecloud_us" => self.propagation.edge_cloud_us = parse_u64(value)?,
            "percacheserver_workercnt" => self.percacheserver_workercnt = parse_usize(value)?,
            "covered_topk_edgecnt" => self.covered.topk_edgecnt = parse_usize(value)?,
            "covered_peredge_synced_victimcnt" => self.covered.peredge_synced_victimcnt = parse_usize(value)?,
            "rng_seed" => self.rng_seed = parse_u64(value)?,
            "writelock_wait_timeout_ms" => {
                self.writelock_wait_timeout = Duration::from_millis(parse_u64(value)?)
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let params = Params::default();
        assert_eq!(params.capacity_bytes(), 64 * 1024 * 1024);
        assert_eq!(params.cache_name, PolicyName::Lru);
    }

    #[test]
    fn from_args_overrides_selected_fields() {
        let args = vec![
            "--capacity_mb".to_string(),
            "128".to_string(),
            "--cache_name".to_string(),
            "wtinylfu".to_string(),
            "--edgecnt".to_string(),
            "8".to_string(),
            "--covered_topk_edgecnt".to_string(),
            "5".to_string(),
        ];
        let params = Params::from_args(args).unwrap();
        assert_eq!(params.capacity_mb, 128);
        assert_eq!(params.cache_name, PolicyName::WTinyLfu);
        assert_eq!(params.edgecnt, 8);
        assert_eq!(params.covered.topk_edgecnt, 5);
    }

    #[test]
    fn unknown_policy_name_is_an_error() {
        let args = vec!["--cache_name".to_string(), "nope".to_string()];
        assert!(matches!(
            Params::from_args(args),
            Err(ConfigError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn missing_value_for_a_flag_is_an_error() {
        let args = vec!["--capacity_mb".to_string()];
        assert!(matches!(
            Params::from_args(args),
            Err(ConfigError::MissingValue(_))
        ));
    }
}
