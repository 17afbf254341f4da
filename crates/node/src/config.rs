//! Node configuration, read from a TOML file.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Command-line flags override the file through [`NodeConfig::apply_overrides`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tessera_topo::{Affinity, PageThresholds};

use crate::error::NodeError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub funk: FunkConfig,

    #[serde(default)]
    pub hugetlbfs: HugetlbfsConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutConfig {
    /// `auto`, or one CPU entry per tile in creation order.
    #[serde(default)]
    pub affinity: Affinity,

    #[serde(default = "default_exec_tile_count")]
    pub exec_tile_count: usize,

    #[serde(default = "default_verify_tile_count")]
    pub verify_tile_count: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            affinity: Affinity::Auto,
            exec_tile_count: default_exec_tile_count(),
            verify_tile_count: default_verify_tile_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Depth of the signature tag cache.
    #[serde(default = "default_signature_cache_size")]
    pub signature_cache_size: usize,

    /// Depth of each `verify_dedup` link.
    #[serde(default = "default_verify_depth")]
    pub verify_depth: u64,

    /// Depth of the `dedup_pack` link.
    #[serde(default = "default_pack_depth")]
    pub pack_depth: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            signature_cache_size: default_signature_cache_size(),
            verify_depth: default_verify_depth(),
            pack_depth: default_pack_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    /// Scratch pad size of each exec tile, in MiB.
    #[serde(default = "default_spad_mb")]
    pub spad_mb: usize,

    /// Slots that may be in flight (unrooted) at once.
    #[serde(default = "default_max_live_slots")]
    pub max_live_slots: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            spad_mb: default_spad_mb(),
            max_live_slots: default_max_live_slots(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunkConfig {
    #[serde(default = "default_max_account_records")]
    pub max_account_records: usize,

    #[serde(default = "default_max_txns")]
    pub max_txns: usize,
}

impl Default for FunkConfig {
    fn default() -> Self {
        Self {
            max_account_records: default_max_account_records(),
            max_txns: default_max_txns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HugetlbfsConfig {
    /// Workspaces at least this large move to 2 MiB pages.
    #[serde(default = "default_huge_page_threshold_mib")]
    pub huge_page_threshold_mib: usize,

    /// Workspaces at least this large move to 1 GiB pages.
    #[serde(default = "default_gigantic_page_threshold_mib")]
    pub gigantic_page_threshold_mib: usize,
}

impl Default for HugetlbfsConfig {
    fn default() -> Self {
        Self {
            huge_page_threshold_mib: default_huge_page_threshold_mib(),
            gigantic_page_threshold_mib: default_gigantic_page_threshold_mib(),
        }
    }
}

impl HugetlbfsConfig {
    pub fn thresholds(&self) -> PageThresholds {
        PageThresholds {
            huge_bytes: self.huge_page_threshold_mib << 20,
            gigantic_bytes: self.gigantic_page_threshold_mib << 20,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckpointConfig {
    /// Persisted layout of the named objects. Written on first start,
    /// verified on every later one.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: None,
        }
    }
}

fn default_exec_tile_count() -> usize {
    4
}

fn default_verify_tile_count() -> usize {
    2
}

fn default_signature_cache_size() -> usize {
    4_194_302
}

fn default_verify_depth() -> u64 {
    16384
}

fn default_pack_depth() -> u64 {
    65536
}

fn default_spad_mb() -> usize {
    128
}

fn default_max_live_slots() -> usize {
    512
}

fn default_max_account_records() -> usize {
    1 << 20
}

fn default_max_txns() -> usize {
    1024
}

fn default_huge_page_threshold_mib() -> usize {
    16
}

fn default_gigantic_page_threshold_mib() -> usize {
    2048
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Command-line values win over the file.
    pub fn apply_overrides(&mut self, log_level: Option<&str>, logfile: Option<&Path>) {
        if let Some(level) = log_level {
            self.log.level = level.to_string();
        }
        if let Some(path) = logfile {
            self.log.path = Some(path.to_path_buf());
        }
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.layout.exec_tile_count == 0 {
            return Err(NodeError::InvalidConfig(
                "exec_tile_count must be at least 1".to_string(),
            ));
        }
        if self.layout.verify_tile_count == 0 {
            return Err(NodeError::InvalidConfig(
                "verify_tile_count must be at least 1".to_string(),
            ));
        }
        if self.exec.spad_mb == 0 {
            return Err(NodeError::InvalidConfig(
                "spad_mb must be at least 1".to_string(),
            ));
        }
        // Each live slot holds one funk transaction.
        if self.funk.max_txns < self.exec.max_live_slots {
            return Err(NodeError::InvalidConfig(format!(
                "funk max_txns ({}) is below exec max_live_slots ({})",
                self.funk.max_txns, self.exec.max_live_slots
            )));
        }
        let pages = self.hugetlbfs.thresholds();
        if pages.gigantic_bytes < pages.huge_bytes {
            return Err(NodeError::InvalidConfig(
                "gigantic_page_threshold_mib is below huge_page_threshold_mib".to_string(),
            ));
        }
        Ok(())
    }

    /// Scratch pad size of each exec tile, in bytes.
    pub fn spad_mem_max(&self) -> usize {
        self.exec.spad_mb << 20
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_takes_defaults() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config.layout.affinity, Affinity::Auto);
        assert_eq!(config.layout.exec_tile_count, 4);
        assert_eq!(config.dedup.signature_cache_size, 4_194_302);
        assert_eq!(config.dedup.pack_depth, 65536);
        assert_eq!(config.spad_mem_max(), 128 << 20);
        assert_eq!(config.log.level, "info");
        assert!(config.checkpoint.path.is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = NodeConfig::parse(
            r#"
            [layout]
            affinity = "1-3,f2"
            exec_tile_count = 2
            verify_tile_count = 3

            [dedup]
            signature_cache_size = 1024

            [exec]
            spad_mb = 8
            max_live_slots = 16

            [funk]
            max_txns = 32

            [hugetlbfs]
            huge_page_threshold_mib = 4

            [checkpoint]
            path = "/var/lib/tessera/layout.toml"

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.layout.affinity,
            Affinity::List(vec![Some(1), Some(2), Some(3), None, None])
        );
        assert_eq!(config.layout.verify_tile_count, 3);
        assert_eq!(config.dedup.signature_cache_size, 1024);
        assert_eq!(config.dedup.verify_depth, 16384);
        assert_eq!(config.spad_mem_max(), 8 << 20);
        assert_eq!(config.hugetlbfs.thresholds().huge_bytes, 4 << 20);
        assert_eq!(config.hugetlbfs.thresholds().gigantic_bytes, 2048 << 20);
        assert_eq!(
            config.checkpoint.path.as_deref(),
            Some(Path::new("/var/lib/tessera/layout.toml"))
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_bad_affinity_is_rejected() {
        assert!(NodeConfig::parse("[layout]\naffinity = \"3-1\"").is_err());
    }

    #[test]
    fn test_funk_must_hold_every_live_slot() {
        let err = NodeConfig::parse("[exec]\nmax_live_slots = 64\n[funk]\nmax_txns = 8")
            .unwrap_err();
        assert!(err.to_string().contains("max_live_slots"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = NodeConfig::parse("[log]\nlevel = \"warn\"").unwrap();
        config.apply_overrides(Some("trace"), Some(Path::new("/tmp/tessera.log")));
        assert_eq!(config.log.level, "trace");
        assert_eq!(config.log.path.as_deref(), Some(Path::new("/tmp/tessera.log")));
    }
}
