use anyhow::{Context, anyhow};
use scanflow_core::scan::ScanConfig;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Path of a TOML or JSON scanner config file.
pub const CONFIG_PATH_ENV: &str = "SCANNER_CONFIG_PATH";
/// Inline JSON scanner config.
pub const CONFIG_JSON_ENV: &str = "SCANNER_CONFIG_JSON";

const DEFAULT_CANDIDATES: &[&str] = &[
    "scanner.toml",
    "scanner.json",
    "config/scanner.toml",
    "config/scanner.json",
];

/// Source that produced the scanner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScannerConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level scanner settings.
///
/// The engine knobs sit at the top level of the file:
///
/// ```toml
/// log_filter = "scan::jobs=debug,info"
///
/// [progress]
/// sample_every = 500
/// heartbeat_ms = 250
///
/// [discovery]
/// include_hidden = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Progress sampling, traversal defaults and event bus sizing.
    #[serde(flatten)]
    pub scan: ScanConfig,
    /// Tracing filter directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl ScannerConfig {
    /// Load scanner configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$SCANNER_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SCANNER_CONFIG_JSON` (inline JSON),
    /// 3) the first default file found in the working directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ScannerConfigSource)> {
        let cwd = env::current_dir().context("failed to read working directory")?;
        Self::load_with(|key| env::var(key).ok(), &cwd)
    }

    /// [`ScannerConfig::load_from_env`] with an explicit variable lookup and
    /// search directory for the default file candidates.
    pub fn load_with(
        lookup: impl Fn(&str) -> Option<String>,
        search_root: &Path,
    ) -> anyhow::Result<(Self, ScannerConfigSource)> {
        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ScannerConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((parsed, ScannerConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(search_root) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ScannerConfigSource::File(path)));
        }

        debug!("no scanner config found, using defaults");
        Ok((Self::default(), ScannerConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read scanner config from {}", path.display())
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid scanner config {}", path.display())
            })?,
            Some("toml") | Some("tml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid scanner config {}: {}", path.display(), err)
            })?,
            _ => Self::parse_from_str(&contents, &path.display().to_string())?,
        };
        config.validate().with_context(|| {
            format!("invalid scanner config {}", path.display())
        })?;
        Ok(config)
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON for convenience.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse scanner config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid scanner config json: {err}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.scan
            .validate()
            .map_err(|err| anyhow!("scanner config rejected: {err}"))
    }

    fn find_default_file(root: &Path) -> Option<PathBuf> {
        DEFAULT_CANDIDATES
            .iter()
            .map(|candidate| root.join(candidate))
            .find(|path| path.exists())
    }
}
