use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fmt::Display, fs, str::FromStr};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

pub const DB_URL_VAR: &str = "STRATIFY_DB_URL";
pub const DB_KEY_VAR: &str = "STRATIFY_DB_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub topology: TopologyConfig,
    pub resolver: ResolverConfig,
    pub browse: BrowseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8787, static_dir: PathBuf::from("static") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub worldbank_url: String,
    pub faostat_url: String,
    pub oecd_url: String,
    pub imf_url: String,
    /// Upper bound on World Bank pages followed for one request.
    pub worldbank_max_pages: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            worldbank_url: "https://api.worldbank.org/v2".to_string(),
            faostat_url: "https://faostatservices.fao.org/api/v1/en".to_string(),
            oecd_url: "https://sdmx.oecd.org/public/rest".to_string(),
            imf_url: "https://www.imf.org/external/datamapper/api/v1".to_string(),
            worldbank_max_pages: 10,
        }
    }
}

/// The one place the topology source is named; server and browser share it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TopologyConfig {
    pub source: String,
    /// TopoJSON object to decode; the first object when unset.
    pub object: Option<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self { source: "static/countries-110m.json".to_string(), object: None }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ResolverConfig {
    /// Replaces the built-in ISO3 property key order when non-empty.
    pub property_keys: Vec<String>,
    /// Extra colloquial name → canonical name entries.
    pub aliases: BTreeMap<String, String>,
    /// Replaces the built-in duplicate rules when present.
    pub duplicate_rules: Option<Vec<DuplicateRuleConfig>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DuplicateRuleConfig {
    pub iso3: String,
    pub min_centroid_lon: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrowseConfig {
    pub api_url: String,
    pub indicators: Vec<IndicatorConfig>,
    pub regions: Vec<String>,
    pub cache_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndicatorConfig {
    pub code: String,
    pub label: String,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        let indicators = [
            ("NY.GDP.MKTP.CD", "GDP (current US$)"),
            ("NY.GDP.PCAP.CD", "GDP per capita (current US$)"),
            ("SP.POP.TOTL", "Population, total"),
            ("EG.USE.PCAP.KG.OE", "Energy use per capita (kg oil eq.)"),
            ("GC.DOD.TOTL.GD.ZS", "Central government debt (% of GDP)"),
        ]
        .into_iter()
        .map(|(code, label)| IndicatorConfig { code: code.to_string(), label: label.to_string() })
        .collect();

        let regions = [
            "World",
            "East Asia & Pacific",
            "Europe & Central Asia",
            "Latin America & Caribbean",
            "Middle East & North Africa",
            "North America",
            "South Asia",
            "Sub-Saharan Africa",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            api_url: "http://127.0.0.1:8787".to_string(),
            indicators,
            regions,
            cache_capacity: 64,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Reads the file when it exists, otherwise starts from defaults; then
    /// applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            info!("{} not found, using built-in defaults", path.display());
            Self::default()
        };
        config.server.port = try_load("STRATIFY_PORT", config.server.port);
        Ok(config)
    }
}

/// Database credentials, read once and checked only when a procedure is
/// actually called.
#[derive(Debug, Clone, Default)]
pub struct DbCredentials {
    pub url: Option<String>,
    pub key: Option<String>,
}

impl DbCredentials {
    pub fn from_env() -> Self {
        let url = var(DB_URL_VAR).ok().filter(|s| !s.trim().is_empty());
        let key = var(DB_KEY_VAR).ok().filter(|s| !s.trim().is_empty());
        Self { url, key }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not set");
    })
}

fn try_load<T: FromStr + Display>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using {default}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [resolver]
            property_keys = ["GU_A3"]

            [resolver.aliases]
            "czechia" = "czech republic"

            [[resolver.duplicate_rules]]
            iso3 = "NOR"
            min_centroid_lon = -10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.static_dir, PathBuf::from("static"));
        assert_eq!(config.upstream.worldbank_max_pages, 10);
        assert_eq!(config.resolver.property_keys, vec!["GU_A3"]);
        assert_eq!(config.resolver.aliases["czechia"], "czech republic");
        assert_eq!(config.resolver.duplicate_rules.as_ref().unwrap()[0].iso3, "NOR");
        assert_eq!(config.browse.cache_capacity, 64);
        assert!(!config.browse.indicators.is_empty());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(config.topology.source, "static/countries-110m.json");
    }
}
