//! Geometry → ISO3 reconciliation.
//!
//! Topology sources disagree on how they label countries: Natural Earth
//! carries `ISO_A3`/`ADM0_A3` (with `-99` holes), world-atlas only carries
//! the numeric id, and some files have nothing but a display name. A
//! [`Resolver`] runs a list of [`ResolveStrategy`]s in order and takes the
//! first code one of them produces.

use std::collections::HashMap;

use geo::{BoundingRect, MultiPolygon};
use serde::Serialize;

use crate::codes::{ISO_NUMERIC, NAME_ALIASES};
use crate::config::ResolverConfig;
use crate::data::{GeoFeature, NameIndex, RowSet};

pub const DEFAULT_PROPERTY_KEYS: [&str; 7] =
    ["ISO_A3", "ADM0_A3", "SOV_A3", "WB_A3", "ISO3", "iso3", "iso_a3"];

/// Values providers use for "no code".
const SENTINELS: [&str; 2] = ["-99", "ATA"];

const NUMERIC_ID_KEYS: [&str; 4] = ["id", "ISO_N3", "iso_n3", "ISO_NUM"];

/// Uppercased 3-letter code, or `None` for blanks, sentinels and junk.
pub fn normalize_iso3(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if SENTINELS.contains(&code.as_str()) {
        return None;
    }
    Some(code)
}

/// Lowercase, unify apostrophes, collapse whitespace.
pub fn normalize_name(raw: &str) -> String {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' | '`' | '\u{00b4}' | '\u{02bc}' => '\'',
            other => other,
        })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Midpoint of the bounding box over every ring; `None` for empty geometry.
pub fn bbox_centroid(geometry: &MultiPolygon<f64>) -> Option<(f64, f64)> {
    let rect = geometry.bounding_rect()?;
    let c = rect.center();
    Some((c.x, c.y))
}

/// Lookup data the strategies consult. Built from the static tables and
/// extended from configuration.
#[derive(Clone, Debug)]
pub struct CodeTables {
    pub numeric: HashMap<String, String>,
    pub aliases: HashMap<String, String>,
}

impl Default for CodeTables {
    fn default() -> Self {
        Self {
            numeric: ISO_NUMERIC.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            aliases: NAME_ALIASES.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }
}

impl CodeTables {
    pub fn with_aliases<I, K, V>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (k, v) in extra {
            self.aliases.insert(normalize_name(k.as_ref()), normalize_name(v.as_ref()));
        }
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    PropertyKey,
    NumericId,
    NameAlias,
}

pub struct ResolveContext<'a> {
    pub tables: &'a CodeTables,
    pub names: &'a NameIndex,
}

/// One way of finding a feature's code. Must be pure.
pub trait ResolveStrategy: Send + Sync {
    fn kind(&self) -> Strategy;
    fn resolve(&self, feature: &GeoFeature, ctx: &ResolveContext<'_>) -> Option<String>;
}

pub struct PropertyKeys {
    keys: Vec<String>,
}

impl PropertyKeys {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { keys: keys.into_iter().map(Into::into).collect() }
    }
}

impl Default for PropertyKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PROPERTY_KEYS)
    }
}

impl ResolveStrategy for PropertyKeys {
    fn kind(&self) -> Strategy {
        Strategy::PropertyKey
    }

    fn resolve(&self, feature: &GeoFeature, _ctx: &ResolveContext<'_>) -> Option<String> {
        self.keys
            .iter()
            .filter_map(|k| feature.property_str(k))
            .find_map(|v| normalize_iso3(&v))
    }
}

pub struct NumericId;

impl NumericId {
    fn padded(raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > 3 || !raw.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let n: u16 = raw.parse().ok()?;
        Some(format!("{n:03}"))
    }
}

impl ResolveStrategy for NumericId {
    fn kind(&self) -> Strategy {
        Strategy::NumericId
    }

    fn resolve(&self, feature: &GeoFeature, ctx: &ResolveContext<'_>) -> Option<String> {
        std::iter::once(feature.id_str())
            .chain(NUMERIC_ID_KEYS.iter().map(|k| feature.property_str(k)))
            .flatten()
            .filter_map(|raw| Self::padded(&raw))
            .find_map(|key| ctx.tables.numeric.get(&key).and_then(|c| normalize_iso3(c)))
    }
}

pub struct NameAlias;

impl ResolveStrategy for NameAlias {
    fn kind(&self) -> Strategy {
        Strategy::NameAlias
    }

    fn resolve(&self, feature: &GeoFeature, ctx: &ResolveContext<'_>) -> Option<String> {
        let name = normalize_name(&feature.display_name()?);
        let canonical = ctx.tables.aliases.get(&name).map(String::as_str).unwrap_or(&name);
        ctx.names
            .get(canonical)
            .or_else(|| ctx.names.get(&name))
            .map(str::to_string)
    }
}

/// Drop geometries for `iso3` whose centroid lies west of `min_centroid_lon`.
///
/// Covers topology files that ship an overseas territory as a second
/// feature under its parent's code (French Guiana under `FRA`).
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateRule {
    pub iso3: String,
    pub min_centroid_lon: f64,
}

impl DuplicateRule {
    pub fn france() -> Self {
        Self { iso3: "FRA".to_string(), min_centroid_lon: -30.0 }
    }

    pub fn discards(&self, iso3: &str, geometry: Option<&MultiPolygon<f64>>) -> bool {
        if self.iso3 != iso3 {
            return false;
        }
        match geometry.and_then(bbox_centroid) {
            Some((lon, _)) => lon < self.min_centroid_lon,
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Code { iso3: String, via: Strategy },
    /// Resolved, but removed by a duplicate rule; not drawn, not clickable.
    Duplicate { iso3: String },
    Unresolved,
}

impl Resolution {
    /// The code a drawn feature carries; `None` for dropped or unresolved.
    pub fn iso3(&self) -> Option<&str> {
        match self {
            Resolution::Code { iso3, .. } => Some(iso3),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedFeature {
    pub index: usize,
    #[serde(flatten)]
    pub resolution: Resolution,
}

pub struct Resolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
    tables: CodeTables,
    duplicate_rules: Vec<DuplicateRule>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(CodeTables::default())
    }
}

impl Resolver {
    pub fn new(tables: CodeTables) -> Self {
        Self::with_keys(tables, PropertyKeys::default())
    }

    fn with_keys(tables: CodeTables, keys: PropertyKeys) -> Self {
        Self { strategies: Vec::new(), tables, duplicate_rules: vec![DuplicateRule::france()] }
            .with_strategy(Box::new(keys))
            .with_strategy(Box::new(NumericId))
            .with_strategy(Box::new(NameAlias))
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        let tables = CodeTables::default().with_aliases(&config.aliases);
        let keys = if config.property_keys.is_empty() {
            PropertyKeys::default()
        } else {
            PropertyKeys::new(config.property_keys.clone())
        };
        let mut resolver = Self::with_keys(tables, keys);
        if let Some(rules) = &config.duplicate_rules {
            resolver.duplicate_rules = rules
                .iter()
                .filter_map(|r| {
                    normalize_iso3(&r.iso3)
                        .map(|iso3| DuplicateRule { iso3, min_centroid_lon: r.min_centroid_lon })
                })
                .collect();
        }
        resolver
    }

    /// Appends a strategy; it runs after every strategy already present.
    pub fn with_strategy(mut self, strategy: Box<dyn ResolveStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// First strategy that yields a code wins.
    pub fn resolve(&self, feature: &GeoFeature, names: &NameIndex) -> Resolution {
        let ctx = ResolveContext { tables: &self.tables, names };
        self.strategies
            .iter()
            .find_map(|s| s.resolve(feature, &ctx).map(|iso3| Resolution::Code { iso3, via: s.kind() }))
            .unwrap_or(Resolution::Unresolved)
    }

    /// Resolves every feature against the current rows and applies the
    /// duplicate rules.
    pub fn reconcile(&self, features: &[GeoFeature], rows: &RowSet) -> Vec<ResolvedFeature> {
        features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let resolution = match self.resolve(feature, rows.names()) {
                    Resolution::Code { iso3, .. }
                        if self
                            .duplicate_rules
                            .iter()
                            .any(|r| r.discards(&iso3, feature.geometry.as_ref())) =>
                    {
                        Resolution::Duplicate { iso3 }
                    }
                    other => other,
                };
                ResolvedFeature { index, resolution }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::IndicatorRow;
    use geo::{polygon, MultiPolygon};
    use serde_json::{json, Map, Value};

    fn feature(props: Value, id: Option<Value>) -> GeoFeature {
        let properties: Map<String, Value> = props.as_object().cloned().unwrap_or_default();
        GeoFeature { id, properties, geometry: None }
    }

    fn square(lon: f64, lat: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: lon - 1.0, y: lat - 1.0),
            (x: lon + 1.0, y: lat - 1.0),
            (x: lon + 1.0, y: lat + 1.0),
            (x: lon - 1.0, y: lat + 1.0),
            (x: lon - 1.0, y: lat - 1.0),
        ]])
    }

    #[test]
    fn iso3_normalization() {
        assert_eq!(normalize_iso3(" fra ").as_deref(), Some("FRA"));
        assert_eq!(normalize_iso3("-99"), None);
        assert_eq!(normalize_iso3("ATA"), None);
        assert_eq!(normalize_iso3("FR"), None);
        assert_eq!(normalize_iso3("F1A"), None);
        assert_eq!(normalize_iso3(""), None);
    }

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_name("  Côte  d’Ivoire \n"), "côte d'ivoire");
        assert_eq!(normalize_name("Korea, Dem. People`s Rep."), "korea, dem. people's rep.");
    }

    #[test]
    fn property_keys_skip_sentinels_in_priority_order() {
        let resolver = Resolver::default();
        let names = NameIndex::default();
        let f = feature(json!({"ISO_A3": "-99", "ADM0_A3": " nor ", "SOV_A3": "SWE"}), None);
        assert_eq!(
            resolver.resolve(&f, &names),
            Resolution::Code { iso3: "NOR".into(), via: Strategy::PropertyKey }
        );
    }

    #[test]
    fn numeric_id_is_zero_padded() {
        let resolver = Resolver::default();
        let names = NameIndex::default();
        for id in [json!("4"), json!("004"), json!(4)] {
            let f = feature(json!({"name": "Afghanistan"}), Some(id));
            assert_eq!(
                resolver.resolve(&f, &names),
                Resolution::Code { iso3: "AFG".into(), via: Strategy::NumericId }
            );
        }
        let antarctica = feature(json!({}), Some(json!("010")));
        assert_eq!(resolver.resolve(&antarctica, &names), Resolution::Unresolved);
    }

    #[test]
    fn name_fallback_uses_rows() {
        let resolver = Resolver::default();
        let rows = RowSet::new(vec![IndicatorRow::new("RUS", "Russian Federation", Some(1.0))]);
        let f = feature(json!({"name": "Russia"}), Some(json!("-99")));
        assert_eq!(
            resolver.resolve(&f, rows.names()),
            Resolution::Code { iso3: "RUS".into(), via: Strategy::NameAlias }
        );
        let unknown = feature(json!({"name": "Atlantis"}), None);
        assert_eq!(resolver.resolve(&unknown, rows.names()), Resolution::Unresolved);
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = Resolver::default();
        let rows = RowSet::new(vec![IndicatorRow::new("KOR", "Korea, Rep.", Some(1.0))]);
        let features = vec![
            feature(json!({"ISO_A3": "DEU"}), None),
            feature(json!({}), Some(json!(250))),
            feature(json!({"name": "South Korea"}), None),
            feature(json!({"name": "Nowhere"}), None),
        ];
        for f in &features {
            let first = resolver.resolve(f, rows.names());
            let second = resolver.resolve(f, rows.names());
            assert_eq!(first, second);
        }
        assert_eq!(resolver.reconcile(&features, &rows), resolver.reconcile(&features, &rows));
    }

    #[test]
    fn every_alias_resolves_like_its_canonical_name() {
        let resolver = Resolver::default();
        let mut canonical: Vec<&str> = NAME_ALIASES.values().copied().collect();
        canonical.sort_unstable();
        canonical.dedup();
        let rows = RowSet::new(canonical.iter().enumerate().map(|(i, name)| {
            let code: String = [b'A' + (i / 26) as u8, b'A' + (i % 26) as u8, b'Q']
                .iter()
                .map(|&b| b as char)
                .collect();
            IndicatorRow::new(&code, name, Some(i as f64))
        }));

        for (alias, target) in NAME_ALIASES.iter() {
            let by_alias = resolver.resolve(&feature(json!({"name": alias}), None), rows.names());
            let by_name = resolver.resolve(&feature(json!({"name": target}), None), rows.names());
            assert!(by_alias.iso3().is_some(), "{alias} did not resolve");
            assert_eq!(by_alias.iso3(), by_name.iso3(), "{alias} vs {target}");
        }
    }

    #[test]
    fn configured_aliases_are_normalized() {
        let tables = CodeTables::default().with_aliases([("  Czechia ", "Czech  Republic")]);
        let resolver = Resolver::new(tables);
        let rows = RowSet::new(vec![IndicatorRow::new("CZE", "Czech Republic", None)]);
        let f = feature(json!({"NAME": "CZECHIA"}), None);
        assert_eq!(resolver.resolve(&f, rows.names()).iso3(), Some("CZE"));
    }

    #[test]
    fn western_france_geometry_is_dropped() {
        let resolver = Resolver::default();
        let rows = RowSet::default();
        let mut mainland = feature(json!({"ISO_A3": "FRA"}), None);
        mainland.geometry = Some(square(2.0, 46.0));
        let mut guiana = feature(json!({"ISO_A3": "FRA"}), None);
        guiana.geometry = Some(square(-53.0, 4.0));

        let out = resolver.reconcile(&[mainland.clone(), guiana], &rows);
        assert_eq!(out[0].resolution.iso3(), Some("FRA"));
        assert_eq!(out[1].resolution, Resolution::Duplicate { iso3: "FRA".into() });

        let alone = resolver.reconcile(&[mainland], &rows);
        assert_eq!(alone[0].resolution.iso3(), Some("FRA"));
    }

    #[test]
    fn duplicate_rule_ignores_other_codes_and_empty_geometry() {
        let rule = DuplicateRule::france();
        assert!(!rule.discards("BRA", Some(&square(-53.0, -10.0))));
        assert!(!rule.discards("FRA", None));
        assert!(!rule.discards("FRA", Some(&MultiPolygon::new(vec![]))));
    }

    #[test]
    fn config_replaces_keys_and_rules() {
        let config: ResolverConfig = toml::from_str(
            r#"
            property_keys = ["GU_A3"]
            duplicate_rules = []
            "#,
        )
        .unwrap();
        let resolver = Resolver::from_config(&config);
        let rows = RowSet::default();
        let f = feature(json!({"ISO_A3": "DEU", "GU_A3": "FXX"}), None);
        assert_eq!(resolver.resolve(&f, rows.names()).iso3(), Some("FXX"));

        let mut guiana = feature(json!({"GU_A3": "FRA"}), None);
        guiana.geometry = Some(square(-53.0, 4.0));
        assert_eq!(resolver.reconcile(&[guiana], &rows)[0].resolution.iso3(), Some("FRA"));
    }

    struct FixedSubunit;

    impl ResolveStrategy for FixedSubunit {
        fn kind(&self) -> Strategy {
            Strategy::PropertyKey
        }

        fn resolve(&self, feature: &GeoFeature, _ctx: &ResolveContext<'_>) -> Option<String> {
            (feature.properties.get("SUBUNIT")?.as_str()? == "Somaliland").then(|| "SOM".to_string())
        }
    }

    #[test]
    fn extra_strategy_runs_after_builtins() {
        let resolver = Resolver::default().with_strategy(Box::new(FixedSubunit));
        let rows = RowSet::default();
        let f = feature(json!({"SUBUNIT": "Somaliland"}), None);
        assert_eq!(resolver.resolve(&f, rows.names()).iso3(), Some("SOM"));

        let coded = feature(json!({"ISO_A3": "ETH", "SUBUNIT": "Somaliland"}), None);
        assert_eq!(resolver.resolve(&coded, rows.names()).iso3(), Some("ETH"));
    }
}
