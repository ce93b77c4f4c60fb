use std::collections::HashMap;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resolver::{normalize_iso3, normalize_name};

/// One country shape from a topology payload.
#[derive(Clone, Debug, Default)]
pub struct GeoFeature {
    /// Feature-level id (TopoJSON/GeoJSON `id`), often the ISO numeric code.
    pub id: Option<Value>,
    pub properties: Map<String, Value>,
    /// `None` when the source geometry was missing or not polygonal.
    pub geometry: Option<MultiPolygon<f64>>,
}

impl GeoFeature {
    /// Property as text; numbers are rendered without a fractional part.
    pub fn property_str(&self, key: &str) -> Option<String> {
        value_as_text(self.properties.get(key)?)
    }

    pub fn id_str(&self) -> Option<String> {
        value_as_text(self.id.as_ref()?)
    }

    pub fn display_name(&self) -> Option<String> {
        ["name", "NAME", "ADMIN", "NAME_LONG", "name_long"]
            .iter()
            .find_map(|k| self.property_str(k).filter(|s| !s.trim().is_empty()))
    }
}

pub(crate) fn value_as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(|f| {
                if f.fract() == 0.0 { format!("{}", f as i64) } else { f.to_string() }
            }),
        },
        _ => None,
    }
}

/// One `(iso3, country, region, value)` tuple from the route layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub iso3: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

impl IndicatorRow {
    pub fn new(iso3: &str, country: &str, value: Option<f64>) -> Self {
        Self { iso3: iso3.to_string(), country: country.to_string(), region: None, value }
    }

    /// Value only if it is finite.
    pub fn finite_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite())
    }
}

/// Normalized country name → ISO3, built from the current rows.
#[derive(Clone, Debug, Default)]
pub struct NameIndex {
    names: HashMap<String, String>,
}

impl NameIndex {
    pub fn insert(&mut self, name: &str, iso3: &str) {
        let key = normalize_name(name);
        if !key.is_empty() {
            self.names.entry(key).or_insert_with(|| iso3.to_string());
        }
    }

    /// `name` must already be normalized.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }
}

/// Rows keyed by ISO3. The first row seen for a code is authoritative.
#[derive(Clone, Debug, Default)]
pub struct RowSet {
    rows: Vec<IndicatorRow>,
    by_iso3: HashMap<String, usize>,
    names: NameIndex,
}

impl RowSet {
    pub fn new(rows: impl IntoIterator<Item = IndicatorRow>) -> Self {
        let mut set = RowSet::default();
        for mut row in rows {
            let Some(code) = normalize_iso3(&row.iso3) else { continue };
            if set.by_iso3.contains_key(&code) {
                continue;
            }
            row.iso3 = code.clone();
            set.names.insert(&row.country, &code);
            set.by_iso3.insert(code, set.rows.len());
            set.rows.push(row);
        }
        set
    }

    pub fn get(&self, iso3: &str) -> Option<&IndicatorRow> {
        self.by_iso3.get(iso3).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, iso3: &str) -> bool {
        self.by_iso3.contains_key(iso3)
    }

    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndicatorRow> {
        self.rows.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.rows.iter().map(|r| r.value)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest value first; rows without a finite value go last, in input order.
    pub fn ranked(&self) -> Vec<&IndicatorRow> {
        let mut ranked: Vec<&IndicatorRow> = self.rows.iter().collect();
        ranked.sort_by(|a, b| match (a.finite_value(), b.finite_value()) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_row_wins_on_duplicate_codes() {
        let set = RowSet::new(vec![
            IndicatorRow::new("fra", "France", Some(1.0)),
            IndicatorRow::new("FRA", "France (dup)", Some(2.0)),
            IndicatorRow::new("-99", "Nowhere", Some(3.0)),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("FRA").unwrap().value, Some(1.0));
        assert_eq!(set.names().get("france"), Some("FRA"));
    }

    #[test]
    fn ranked_puts_missing_values_last() {
        let set = RowSet::new(vec![
            IndicatorRow::new("AAA", "A", None),
            IndicatorRow::new("BBB", "B", Some(5.0)),
            IndicatorRow::new("CCC", "C", Some(f64::NAN)),
            IndicatorRow::new("DDD", "D", Some(9.0)),
        ]);
        let order: Vec<&str> = set.ranked().iter().map(|r| r.iso3.as_str()).collect();
        assert_eq!(order, vec!["DDD", "BBB", "AAA", "CCC"]);
    }

    #[test]
    fn feature_properties_render_numbers_as_text() {
        let mut properties = Map::new();
        properties.insert("ISO_N3".into(), json!(4));
        properties.insert("NAME".into(), json!("Afghanistan"));
        let f = GeoFeature { id: Some(json!(250.0)), properties, geometry: None };
        assert_eq!(f.property_str("ISO_N3").as_deref(), Some("4"));
        assert_eq!(f.id_str().as_deref(), Some("250"));
        assert_eq!(f.display_name().as_deref(), Some("Afghanistan"));
    }

    #[test]
    fn blank_name_falls_through_to_next_key() {
        let mut properties = Map::new();
        properties.insert("name".into(), json!("  "));
        properties.insert("NAME".into(), json!("France"));
        let f = GeoFeature { id: None, properties, geometry: None };
        assert_eq!(f.display_name().as_deref(), Some("France"));
        assert_eq!(GeoFeature::default().display_name(), None);
    }
}
