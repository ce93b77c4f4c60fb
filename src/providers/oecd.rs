//! OECD SDMX-JSON data messages.
//!
//! Series keys such as `"0:3:1"` are positions into the series dimensions'
//! `values` arrays; observation keys index the observation dimension
//! (normally `TIME_PERIOD`). Decoding turns both back into ids.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use super::{endpoint, get_json, number};
use crate::error::{AppError, ParseError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SdmxObservation {
    /// Series dimension id → value id, e.g. `REF_AREA → USA`.
    pub series: BTreeMap<String, String>,
    pub period: String,
    pub value: Option<f64>,
}

#[derive(Debug)]
struct Dimension {
    id: String,
    values: Vec<String>,
}

fn dimensions(structure: &Value, kind: &str) -> Result<Vec<Dimension>, ParseError> {
    let path = format!("structure.dimensions.{kind}");
    let Some(list) = structure.get("dimensions").and_then(|d| d.get(kind)) else {
        return Ok(Vec::new());
    };
    let list = list.as_array().ok_or_else(|| ParseError::shape(path.clone(), "array"))?;
    list.iter()
        .enumerate()
        .map(|(i, d)| {
            let id = d
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::shape(format!("{path}[{i}].id"), "string"))?;
            let values = d
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| {
                    vs.iter()
                        .map(|v| v.get("id").and_then(Value::as_str).unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default();
            Ok(Dimension { id: id.to_string(), values })
        })
        .collect()
}

fn decode_key(key: &str, dims: &[Dimension]) -> Option<BTreeMap<String, String>> {
    if key.is_empty() {
        return Some(BTreeMap::new());
    }
    key.split(':')
        .zip(dims)
        .map(|(pos, dim)| {
            let i: usize = pos.parse().ok()?;
            Some((dim.id.clone(), dim.values.get(i)?.clone()))
        })
        .collect()
}

/// Accepts both `{ data: { dataSets, structure } }` and the older
/// top-level `{ dataSets, structure }` layout.
pub fn parse(root: &Value) -> Result<Vec<SdmxObservation>, ParseError> {
    let msg = root.get("data").unwrap_or(root);
    let structure = msg
        .get("structure")
        .or_else(|| msg.get("structures").and_then(|s| s.get(0)))
        .ok_or_else(|| ParseError::shape("data.structure", "object"))?;
    let series_dims = dimensions(structure, "series")?;
    let obs_dims = dimensions(structure, "observation")?;
    let period_dim = obs_dims.first();

    let dataset = msg
        .get("dataSets")
        .and_then(|d| d.get(0))
        .ok_or_else(|| ParseError::shape("data.dataSets[0]", "object"))?;
    let Some(series) = dataset.get("series").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for (key, s) in series {
        let Some(dims) = decode_key(key, &series_dims) else { continue };
        let Some(observations) = s.get("observations").and_then(Value::as_object) else { continue };
        for (obs_key, obs) in observations {
            let period = match period_dim {
                Some(d) => obs_key.parse::<usize>().ok().and_then(|i| d.values.get(i)).cloned(),
                None => Some(obs_key.clone()),
            };
            let Some(period) = period else { continue };
            out.push(SdmxObservation {
                series: dims.clone(),
                period,
                value: number(obs.get(0)),
            });
        }
    }
    out.sort_by(|a, b| a.series.cmp(&b.series).then_with(|| a.period.cmp(&b.period)));
    Ok(out)
}

pub fn url(base: &str, dataset: &str, key: &str) -> Result<Url, AppError> {
    let key = if key.is_empty() { "all" } else { key };
    let mut url = endpoint(base, &["data", dataset, key])?;
    url.query_pairs_mut()
        .append_pair("format", "jsondata")
        .append_pair("dimensionAtObservation", "TIME_PERIOD");
    Ok(url)
}

pub async fn fetch(http: &reqwest::Client, base: &str, dataset: &str, key: &str) -> Result<Vec<SdmxObservation>, AppError> {
    let body = get_json(http, url(base, dataset, key)?).await?;
    Ok(parse(&body)?)
}
