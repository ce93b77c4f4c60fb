//! Loading country shapes from GeoJSON or TopoJSON.

use std::fs;

use anyhow::{Context, Result, anyhow};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use geojson::GeoJson;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::data::GeoFeature;
use crate::error::{ParseError, message_from_body};

/// Reads `source` (a path or an `http(s)` URL) and decodes its features.
pub async fn load(source: &str, object: Option<&str>, http: &reqwest::Client) -> Result<Vec<GeoFeature>> {
    let text = if source.starts_with("http://") || source.starts_with("https://") {
        let resp = http
            .get(source)
            .send()
            .await
            .with_context(|| format!("Failed to fetch topology {source}"))?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read topology body")?;
        if !status.is_success() {
            return Err(anyhow!("Topology {source}: {}", message_from_body(status, &body)));
        }
        body
    } else {
        fs::read_to_string(source).with_context(|| format!("Failed to read topology {source}"))?
    };
    let features = parse(&text, object).with_context(|| format!("Failed to decode topology {source}"))?;
    info!("Loaded {} features from {}", features.len(), source);
    Ok(features)
}

pub fn parse(text: &str, object: Option<&str>) -> Result<Vec<GeoFeature>, ParseError> {
    let root: Value = serde_json::from_str(text)?;
    if root.get("type").and_then(Value::as_str) == Some("Topology") {
        return decode_topojson(&root, object);
    }
    let gj = GeoJson::from_json_value(root).map_err(|e| ParseError::Json(e.to_string()))?;
    match gj {
        GeoJson::FeatureCollection(fc) => Ok(fc.features.into_iter().map(from_geojson_feature).collect()),
        GeoJson::Feature(f) => Ok(vec![from_geojson_feature(f)]),
        GeoJson::Geometry(_) => Err(ParseError::shape("$", "FeatureCollection or Topology")),
    }
}

fn from_geojson_feature(feature: geojson::Feature) -> GeoFeature {
    let id = feature.id.map(|id| match id {
        geojson::feature::Id::String(s) => Value::String(s),
        geojson::feature::Id::Number(n) => Value::Number(n),
    });
    let geometry = feature.geometry.and_then(|g| {
        let geom: geo::Geometry<f64> = g.value.try_into().ok()?;
        match geom {
            geo::Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
            geo::Geometry::MultiPolygon(m) => Some(m),
            _ => None,
        }
    });
    GeoFeature { id, properties: feature.properties.unwrap_or_default(), geometry }
}

struct Transform {
    scale: [f64; 2],
    translate: [f64; 2],
}

fn pair(v: &Value) -> Option<[f64; 2]> {
    let a = v.as_array()?;
    Some([a.first()?.as_f64()?, a.get(1)?.as_f64()?])
}

/// Decodes one object of a TopoJSON topology. Quantized topologies have
/// delta-encoded arcs; a negative arc index `i` means arc `!i` reversed.
pub fn decode_topojson(root: &Value, object: Option<&str>) -> Result<Vec<GeoFeature>, ParseError> {
    let transform = root.get("transform").and_then(|t| {
        Some(Transform { scale: pair(t.get("scale")?)?, translate: pair(t.get("translate")?)? })
    });

    let arcs: Vec<Vec<Coord<f64>>> = root
        .get("arcs")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::shape("arcs", "array"))?
        .iter()
        .map(|arc| decode_arc(arc, transform.as_ref()))
        .collect();

    let objects = root
        .get("objects")
        .and_then(Value::as_object)
        .ok_or_else(|| ParseError::shape("objects", "object"))?;
    let (name, obj) = match object {
        Some(name) => (name, objects.get(name).ok_or_else(|| ParseError::shape(format!("objects.{name}"), "object"))?),
        None => objects
            .iter()
            .next()
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ParseError::shape("objects", "at least one object"))?,
    };
    debug!(object = name, arcs = arcs.len(), "decoding topology");

    let geometries: Vec<&Value> = if obj.get("type").and_then(Value::as_str) == Some("GeometryCollection") {
        obj.get("geometries")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::shape(format!("objects.{name}.geometries"), "array"))?
            .iter()
            .collect()
    } else {
        vec![obj]
    };

    Ok(geometries
        .into_iter()
        .map(|g| GeoFeature {
            id: g.get("id").cloned(),
            properties: g.get("properties").and_then(Value::as_object).cloned().unwrap_or_else(Map::new),
            geometry: decode_geometry(g, &arcs),
        })
        .collect())
}

fn decode_arc(arc: &Value, transform: Option<&Transform>) -> Vec<Coord<f64>> {
    let Some(points) = arc.as_array() else { return Vec::new() };
    let mut out = Vec::with_capacity(points.len());
    let (mut x, mut y) = (0.0, 0.0);
    for p in points.iter().filter_map(pair) {
        match transform {
            Some(t) => {
                x += p[0];
                y += p[1];
                out.push(Coord { x: x * t.scale[0] + t.translate[0], y: y * t.scale[1] + t.translate[1] });
            }
            None => out.push(Coord { x: p[0], y: p[1] }),
        }
    }
    out
}

fn decode_ring(indices: &Value, arcs: &[Vec<Coord<f64>>]) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::new();
    for idx in indices.as_array()? {
        let i = idx.as_i64()?;
        let arc: Vec<Coord<f64>> = if i >= 0 {
            arcs.get(i as usize)?.clone()
        } else {
            let mut a = arcs.get(!i as usize)?.clone();
            a.reverse();
            a
        };
        let skip = usize::from(!coords.is_empty());
        coords.extend(arc.into_iter().skip(skip));
    }
    (coords.len() >= 4).then(|| LineString::new(coords))
}

fn decode_polygon(rings: &Value, arcs: &[Vec<Coord<f64>>]) -> Option<Polygon<f64>> {
    let mut rings = rings.as_array()?.iter().map(|r| decode_ring(r, arcs));
    let exterior = rings.next()??;
    let interiors: Vec<LineString<f64>> = rings.flatten().collect();
    Some(Polygon::new(exterior, interiors))
}

fn decode_geometry(g: &Value, arcs: &[Vec<Coord<f64>>]) -> Option<MultiPolygon<f64>> {
    let refs = g.get("arcs")?;
    match g.get("type")?.as_str()? {
        "Polygon" => Some(MultiPolygon::new(vec![decode_polygon(refs, arcs)?])),
        "MultiPolygon" => {
            let polys: Vec<Polygon<f64>> =
                refs.as_array()?.iter().filter_map(|p| decode_polygon(p, arcs)).collect();
            (!polys.is_empty()).then(|| MultiPolygon::new(polys))
        }
        _ => None,
    }
}
