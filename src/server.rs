//! HTTP JSON API.
//!
//! Every API route answers HTTP 200 with `{ ok, error?, ...payload }` and
//! `Cache-Control: no-store`. Upstream failures are reported in-band.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{Method, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{AppConfig, DbCredentials};
use crate::data::RowSet;
use crate::error::{AppError, ParseError};
use crate::metrics::{YoyPoint, normalize_series, period_total, shares, yoy};
use crate::params;
use crate::providers::faostat::{self, FaoQuery, FaoRow};
use crate::providers::imf::{self, ImfCountry, ImfIndicator};
use crate::providers::oecd::{self, SdmxObservation};
use crate::providers::worldbank::{self, WbObservation};
use crate::rows::{Coverage, SearchHit, parse_coverage, parse_indicator_rows, parse_search, parse_series, parse_vintage, rows_year};
use crate::rpc::{self, PostgrestClient, Procedures};
use crate::scale::{ColorScale, LegendEntry, MISSING, hex};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub rpc: Arc<dyn Procedures>,
    pub http: reqwest::Client,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Option<T>,
}

fn respond<T: Serialize>(route: &'static str, result: Result<T, AppError>) -> Response {
    let envelope = match result {
        Ok(payload) => Envelope { ok: true, error: None, payload: Some(payload) },
        Err(e) => {
            let mut message = e.to_string();
            if message.trim().is_empty() {
                message = "request failed".to_string();
            }
            warn!(route, "{message}");
            Envelope { ok: false, error: Some(message), payload: None }
        }
    };
    ([(header::CACHE_CONTROL, "no-store")], Json(envelope)).into_response()
}

fn required(raw: Option<&str>, name: &str) -> Result<String, AppError> {
    params::text(raw).ok_or_else(|| AppError::Invalid(format!("missing required parameter `{name}`")))
}

/// Provider payloads with an unexpected shape become empty results; an
/// error the provider reported itself is passed on verbatim.
fn degrade<T>(source: &'static str, result: Result<Vec<T>, AppError>) -> Result<Vec<T>, AppError> {
    match result {
        Err(AppError::Parse(ParseError::Upstream(message))) => Err(AppError::Upstream(message)),
        Err(AppError::Parse(e @ ParseError::Shape { .. })) => {
            warn!(source, "unexpected payload, returning no rows: {e}");
            Ok(Vec::new())
        }
        other => other,
    }
}

pub fn router(state: AppState) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_origin(Any)
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/rank", get(rank))
        .route("/api/series", get(series))
        .route("/api/coverage", get(coverage))
        .route("/api/map", get(map))
        .route("/api/search", get(search))
        .route("/api/worldbank", get(worldbank))
        .route("/api/faostat", get(faostat))
        .route("/api/oecd", get(oecd))
        .route("/api/imf/countries", get(imf_countries))
        .route("/api/imf/indicators", get(imf_indicators))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("stratify/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let rpc = Arc::new(PostgrestClient::new(http.clone(), DbCredentials::from_env()));
    let port = config.server.port;
    let state = AppState { config: Arc::new(config), rpc, http };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn query<T: Default>(q: Option<Query<T>>) -> T {
    q.map(|Query(q)| q).unwrap_or_default()
}

#[derive(Serialize)]
struct Health {
    service: &'static str,
    version: &'static str,
}

async fn healthz() -> Response {
    respond("healthz", Ok(Health { service: "stratify", version: env!("CARGO_PKG_VERSION") }))
}

// ---- rankings ----

struct Ranking {
    year: Option<i32>,
    vintage: Option<String>,
    rows: RowSet,
}

/// A blank vintage is resolved through `latest_vintage` before ranking.
async fn fetch_ranking(
    procs: &dyn Procedures,
    indicator: &str,
    region: &str,
    year: Option<i32>,
    vintage: Option<String>,
) -> Result<Ranking, AppError> {
    let vintage = match vintage {
        Some(v) => Some(v),
        None => parse_vintage(&procs.call(rpc::LATEST_VINTAGE, json!({ "p_indicator": indicator })).await?),
    };
    let raw = procs
        .call(
            rpc::RANK_BY_REGION_YEAR,
            json!({
                "p_indicator": indicator,
                "p_region": region,
                "p_year": year,
                "p_vintage": vintage,
                "p_limit": null,
            }),
        )
        .await?;
    let rows = RowSet::new(parse_indicator_rows(&raw)?);
    Ok(Ranking { year: year.or_else(|| rows_year(&raw)), vintage, rows })
}

#[derive(Debug, Default, Deserialize)]
pub struct RankQuery {
    pub indicator: Option<String>,
    pub region: Option<String>,
    pub year: Option<String>,
    pub top: Option<String>,
    pub vintage: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RankedRow {
    pub rank: usize,
    pub iso3: String,
    pub country: String,
    pub region: Option<String>,
    pub value: Option<f64>,
    pub share: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct RankPayload {
    pub indicator: String,
    pub region: String,
    pub year: Option<i32>,
    pub vintage: Option<String>,
    /// Sum over every row in scope, not only the returned top rows.
    pub total: Option<f64>,
    pub count: usize,
    pub rows: Vec<RankedRow>,
}

async fn rank(State(state): State<AppState>, q: Option<Query<RankQuery>>) -> Response {
    let q = query(q);
    respond("rank", rank_inner(&state, q).await)
}

async fn rank_inner(state: &AppState, q: RankQuery) -> Result<RankPayload, AppError> {
    let indicator = required(q.indicator.as_deref(), "indicator")?;
    let region = params::region(q.region.as_deref());
    let top = params::top(q.top.as_deref()) as usize;
    let ranking = fetch_ranking(
        state.rpc.as_ref(),
        &indicator,
        &region,
        params::year(q.year.as_deref()),
        params::text(q.vintage.as_deref()),
    )
    .await?;

    let total = period_total(ranking.rows.values());
    let ranked: Vec<_> = ranking.rows.ranked().into_iter().take(top).collect();
    let values: Vec<Option<f64>> = ranked.iter().map(|row| row.finite_value()).collect();
    let rows = ranked
        .into_iter()
        .zip(shares(&values, total))
        .enumerate()
        .map(|(i, (row, share))| RankedRow {
            rank: i + 1,
            iso3: row.iso3.clone(),
            country: row.country.clone(),
            region: row.region.clone(),
            value: row.finite_value(),
            share,
        })
        .collect();

    Ok(RankPayload {
        indicator,
        region,
        year: ranking.year,
        vintage: ranking.vintage,
        total,
        count: ranking.rows.len(),
        rows,
    })
}

// ---- series ----

#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    pub indicator: Option<String>,
    pub iso3: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SeriesPayload {
    pub indicator: String,
    pub iso3: String,
    pub from: i32,
    pub to: i32,
    pub points: Vec<YoyPoint>,
}

async fn series(State(state): State<AppState>, q: Option<Query<SeriesQuery>>) -> Response {
    let q = query(q);
    respond("series", series_inner(&state, q).await)
}

async fn series_inner(state: &AppState, q: SeriesQuery) -> Result<SeriesPayload, AppError> {
    let indicator = required(q.indicator.as_deref(), "indicator")?;
    let iso3 = params::iso3(q.iso3.as_deref())
        .ok_or_else(|| AppError::Invalid("`iso3` must be a three-letter country code".to_string()))?;
    let (from, to) = params::year_range(q.from.as_deref(), q.to.as_deref(), params::current_year());

    let raw = state
        .rpc
        .call(
            rpc::SERIES_BY_COUNTRY,
            json!({ "p_indicator": indicator, "p_iso3": iso3, "p_from": from, "p_to": to }),
        )
        .await?;
    let mut points = normalize_series(parse_series(&raw)?);
    points.retain(|p| (from..=to).contains(&p.year));

    Ok(SeriesPayload { indicator, iso3, from, to, points: yoy(&points) })
}

// ---- coverage ----

#[derive(Debug, Default, Deserialize)]
pub struct CoverageQuery {
    pub indicator: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CoveragePayload {
    pub indicator: Option<String>,
    pub region: String,
    pub coverage: Coverage,
}

async fn fetch_coverage(procs: &dyn Procedures, indicator: Option<&str>, region: &str) -> Result<Coverage, AppError> {
    let raw = procs
        .call(rpc::COVERAGE_STATS, json!({ "p_indicator": indicator, "p_region": region }))
        .await?;
    Ok(parse_coverage(&raw)?)
}

async fn coverage(State(state): State<AppState>, q: Option<Query<CoverageQuery>>) -> Response {
    let q = query(q);
    let indicator = params::text(q.indicator.as_deref());
    let region = params::region(q.region.as_deref());
    let result = fetch_coverage(state.rpc.as_ref(), indicator.as_deref(), &region)
        .await
        .map(|coverage| CoveragePayload { indicator, region, coverage });
    respond("coverage", result)
}

// ---- map ----

#[derive(Debug, Default, Deserialize)]
pub struct MapQuery {
    pub indicator: Option<String>,
    pub region: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MapRow {
    pub iso3: String,
    pub country: String,
    pub value: Option<f64>,
    pub bucket: Option<usize>,
    pub color: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPayload {
    pub indicator: String,
    pub region: String,
    pub year: Option<i32>,
    pub vintage: Option<String>,
    /// `None` when coverage stats could not be loaded.
    pub coverage: Option<Coverage>,
    /// Lowest and highest finite value, `[0, 1]` when degenerate.
    pub domain: [f64; 2],
    pub thresholds: Vec<f64>,
    pub legend: Vec<LegendEntry>,
    pub missing_color: String,
    pub rows: Vec<MapRow>,
}

async fn map(State(state): State<AppState>, q: Option<Query<MapQuery>>) -> Response {
    let q = query(q);
    respond("map", map_inner(&state, q).await)
}

async fn map_inner(state: &AppState, q: MapQuery) -> Result<MapPayload, AppError> {
    let indicator = required(q.indicator.as_deref(), "indicator")?;
    let region = params::region(q.region.as_deref());
    let year = params::year(q.year.as_deref());
    let procs = state.rpc.as_ref();

    let (coverage, ranking) = tokio::join!(
        fetch_coverage(procs, Some(&indicator), &region),
        fetch_ranking(procs, &indicator, &region, year, None),
    );
    let coverage = coverage
        .inspect_err(|e| warn!(%indicator, %region, "coverage unavailable: {e}"))
        .ok();
    let ranking = ranking?;

    let scale = ColorScale::from_values(ranking.rows.values());
    let rows = ranking
        .rows
        .iter()
        .map(|row| {
            let value = row.finite_value();
            MapRow {
                iso3: row.iso3.clone(),
                country: row.country.clone(),
                value,
                bucket: value.map(|v| scale.bucket(v)),
                color: hex(scale.color_for(value)),
            }
        })
        .collect();

    Ok(MapPayload {
        indicator,
        region,
        year: ranking.year,
        vintage: ranking.vintage,
        coverage,
        domain: [scale.domain().0, scale.domain().1],
        thresholds: scale.thresholds().to_vec(),
        legend: scale.legend(),
        missing_color: hex(MISSING),
        rows,
    })
}

// ---- search ----

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchPayload {
    pub q: String,
    pub results: Vec<SearchHit>,
}

async fn search(State(state): State<AppState>, q: Option<Query<SearchQuery>>) -> Response {
    let q = query(q);
    respond("search", search_inner(&state, q).await)
}

async fn search_inner(state: &AppState, q: SearchQuery) -> Result<SearchPayload, AppError> {
    let Some(text) = params::text(q.q.as_deref()) else {
        return Ok(SearchPayload { q: String::new(), results: Vec::new() });
    };
    let limit = params::top(q.limit.as_deref());
    let raw = state
        .rpc
        .call(rpc::SEARCH_AREAS, json!({ "p_query": text, "p_limit": limit }))
        .await?;
    Ok(SearchPayload { q: text, results: parse_search(&raw)? })
}

// ---- external providers ----

#[derive(Debug, Default, Deserialize)]
pub struct WorldBankQuery {
    pub indicator: Option<String>,
    pub iso3: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorldBankPayload {
    pub indicator: String,
    pub iso3: String,
    pub rows: Vec<WbObservation>,
}

async fn worldbank(State(state): State<AppState>, q: Option<Query<WorldBankQuery>>) -> Response {
    let q = query(q);
    respond("worldbank", worldbank_inner(&state, q).await)
}

async fn worldbank_inner(state: &AppState, q: WorldBankQuery) -> Result<WorldBankPayload, AppError> {
    let indicator = required(q.indicator.as_deref(), "indicator")?;
    let iso3 = params::iso3(q.iso3.as_deref()).unwrap_or_else(|| "all".to_string());
    let (from, to) = params::year_range(q.from.as_deref(), q.to.as_deref(), params::current_year());
    let upstream = &state.config.upstream;
    let rows = degrade(
        "worldbank",
        worldbank::fetch_indicator(
            &state.http,
            &upstream.worldbank_url,
            &iso3,
            &indicator,
            from,
            to,
            upstream.worldbank_max_pages,
        )
        .await,
    )?;
    Ok(WorldBankPayload { indicator, iso3, rows })
}

#[derive(Debug, Default, Deserialize)]
pub struct FaostatQuery {
    pub domain: Option<String>,
    pub area: Option<String>,
    pub item: Option<String>,
    pub element: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FaostatPayload {
    pub domain: String,
    pub rows: Vec<FaoRow>,
}

async fn faostat(State(state): State<AppState>, q: Option<Query<FaostatQuery>>) -> Response {
    let q = query(q);
    let fao = FaoQuery {
        domain: params::text(q.domain.as_deref()).unwrap_or_else(|| "QCL".to_string()),
        area: params::text(q.area.as_deref()),
        item: params::text(q.item.as_deref()),
        element: params::text(q.element.as_deref()),
        year: params::year(q.year.as_deref()),
    };
    let result = degrade("faostat", faostat::fetch(&state.http, &state.config.upstream.faostat_url, &fao).await)
        .map(|rows| FaostatPayload { domain: fao.domain.clone(), rows });
    respond("faostat", result)
}

#[derive(Debug, Default, Deserialize)]
pub struct OecdQuery {
    pub dataset: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OecdPayload {
    pub dataset: String,
    pub key: String,
    pub observations: Vec<SdmxObservation>,
}

async fn oecd(State(state): State<AppState>, q: Option<Query<OecdQuery>>) -> Response {
    let q = query(q);
    respond("oecd", oecd_inner(&state, q).await)
}

async fn oecd_inner(state: &AppState, q: OecdQuery) -> Result<OecdPayload, AppError> {
    let dataset = required(q.dataset.as_deref(), "dataset")?;
    let key = params::text(q.key.as_deref()).unwrap_or_default();
    let observations = degrade(
        "oecd",
        oecd::fetch(&state.http, &state.config.upstream.oecd_url, &dataset, &key).await,
    )?;
    Ok(OecdPayload { dataset, key, observations })
}

#[derive(Debug, Serialize)]
struct ImfCountriesPayload {
    countries: Vec<ImfCountry>,
}

#[derive(Debug, Serialize)]
struct ImfIndicatorsPayload {
    indicators: Vec<ImfIndicator>,
}

async fn imf_countries(State(state): State<AppState>) -> Response {
    let result = degrade("imf", imf::fetch_countries(&state.http, &state.config.upstream.imf_url).await)
        .map(|countries| ImfCountriesPayload { countries });
    respond("imf_countries", result)
}

async fn imf_indicators(State(state): State<AppState>) -> Response {
    let result = degrade("imf", imf::fetch_indicators(&state.http, &state.config.upstream.imf_url).await)
        .map(|indicators| ImfIndicatorsPayload { indicators });
    respond("imf_indicators", result)
}
