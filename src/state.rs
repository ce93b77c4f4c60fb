use std::sync::Arc;

use crossterm::event::KeyCode;
use ratatui::layout::Rect;
use ratatui::style::Color;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use crate::cache::{RankingCache, RankingKey};
use crate::client::{ApiClient, Snapshot};
use crate::config::{AppConfig, IndicatorConfig};
use crate::csv_source::CsvTable;
use crate::data::{GeoFeature, IndicatorRow, RowSet};
use crate::fetch::{RequestGuard, Tagged};
use crate::map_draw::MapView;
use crate::metrics::{YoyPoint, normalize_series, period_total, share, yoy};
use crate::params::{DEFAULT_REGION, FIRST_YEAR, current_year};
use crate::resolver::{Resolution, ResolvedFeature, Resolver};
use crate::scale::{ColorScale, MISSING};

/// Where indicator rows come from.
#[derive(Clone)]
pub enum Source {
    Api(ApiClient),
    /// A single-indicator bulk CSV; regions other than `World` are not
    /// available offline.
    Csv(Arc<CsvTable>),
}

#[derive(Debug)]
pub enum Loaded {
    Snapshot { key: RankingKey, year: Option<i32>, result: Result<Snapshot, String> },
    Series { iso3: String, result: Result<Vec<YoyPoint>, String> },
}

/// What the detail panel shows for the selected country.
#[derive(Debug, Clone, PartialEq)]
pub struct Detail<'a> {
    pub row: &'a IndicatorRow,
    /// 1-based among rows with a value.
    pub rank: Option<usize>,
    pub of: usize,
    pub share: Option<f64>,
}

pub struct AppState {
    pub features: Vec<GeoFeature>,
    pub resolved: Vec<ResolvedFeature>,
    pub map: MapView,
    /// Where the map was last drawn, for mouse hit testing.
    pub map_area: Option<Rect>,
    pub rows: RowSet,
    pub ranked: Vec<IndicatorRow>,
    pub scale: ColorScale,
    pub total: Option<f64>,

    pub indicators: Vec<IndicatorConfig>,
    pub indicator: usize,
    pub regions: Vec<String>,
    pub region: usize,
    /// Requested year; `None` follows the latest year with data.
    pub year: Option<i32>,
    /// Year of the rows currently shown.
    pub shown_year: Option<i32>,
    pub shown_vintage: Option<String>,

    pub cursor: usize,
    pub selected: Option<String>,
    pub series: Vec<YoyPoint>,

    pub loading: bool,
    pub map_error: Option<String>,
    pub table_error: Option<String>,
    pub series_error: Option<String>,

    resolver: Resolver,
    cache: RankingCache<Snapshot>,
    snapshots: RequestGuard,
    series_guard: RequestGuard,
    source: Source,
    runtime: Handle,
    tx: UnboundedSender<Tagged<Loaded>>,
    rx: UnboundedReceiver<Tagged<Loaded>>,
}

impl AppState {
    pub const HELP_TEXT: &'static str = "\
↑/↓: move in list
Enter / click map: select country
Esc: clear selection
←/→: indicator
r: region
[ / ]: year
q: quit";

    pub fn new(features: Vec<GeoFeature>, config: &AppConfig, source: Source, runtime: Handle) -> Self {
        let (tx, rx) = unbounded_channel();
        let mut indicators = config.browse.indicators.clone();
        if let Source::Csv(table) = &source {
            indicators = vec![IndicatorConfig {
                code: table.indicator_code.clone(),
                label: table.indicator_name.clone(),
            }];
        }
        let mut regions = config.browse.regions.clone();
        if regions.is_empty() || matches!(source, Source::Csv(_)) {
            regions = vec![DEFAULT_REGION.to_string()];
        }
        let map = MapView::new(&features);

        let mut state = Self {
            resolved: Vec::new(),
            features,
            map,
            map_area: None,
            rows: RowSet::default(),
            ranked: Vec::new(),
            scale: ColorScale::from_values(std::iter::empty()),
            total: None,
            indicators,
            indicator: 0,
            regions,
            region: 0,
            year: None,
            shown_year: None,
            shown_vintage: None,
            cursor: 0,
            selected: None,
            series: Vec::new(),
            loading: false,
            map_error: None,
            table_error: None,
            series_error: None,
            resolver: Resolver::from_config(&config.resolver),
            cache: RankingCache::new(config.browse.cache_capacity),
            snapshots: RequestGuard::new(),
            series_guard: RequestGuard::new(),
            source,
            runtime,
            tx,
            rx,
        };
        state.set_rows(Snapshot::default());
        state.refresh();
        state
    }

    pub fn indicator_code(&self) -> &str {
        self.indicators.get(self.indicator).map(|i| i.code.as_str()).unwrap_or_default()
    }

    pub fn indicator_label(&self) -> &str {
        self.indicators.get(self.indicator).map(|i| i.label.as_str()).unwrap_or_default()
    }

    pub fn region_name(&self) -> &str {
        self.regions.get(self.region).map(String::as_str).unwrap_or(DEFAULT_REGION)
    }

    fn scope_key(&self) -> RankingKey {
        RankingKey::new(self.indicator_code(), self.region_name())
    }

    /// Returns true when the app should exit.
    pub fn handle_input(&mut self, key: KeyCode) -> bool {
        use KeyCode::*;
        match key {
            Char('q') => return true,
            Up => self.cursor = self.cursor.saturating_sub(1),
            Down => {
                if self.cursor + 1 < self.ranked.len() {
                    self.cursor += 1
                }
            }
            Enter => {
                if let Some(iso3) = self.ranked.get(self.cursor).map(|r| r.iso3.clone()) {
                    self.select(Some(iso3));
                }
            }
            Esc => self.select(None),
            Left => self.cycle_indicator(-1),
            Right => self.cycle_indicator(1),
            Char('r') => {
                self.region = (self.region + 1) % self.regions.len().max(1);
                self.change_scope();
            }
            Char('[') => self.shift_year(-1),
            Char(']') => self.shift_year(1),
            _ => {}
        }
        false
    }

    /// Left click at terminal cell `(column, row)`.
    pub fn click_map(&mut self, column: u16, row: u16) {
        let Some(area) = self.map_area else { return };
        if let Some((lon, lat)) = self.map.cell_to_lonlat(area, column, row) {
            self.select_at(lon, lat);
        }
    }

    /// Selects the country drawn at `(lon, lat)`. Unresolved and duplicate
    /// features, and codes without a row, do not take clicks.
    pub fn select_at(&mut self, lon: f64, lat: f64) -> bool {
        let hit = self.map.features_at(lon, lat).into_iter().find_map(|index| {
            let rf = self.resolved.iter().find(|rf| rf.index == index)?;
            rf.resolution.iso3().filter(|iso3| self.rows.contains(iso3)).map(str::to_string)
        });
        let Some(iso3) = hit else { return false };
        if let Some(pos) = self.ranked.iter().position(|r| r.iso3 == iso3) {
            self.cursor = pos;
        }
        if self.selected.as_deref() != Some(iso3.as_str()) {
            self.select(Some(iso3));
        }
        true
    }

    fn cycle_indicator(&mut self, step: isize) {
        let n = self.indicators.len();
        if n < 2 {
            return;
        }
        self.indicator = (self.indicator as isize + step).rem_euclid(n as isize) as usize;
        self.change_scope();
    }

    /// Indicator or region changed: the selection does not carry over.
    fn change_scope(&mut self) {
        self.select(None);
        self.cursor = 0;
        self.refresh();
    }

    fn shift_year(&mut self, step: i32) {
        let latest = current_year();
        let from = self.year.or(self.shown_year).unwrap_or(latest);
        let year = (from + step).clamp(FIRST_YEAR, latest);
        if Some(year) != self.year {
            self.year = Some(year);
            self.refresh();
        }
    }

    /// Request rows for the current scope. Latest-year rows are served from
    /// the ranking cache when present.
    pub fn refresh(&mut self) {
        let key = self.scope_key();
        if self.year.is_none() {
            if let Some(snapshot) = self.cache.get(&key).cloned() {
                debug!(indicator = %key.indicator, region = %key.region, "ranking cache hit");
                self.snapshots.invalidate();
                self.loading = false;
                self.set_rows(snapshot);
                return;
            }
        }

        let ticket = self.snapshots.begin();
        let year = self.year;
        self.loading = true;
        let tx = self.tx.clone();
        match &self.source {
            Source::Api(client) => {
                let client = client.clone();
                let guard = self.snapshots.clone();
                self.runtime.spawn(async move {
                    let fetched = client.snapshot(&key.indicator, &key.region, year);
                    let Some(result) = guard.run(ticket, fetched).await else { return };
                    let result = result.map_err(|e| e.to_string());
                    let _ = tx.send(Tagged { ticket, value: Loaded::Snapshot { key, year, result } });
                });
            }
            Source::Csv(table) => {
                let result = match year.or_else(|| table.latest_year()) {
                    Some(y) => Ok(Snapshot { year: Some(y), vintage: None, rows: table.rows_for_year(y) }),
                    None => Ok(Snapshot::default()),
                };
                let _ = tx.send(Tagged { ticket, value: Loaded::Snapshot { key, year, result } });
            }
        }
    }

    fn select(&mut self, iso3: Option<String>) {
        self.series.clear();
        self.series_error = None;
        self.series_guard.invalidate();
        self.selected = iso3;
        let Some(iso3) = self.selected.clone() else { return };

        let ticket = self.series_guard.begin();
        let tx = self.tx.clone();
        match &self.source {
            Source::Api(client) => {
                let client = client.clone();
                let guard = self.series_guard.clone();
                let indicator = self.indicator_code().to_string();
                self.runtime.spawn(async move {
                    let Some(result) = guard.run(ticket, client.series(&indicator, &iso3)).await else { return };
                    let result = result.map_err(|e| e.to_string());
                    let _ = tx.send(Tagged { ticket, value: Loaded::Series { iso3, result } });
                });
            }
            Source::Csv(table) => {
                let result = Ok(yoy(&normalize_series(table.series(&iso3))));
                let _ = tx.send(Tagged { ticket, value: Loaded::Series { iso3, result } });
            }
        }
    }

    /// Apply every finished fetch. Called once per frame.
    pub fn drain(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg);
        }
    }

    pub fn apply(&mut self, msg: Tagged<Loaded>) {
        match msg.value {
            Loaded::Snapshot { key, year, result } => {
                let Some(result) = self.snapshots.accept(msg.ticket, result) else { return };
                self.loading = false;
                match result {
                    Ok(snapshot) => {
                        if year.is_none() {
                            self.cache.insert(key, snapshot.clone());
                            debug!(entries = self.cache.len(), "ranking cached");
                        }
                        self.set_rows(snapshot);
                    }
                    Err(e) => {
                        warn!(indicator = %key.indicator, region = %key.region, "load failed: {e}");
                        self.set_rows(Snapshot::default());
                        self.table_error = Some(e.clone());
                        self.map_error = Some(e);
                    }
                }
            }
            Loaded::Series { iso3, result } => {
                let Some(result) = self.series_guard.accept(msg.ticket, result) else { return };
                if self.selected.as_deref() != Some(iso3.as_str()) {
                    return;
                }
                match result {
                    Ok(points) => self.series = points,
                    Err(e) => self.series_error = Some(e),
                }
            }
        }
    }

    /// Rebuild everything derived from the row set.
    fn set_rows(&mut self, snapshot: Snapshot) {
        self.rows = RowSet::new(snapshot.rows);
        self.shown_year = snapshot.year;
        self.shown_vintage = snapshot.vintage;
        self.resolved = self.resolver.reconcile(&self.features, &self.rows);
        self.scale = ColorScale::from_values(self.rows.values());
        self.total = period_total(self.rows.values());
        self.ranked = self.rows.ranked().into_iter().cloned().collect();
        self.cursor = self.cursor.min(self.ranked.len().saturating_sub(1));
        self.table_error = None;
        if self.features.is_empty() {
            self.map_error.get_or_insert_with(|| "no map geometry loaded".to_string());
        } else {
            self.map_error = None;
        }

        let gone = self.selected.as_deref().is_some_and(|iso3| !self.rows.contains(iso3));
        if gone {
            self.select(None);
        }
    }

    /// Fill per feature index; `None` means the feature is not drawn.
    pub fn feature_colors(&self) -> Vec<Option<Color>> {
        let mut colors = vec![None; self.features.len()];
        for rf in &self.resolved {
            let rgb = match &rf.resolution {
                Resolution::Code { iso3, .. } => {
                    self.scale.color_for(self.rows.get(iso3).and_then(IndicatorRow::finite_value))
                }
                Resolution::Unresolved => MISSING,
                Resolution::Duplicate { .. } => continue,
            };
            if let Some(slot) = colors.get_mut(rf.index) {
                *slot = Some(Color::Rgb(rgb[0], rgb[1], rgb[2]));
            }
        }
        colors
    }

    /// Feature indices drawn for the selected country.
    pub fn highlighted(&self) -> Vec<usize> {
        let Some(sel) = self.selected.as_deref() else { return Vec::new() };
        self.resolved
            .iter()
            .filter(|rf| rf.resolution.iso3() == Some(sel))
            .map(|rf| rf.index)
            .collect()
    }

    pub fn detail(&self) -> Option<Detail<'_>> {
        let row = self.rows.get(self.selected.as_deref()?)?;
        let with_value: Vec<&IndicatorRow> = self.ranked.iter().filter(|r| r.finite_value().is_some()).collect();
        let rank = row
            .finite_value()
            .and_then(|_| with_value.iter().position(|r| r.iso3 == row.iso3))
            .map(|i| i + 1);
        Some(Detail { row, rank, of: with_value.len(), share: share(row.value, self.total) })
    }

    /// Features that resolved to a code, for the status line.
    pub fn matched_features(&self) -> usize {
        self.resolved
            .iter()
            .filter(|rf| rf.resolution.iso3().is_some_and(|c| self.rows.contains(c)))
            .count()
    }
}
