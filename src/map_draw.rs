use geo::{BoundingRect, Contains, MultiPolygon, Point};
use ratatui::layout::Rect as TuiRect;
use ratatui::widgets::canvas::{Canvas, Line, Points};
use ratatui::widgets::{Block, Borders};
use ratatui::{Frame, style::Color};

use crate::data::GeoFeature;

/// Grid spacing, in degrees, of the dots that fill each feature.
const FILL_STEP: f64 = 1.0;

const OUTLINE: Color = Color::DarkGray;
const HIGHLIGHT: Color = Color::Red;

struct Shape {
    /// Index into the feature list the view was built from.
    index: usize,
    geometry: MultiPolygon<f64>,
    rings: Vec<Vec<(f64, f64)>>,
    fill: Vec<(f64, f64)>,
}

fn fill_points(mp: &MultiPolygon<f64>) -> Vec<(f64, f64)> {
    let Some(rect) = mp.bounding_rect() else { return Vec::new() };
    let start_x = (rect.min().x / FILL_STEP).floor() * FILL_STEP + FILL_STEP / 2.0;
    let start_y = (rect.min().y / FILL_STEP).floor() * FILL_STEP + FILL_STEP / 2.0;
    let mut points = Vec::new();
    let mut x = start_x;
    while x <= rect.max().x {
        let mut y = start_y;
        while y <= rect.max().y {
            if mp.contains(&Point::new(x, y)) {
                points.push((x, y));
            }
            y += FILL_STEP;
        }
        x += FILL_STEP;
    }
    points
}

/// Projected (plate carrée) outlines and fill dots for every feature with
/// geometry.
pub struct MapView {
    shapes: Vec<Shape>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

impl MapView {
    pub fn new(features: &[GeoFeature]) -> Self {
        let shapes: Vec<Shape> = features
            .iter()
            .enumerate()
            .filter_map(|(index, f)| {
                let mp = f.geometry.as_ref()?;
                let rings = mp
                    .0
                    .iter()
                    .flat_map(|poly| std::iter::once(poly.exterior()).chain(poly.interiors()))
                    .map(|ring| ring.0.iter().map(|c| (c.x, c.y)).collect())
                    .collect();
                Some(Shape { index, geometry: mp.clone(), rings, fill: fill_points(mp) })
            })
            .collect();

        let (mut minx, mut miny, mut maxx, mut maxy) =
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in shapes.iter().flat_map(|s| s.rings.iter().flatten()) {
            minx = minx.min(*x);
            miny = miny.min(*y);
            maxx = maxx.max(*x);
            maxy = maxy.max(*y);
        }
        if !(minx < maxx && miny < maxy) {
            (minx, miny, maxx, maxy) = (-180.0, -90.0, 180.0, 90.0);
        }

        Self { shapes, x_bounds: [minx, maxx], y_bounds: [miny, maxy] }
    }

    pub fn feature_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn bounds(&self) -> ([f64; 2], [f64; 2]) {
        (self.x_bounds, self.y_bounds)
    }

    /// Indices of the features whose geometry contains `(lon, lat)`.
    pub fn features_at(&self, lon: f64, lat: f64) -> Vec<usize> {
        let point = Point::new(lon, lat);
        self.shapes.iter().filter(|s| s.geometry.contains(&point)).map(|s| s.index).collect()
    }

    /// Centre of terminal cell `(column, row)` in map coordinates, for a map
    /// rendered into `area` (border included). `None` outside the canvas.
    pub fn cell_to_lonlat(&self, area: TuiRect, column: u16, row: u16) -> Option<(f64, f64)> {
        let (left, top) = (area.x + 1, area.y + 1);
        let width = area.width.saturating_sub(2);
        let height = area.height.saturating_sub(2);
        if column < left || row < top || column >= left + width || row >= top + height {
            return None;
        }
        let ([x0, x1], [y0, y1]) = self.bounds();
        let fx = (f64::from(column - left) + 0.5) / f64::from(width);
        let fy = (f64::from(row - top) + 0.5) / f64::from(height);
        Some((x0 + fx * (x1 - x0), y1 - fy * (y1 - y0)))
    }

    /// `colors[i]` fills feature `i`; features with `None` are skipped
    /// entirely. Highlighted features get a bright outline drawn last.
    pub fn render(&self, f: &mut Frame, area: TuiRect, title: &str, colors: &[Option<Color>], highlight: &[usize]) {
        let canvas = Canvas::default()
            .block(Block::default().title(title.to_string()).borders(Borders::ALL))
            .x_bounds(self.x_bounds)
            .y_bounds(self.y_bounds)
            .paint(|ctx| {
                for shape in &self.shapes {
                    let Some(Some(color)) = colors.get(shape.index) else { continue };
                    ctx.draw(&Points { coords: &shape.fill, color: *color });
                }
                ctx.layer();
                for shape in &self.shapes {
                    if !matches!(colors.get(shape.index), Some(Some(_))) {
                        continue;
                    }
                    let color = if highlight.contains(&shape.index) { HIGHLIGHT } else { OUTLINE };
                    draw_rings(ctx, &shape.rings, color);
                }
                ctx.layer();
                for shape in self.shapes.iter().filter(|s| highlight.contains(&s.index)) {
                    draw_rings(ctx, &shape.rings, HIGHLIGHT);
                }
            });
        f.render_widget(canvas, area);
    }
}

fn draw_rings(ctx: &mut ratatui::widgets::canvas::Context<'_>, rings: &[Vec<(f64, f64)>], color: Color) {
    for ring in rings {
        for w in ring.windows(2) {
            let ((x1, y1), (x2, y2)) = (w[0], w[1]);
            ctx.draw(&Line { x1, y1, x2, y2, color });
        }
    }
}
