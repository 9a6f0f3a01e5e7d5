use std::f64::consts::PI;
use std::io::Cursor;

use anyhow::{Context, Result};
use archviz_contracts::location::Location;
use image::{ImageFormat, Rgba, RgbaImage};

use crate::datauri;

pub const CANVAS_EDGE: u32 = 512;
const LCG_MODULUS: u64 = 233_280;
const LCG_MULTIPLIER: u64 = 9_301;
const LCG_INCREMENT: u64 = 49_297;
const MIN_FEATURES: u32 = 5;
const FEATURE_SPREAD: f64 = 8.0;
const FRAME_INSET: u32 = 16;
const FRAME_THICKNESS: u32 = 3;
const MARKER_RADIUS: f64 = 9.0;

pub fn seed_for(location: &Location) -> u64 {
    let (lat_micro, lng_micro) = location.microdegrees();
    let mixed = (lat_micro as i128) * 31 + lng_micro as i128;
    (mixed.unsigned_abs() % LCG_MODULUS as u128) as u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededRandom {
    state: u64,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed % LCG_MODULUS,
        }
    }

    pub fn next_f64(&mut self) -> f64 {
        self.state = (self.state * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
        self.state as f64 / LCG_MODULUS as f64
    }

    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Road,
    Building,
    Park,
    Water,
}

/// One drawn shape. For roads `(x, y)` is the midpoint, `width` the length,
/// `height` the stroke; for buildings the top-left corner and extent; for
/// parks and water the centre and radius (in `width`).
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub kind: FeatureKind,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerrainPlan {
    pub seed: u64,
    pub base_tint: f64,
    pub features: Vec<Feature>,
}

pub fn plan_terrain(location: &Location) -> TerrainPlan {
    let seed = seed_for(location);
    let mut rng = SeededRandom::new(seed);
    let base_tint = rng.next_f64();
    let count = MIN_FEATURES + (rng.next_f64() * FEATURE_SPREAD).floor() as u32;
    let edge = CANVAS_EDGE as f64;

    let mut features = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind_draw = rng.next_f64();
        let x = rng.range(0.0, edge);
        let y = rng.range(0.0, edge);
        let a = rng.next_f64();
        let b = rng.next_f64();
        let c = rng.next_f64();
        let feature = if kind_draw < 1.0 / 3.0 {
            Feature {
                kind: FeatureKind::Road,
                x,
                y,
                width: 120.0 + a * 260.0,
                height: 5.0 + b * 7.0,
                angle: c * PI,
            }
        } else if kind_draw < 2.0 / 3.0 {
            Feature {
                kind: FeatureKind::Building,
                x,
                y,
                width: 20.0 + a * 60.0,
                height: 20.0 + b * 60.0,
                angle: 0.0,
            }
        } else {
            Feature {
                kind: if c < 0.5 {
                    FeatureKind::Park
                } else {
                    FeatureKind::Water
                },
                x,
                y,
                width: 15.0 + a * 45.0,
                height: 0.0,
                angle: 0.0,
            }
        };
        features.push(feature);
    }

    TerrainPlan {
        seed,
        base_tint,
        features,
    }
}

pub fn render_terrain(plan: &TerrainPlan) -> RgbaImage {
    let edge = CANVAS_EDGE;
    let center = edge as f64 / 2.0;
    let max_dist = (2.0 * center * center).sqrt();
    let tint = (plan.base_tint * 40.0) as u8;

    let mut canvas = RgbaImage::from_fn(edge, edge, |x, y| {
        let dx = x as f64 - center;
        let dy = y as f64 - center;
        let t = ((dx * dx + dy * dy).sqrt() / max_dist).clamp(0.0, 1.0);
        let r = lerp(214.0, 168.0, t) as u8;
        let g = lerp(226.0, 186.0, t) as u8;
        let b = lerp(196.0, 150.0, t) as u8;
        Rgba([r.saturating_sub(tint / 2), g, b.saturating_add(tint / 3), 255])
    });

    for feature in &plan.features {
        match feature.kind {
            FeatureKind::Road => draw_road(&mut canvas, feature),
            FeatureKind::Building => draw_building(&mut canvas, feature),
            FeatureKind::Park => fill_circle(
                &mut canvas,
                feature.x,
                feature.y,
                feature.width,
                Rgba([120, 176, 104, 255]),
            ),
            FeatureKind::Water => fill_circle(
                &mut canvas,
                feature.x,
                feature.y,
                feature.width,
                Rgba([118, 164, 214, 255]),
            ),
        }
    }

    fill_circle(&mut canvas, center, center, MARKER_RADIUS + 3.0, Rgba([255, 255, 255, 255]));
    fill_circle(&mut canvas, center, center, MARKER_RADIUS, Rgba([220, 40, 48, 255]));
    draw_frame(&mut canvas);
    canvas
}

pub fn procedural_data_uri(location: &Location) -> Result<String> {
    let canvas = render_terrain(&plan_terrain(location));
    let mut bytes = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("procedural map PNG encode failed")?;
    Ok(datauri::encode(datauri::PNG_MIME, &bytes))
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

fn put(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    canvas.put_pixel(x as u32, y as u32, color);
}

fn fill_circle(canvas: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    let r2 = radius * radius;
    let (x0, x1) = ((cx - radius).floor() as i64, (cx + radius).ceil() as i64);
    let (y0, y1) = ((cy - radius).floor() as i64, (cy + radius).ceil() as i64);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r2 {
                put(canvas, x, y, color);
            }
        }
    }
}

fn draw_road(canvas: &mut RgbaImage, road: &Feature) {
    let (dx, dy) = (road.angle.cos(), road.angle.sin());
    let half = road.width / 2.0;
    let steps = road.width.ceil() as i64;
    for step in 0..=steps {
        let offset = -half + step as f64;
        let px = road.x + dx * offset;
        let py = road.y + dy * offset;
        fill_circle(canvas, px, py, road.height / 2.0, Rgba([250, 246, 232, 255]));
    }
}

fn draw_building(canvas: &mut RgbaImage, building: &Feature) {
    let x0 = building.x.floor() as i64;
    let y0 = building.y.floor() as i64;
    let x1 = (building.x + building.width).ceil() as i64;
    let y1 = (building.y + building.height).ceil() as i64;
    for y in y0..y1 {
        for x in x0..x1 {
            let edge = x == x0 || y == y0 || x == x1 - 1 || y == y1 - 1;
            let color = if edge {
                Rgba([96, 92, 104, 255])
            } else {
                Rgba([176, 170, 184, 255])
            };
            put(canvas, x, y, color);
        }
    }
}

fn draw_frame(canvas: &mut RgbaImage) {
    let lo = FRAME_INSET as i64;
    let hi = (CANVAS_EDGE - FRAME_INSET) as i64;
    let color = Rgba([40, 48, 64, 255]);
    for t in 0..FRAME_THICKNESS as i64 {
        for i in lo..hi {
            put(canvas, i, lo + t, color);
            put(canvas, i, hi - 1 - t, color);
            put(canvas, lo + t, i, color);
            put(canvas, hi - 1 - t, i, color);
        }
    }
}
