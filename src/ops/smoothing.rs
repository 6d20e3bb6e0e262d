// ============================================================================
// STROKE SMOOTHING – pure transforms over recorded stroke points
// ============================================================================

use crate::commands::StrokePoint;

/// Smoothing applied when a recorded stroke is replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmoothingMode {
    #[default]
    None,
    MovingAverage,
    CatmullRom,
    Exponential,
    Interpolate,
}

impl SmoothingMode {
    pub fn name(&self) -> &'static str {
        match self {
            SmoothingMode::None => "none",
            SmoothingMode::MovingAverage => "moving_average",
            SmoothingMode::CatmullRom => "catmull_rom",
            SmoothingMode::Exponential => "exponential",
            SmoothingMode::Interpolate => "interpolate",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" => Some(SmoothingMode::None),
            "moving_average" => Some(SmoothingMode::MovingAverage),
            "catmull_rom" => Some(SmoothingMode::CatmullRom),
            "exponential" => Some(SmoothingMode::Exponential),
            "interpolate" => Some(SmoothingMode::Interpolate),
            _ => None,
        }
    }

    /// Apply with default parameters.
    pub fn apply(&self, points: &[StrokePoint]) -> Vec<StrokePoint> {
        match self {
            SmoothingMode::None => points.to_vec(),
            SmoothingMode::MovingAverage => smooth_moving_average(points, 3),
            SmoothingMode::CatmullRom => smooth_catmull_rom(points, 4),
            SmoothingMode::Exponential => smooth_exponential(points, 0.3),
            SmoothingMode::Interpolate => interpolate_points(points, 5.0),
        }
    }
}

/// Centered moving average of x, y and pressure.  Timestamps are kept.
pub fn smooth_moving_average(points: &[StrokePoint], window: usize) -> Vec<StrokePoint> {
    if window == 0 || points.len() < window {
        return points.to_vec();
    }
    let half = window / 2;
    (0..points.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(points.len() - 1);
            let span = &points[lo..=hi];
            let n = span.len() as f32;
            StrokePoint {
                x: span.iter().map(|p| p.x).sum::<f32>() / n,
                y: span.iter().map(|p| p.y).sum::<f32>() / n,
                pressure: span.iter().map(|p| p.pressure).sum::<f32>() / n,
                timestamp: points[i].timestamp,
            }
        })
        .collect()
}

/// Catmull-Rom resampling with `segments` steps per interior span.
pub fn smooth_catmull_rom(points: &[StrokePoint], segments: usize) -> Vec<StrokePoint> {
    if points.len() < 4 || segments == 0 {
        return points.to_vec();
    }
    let mut out = Vec::with_capacity(points.len() * (segments + 1));
    out.push(points[0]);
    for w in points.windows(4) {
        let (p0, p1, p2, p3) = (&w[0], &w[1], &w[2], &w[3]);
        for step in 0..=segments {
            let t = step as f32 / segments as f32;
            out.push(StrokePoint {
                x: catmull_rom(p0.x, p1.x, p2.x, p3.x, t),
                y: catmull_rom(p0.y, p1.y, p2.y, p3.y, t),
                pressure: catmull_rom(p0.pressure, p1.pressure, p2.pressure, p3.pressure, t).clamp(0.0, 1.0),
                timestamp: p1.timestamp + (p2.timestamp - p1.timestamp) * t as f64,
            });
        }
    }
    out.extend_from_slice(&points[points.len() - 2..]);
    out
}

fn catmull_rom(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// Douglas-Peucker simplification.
pub fn simplify_stroke(points: &[StrokePoint], tolerance: f32) -> Vec<StrokePoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let last = points.len() - 1;
    let (index, max_dist) = (1..last)
        .map(|i| (i, perpendicular_distance(&points[i], &points[0], &points[last])))
        .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });

    if max_dist > tolerance {
        let mut left = simplify_stroke(&points[..=index], tolerance);
        let right = simplify_stroke(&points[index..], tolerance);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![points[0], points[last]]
    }
}

/// Distance from `p` to the infinite line through `a` and `b`; falls back to
/// the distance to `a` when the chord is degenerate.
fn perpendicular_distance(p: &StrokePoint, a: &StrokePoint, b: &StrokePoint) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    (dy * p.x - dx * p.y + b.x * a.y - b.y * a.x).abs() / len
}

/// Exponential moving average seeded with the first point.
pub fn smooth_exponential(points: &[StrokePoint], alpha: f32) -> Vec<StrokePoint> {
    let Some(first) = points.first() else { return Vec::new() };
    let mut out = Vec::with_capacity(points.len());
    out.push(*first);
    for p in &points[1..] {
        let prev = out[out.len() - 1];
        out.push(StrokePoint {
            x: alpha * p.x + (1.0 - alpha) * prev.x,
            y: alpha * p.y + (1.0 - alpha) * prev.y,
            pressure: alpha * p.pressure + (1.0 - alpha) * prev.pressure,
            timestamp: p.timestamp,
        });
    }
    out
}

/// Insert linear samples so consecutive points are at most about `spacing` apart.
pub fn interpolate_points(points: &[StrokePoint], spacing: f32) -> Vec<StrokePoint> {
    if points.len() < 2 || spacing <= 0.0 {
        return points.to_vec();
    }
    let mut out = vec![points[0]];
    for w in points.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let dist = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        let steps = ((dist / spacing).floor() as usize).max(1);
        for j in 1..=steps {
            let t = j as f32 / steps as f32;
            out.push(StrokePoint {
                x: a.x + (b.x - a.x) * t,
                y: a.y + (b.y - a.y) * t,
                pressure: a.pressure + (b.pressure - a.pressure) * t,
                timestamp: a.timestamp + (b.timestamp - a.timestamp) * t as f64,
            });
        }
    }
    out
}
