//! Annotation geometry and pixel enumeration.
//!
//! Annotations arrive in the viewer's JSON interchange shape
//! ([`AnnotationRecord`]) and are converted into a typed [`Annotation`]
//! before any pixels are enumerated. Coordinates are `[line, sample]`.

use serde::{Deserialize, Serialize};

use crate::error::{HsiError, Result};
use crate::header::Dimensions;

/// A pixel as `(line, sample)`. May lie outside the cube.
pub type Pixel = (i64, i64);

/// Type code of a rectangle in the interchange format.
pub const RECTANGLE_CODE: i64 = 1;
/// Type code of a polygon in the interchange format.
pub const POLYGON_CODE: i64 = 2;
/// Type code of a point in the interchange format.
pub const POINT_CODE: i64 = 3;
/// Type code of a circle in the interchange format.
pub const CIRCLE_CODE: i64 = 5;

// ============================================================================
// Interchange Format
// ============================================================================

/// Either one coordinate pair or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    /// Point position or circle centre
    Single([f64; 2]),
    /// Rectangle corners or polygon vertices
    Many(Vec<[f64; 2]>),
}

/// An annotation as exchanged with the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Display label
    #[serde(default)]
    pub label: String,
    /// Display colour, irrelevant to extraction
    #[serde(
        rename = "labelFillStyle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub label_fill_style: Option<String>,
    /// Shape-dependent geometry
    pub coor: Coordinates,
    /// Circle radius in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Shape type code
    #[serde(rename = "type")]
    pub kind: i64,
}

// ============================================================================
// Typed Annotation
// ============================================================================

/// Geometry of an annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Axis-aligned rectangle between two opposite corners, inclusive
    Rectangle {
        /// Two opposite corners
        corners: [[f64; 2]; 2],
    },
    /// Closed polygon, even-odd filled
    Polygon {
        /// Vertices in drawing order
        vertices: Vec<[f64; 2]>,
    },
    /// A single pixel
    Point {
        /// Pixel position
        at: [f64; 2],
    },
    /// Disc with inclusive boundary
    Circle {
        /// Centre position
        center: [f64; 2],
        /// Radius in pixels
        radius: f64,
    },
}

impl Shape {
    /// Interchange type code.
    pub fn code(&self) -> i64 {
        match self {
            Shape::Rectangle { .. } => RECTANGLE_CODE,
            Shape::Polygon { .. } => POLYGON_CODE,
            Shape::Point { .. } => POINT_CODE,
            Shape::Circle { .. } => CIRCLE_CODE,
        }
    }

    /// Get the display name for this shape kind.
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Rectangle { .. } => "Rectangle",
            Shape::Polygon { .. } => "Polygon",
            Shape::Point { .. } => "Point",
            Shape::Circle { .. } => "Circle",
        }
    }
}

/// A labelled region of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Display label
    pub label: String,
    /// Display colour, carried through unchanged
    pub color: Option<String>,
    /// Geometry
    pub shape: Shape,
}

impl Annotation {
    /// Create an annotation without a colour.
    pub fn new(label: impl Into<String>, shape: Shape) -> Self {
        Self {
            label: label.into(),
            color: None,
            shape,
        }
    }

    /// Parse a JSON array of annotation records.
    pub fn from_json_list(json: &str) -> Result<Vec<Self>> {
        let records: Vec<AnnotationRecord> = serde_json::from_str(json)?;
        records.into_iter().map(Self::try_from).collect()
    }

    /// Whether this is a single-pixel annotation.
    pub fn is_point(&self) -> bool {
        matches!(self.shape, Shape::Point { .. })
    }

    /// Every pixel the geometry covers, lines outer and samples inner.
    ///
    /// No down-sampling and no clipping to the cube is applied here.
    pub fn pixels(&self) -> Vec<Pixel> {
        self.enumerate(None)
    }

    /// The pixels of [`pixels`](Self::pixels) that lie inside the cube, in
    /// the same order.
    ///
    /// The scan ranges are intersected with the cube before enumeration, so
    /// the work is bounded by the overlap rather than the geometry.
    pub fn pixels_within(&self, dims: &Dimensions) -> Vec<Pixel> {
        self.enumerate(Some(dims))
    }

    fn enumerate(&self, dims: Option<&Dimensions>) -> Vec<Pixel> {
        let last_line = dims.map(|d| d.lines as i64 - 1);
        let last_sample = dims.map(|d| d.samples as i64 - 1);

        match &self.shape {
            Shape::Point { at } => {
                let (line, sample) = round_pixel(*at);
                if dims.is_some_and(|d| !d.contains(line, sample)) {
                    return Vec::new();
                }
                vec![(line, sample)]
            }
            Shape::Rectangle { corners } => {
                let (a, b) = (round_pixel(corners[0]), round_pixel(corners[1]));
                let (line_min, line_max) = span(a.0.min(b.0), a.0.max(b.0), last_line);
                let (sample_min, sample_max) = span(a.1.min(b.1), a.1.max(b.1), last_sample);
                (line_min..=line_max)
                    .flat_map(|line| (sample_min..=sample_max).map(move |sample| (line, sample)))
                    .collect()
            }
            Shape::Polygon { vertices } => {
                let (min, max) = bounds(vertices);
                scan(min, max, [last_line, last_sample], |line, sample| {
                    point_in_polygon([line, sample], vertices)
                })
            }
            Shape::Circle { center, radius } => {
                let min = [center[0] - radius, center[1] - radius];
                let max = [center[0] + radius, center[1] + radius];
                let r2 = radius * radius;
                scan(min, max, [last_line, last_sample], |line, sample| {
                    let dl = line - center[0];
                    let ds = sample - center[1];
                    dl * dl + ds * ds <= r2
                })
            }
        }
    }
}

impl TryFrom<AnnotationRecord> for Annotation {
    type Error = HsiError;

    fn try_from(record: AnnotationRecord) -> Result<Self> {
        let label = record.label;
        let shape = match (record.kind, record.coor) {
            (RECTANGLE_CODE, Coordinates::Many(points)) => {
                let corners: [[f64; 2]; 2] = points.try_into().map_err(|p: Vec<_>| {
                    HsiError::invalid_geometry(&label, format!("rectangle needs 2 corners, got {}", p.len()))
                })?;
                Shape::Rectangle { corners }
            }
            (POLYGON_CODE, Coordinates::Many(vertices)) => {
                if vertices.len() < 3 {
                    return Err(HsiError::invalid_geometry(
                        &label,
                        format!("polygon needs at least 3 vertices, got {}", vertices.len()),
                    ));
                }
                Shape::Polygon { vertices }
            }
            (POINT_CODE, Coordinates::Single(at)) => Shape::Point { at },
            (CIRCLE_CODE, Coordinates::Single(center)) => {
                let radius = record
                    .radius
                    .filter(|r| r.is_finite() && *r >= 0.0)
                    .ok_or_else(|| HsiError::invalid_geometry(&label, "circle needs a radius"))?;
                Shape::Circle { center, radius }
            }
            (RECTANGLE_CODE | POLYGON_CODE | POINT_CODE | CIRCLE_CODE, _) => {
                return Err(HsiError::invalid_geometry(
                    &label,
                    format!("coordinates do not match type {}", record.kind),
                ));
            }
            (other, _) => return Err(HsiError::UnknownAnnotationKind(other)),
        };

        Ok(Self {
            label,
            color: record.label_fill_style,
            shape,
        })
    }
}

impl From<&Annotation> for AnnotationRecord {
    fn from(annotation: &Annotation) -> Self {
        let (coor, radius) = match &annotation.shape {
            Shape::Rectangle { corners } => (Coordinates::Many(corners.to_vec()), None),
            Shape::Polygon { vertices } => (Coordinates::Many(vertices.clone()), None),
            Shape::Point { at } => (Coordinates::Single(*at), None),
            Shape::Circle { center, radius } => (Coordinates::Single(*center), Some(*radius)),
        };
        Self {
            label: annotation.label.clone(),
            label_fill_style: annotation.color.clone(),
            coor,
            radius,
            kind: annotation.shape.code(),
        }
    }
}

// ============================================================================
// Geometry Helpers
// ============================================================================

fn round_pixel(p: [f64; 2]) -> Pixel {
    (p[0].round() as i64, p[1].round() as i64)
}

fn bounds(points: &[[f64; 2]]) -> ([f64; 2], [f64; 2]) {
    points.iter().fold(
        ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]),
        |(min, max), p| {
            (
                [min[0].min(p[0]), min[1].min(p[1])],
                [max[0].max(p[0]), max[1].max(p[1])],
            )
        },
    )
}

/// Inclusive range `[lo, hi]`, intersected with `[0, last]` when given.
fn span(lo: i64, hi: i64, last: Option<i64>) -> (i64, i64) {
    match last {
        Some(last) => (lo.max(0), hi.min(last)),
        None => (lo, hi),
    }
}

/// Integer pixels in `[floor(min), ceil(max)]` accepted by `inside`,
/// restricted per axis to `[0, last]` where a limit is given.
fn scan(
    min: [f64; 2],
    max: [f64; 2],
    last: [Option<i64>; 2],
    inside: impl Fn(f64, f64) -> bool,
) -> Vec<Pixel> {
    let mut pixels = Vec::new();
    if !(min[0].is_finite() && min[1].is_finite() && max[0].is_finite() && max[1].is_finite()) {
        return pixels;
    }
    let (line_min, line_max) = span(min[0].floor() as i64, max[0].ceil() as i64, last[0]);
    let (sample_min, sample_max) = span(min[1].floor() as i64, max[1].ceil() as i64, last[1]);
    for line in line_min..=line_max {
        for sample in sample_min..=sample_max {
            if inside(line as f64, sample as f64) {
                pixels.push((line, sample));
            }
        }
    }
    pixels
}

/// Even-odd ray casting test.
pub fn point_in_polygon(point: [f64; 2], polygon: &[[f64; 2]]) -> bool {
    let [x, y] = point;
    let mut inside = false;
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];

        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Deterministically thin a pixel list to at most `max_samples` entries.
///
/// Keeps every `floor(n / max_samples)`-th pixel starting at the first, then
/// truncates to exactly `max_samples`.
pub fn sample_pixels(pixels: Vec<Pixel>, max_samples: usize) -> Vec<Pixel> {
    if pixels.len() <= max_samples || max_samples == 0 {
        return pixels;
    }

    log::debug!(
        "Sampling {} pixels from {} total pixels",
        max_samples,
        pixels.len()
    );
    let step = pixels.len() / max_samples;
    pixels
        .into_iter()
        .step_by(step)
        .take(max_samples)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Annotation {
        Annotation::new(
            "square",
            Shape::Polygon {
                vertices: vec![[0.0, 0.0], [0.0, 2.0], [2.0, 2.0], [2.0, 0.0]],
            },
        )
    }

    #[test]
    fn test_point_in_polygon() {
        let Shape::Polygon { vertices } = square().shape else {
            unreachable!()
        };
        assert!(point_in_polygon([1.0, 1.0], &vertices));
        assert!(!point_in_polygon([5.0, 5.0], &vertices));
        assert!(!point_in_polygon([1.0, 1.0], &vertices[..2]));
    }

    #[test]
    fn test_polygon_pixels() {
        let pixels = square().pixels();
        assert!(pixels.contains(&(1, 1)));
        assert!(!pixels.contains(&(5, 5)));
        assert!(pixels.iter().all(|&(l, s)| (0..=2).contains(&l) && (0..=2).contains(&s)));
    }

    #[test]
    fn test_rectangle_pixels_inclusive() {
        let rect = Annotation::new(
            "rect",
            Shape::Rectangle {
                corners: [[2.0, 2.0], [0.0, 0.0]],
            },
        );
        let pixels = rect.pixels();
        assert_eq!(pixels.len(), 9);
        assert_eq!(pixels[0], (0, 0));
        assert_eq!(pixels[1], (0, 1));
        assert_eq!(pixels[8], (2, 2));
    }

    #[test]
    fn test_circle_boundary_inclusive() {
        let circle = Annotation::new(
            "disc",
            Shape::Circle {
                center: [2.0, 2.0],
                radius: 1.0,
            },
        );
        assert_eq!(
            circle.pixels(),
            vec![(1, 2), (2, 1), (2, 2), (2, 3), (3, 2)]
        );
    }

    #[test]
    fn test_pixels_within_matches_clipped_order() {
        let dims = Dimensions {
            samples: 4,
            lines: 4,
            bands: 8,
        };
        let shapes = [
            Shape::Circle {
                center: [0.0, 1.0],
                radius: 2.5,
            },
            Shape::Rectangle {
                corners: [[-3.0, 2.0], [1.0, 9.0]],
            },
            Shape::Polygon {
                vertices: vec![[-2.0, -2.0], [-2.0, 6.0], [5.0, 1.0]],
            },
            Shape::Point { at: [3.0, 3.0] },
            Shape::Point { at: [4.0, 0.0] },
        ];
        for shape in shapes {
            let annotation = Annotation::new("clip", shape);
            let clipped: Vec<Pixel> = annotation
                .pixels()
                .into_iter()
                .filter(|&(l, s)| dims.contains(l, s))
                .collect();
            assert_eq!(annotation.pixels_within(&dims), clipped);
        }
    }

    #[test]
    fn test_huge_circle_bounded_by_cube() {
        let dims = Dimensions {
            samples: 4,
            lines: 4,
            bands: 8,
        };
        let circle = Annotation::new(
            "huge",
            Shape::Circle {
                center: [2.0, 2.0],
                radius: 1.0e9,
            },
        );
        let pixels = circle.pixels_within(&dims);
        let all: Vec<Pixel> = (0..4).flat_map(|l| (0..4).map(move |s| (l, s))).collect();
        assert_eq!(pixels, all);

        let far = Annotation::new(
            "far",
            Shape::Rectangle {
                corners: [[1.0e6, 1.0e6], [2.0e6, 2.0e6]],
            },
        );
        assert!(far.pixels_within(&dims).is_empty());
    }

    #[test]
    fn test_sample_pixels_stride() {
        let pixels: Vec<Pixel> = (0..2500).map(|i| (i / 50, i % 50)).collect();
        let sampled = sample_pixels(pixels.clone(), 1000);
        assert_eq!(sampled.len(), 1000);
        for (k, pixel) in sampled.iter().enumerate() {
            assert_eq!(*pixel, pixels[2 * k]);
        }

        let few: Vec<Pixel> = vec![(0, 0), (1, 1)];
        assert_eq!(sample_pixels(few.clone(), 1000), few);
    }

    #[test]
    fn test_parse_records() {
        let json = r##"[
            {"label": "leaf", "labelFillStyle": "#00ff00", "coor": [[0, 0], [2, 3]], "type": 1},
            {"label": "tri", "coor": [[0, 0], [0, 4], [4, 0]], "type": 2},
            {"label": "dot", "coor": [3, 1], "type": 3},
            {"label": "disc", "coor": [5, 5], "radius": 2.5, "type": 5}
        ]"##;
        let annotations = Annotation::from_json_list(json).unwrap();
        assert_eq!(annotations.len(), 4);
        assert_eq!(annotations[0].color.as_deref(), Some("#00ff00"));
        assert_eq!(annotations[0].shape.name(), "Rectangle");
        assert!(annotations[2].is_point());
        assert_eq!(annotations[2].pixels(), vec![(3, 1)]);
        assert_eq!(
            annotations[3].shape,
            Shape::Circle {
                center: [5.0, 5.0],
                radius: 2.5
            }
        );

        let record = AnnotationRecord::from(&annotations[3]);
        assert_eq!(record.kind, CIRCLE_CODE);
        assert_eq!(record.radius, Some(2.5));
    }

    #[test]
    fn test_unknown_kind() {
        let json = r#"[{"label": "line", "coor": [[0, 0], [1, 1]], "type": 4}]"#;
        assert!(matches!(
            Annotation::from_json_list(json),
            Err(HsiError::UnknownAnnotationKind(4))
        ));
    }

    #[test]
    fn test_invalid_geometry() {
        let bad = [
            r#"[{"label": "r", "coor": [[0, 0], [1, 1], [2, 2]], "type": 1}]"#,
            r#"[{"label": "c", "coor": [1, 1], "type": 5}]"#,
            r#"[{"label": "p", "coor": [[0, 0], [1, 1]], "type": 3}]"#,
            r#"[{"label": "g", "coor": [[0, 0], [1, 1]], "type": 2}]"#,
        ];
        for json in bad {
            assert!(matches!(
                Annotation::from_json_list(json),
                Err(HsiError::InvalidGeometry { .. })
            ));
        }
    }
}
