use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::canvas::{Point, ViewState};
use crate::ops::raster::{Path, Surface};

pub type ShapeId = u64;

/// Fill used for auxiliary shapes when none is given.
pub const DEFAULT_SHAPE_FILL: Rgba<u8> = Rgba([0xAA, 0xAA, 0xAA, 0xFF]);

/// Shape geometry, always in world coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeKind {
    Rectangle { origin: Point, width: f32, height: f32 },
    /// A bitmap placed at `origin`, drawn at its natural size in world units.
    Bitmap { origin: Point, image: Arc<RgbaImage> },
    /// A filled rectangle that pointer hit-testing ignores.
    NoHit { origin: Point, width: f32, height: f32 },
    /// Closed freeform outline; see [`polygon_path`].
    Polygon { points: Vec<Point> },
    /// Open polyline stroked with `line_width + 2`.
    Line { points: Vec<Point> },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeStyle {
    pub fill: Option<Rgba<u8>>,
    pub stroke: Option<Rgba<u8>>,
    pub line_width: f32,
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self { fill: Some(DEFAULT_SHAPE_FILL), stroke: None, line_width: 1.0 }
    }
}

impl ShapeStyle {
    pub fn filled(color: Rgba<u8>) -> Self {
        Self { fill: Some(color), stroke: None, line_width: 1.0 }
    }

    pub fn stroked(color: Rgba<u8>, line_width: f32) -> Self {
        Self { fill: None, stroke: Some(color), line_width }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    pub kind: ShapeKind,
    pub style: ShapeStyle,
}

impl Shape {
    pub fn new(kind: ShapeKind, style: ShapeStyle) -> Self {
        Self { kind, style }
    }

    pub fn rectangle(x: f32, y: f32, width: f32, height: f32, fill: Rgba<u8>) -> Self {
        Self::new(
            ShapeKind::Rectangle { origin: Point::new(x, y), width, height },
            ShapeStyle::filled(fill),
        )
    }

    pub fn bitmap(x: f32, y: f32, image: Arc<RgbaImage>) -> Self {
        Self::new(ShapeKind::Bitmap { origin: Point::new(x, y), image }, ShapeStyle::default())
    }

    pub fn polygon(points: Vec<Point>, fill: Rgba<u8>) -> Self {
        Self::new(ShapeKind::Polygon { points }, ShapeStyle::filled(fill))
    }

    pub fn line(points: Vec<Point>, color: Rgba<u8>, line_width: f32) -> Self {
        Self::new(ShapeKind::Line { points }, ShapeStyle::stroked(color, line_width))
    }

    /// Top-left corner of positioned shapes. Outlines have none.
    pub fn origin(&self) -> Option<Point> {
        match &self.kind {
            ShapeKind::Rectangle { origin, .. }
            | ShapeKind::Bitmap { origin, .. }
            | ShapeKind::NoHit { origin, .. } => Some(*origin),
            ShapeKind::Polygon { .. } | ShapeKind::Line { .. } => None,
        }
    }

    /// Move a positioned shape. Outlines are fixed once created.
    pub fn set_origin(&mut self, p: Point) {
        match &mut self.kind {
            ShapeKind::Rectangle { origin, .. }
            | ShapeKind::Bitmap { origin, .. }
            | ShapeKind::NoHit { origin, .. } => *origin = p,
            ShapeKind::Polygon { .. } | ShapeKind::Line { .. } => {}
        }
    }

    /// World-space bounding box as (origin, width, height).
    pub fn bounds(&self) -> Option<(Point, f32, f32)> {
        match &self.kind {
            ShapeKind::Rectangle { origin, width, height } | ShapeKind::NoHit { origin, width, height } => {
                Some((*origin, *width, *height))
            }
            ShapeKind::Bitmap { origin, image } => Some((*origin, image.width() as f32, image.height() as f32)),
            ShapeKind::Polygon { points } | ShapeKind::Line { points } => {
                let first = points.first()?;
                let (mut min, mut max) = (*first, *first);
                for p in points {
                    min = Point::new(min.x.min(p.x), min.y.min(p.y));
                    max = Point::new(max.x.max(p.x), max.y.max(p.y));
                }
                Some((min, max.x - min.x, max.y - min.y))
            }
        }
    }

    /// Hit test in world coordinates. Edges are inclusive; only rectangles
    /// and bitmaps are selectable.
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        let (origin, w, h) = match &self.kind {
            ShapeKind::Rectangle { origin, width, height } => (*origin, *width, *height),
            ShapeKind::Bitmap { origin, image } => (*origin, image.width() as f32, image.height() as f32),
            ShapeKind::NoHit { .. } | ShapeKind::Polygon { .. } | ShapeKind::Line { .. } => return false,
        };
        x >= origin.x && x <= origin.x + w && y >= origin.y && y <= origin.y + h
    }

    pub fn draw(&self, surface: &mut dyn Surface, view: &ViewState) {
        let zoom = view.zoom;
        match &self.kind {
            ShapeKind::Rectangle { origin, width, height } | ShapeKind::NoHit { origin, width, height } => {
                let s = view.world_to_screen(*origin);
                if let Some(fill) = self.style.fill {
                    surface.fill_rect(s.x, s.y, width * zoom, height * zoom, fill);
                }
                if let Some(stroke) = self.style.stroke {
                    surface.stroke_rect(s.x, s.y, width * zoom, height * zoom, self.style.line_width, stroke);
                }
            }
            ShapeKind::Bitmap { origin, image } => {
                let s = view.world_to_screen(*origin);
                surface.draw_image(image, s.x, s.y, image.width() as f32 * zoom, image.height() as f32 * zoom);
            }
            ShapeKind::Polygon { points } => {
                let screen: Vec<Point> = points.iter().map(|p| view.world_to_screen(*p)).collect();
                let Some(path) = polygon_path(&screen) else { return };
                if let Some(fill) = self.style.fill {
                    surface.fill_path(&path, fill);
                }
                if let Some(stroke) = self.style.stroke {
                    surface.stroke_path(&path, self.style.line_width * zoom, stroke);
                }
            }
            ShapeKind::Line { points } => {
                let Some(color) = self.style.stroke.or(self.style.fill) else { return };
                let Some((first, rest)) = points.split_first() else { return };
                let mut path = Path::new();
                path.move_to(view.world_to_screen(*first));
                for p in rest {
                    path.line_to(view.world_to_screen(*p));
                }
                surface.stroke_path(&path, (self.style.line_width + 2.0) * zoom, color);
            }
        }
    }
}

// ============================================================================
// Closing curve for freeform outlines
// ============================================================================

/// +1/-1 per axis when `p` lies beyond both chord endpoints on that axis.
fn point_weight(p: Point, a: Point, b: Point) -> Point {
    let axis = |v: f32, lo: f32, hi: f32| {
        if v > lo && v > hi {
            1.0
        } else if v < lo && v < hi {
            -1.0
        } else {
            0.0
        }
    };
    Point::new(axis(p.x, a.x, b.x), axis(p.y, a.y, b.y))
}

/// Control point of the curve that closes an outline from its last vertex
/// back to its first: the chord midpoint pulled against the summed vertex
/// weights.
pub fn closing_control(points: &[Point]) -> Option<Point> {
    let first = *points.first()?;
    let last = *points.last()?;
    let mut direction = Point::ZERO;
    for p in &points[1..] {
        direction = direction + point_weight(*p, first, last);
    }
    Some(first.midpoint(last) - direction * 0.5)
}

/// Straight segments through the vertices, closed by a cubic whose first
/// control is the last vertex and second control is [`closing_control`].
pub fn polygon_path(points: &[Point]) -> Option<Path> {
    if points.len() < 2 {
        return None;
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let control = closing_control(points)?;
    let mut path = Path::new();
    path.move_to(first);
    for p in &points[1..] {
        path.line_to(*p);
    }
    path.bezier_to(last, control, first).close();
    Some(path)
}

// ============================================================================
// Shape list
// ============================================================================

/// Shapes in insertion order; later entries draw on top and win hit tests.
#[derive(Clone, Debug, Default)]
pub struct ShapeList {
    entries: Vec<(ShapeId, Shape)>,
    next_id: ShapeId,
}

impl ShapeList {
    pub fn add(&mut self, shape: Shape) -> ShapeId {
        self.next_id += 1;
        self.entries.push((self.next_id, shape));
        self.next_id
    }

    pub fn remove(&mut self, id: ShapeId) -> Option<Shape> {
        let idx = self.entries.iter().position(|(i, _)| *i == id)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.entries.iter_mut().find(|(i, _)| *i == id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShapeId, &Shape)> {
        self.entries.iter().map(|(i, s)| (*i, s))
    }

    /// Topmost shape containing the world point.
    pub fn hit_test(&self, world: Point) -> Option<ShapeId> {
        self.entries
            .iter()
            .rev()
            .find(|(_, s)| s.contains_point(world.x, world.y))
            .map(|(i, _)| *i)
    }
}
