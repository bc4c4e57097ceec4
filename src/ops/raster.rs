//! Software drawing surface.
//!
//! `Raster` is a flat, non-premultiplied RGBA8 buffer carrying the small set
//! of canvas-style primitives the compositor needs: rect fills and strokes,
//! circle stamps, round-capped strokes, path fills and scaled image blits.
//! Every primitive composites through the surface's current [`CompositeOp`].
//!
//! Coverage is hard-edged: a pixel is touched when its centre lies inside
//! the primitive.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::Point;
use crate::io::ImageIoError;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
pub const OPAQUE_BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Segments used when flattening one cubic bezier.
const BEZIER_SEGMENTS: usize = 16;

// ============================================================================
// COMPOSITE OPERATIONS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompositeOp {
    #[default]
    SourceOver,
    DestinationOut,
    SourceIn,
    Overlay,
}

impl CompositeOp {
    pub fn name(&self) -> &'static str {
        match self {
            CompositeOp::SourceOver => "source-over",
            CompositeOp::DestinationOut => "destination-out",
            CompositeOp::SourceIn => "source-in",
            CompositeOp::Overlay => "overlay",
        }
    }

    /// Composite `src` onto `dst`. Both are straight (non-premultiplied) alpha.
    pub fn blend(self, dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
        match self {
            CompositeOp::SourceOver => source_over(dst, src),
            CompositeOp::DestinationOut => {
                if src[3] == 0 {
                    return dst;
                }
                let a = unit(dst[3]) * (1.0 - unit(src[3]));
                let a8 = to_u8(a);
                if a8 == 0 {
                    TRANSPARENT
                } else {
                    Rgba([dst[0], dst[1], dst[2], a8])
                }
            }
            CompositeOp::SourceIn => {
                let a8 = to_u8(unit(src[3]) * unit(dst[3]));
                if a8 == 0 {
                    TRANSPARENT
                } else {
                    Rgba([src[0], src[1], src[2], a8])
                }
            }
            CompositeOp::Overlay => {
                if src[3] == 0 {
                    return dst;
                }
                // The backdrop's own alpha decides how much of the overlay
                // result replaces the plain source colour.
                let da = unit(dst[3]);
                let mut mixed = [0u8; 4];
                for c in 0..3 {
                    let cb = unit(dst[c]);
                    let cs = unit(src[c]);
                    mixed[c] = to_u8((1.0 - da) * cs + da * overlay_channel(cb, cs));
                }
                mixed[3] = src[3];
                source_over(dst, Rgba(mixed))
            }
        }
    }
}

#[inline]
fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base <= 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn source_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    match src[3] {
        0 => return dst,
        255 => return src,
        _ => {}
    }
    let sa = unit(src[3]);
    let da = unit(dst[3]);
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return TRANSPARENT;
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (unit(src[c]) * sa + unit(dst[c]) * da * (1.0 - sa)) / out_a;
        out[c] = to_u8(v);
    }
    out[3] = to_u8(out_a);
    Rgba(out)
}

// ============================================================================
// COLORS
// ============================================================================

/// Parse a colour literal: `#rgb`, `#rrggbb`, `#rrggbbaa`, `r,g,b[,a]` or
/// `rgba(r,g,b,a)` where the functional alpha is a 0..1 float.
pub fn parse_color(s: &str) -> Option<Rgba<u8>> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(inner) = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        if parts.len() != 3 && parts.len() != 4 {
            return None;
        }
        let r = parts[0].parse::<u8>().ok()?;
        let g = parts[1].parse::<u8>().ok()?;
        let b = parts[2].parse::<u8>().ok()?;
        let a = match parts.get(3) {
            Some(a) => {
                let f = a.parse::<f32>().ok()?;
                if !(0.0..=1.0).contains(&f) {
                    return None;
                }
                to_u8(f)
            }
            None => 255,
        };
        return Some(Rgba([r, g, b, a]));
    }
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() == 3 || parts.len() == 4 {
        let mut c = [0u8, 0, 0, 255];
        for (i, p) in parts.iter().enumerate() {
            c[i] = p.parse::<u8>().ok()?;
        }
        return Some(Rgba(c));
    }
    None
}

fn parse_hex(hex: &str) -> Option<Rgba<u8>> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
        6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => None,
    }
}

pub fn color_to_hex(c: Rgba<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}{:02x}", c[0], c[1], c[2], c[3])
}

// ============================================================================
// PATHS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathOp {
    MoveTo(Point),
    LineTo(Point),
    /// Cubic bezier: first control, second control, end.
    BezierTo(Point, Point, Point),
    Close,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path {
    ops: Vec<PathOp>,
}

/// One flattened subpath.
#[derive(Clone, Debug, PartialEq)]
pub struct Polyline {
    pub points: Vec<Point>,
    pub closed: bool,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, p: Point) -> &mut Self {
        self.ops.push(PathOp::MoveTo(p));
        self
    }

    pub fn line_to(&mut self, p: Point) -> &mut Self {
        self.ops.push(PathOp::LineTo(p));
        self
    }

    pub fn bezier_to(&mut self, c1: Point, c2: Point, end: Point) -> &mut Self {
        self.ops.push(PathOp::BezierTo(c1, c2, end));
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.ops.push(PathOp::Close);
        self
    }

    pub fn ops(&self) -> &[PathOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Flatten into polylines. Curves become `BEZIER_SEGMENTS` line segments.
    pub fn flatten(&self) -> Vec<Polyline> {
        let mut out: Vec<Polyline> = Vec::new();
        let mut current: Vec<Point> = Vec::new();

        let flush = |current: &mut Vec<Point>, out: &mut Vec<Polyline>, closed: bool| {
            if !current.is_empty() {
                out.push(Polyline { points: std::mem::take(current), closed });
            }
        };

        for op in &self.ops {
            match *op {
                PathOp::MoveTo(p) => {
                    flush(&mut current, &mut out, false);
                    current.push(p);
                }
                PathOp::LineTo(p) => current.push(p),
                PathOp::BezierTo(c1, c2, end) => {
                    let start = current.last().copied().unwrap_or(c1);
                    if current.is_empty() {
                        current.push(start);
                    }
                    for i in 1..=BEZIER_SEGMENTS {
                        let t = i as f32 / BEZIER_SEGMENTS as f32;
                        current.push(cubic_point(start, c1, c2, end, t));
                    }
                }
                PathOp::Close => flush(&mut current, &mut out, true),
            }
        }
        flush(&mut current, &mut out, false);
        out
    }
}

fn cubic_point(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}

// ============================================================================
// SURFACE
// ============================================================================

/// A 2D target the compositor and tools draw into.
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn composite_op(&self) -> CompositeOp;
    fn set_composite_op(&mut self, op: CompositeOp);

    /// Reset every pixel to transparent, ignoring the composite op.
    fn clear(&mut self);

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba<u8>);
    /// Stroke centred on the rectangle's edges.
    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, line_width: f32, color: Rgba<u8>);
    fn fill_circle(&mut self, center: Point, radius: f32, color: Rgba<u8>);
    fn stroke_circle(&mut self, center: Point, radius: f32, line_width: f32, color: Rgba<u8>);
    /// Round-capped line.
    fn stroke_line(&mut self, from: Point, to: Point, line_width: f32, color: Rgba<u8>);
    /// Non-zero winding fill; open subpaths are closed implicitly.
    fn fill_path(&mut self, path: &Path, color: Rgba<u8>);
    /// Round-joined stroke; each pixel composites at most once.
    fn stroke_path(&mut self, path: &Path, line_width: f32, color: Rgba<u8>);
    /// Draw `image` scaled into the destination rectangle (nearest sampling).
    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, w: f32, h: f32);

    fn export_png(&self) -> Result<Vec<u8>, ImageIoError>;
}

// ============================================================================
// RASTER
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    op: CompositeOp,
}

/// Half-open pixel index range whose centres fall in `[lo, hi)`, clipped to `limit`.
fn centre_span(lo: f32, hi: f32, limit: u32) -> Option<(u32, u32)> {
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
        return None;
    }
    let start = (lo - 0.5).ceil().max(0.0);
    let end = (hi - 0.5).ceil().min(limit as f32);
    if end <= start {
        return None;
    }
    Some((start as u32, end as u32))
}

/// Pixel range whose centres can fall within `[lo, hi]` (inclusive), clipped.
fn candidate_span(lo: f32, hi: f32, limit: u32) -> Option<(u32, u32)> {
    if !(lo.is_finite() && hi.is_finite()) || hi < lo {
        return None;
    }
    let start = (lo - 0.5).ceil().max(0.0);
    let end = ((hi - 0.5).floor() + 1.0).min(limit as f32);
    if end <= start {
        return None;
    }
    Some((start as u32, end as u32))
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(Point::new(a.x + t * dx, a.y + t * dy))
}

#[inline]
fn blend_into(px: &mut [u8], src: Rgba<u8>, op: CompositeOp) {
    let dst = Rgba([px[0], px[1], px[2], px[3]]);
    px.copy_from_slice(&op.blend(dst, src).0);
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            op: CompositeOp::SourceOver,
        }
    }

    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut r = Self::new(width, height);
        r.fill(color);
        r
    }

    pub fn from_rgba_image(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.as_raw().clone(),
            op: CompositeOp::SourceOver,
        }
    }

    /// Build from raw RGBA bytes; `None` if the length does not match.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self { width, height, pixels, op: CompositeOp::SourceOver })
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        // Length always matches the dimensions, so this cannot fail.
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if any pixel has non-zero alpha.
    pub fn has_content(&self) -> bool {
        self.pixels.par_chunks(4).any(|px| px[3] != 0)
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        if x >= self.width || y >= self.height {
            return TRANSPARENT;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Rgba([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }

    /// Reallocate to a new size. Contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize * 4];
    }

    /// Overwrite every pixel, ignoring the composite op.
    pub fn fill(&mut self, color: Rgba<u8>) {
        self.pixels.par_chunks_mut(4).for_each(|px| px.copy_from_slice(&color.0));
    }

    /// Give every covered pixel `color`'s RGB, keeping its own alpha.
    /// Fully transparent pixels are zeroed.
    pub fn recolor(&mut self, color: Rgba<u8>) {
        self.pixels.par_chunks_mut(4).for_each(|px| {
            if px[3] == 0 {
                px[..3].fill(0);
            } else {
                px[..3].copy_from_slice(&color.0[..3]);
            }
        });
    }

    /// Composite another raster at integer offset, unscaled.
    pub fn draw_raster(&mut self, src: &Raster, x: i32, y: i32) {
        self.blit(
            &src.pixels,
            src.width,
            src.height,
            x as f32,
            y as f32,
            src.width as f32,
            src.height as f32,
        );
    }

    /// Run `f(y, row)` over rows `y0..y1` in parallel.
    fn for_rows<F>(&mut self, y0: u32, y1: u32, f: F)
    where
        F: Fn(u32, &mut [u8]) + Sync + Send,
    {
        let stride = self.width as usize * 4;
        if stride == 0 || y0 >= y1 {
            return;
        }
        let start = y0 as usize * stride;
        let end = y1.min(self.height) as usize * stride;
        self.pixels[start..end]
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(i, row)| f(y0 + i as u32, row));
    }

    /// Composite `color` onto every pixel in the box whose centre passes `inside`.
    fn fill_where<F>(&mut self, min: Point, max: Point, color: Rgba<u8>, inside: F)
    where
        F: Fn(Point) -> bool + Sync + Send,
    {
        let Some((x0, x1)) = candidate_span(min.x, max.x, self.width) else {
            return;
        };
        let Some((y0, y1)) = candidate_span(min.y, max.y, self.height) else {
            return;
        };
        let op = self.op;
        self.for_rows(y0, y1, |y, row| {
            let cy = y as f32 + 0.5;
            for x in x0..x1 {
                if inside(Point::new(x as f32 + 0.5, cy)) {
                    let i = x as usize * 4;
                    blend_into(&mut row[i..i + 4], color, op);
                }
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn blit(&mut self, src: &[u8], sw: u32, sh: u32, x: f32, y: f32, w: f32, h: f32) {
        if sw == 0 || sh == 0 || w <= 0.0 || h <= 0.0 {
            return;
        }
        let Some((x0, x1)) = centre_span(x, x + w, self.width) else {
            return;
        };
        let Some((y0, y1)) = centre_span(y, y + h, self.height) else {
            return;
        };
        let op = self.op;
        let sx_scale = sw as f32 / w;
        let sy_scale = sh as f32 / h;
        self.for_rows(y0, y1, |dy, row| {
            let sy = (((dy as f32 + 0.5 - y) * sy_scale) as u32).min(sh - 1);
            let src_row = sy as usize * sw as usize * 4;
            for dx in x0..x1 {
                let sx = (((dx as f32 + 0.5 - x) * sx_scale) as u32).min(sw - 1);
                let si = src_row + sx as usize * 4;
                let s = Rgba([src[si], src[si + 1], src[si + 2], src[si + 3]]);
                let i = dx as usize * 4;
                blend_into(&mut row[i..i + 4], s, op);
            }
        });
    }
}

impl Surface for Raster {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn composite_op(&self) -> CompositeOp {
        self.op
    }

    fn set_composite_op(&mut self, op: CompositeOp) {
        self.op = op;
    }

    fn clear(&mut self) {
        self.pixels.par_iter_mut().for_each(|b| *b = 0);
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba<u8>) {
        let (x, w) = if w < 0.0 { (x + w, -w) } else { (x, w) };
        let (y, h) = if h < 0.0 { (y + h, -h) } else { (y, h) };
        let Some((x0, x1)) = centre_span(x, x + w, self.width) else {
            return;
        };
        let Some((y0, y1)) = centre_span(y, y + h, self.height) else {
            return;
        };
        let op = self.op;
        self.for_rows(y0, y1, |_, row| {
            for px in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                blend_into(px, color, op);
            }
        });
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, line_width: f32, color: Rgba<u8>) {
        if line_width <= 0.0 {
            return;
        }
        let half = line_width / 2.0;
        // Four non-overlapping bands so translucent strokes composite once.
        self.fill_rect(x - half, y - half, w + line_width, line_width, color);
        self.fill_rect(x - half, y + h - half, w + line_width, line_width, color);
        let inner = h - line_width;
        if inner > 0.0 {
            self.fill_rect(x - half, y + half, line_width, inner, color);
            self.fill_rect(x + w - half, y + half, line_width, inner, color);
        }
    }

    fn fill_circle(&mut self, center: Point, radius: f32, color: Rgba<u8>) {
        if radius <= 0.0 {
            return;
        }
        let r_sq = radius * radius;
        self.fill_where(
            Point::new(center.x - radius, center.y - radius),
            Point::new(center.x + radius, center.y + radius),
            color,
            move |p| {
                let dx = p.x - center.x;
                let dy = p.y - center.y;
                dx * dx + dy * dy <= r_sq
            },
        );
    }

    fn stroke_circle(&mut self, center: Point, radius: f32, line_width: f32, color: Rgba<u8>) {
        if line_width <= 0.0 || radius < 0.0 {
            return;
        }
        let half = line_width / 2.0;
        let outer = radius + half;
        self.fill_where(
            Point::new(center.x - outer, center.y - outer),
            Point::new(center.x + outer, center.y + outer),
            color,
            move |p| (p.distance(center) - radius).abs() <= half,
        );
    }

    fn stroke_line(&mut self, from: Point, to: Point, line_width: f32, color: Rgba<u8>) {
        if line_width <= 0.0 {
            return;
        }
        let half = line_width / 2.0;
        self.fill_where(
            Point::new(from.x.min(to.x) - half, from.y.min(to.y) - half),
            Point::new(from.x.max(to.x) + half, from.y.max(to.y) + half),
            color,
            move |p| distance_to_segment(p, from, to) <= half,
        );
    }

    fn fill_path(&mut self, path: &Path, color: Rgba<u8>) {
        let mut edges: Vec<(Point, Point)> = Vec::new();
        for poly in path.flatten() {
            let n = poly.points.len();
            if n < 2 {
                continue;
            }
            for i in 0..n {
                edges.push((poly.points[i], poly.points[(i + 1) % n]));
            }
        }
        if edges.is_empty() {
            return;
        }
        let min_y = edges.iter().map(|(a, b)| a.y.min(b.y)).fold(f32::INFINITY, f32::min);
        let max_y = edges.iter().map(|(a, b)| a.y.max(b.y)).fold(f32::NEG_INFINITY, f32::max);
        let Some((y0, y1)) = candidate_span(min_y, max_y, self.height) else {
            return;
        };
        let width = self.width;
        let op = self.op;
        self.for_rows(y0, y1, |y, row| {
            let cy = y as f32 + 0.5;
            // (x, winding direction) for every edge crossing this scanline.
            let mut nodes: Vec<(f32, i32)> = edges
                .iter()
                .filter_map(|&(a, b)| {
                    if (a.y <= cy && b.y > cy) || (b.y <= cy && a.y > cy) {
                        let x = a.x + (cy - a.y) / (b.y - a.y) * (b.x - a.x);
                        Some((x, if b.y > a.y { 1 } else { -1 }))
                    } else {
                        None
                    }
                })
                .collect();
            nodes.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut winding = 0;
            for pair in nodes.windows(2) {
                winding += pair[0].1;
                if winding == 0 {
                    continue;
                }
                if let Some((x0, x1)) = centre_span(pair[0].0, pair[1].0, width) {
                    for px in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                        blend_into(px, color, op);
                    }
                }
            }
        });
    }

    fn stroke_path(&mut self, path: &Path, line_width: f32, color: Rgba<u8>) {
        if line_width <= 0.0 || self.is_empty() {
            return;
        }
        let half = line_width / 2.0;
        let mut segments: Vec<(Point, Point)> = Vec::new();
        for poly in path.flatten() {
            let pts = &poly.points;
            match pts.len() {
                0 => {}
                1 => segments.push((pts[0], pts[0])),
                n => {
                    for w in pts.windows(2) {
                        segments.push((w[0], w[1]));
                    }
                    if poly.closed {
                        segments.push((pts[n - 1], pts[0]));
                    }
                }
            }
        }

        // Collect coverage first so overlapping segments blend a pixel once.
        let (w, h) = (self.width as usize, self.height as usize);
        let mut covered = vec![false; w * h];
        for &(a, b) in &segments {
            let Some((x0, x1)) = candidate_span(a.x.min(b.x) - half, a.x.max(b.x) + half, self.width)
            else {
                continue;
            };
            let Some((y0, y1)) = candidate_span(a.y.min(b.y) - half, a.y.max(b.y) + half, self.height)
            else {
                continue;
            };
            for y in y0..y1 {
                for x in x0..x1 {
                    let p = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                    if distance_to_segment(p, a, b) <= half {
                        covered[y as usize * w + x as usize] = true;
                    }
                }
            }
        }
        let op = self.op;
        self.for_rows(0, h as u32, |y, row| {
            let base = y as usize * w;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                if covered[base + x] {
                    blend_into(px, color, op);
                }
            }
        });
    }

    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, w: f32, h: f32) {
        self.blit(image.as_raw(), image.width(), image.height(), x, y, w, h);
    }

    fn export_png(&self) -> Result<Vec<u8>, ImageIoError> {
        crate::io::encode_png(&self.to_rgba_image())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn parses_supported_color_forms() {
        assert_eq!(parse_color("#f00"), Some(RED));
        assert_eq!(parse_color("#CC0000"), Some(Rgba([204, 0, 0, 255])));
        assert_eq!(parse_color("#33333380"), Some(Rgba([51, 51, 51, 128])));
        assert_eq!(parse_color("10, 20, 30"), Some(Rgba([10, 20, 30, 255])));
        assert_eq!(parse_color("10,20,30,40"), Some(Rgba([10, 20, 30, 40])));
        assert_eq!(parse_color("rgba(255,0,0,.5)"), Some(Rgba([255, 0, 0, 128])));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("300,0,0"), None);
    }

    #[test]
    fn recolor_keeps_alpha() {
        let mut r = Raster::new(3, 1);
        r.fill(Rgba([0, 0, 0, 200]));
        r.set_composite_op(CompositeOp::DestinationOut);
        r.fill_rect(0.0, 0.0, 1.0, 1.0, OPAQUE_BLACK);
        r.recolor(RED);
        assert_eq!(r.get_pixel(0, 0), TRANSPARENT);
        assert_eq!(r.get_pixel(1, 0), Rgba([255, 0, 0, 200]));
        assert_eq!(r.get_pixel(2, 0), Rgba([255, 0, 0, 200]));
    }

    #[test]
    fn destination_out_with_opaque_source_clears() {
        let out = CompositeOp::DestinationOut.blend(OPAQUE_BLACK, RED);
        assert_eq!(out, TRANSPARENT);
        let half = CompositeOp::DestinationOut.blend(OPAQUE_BLACK, Rgba([0, 0, 0, 128]));
        assert_eq!(half[3], 127);
    }

    #[test]
    fn source_in_keeps_destination_alpha() {
        let out = CompositeOp::SourceIn.blend(Rgba([0, 0, 0, 128]), RED);
        assert_eq!(out, Rgba([255, 0, 0, 128]));
        assert_eq!(CompositeOp::SourceIn.blend(TRANSPARENT, RED), TRANSPARENT);
    }

    #[test]
    fn overlay_on_transparent_is_plain_source() {
        let grey = Rgba([51, 51, 51, 255]);
        assert_eq!(CompositeOp::Overlay.blend(TRANSPARENT, grey), grey);
        // Dark backdrop darkens further under overlay.
        let out = CompositeOp::Overlay.blend(Rgba([40, 40, 40, 255]), grey);
        assert!(out[0] < 40);
    }

    #[test]
    fn fill_rect_covers_pixel_centres_only() {
        let mut r = Raster::new(10, 10);
        r.fill_rect(2.0, 2.0, 3.0, 3.0, RED);
        assert_eq!(r.get_pixel(2, 2), RED);
        assert_eq!(r.get_pixel(4, 4), RED);
        assert_eq!(r.get_pixel(5, 5), TRANSPARENT);
        assert_eq!(r.get_pixel(1, 2), TRANSPARENT);
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut r = Raster::new(4, 4);
        r.fill_rect(-10.0, -10.0, 100.0, 100.0, RED);
        assert!((0..4).all(|y| (0..4).all(|x| r.get_pixel(x, y) == RED)));
    }

    #[test]
    fn stroke_line_has_round_caps() {
        let mut r = Raster::new(40, 20);
        r.stroke_line(Point::new(10.0, 10.0), Point::new(30.0, 10.0), 6.0, RED);
        assert_eq!(r.get_pixel(20, 10), RED);
        assert_eq!(r.get_pixel(20, 12), RED);
        assert_eq!(r.get_pixel(20, 14), TRANSPARENT);
        // Cap extends past the endpoint by half the width.
        assert_eq!(r.get_pixel(31, 10), RED);
        assert_eq!(r.get_pixel(34, 10), TRANSPARENT);
    }

    #[test]
    fn fill_path_fills_triangle_interior() {
        let mut r = Raster::new(20, 20);
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 0.0))
            .line_to(Point::new(20.0, 0.0))
            .line_to(Point::new(0.0, 20.0))
            .close();
        r.fill_path(&path, RED);
        assert_eq!(r.get_pixel(2, 2), RED);
        assert_eq!(r.get_pixel(17, 17), TRANSPARENT);
    }

    #[test]
    fn stroke_path_blends_overlaps_once() {
        let mut r = Raster::new(20, 20);
        let half_red = Rgba([255, 0, 0, 128]);
        let mut path = Path::new();
        path.move_to(Point::new(2.0, 10.0))
            .line_to(Point::new(18.0, 10.0))
            .line_to(Point::new(2.0, 10.5));
        r.stroke_path(&path, 4.0, half_red);
        assert_eq!(r.get_pixel(10, 10), half_red);
    }

    #[test]
    fn bezier_flattens_to_end_point() {
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 0.0)).bezier_to(
            Point::new(0.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
        );
        let polys = path.flatten();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].points.len(), BEZIER_SEGMENTS + 1);
        assert_eq!(*polys[0].points.last().unwrap(), Point::new(10.0, 0.0));
    }

    #[test]
    fn draw_image_scales_with_nearest_sampling() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, RED);
        img.put_pixel(1, 0, OPAQUE_BLACK);
        let mut r = Raster::new(8, 2);
        r.draw_image(&img, 0.0, 0.0, 8.0, 2.0);
        assert_eq!(r.get_pixel(3, 1), RED);
        assert_eq!(r.get_pixel(4, 0), OPAQUE_BLACK);
    }

    #[test]
    fn zero_sized_raster_ignores_drawing() {
        let mut r = Raster::new(0, 0);
        r.fill_rect(0.0, 0.0, 10.0, 10.0, RED);
        r.fill_circle(Point::new(1.0, 1.0), 5.0, RED);
        r.stroke_path(&Path::new(), 2.0, RED);
        assert!(r.is_empty());
        assert!(!r.has_content());
    }
}
