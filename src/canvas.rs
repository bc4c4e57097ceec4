//! View transform, render timer and the compositor.
//!
//! `CanvasState` owns everything one view needs: the map bitmap, the mask,
//! the tool overlay, auxiliary shapes and the view transform. `draw` paints
//! a whole frame into any [`Surface`] in fixed z-order.

use std::ops::{Add, Mul, Sub};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};

use crate::components::tools::{Drag, ToolMode, ToolState};
use crate::io::{DecodeSlot, ImageLoader, ImageSource, SessionFile};
use crate::ops::mask::{MaskOp, MaskState};
use crate::ops::raster::{CompositeOp, Surface};
use crate::ops::shapes::{Shape, ShapeId, ShapeList};
use crate::settings::HostConfig;

pub const MIN_ZOOM: f32 = 0.01;
pub const MAX_ZOOM: f32 = 100.0;

/// Cursor ring colour.
const CURSOR_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
/// Cursor interior while a polygon is being traced.
const POLYGON_CURSOR_FILL: Rgba<u8> = Rgba([255, 0, 0, 128]);

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(self, dx: f32, dy: f32) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

// ============================================================================
// VIEW STATE
// ============================================================================

/// Pan/zoom transform plus the redraw flag.
///
/// `screen = world * zoom + pan`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    pub pan: Point,
    pub zoom: f32,
    /// True when the last drawn frame still reflects the state.
    pub valid: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self { pan: Point::ZERO, zoom: 1.0, valid: false }
    }
}

impl ViewState {
    pub fn screen_to_world(&self, p: Point) -> Point {
        Point::new(-self.pan.x / self.zoom + p.x / self.zoom, -self.pan.y / self.zoom + p.y / self.zoom)
    }

    pub fn world_to_screen(&self, p: Point) -> Point {
        Point::new(p.x * self.zoom + self.pan.x, p.y * self.zoom + self.pan.y)
    }

    /// Wheel step factor: up zooms in, down zooms out.
    pub fn zoom_factor(delta: f32) -> f32 {
        if delta < 0.0 { 1.2 } else { 0.8 }
    }

    /// Zoom by one wheel step keeping the world point under `anchor` fixed.
    pub fn zoom_around(&mut self, delta: f32, anchor: Point) {
        let old_zoom = self.zoom;
        let new_zoom = (old_zoom * Self::zoom_factor(delta)).clamp(MIN_ZOOM, MAX_ZOOM);
        let factor = new_zoom / old_zoom;
        self.zoom = new_zoom;
        self.pan = Point::new(
            self.pan.x * factor - anchor.x * (factor - 1.0),
            self.pan.y * factor - anchor.y * (factor - 1.0),
        );
        self.valid = false;
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

// ============================================================================
// RENDER TIMER
// ============================================================================

/// Fires at most once per interval; the host calls `CanvasState::tick` often.
#[derive(Clone, Copy, Debug)]
pub struct RenderTimer {
    interval: Duration,
    last_fire: Option<Instant>,
}

impl RenderTimer {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval: Duration::from_millis(interval_ms.max(1)), last_fire: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn due(&mut self, now: Instant) -> bool {
        let fire = match self.last_fire {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if fire {
            self.last_fire = Some(now);
        }
        fire
    }
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// Notifications for the host, drained with [`CanvasState::drain_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum CanvasEvent {
    MapLoaded { width: u32, height: u32 },
    /// A stroke finished; carries the new mask composite as PNG.
    MaskCommitted { png: Arc<Vec<u8>> },
    DecodeFailed { slot: DecodeSlot, message: String },
}

pub struct CanvasState {
    pub config: HostConfig,
    pub view: ViewState,
    viewport: (u32, u32),
    pub map: Option<Arc<RgbaImage>>,
    pub mask: MaskState,
    pub tool: ToolState,
    pub shapes: ShapeList,
    pub selection: Option<ShapeId>,
    /// Pointer in canvas coordinates while a paint tool shows its cursor.
    pub pointer: Option<Point>,
    pub last_known_pointer: Option<Point>,
    pub drag: Option<Drag>,
    loader: ImageLoader,
    timer: RenderTimer,
    events: Vec<CanvasEvent>,
}

impl CanvasState {
    pub fn new(viewport_width: u32, viewport_height: u32, config: HostConfig) -> Self {
        let mut tool = ToolState::new(config.brush_width);
        tool.resize_overlay(viewport_width, viewport_height, config.gutter);
        Self {
            mask: MaskState::new(config.mask_fill, config.mask_strategy, config.gutter),
            timer: RenderTimer::new(config.tick_interval_ms),
            config,
            view: ViewState::default(),
            viewport: (viewport_width, viewport_height),
            map: None,
            tool,
            shapes: ShapeList::default(),
            selection: None,
            pointer: None,
            last_known_pointer: None,
            drag: None,
            loader: ImageLoader::new(),
            events: Vec::new(),
        }
    }

    pub fn invalidate(&mut self) {
        self.view.invalidate();
    }

    pub fn is_valid(&self) -> bool {
        self.view.valid
    }

    pub fn gutter(&self) -> u32 {
        self.config.gutter
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn map_size(&self) -> Option<(u32, u32)> {
        self.map.as_ref().map(|m| (m.width(), m.height()))
    }

    pub fn render_interval(&self) -> Duration {
        self.timer.interval()
    }

    /// Resize the viewport; the overlay follows (it is screen space + gutter).
    pub fn resize_viewport(&mut self, width: u32, height: u32) {
        if self.viewport == (width, height) {
            return;
        }
        self.viewport = (width, height);
        self.tool.resize_overlay(width, height, self.config.gutter);
        self.invalidate();
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// A decoded map arrived: size the mask to it and start fully hidden.
    pub fn on_map_loaded(&mut self, image: RgbaImage) {
        let (w, h) = image.dimensions();
        log_info!("Map loaded: {}x{}", w, h);
        self.map = Some(Arc::new(image));
        self.mask.allocate(w, h);
        self.mask.regenerate();
        self.events.push(CanvasEvent::MapLoaded { width: w, height: h });
        self.invalidate();
    }

    /// Decode map bytes in the background. Returns the request token.
    pub fn load_map_bytes(&mut self, bytes: Vec<u8>) -> u64 {
        self.loader.request(DecodeSlot::Map, ImageSource::Bytes(Arc::new(bytes)))
    }

    pub fn load_map_path(&mut self, path: &Path) -> u64 {
        self.loader.request(DecodeSlot::Map, ImageSource::File(path.to_path_buf()))
    }

    /// Decode a mask composite produced by another view.
    pub fn apply_remote_mask(&mut self, png: Arc<Vec<u8>>) -> u64 {
        self.loader.request(DecodeSlot::Mask, ImageSource::Bytes(png))
    }

    /// Replace the displayed mask composite without touching the raster.
    pub fn set_mask_composite(&mut self, image: RgbaImage) {
        self.mask.set_composite(image);
        self.invalidate();
    }

    /// Apply finished decodes. Stale results were already dropped by the loader.
    pub fn poll_decodes(&mut self) {
        for done in self.loader.poll() {
            self.apply_decode(done.slot, done.result);
        }
    }

    /// Block until outstanding decodes finish or `timeout` passes.
    pub fn wait_for_decodes(&mut self, timeout: Duration) {
        for done in self.loader.wait(timeout) {
            self.apply_decode(done.slot, done.result);
        }
    }

    pub fn pending_decodes(&self) -> usize {
        self.loader.pending()
    }

    fn apply_decode(&mut self, slot: DecodeSlot, result: Result<RgbaImage, crate::io::ImageIoError>) {
        match (slot, result) {
            (DecodeSlot::Map, Ok(image)) => self.on_map_loaded(image),
            (DecodeSlot::Mask, Ok(image)) => self.set_mask_composite(image),
            (slot, Err(e)) => {
                log_err!("Failed to decode {:?} image: {}", slot, e);
                self.events.push(CanvasEvent::DecodeFailed { slot, message: e.to_string() });
            }
        }
    }

    // ------------------------------------------------------------------
    // Shapes and mask
    // ------------------------------------------------------------------

    pub fn add_shape(&mut self, shape: Shape) -> ShapeId {
        let id = self.shapes.add(shape);
        self.invalidate();
        id
    }

    pub fn remove_shape(&mut self, id: ShapeId) -> Option<Shape> {
        let removed = self.shapes.remove(id);
        if removed.is_some() {
            if self.selection == Some(id) {
                self.selection = None;
            }
            self.invalidate();
        }
        removed
    }

    /// Cut a world-space shape out of the mask and commit.
    pub fn add_mask_shape(&mut self, shape: Shape) {
        self.mask.apply(MaskOp::Shape(shape));
        self.commit_mask();
    }

    /// Rebuild the mask composite from the raster and announce it.
    pub fn commit_mask(&mut self) {
        if !self.mask.is_ready() {
            log_warn!("Mask commit before map load ignored");
            return;
        }
        if let Some(image) = self.mask.regenerate() {
            match crate::io::encode_png(&image) {
                Ok(png) => self.events.push(CanvasEvent::MaskCommitted { png: Arc::new(png) }),
                Err(e) => log_err!("Failed to encode mask composite: {}", e),
            }
        }
        self.invalidate();
    }

    pub fn set_background_fill(&mut self, fill: Option<Rgba<u8>>) {
        self.config.background_fill = fill;
        self.invalidate();
    }

    pub fn set_mask_fill(&mut self, fill: Option<Rgba<u8>>) {
        self.config.mask_fill = fill;
        self.mask.set_fill(fill);
        self.invalidate();
    }

    /// Restore view and mask raster from a session file.
    pub fn restore_session(&mut self, session: &SessionFile) -> bool {
        if session.gutter != self.config.gutter {
            log_warn!("Session gutter {} does not match configured gutter {}", session.gutter, self.config.gutter);
            return false;
        }
        if !self.mask.restore_raster(session.mask_width, session.mask_height, session.mask_pixels.clone()) {
            log_warn!("Session mask {}x{} does not fit the loaded map", session.mask_width, session.mask_height);
            return false;
        }
        self.view.pan = Point::new(session.pan_x, session.pan_y);
        self.view.zoom = session.zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.commit_mask();
        true
    }

    pub fn drain_events(&mut self) -> Vec<CanvasEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Poll decodes and redraw if the interval elapsed and the frame is stale.
    /// Returns true when a frame was drawn.
    pub fn tick(&mut self, now: Instant, surface: &mut dyn Surface) -> bool {
        if !self.timer.due(now) {
            return false;
        }
        self.poll_decodes();
        self.draw(surface)
    }

    /// Paint a full frame. No-op (returns false) while the view is valid.
    pub fn draw(&mut self, surface: &mut dyn Surface) -> bool {
        if self.view.valid {
            return false;
        }
        let (sw, sh) = (surface.width() as f32, surface.height() as f32);
        let zoom = self.view.zoom;
        let pan = self.view.pan;
        let g = self.config.gutter as f32;

        surface.set_composite_op(CompositeOp::SourceOver);
        surface.clear();

        if let Some(bg) = self.config.background_fill {
            surface.fill_rect(0.0, 0.0, sw, sh, bg);
        }

        if let Some(map) = &self.map {
            surface.draw_image(map, pan.x, pan.y, map.width() as f32 * zoom, map.height() as f32 * zoom);
        }

        for (_, shape) in self.shapes.iter() {
            shape.draw(surface, &self.view);
        }

        if self.config.mask_fill.is_some()
            && let Some(mask) = self.mask.composite()
        {
            surface.draw_image(
                mask,
                pan.x - g * zoom,
                pan.y - g * zoom,
                mask.width() as f32 * zoom,
                mask.height() as f32 * zoom,
            );
        }

        if self.tool.is_drawing {
            surface.set_composite_op(CompositeOp::Overlay);
            let overlay = self.tool.overlay.to_rgba_image();
            surface.draw_image(&overlay, -g, -g, overlay.width() as f32, overlay.height() as f32);
        }
        surface.set_composite_op(CompositeOp::SourceOver);

        if let Some(id) = self.selection
            && let Some((origin, w, h)) = self.shapes.get(id).and_then(|s| s.bounds())
        {
            let s = self.view.world_to_screen(origin);
            surface.stroke_rect(s.x, s.y, w * zoom, h * zoom, self.config.selection_width, self.config.selection_color);
        }

        if self.tool.mode.is_paint()
            && self.drag.is_none()
            && let Some(p) = self.pointer
        {
            let radius = self.tool.brush_width() / 2.0;
            if self.tool.mode == ToolMode::Polygon {
                surface.fill_circle(p, radius, POLYGON_CURSOR_FILL);
            }
            surface.stroke_circle(p, radius, 1.0, CURSOR_COLOR);
        }

        self.view.valid = true;
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::raster::{Raster, TRANSPARENT};
    use crate::ops::shapes::{ShapeKind, ShapeStyle};

    fn map(w: u32, h: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(w, h, color)
    }

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn transforms_are_inverse() {
        let view = ViewState { pan: Point::new(-37.5, 12.0), zoom: 1.728, valid: true };
        let p = Point::new(123.0, 45.0);
        assert!(close(view.world_to_screen(view.screen_to_world(p)), p));
        assert!(close(view.screen_to_world(view.world_to_screen(p)), p));
    }

    #[test]
    fn zoom_keeps_anchor_fixed() {
        let mut view = ViewState::default();
        let anchor = Point::new(150.0, 80.0);
        let before = view.screen_to_world(anchor);
        view.zoom_around(-1.0, anchor);
        assert!((view.zoom - 1.2).abs() < 1e-6);
        assert!(close(view.screen_to_world(anchor), before));
        view.zoom_around(3.0, anchor);
        assert!((view.zoom - 0.96).abs() < 1e-5);
        assert!(close(view.screen_to_world(anchor), before));
        assert!(!view.valid);
    }

    #[test]
    fn timer_fires_once_per_interval() {
        let mut timer = RenderTimer::new(30);
        let t0 = Instant::now();
        assert!(timer.due(t0));
        assert!(!timer.due(t0 + Duration::from_millis(10)));
        assert!(timer.due(t0 + Duration::from_millis(30)));
    }

    #[test]
    fn draw_is_skipped_while_valid() {
        let mut canvas = CanvasState::new(50, 50, HostConfig::default());
        let mut frame = Raster::new(50, 50);
        assert!(canvas.draw(&mut frame));
        assert!(canvas.is_valid());
        assert!(!canvas.draw(&mut frame));
    }

    #[test]
    fn map_is_hidden_until_revealed() {
        let mut canvas = CanvasState::new(60, 60, HostConfig::default());
        canvas.on_map_loaded(map(40, 40, Rgba([255, 255, 255, 255])));
        let mut frame = Raster::new(60, 60);
        canvas.draw(&mut frame);
        assert_eq!(frame.get_pixel(10, 10), Rgba([0, 0, 0, 255]));

        canvas.add_mask_shape(Shape::new(
            ShapeKind::Rectangle { origin: Point::new(0.0, 0.0), width: 20.0, height: 20.0 },
            ShapeStyle::filled(Rgba([0, 0, 0, 255])),
        ));
        canvas.draw(&mut frame);
        assert_eq!(frame.get_pixel(10, 10), Rgba([255, 255, 255, 255]));
        assert_eq!(frame.get_pixel(30, 30), Rgba([0, 0, 0, 255]));
        assert!(matches!(canvas.drain_events().last(), Some(CanvasEvent::MaskCommitted { .. })));
    }

    #[test]
    fn mask_covers_gutter_outside_map() {
        let mut config = HostConfig::default();
        config.background_fill = Some(Rgba([0, 0, 255, 255]));
        let mut canvas = CanvasState::new(100, 100, config);
        canvas.on_map_loaded(map(20, 20, Rgba([255, 255, 255, 255])));
        canvas.view.pan = Point::new(40.0, 40.0);
        let mut frame = Raster::new(100, 100);
        canvas.draw(&mut frame);
        // Gutter band left of the map is masked, far field shows background.
        assert_eq!(frame.get_pixel(25, 45), Rgba([0, 0, 0, 255]));
        assert_eq!(frame.get_pixel(5, 5), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn selection_outline_is_drawn_around_selected_shape() {
        let mut config = HostConfig::default();
        config.mask_fill = None;
        let mut canvas = CanvasState::new(60, 60, config);
        let id = canvas.add_shape(Shape::new(
            ShapeKind::Rectangle { origin: Point::new(10.0, 10.0), width: 20.0, height: 20.0 },
            ShapeStyle::filled(Rgba([0, 255, 0, 255])),
        ));
        canvas.selection = Some(id);
        let mut frame = Raster::new(60, 60);
        canvas.draw(&mut frame);
        assert_eq!(frame.get_pixel(10, 20), Rgba([0xCC, 0, 0, 255]));
        assert_eq!(frame.get_pixel(20, 20), Rgba([0, 255, 0, 255]));
        assert_eq!(frame.get_pixel(40, 40), TRANSPARENT);
    }

    #[test]
    fn polygon_cursor_is_filled() {
        let mut config = HostConfig::default();
        config.brush_width = 20.0;
        let mut canvas = CanvasState::new(60, 60, config);
        canvas.last_known_pointer = Some(Point::new(30.0, 30.0));
        canvas.set_mode(ToolMode::Polygon);
        assert_eq!(canvas.pointer, Some(Point::new(30.0, 30.0)));
        let mut frame = Raster::new(60, 60);
        canvas.draw(&mut frame);
        assert_eq!(frame.get_pixel(30, 30), POLYGON_CURSOR_FILL);

        canvas.set_mode(ToolMode::Brush);
        canvas.draw(&mut frame);
        assert_eq!(frame.get_pixel(30, 30), TRANSPARENT);
        assert_eq!(frame.get_pixel(39, 30), CURSOR_COLOR);
    }
}
