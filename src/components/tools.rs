use image::Rgba;

use crate::canvas::{CanvasState, Point};
use crate::ops::mask::MaskOp;
use crate::ops::raster::{OPAQUE_BLACK, Raster, Surface};
use crate::ops::shapes::{polygon_path, Shape, ShapeId};

pub const MIN_BRUSH_WIDTH: f32 = 1.0;

/// Stroke preview colour drawn into the overlay.
const PREVIEW_STROKE: Rgba<u8> = Rgba([0x33, 0x33, 0x33, 0xFF]);
/// Interior of an in-progress polygon.
const PREVIEW_FILL: Rgba<u8> = Rgba([0x50, 0x50, 0x50, 0xFF]);
const PREVIEW_OUTLINE_WIDTH: f32 = 2.0;

/// Interaction mode selected by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    Navigate,
    Brush,
    Polygon,
}

impl ToolMode {
    pub fn label(&self) -> &'static str {
        match self {
            ToolMode::Navigate => "Navigate",
            ToolMode::Brush => "Brush",
            ToolMode::Polygon => "Polygon",
        }
    }

    /// Modes that paint into the mask and show a cursor ring.
    pub fn is_paint(&self) -> bool {
        matches!(self, ToolMode::Brush | ToolMode::Polygon)
    }

    pub fn all() -> &'static [ToolMode] {
        &[ToolMode::Navigate, ToolMode::Brush, ToolMode::Polygon]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DragTarget {
    Pan,
    Shape(ShapeId),
}

/// An active navigate drag. `offset` is pointer minus pan for a pan drag,
/// or world pointer minus shape origin for a shape drag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Drag {
    pub offset: Point,
    pub target: DragTarget,
}

/// Per-view paint tool state.
pub struct ToolState {
    pub mode: ToolMode,
    /// Stroke preview in screen space, inset by the gutter on every side.
    pub overlay: Raster,
    pub is_drawing: bool,
    /// Last screen point handled by the active stroke.
    pub last_point: Point,
    /// Polygon vertices in screen coordinates.
    pub points: Vec<Point>,
    brush_width: f32,
}

impl ToolState {
    pub fn new(brush_width: f32) -> Self {
        Self {
            mode: ToolMode::Navigate,
            overlay: Raster::new(0, 0),
            is_drawing: false,
            last_point: Point::ZERO,
            points: Vec::new(),
            brush_width: brush_width.max(MIN_BRUSH_WIDTH),
        }
    }

    pub fn brush_width(&self) -> f32 {
        self.brush_width
    }

    pub fn set_brush_width(&mut self, width: f32) {
        self.brush_width = width.max(MIN_BRUSH_WIDTH);
    }

    pub fn resize_overlay(&mut self, viewport_width: u32, viewport_height: u32, gutter: u32) {
        self.overlay.resize(viewport_width + 2 * gutter, viewport_height + 2 * gutter);
    }

    /// Drop any in-progress stroke.
    pub fn reset(&mut self) {
        self.overlay.clear();
        self.points.clear();
        self.is_drawing = false;
    }
}

// ============================================================================
// Pointer handlers
// ============================================================================

impl CanvasState {
    pub fn mode(&self) -> ToolMode {
        self.tool.mode
    }

    /// Switch mode. Paint modes pick up the last known pointer so the cursor
    /// ring shows without waiting for a move; navigate hides it.
    pub fn set_mode(&mut self, mode: ToolMode) {
        if self.tool.is_drawing {
            self.finish_stroke();
        }
        self.tool.mode = mode;
        self.drag = None;
        self.pointer = if mode.is_paint() { self.last_known_pointer } else { None };
        log_info!("Tool mode: {}", mode.label());
        self.invalidate();
    }

    pub fn set_brush_width(&mut self, width: f32) {
        self.tool.set_brush_width(width);
        self.invalidate();
    }

    pub fn brush_size_up(&mut self) {
        let step = self.config.brush_step;
        self.set_brush_width(self.tool.brush_width() + step);
    }

    /// Shrink the brush, but only while it is wider than one step.
    pub fn brush_size_down(&mut self) {
        let step = self.config.brush_step;
        let width = self.tool.brush_width();
        if width > step {
            self.set_brush_width(width - step);
        }
    }

    pub fn wheel_zoom(&mut self, delta: f32, p: Point) {
        self.view.zoom_around(delta, p);
    }

    // ------------------------------------------------------------------
    // Navigate
    // ------------------------------------------------------------------

    /// Select the topmost shape under the pointer and start dragging it, or
    /// clear the selection and start panning.
    pub fn navigate_down(&mut self, p: Point) {
        let world = self.view.screen_to_world(p);
        let hit = self
            .shapes
            .hit_test(world)
            .and_then(|id| self.shapes.get(id).and_then(|s| s.origin()).map(|o| (id, o)));
        match hit {
            Some((id, origin)) => {
                self.selection = Some(id);
                self.drag = Some(Drag { offset: world - origin, target: DragTarget::Shape(id) });
            }
            None => {
                self.selection = None;
                self.drag = Some(Drag { offset: p - self.view.pan, target: DragTarget::Pan });
            }
        }
        self.last_known_pointer = Some(p);
        self.invalidate();
    }

    pub fn navigate_move(&mut self, p: Point) {
        self.last_known_pointer = Some(p);
        if self.tool.mode.is_paint() {
            self.pointer = Some(p);
        }
        let Some(drag) = self.drag else { return };
        match drag.target {
            DragTarget::Pan => self.view.pan = p - drag.offset,
            DragTarget::Shape(id) => {
                let world = self.view.screen_to_world(p);
                if let Some(shape) = self.shapes.get_mut(id) {
                    shape.set_origin(world - drag.offset);
                }
            }
        }
        self.invalidate();
    }

    pub fn navigate_up(&mut self) {
        if self.drag.take().is_some() {
            self.invalidate();
        }
    }

    /// Pointer moved with no button held in a paint mode.
    pub fn hover(&mut self, p: Point) {
        self.pointer = Some(p);
        self.last_known_pointer = Some(p);
        self.invalidate();
    }

    // ------------------------------------------------------------------
    // Paint
    // ------------------------------------------------------------------

    pub fn paint_down(&mut self, p: Point) {
        self.tool.reset();
        self.tool.is_drawing = true;
        self.tool.last_point = p;
        self.pointer = Some(p);
        self.last_known_pointer = Some(p);
        self.invalidate();
    }

    pub fn paint_move(&mut self, p: Point) {
        if !self.tool.is_drawing {
            self.hover(p);
            return;
        }
        match self.tool.mode {
            ToolMode::Brush => self.brush_move(p),
            ToolMode::Polygon => self.polygon_move(p),
            ToolMode::Navigate => {}
        }
        self.pointer = Some(p);
        self.last_known_pointer = Some(p);
        self.invalidate();
    }

    /// Short moves stamp a disc; longer moves draw a round-capped segment
    /// from the previous point so fast strokes stay continuous.
    fn brush_move(&mut self, p: Point) {
        let width = self.tool.brush_width();
        let last = self.tool.last_point;
        let g = self.gutter() as f32;
        let zoom = self.view.zoom;

        if last.distance(p) < width / 2.0 {
            self.tool.overlay.fill_circle(p.offset(g, g), width / 2.0, PREVIEW_STROKE);
            let center = self.view.screen_to_world(p);
            self.mask.apply(MaskOp::Stamp { center, radius: width / 2.0 / zoom });
        } else {
            self.tool.overlay.stroke_line(last.offset(g, g), p.offset(g, g), width, PREVIEW_STROKE);
            let from = self.view.screen_to_world(last);
            let to = self.view.screen_to_world(p);
            self.mask.apply(MaskOp::Segment { from, to, width: width / zoom });
        }
        self.tool.last_point = p;
    }

    /// Append a vertex once the pointer is more than a tenth of the brush
    /// width from the previous vertex (or the down point), then redraw the
    /// preview.
    fn polygon_move(&mut self, p: Point) {
        let reference = self.tool.points.last().copied().unwrap_or(self.tool.last_point);
        if reference.distance(p) <= self.tool.brush_width() / 10.0 {
            return;
        }
        self.tool.points.push(p);

        let g = self.gutter() as f32;
        let shifted: Vec<Point> = self.tool.points.iter().map(|q| q.offset(g, g)).collect();
        self.tool.overlay.clear();
        if let Some(path) = polygon_path(&shifted) {
            self.tool.overlay.fill_path(&path, PREVIEW_FILL);
            self.tool.overlay.stroke_path(&path, PREVIEW_OUTLINE_WIDTH, PREVIEW_STROKE);
        }
    }

    /// End the active stroke (button up or pointer leaving) and commit it.
    pub fn finish_stroke(&mut self) {
        if !self.tool.is_drawing {
            return;
        }
        let committed = match self.tool.mode {
            ToolMode::Polygon => self.commit_polygon(),
            _ => true,
        };
        self.tool.reset();
        if committed {
            self.commit_mask();
        }
        self.invalidate();
    }

    fn commit_polygon(&mut self) -> bool {
        if self.tool.points.len() < 3 {
            log_warn!("Polygon with {} vertices not committed", self.tool.points.len());
            return false;
        }
        let world: Vec<Point> = self.tool.points.iter().map(|p| self.view.screen_to_world(*p)).collect();
        self.mask.apply(MaskOp::Shape(Shape::polygon(world, OPAQUE_BLACK)));
        true
    }
}
