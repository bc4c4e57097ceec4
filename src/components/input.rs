//! Pointer event routing.
//!
//! Hosts translate their native events into [`PointerEvent`]s and hand them
//! to [`dispatch`], which normalises the position and sends the event to
//! the handler for the current [`ToolMode`].

use crate::canvas::{CanvasState, Point};
use crate::components::tools::ToolMode;
use crate::settings::HostConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Middle,
    Secondary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Down,
    Move,
    Up,
    Leave,
    Wheel,
    /// Text-selection start; always suppressed over the canvas.
    SelectStart,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub kind: EventKind,
    /// Raw host coordinates, before scale and header correction.
    pub position: Option<Point>,
    /// Pressed button for Down/Up, held button for Move.
    pub button: Option<PointerButton>,
    /// Positive scrolls down (zoom out), negative scrolls up (zoom in).
    pub wheel_delta: Option<f32>,
}

impl PointerEvent {
    fn new(kind: EventKind, position: Option<Point>) -> Self {
        Self { kind, position, button: None, wheel_delta: None }
    }

    pub fn down(x: f32, y: f32, button: PointerButton) -> Self {
        Self { button: Some(button), ..Self::new(EventKind::Down, Some(Point::new(x, y))) }
    }

    pub fn moved(x: f32, y: f32, held: Option<PointerButton>) -> Self {
        Self { button: held, ..Self::new(EventKind::Move, Some(Point::new(x, y))) }
    }

    pub fn up(x: f32, y: f32, button: PointerButton) -> Self {
        Self { button: Some(button), ..Self::new(EventKind::Up, Some(Point::new(x, y))) }
    }

    pub fn leave() -> Self {
        Self::new(EventKind::Leave, None)
    }

    pub fn wheel(x: f32, y: f32, delta: f32) -> Self {
        Self { wheel_delta: Some(delta), ..Self::new(EventKind::Wheel, Some(Point::new(x, y))) }
    }

    pub fn select_start() -> Self {
        Self::new(EventKind::SelectStart, None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Suppress,
    NavigateDown,
    NavigateMove,
    NavigateUp,
    Zoom,
    PaintDown,
    PaintMove,
    PaintUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventResponse {
    Handled,
    /// Malformed or irrelevant; nothing changed.
    Ignored,
    /// The host should cancel its default action.
    PreventDefault,
}

/// Dispatch table: which handler an event kind reaches in each mode.
pub fn route(mode: ToolMode, kind: EventKind) -> Route {
    match (mode, kind) {
        (_, EventKind::SelectStart) => Route::Suppress,
        (_, EventKind::Wheel) => Route::Zoom,
        (ToolMode::Navigate, EventKind::Down) => Route::NavigateDown,
        (ToolMode::Navigate, EventKind::Move) => Route::NavigateMove,
        (ToolMode::Navigate, EventKind::Up | EventKind::Leave) => Route::NavigateUp,
        (ToolMode::Brush | ToolMode::Polygon, EventKind::Down) => Route::PaintDown,
        (ToolMode::Brush | ToolMode::Polygon, EventKind::Move) => Route::PaintMove,
        (ToolMode::Brush | ToolMode::Polygon, EventKind::Up | EventKind::Leave) => Route::PaintUp,
    }
}

/// Host coordinates to canvas coordinates.
pub fn normalize(p: Point, config: &HostConfig) -> Point {
    Point::new(p.x * config.pointer_scale, (p.y - config.header_offset) * config.pointer_scale)
}

pub fn dispatch(canvas: &mut CanvasState, event: PointerEvent) -> EventResponse {
    let mut target = route(canvas.mode(), event.kind);
    if target == Route::Suppress {
        return EventResponse::PreventDefault;
    }

    // Any non-primary button in a paint mode drives navigation instead.
    if let Some(button) = event.button
        && button != PointerButton::Primary
    {
        target = match target {
            Route::PaintDown => Route::NavigateDown,
            Route::PaintMove => Route::NavigateMove,
            Route::PaintUp => Route::NavigateUp,
            other => other,
        };
    }

    let pos = event.position.map(|p| normalize(p, &canvas.config));
    match target {
        Route::Suppress => return EventResponse::PreventDefault,
        Route::NavigateDown => {
            let (Some(p), Some(_)) = (pos, event.button) else {
                return EventResponse::Ignored;
            };
            canvas.navigate_down(p);
        }
        Route::NavigateMove => {
            let Some(p) = pos else { return EventResponse::Ignored };
            canvas.navigate_move(p);
        }
        Route::NavigateUp => canvas.navigate_up(),
        Route::Zoom => {
            let (Some(p), Some(delta)) = (pos, event.wheel_delta) else {
                return EventResponse::Ignored;
            };
            if !delta.is_finite() || delta == 0.0 {
                return EventResponse::Ignored;
            }
            canvas.wheel_zoom(delta, p);
            return EventResponse::PreventDefault;
        }
        Route::PaintDown => {
            let (Some(p), Some(PointerButton::Primary)) = (pos, event.button) else {
                return EventResponse::Ignored;
            };
            canvas.paint_down(p);
        }
        Route::PaintMove => {
            let Some(p) = pos else { return EventResponse::Ignored };
            match event.button {
                Some(PointerButton::Primary) => canvas.paint_move(p),
                _ => canvas.hover(p),
            }
        }
        Route::PaintUp => {
            if event.kind == EventKind::Up && event.button.is_none() {
                return EventResponse::Ignored;
            }
            // Leave carries no button, so it also ends a secondary-button pan.
            if event.kind == EventKind::Leave {
                canvas.navigate_up();
            }
            canvas.finish_stroke();
        }
    }
    EventResponse::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::raster::{Raster, OPAQUE_BLACK};
    use image::{Rgba, RgbaImage};

    fn brush_canvas() -> CanvasState {
        let mut config = HostConfig::default();
        config.brush_width = 20.0;
        let mut canvas = CanvasState::new(200, 200, config);
        canvas.on_map_loaded(RgbaImage::from_pixel(200, 200, Rgba([255, 255, 255, 255])));
        canvas.set_mode(ToolMode::Brush);
        canvas
    }

    #[test]
    fn routing_table() {
        assert_eq!(route(ToolMode::Navigate, EventKind::Leave), Route::NavigateUp);
        assert_eq!(route(ToolMode::Brush, EventKind::Leave), Route::PaintUp);
        assert_eq!(route(ToolMode::Polygon, EventKind::Wheel), Route::Zoom);
        assert_eq!(route(ToolMode::Brush, EventKind::SelectStart), Route::Suppress);
    }

    #[test]
    fn select_start_is_suppressed() {
        let mut canvas = brush_canvas();
        assert_eq!(dispatch(&mut canvas, PointerEvent::select_start()), EventResponse::PreventDefault);
    }

    #[test]
    fn header_offset_is_removed() {
        let mut config = HostConfig::default();
        config.header_offset = 40.0;
        assert_eq!(normalize(Point::new(10.0, 50.0), &config), Point::new(10.0, 10.0));
        config.pointer_scale = 2.0;
        assert_eq!(normalize(Point::new(10.0, 50.0), &config), Point::new(20.0, 20.0));
    }

    #[test]
    fn malformed_events_are_ignored() {
        let mut canvas = brush_canvas();
        let no_pos = PointerEvent { position: None, ..PointerEvent::down(0.0, 0.0, PointerButton::Primary) };
        assert_eq!(dispatch(&mut canvas, no_pos), EventResponse::Ignored);
        let no_delta = PointerEvent { wheel_delta: None, ..PointerEvent::wheel(5.0, 5.0, 1.0) };
        assert_eq!(dispatch(&mut canvas, no_delta), EventResponse::Ignored);
        assert!(!canvas.tool.is_drawing);
    }

    #[test]
    fn middle_button_pans_in_paint_mode() {
        let mut canvas = brush_canvas();
        dispatch(&mut canvas, PointerEvent::down(100.0, 100.0, PointerButton::Middle));
        dispatch(&mut canvas, PointerEvent::moved(120.0, 90.0, Some(PointerButton::Middle)));
        dispatch(&mut canvas, PointerEvent::up(120.0, 90.0, PointerButton::Middle));
        assert_eq!(canvas.view.pan, Point::new(20.0, -10.0));
        assert!(!canvas.tool.is_drawing);
        assert!(canvas.mask.pending().is_empty());
    }

    #[test]
    fn wheel_zooms_in_every_mode() {
        for mode in ToolMode::all() {
            let mut canvas = brush_canvas();
            canvas.set_mode(*mode);
            let resp = dispatch(&mut canvas, PointerEvent::wheel(50.0, 50.0, -3.0));
            assert_eq!(resp, EventResponse::PreventDefault);
            assert!((canvas.view.zoom - 1.2).abs() < 1e-6);
        }
    }

    #[test]
    fn leave_ends_stroke_and_pan() {
        let mut canvas = brush_canvas();
        dispatch(&mut canvas, PointerEvent::down(50.0, 50.0, PointerButton::Primary));
        dispatch(&mut canvas, PointerEvent::leave());
        assert!(!canvas.tool.is_drawing);

        canvas.set_mode(ToolMode::Navigate);
        dispatch(&mut canvas, PointerEvent::down(50.0, 50.0, PointerButton::Primary));
        assert!(canvas.drag.is_some());
        dispatch(&mut canvas, PointerEvent::leave());
        assert!(canvas.drag.is_none());
    }

    #[test]
    fn leave_ends_middle_button_pan_in_paint_mode() {
        let mut canvas = brush_canvas();
        dispatch(&mut canvas, PointerEvent::down(100.0, 100.0, PointerButton::Middle));
        assert!(canvas.drag.is_some());
        dispatch(&mut canvas, PointerEvent::leave());
        assert!(canvas.drag.is_none());

        dispatch(&mut canvas, PointerEvent::moved(50.0, 50.0, None));
        assert_eq!(canvas.pointer, Some(Point::new(50.0, 50.0)));
        assert_eq!(canvas.view.pan, Point::ZERO);

        canvas.set_mask_fill(None);
        let mut frame = Raster::new(200, 200);
        assert!(canvas.draw(&mut frame));
        let white = Rgba([255, 255, 255, 255]);
        assert_eq!(frame.get_pixel(50, 50), white);
        assert!((55..66).any(|x| frame.get_pixel(x, 50) == OPAQUE_BLACK), "cursor ring not drawn");
    }

    #[test]
    fn hover_shows_cursor_without_painting() {
        let mut canvas = brush_canvas();
        dispatch(&mut canvas, PointerEvent::moved(30.0, 40.0, None));
        assert_eq!(canvas.pointer, Some(Point::new(30.0, 40.0)));
        assert!(canvas.mask.pending().is_empty());
    }
}
