//! Fog-of-war mask.
//!
//! The raster covers the map plus a gutter on every side; world point
//! `(x, y)` lives at raster pixel `(x + gutter, y + gutter)`. Raster alpha
//! encodes "hidden": opaque is hidden, transparent is revealed. Reveal
//! operations only ever lower alpha (destination-out).
//!
//! The displayed composite is derived from the raster by one of two
//! strategies:
//! - `Erase`: the raster is filled with the mask colour up front and the
//!   composite is a straight copy.
//! - `Tint`: the raster stays opaque black; the composite is rebuilt by
//!   drawing it into a scratch buffer and recolouring with a source-in fill.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::canvas::{Point, ViewState};
use crate::io::ImageIoError;
use crate::ops::raster::{CompositeOp, Raster, Surface, OPAQUE_BLACK};
use crate::ops::shapes::Shape;

/// Colour used to cut reveals; only its alpha matters under destination-out.
const REVEAL: Rgba<u8> = OPAQUE_BLACK;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MaskStrategy {
    Erase,
    #[default]
    Tint,
}

impl MaskStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MaskStrategy::Erase => "erase",
            MaskStrategy::Tint => "tint",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "erase" => Some(MaskStrategy::Erase),
            "tint" => Some(MaskStrategy::Tint),
            _ => None,
        }
    }
}

/// One reveal, in world coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum MaskOp {
    Stamp { center: Point, radius: f32 },
    Segment { from: Point, to: Point, width: f32 },
    /// Cut the shape's filled area (its own fill alpha sets the strength).
    Shape(Shape),
}

pub struct MaskState {
    raster: Raster,
    buffer: Raster,
    composite: Option<Arc<RgbaImage>>,
    fill: Option<Rgba<u8>>,
    strategy: MaskStrategy,
    gutter: u32,
    /// Reveals painted since the last regenerate.
    pending: Vec<MaskOp>,
}

impl MaskState {
    pub fn new(fill: Option<Rgba<u8>>, strategy: MaskStrategy, gutter: u32) -> Self {
        Self {
            raster: Raster::new(0, 0),
            buffer: Raster::new(0, 0),
            composite: None,
            fill,
            strategy,
            gutter,
            pending: Vec::new(),
        }
    }

    /// Size the raster to a map and hide everything.
    pub fn allocate(&mut self, map_width: u32, map_height: u32) {
        let w = map_width + 2 * self.gutter;
        let h = map_height + 2 * self.gutter;
        self.raster.resize(w, h);
        self.buffer.resize(w, h);
        self.pending.clear();
        self.composite = None;
        self.reset_raster();
    }

    /// True once a map has been loaded and the raster is sized.
    pub fn is_ready(&self) -> bool {
        !self.raster.is_empty()
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn gutter(&self) -> u32 {
        self.gutter
    }

    pub fn fill(&self) -> Option<Rgba<u8>> {
        self.fill
    }

    pub fn strategy(&self) -> MaskStrategy {
        self.strategy
    }

    pub fn pending(&self) -> &[MaskOp] {
        &self.pending
    }

    pub fn composite(&self) -> Option<&RgbaImage> {
        self.composite.as_deref()
    }

    pub fn set_composite(&mut self, image: RgbaImage) {
        self.composite = Some(Arc::new(image));
    }

    /// Colour the raster carries under each strategy.
    fn base_color(&self) -> Rgba<u8> {
        match self.strategy {
            MaskStrategy::Erase => self.fill.unwrap_or(OPAQUE_BLACK),
            MaskStrategy::Tint => OPAQUE_BLACK,
        }
    }

    fn reset_raster(&mut self) {
        let base = self.base_color();
        self.raster.fill(base);
    }

    /// Paint a reveal into the raster and record it until the next regenerate.
    pub fn apply(&mut self, op: MaskOp) {
        if !self.is_ready() {
            log_warn!("Mask operation before map load ignored");
            return;
        }
        self.paint(&op);
        self.pending.push(op);
    }

    fn paint(&mut self, op: &MaskOp) {
        let g = self.gutter as f32;
        self.raster.set_composite_op(CompositeOp::DestinationOut);
        match op {
            MaskOp::Stamp { center, radius } => {
                self.raster.fill_circle(center.offset(g, g), *radius, REVEAL);
            }
            MaskOp::Segment { from, to, width } => {
                self.raster.stroke_line(from.offset(g, g), to.offset(g, g), *width, REVEAL);
            }
            MaskOp::Shape(shape) => {
                let view = ViewState { pan: Point::new(g, g), zoom: 1.0, valid: false };
                shape.draw(&mut self.raster, &view);
            }
        }
        self.raster.set_composite_op(CompositeOp::SourceOver);
    }

    /// Rebuild the displayed composite. `None` when there is no map or
    /// the mask fill is disabled.
    pub fn regenerate(&mut self) -> Option<Arc<RgbaImage>> {
        if !self.is_ready() {
            return None;
        }
        self.pending.clear();
        let Some(fill) = self.fill else {
            self.composite = None;
            return None;
        };
        let image = match self.strategy {
            MaskStrategy::Erase => self.raster.to_rgba_image(),
            MaskStrategy::Tint => {
                let (w, h) = (self.raster.width(), self.raster.height());
                self.buffer.resize(w, h);
                self.buffer.set_composite_op(CompositeOp::SourceOver);
                self.buffer.clear();
                self.buffer.draw_raster(&self.raster, 0, 0);
                self.buffer.set_composite_op(CompositeOp::SourceIn);
                self.buffer.fill_rect(0.0, 0.0, w as f32, h as f32, fill);
                self.buffer.set_composite_op(CompositeOp::SourceOver);
                self.buffer.to_rgba_image()
            }
        };
        let image = Arc::new(image);
        self.composite = Some(image.clone());
        Some(image)
    }

    /// Change the hidden colour. Erase bakes the colour into the raster, so
    /// the raster is recoloured in place; reveals keep their alpha.
    pub fn set_fill(&mut self, fill: Option<Rgba<u8>>) {
        self.fill = fill;
        if self.strategy == MaskStrategy::Erase {
            let base = self.base_color();
            self.raster.recolor(base);
        }
        self.regenerate();
    }

    /// Replace the raster with saved pixels, recoloured to this mask's base
    /// colour. Fails if the size differs from the allocated raster.
    pub fn restore_raster(&mut self, width: u32, height: u32, pixels: Vec<u8>) -> bool {
        if !self.is_ready() || width != self.raster.width() || height != self.raster.height() {
            return false;
        }
        let Some(raster) = Raster::from_raw(width, height, pixels) else {
            return false;
        };
        self.raster = raster;
        let base = self.base_color();
        self.raster.recolor(base);
        self.pending.clear();
        true
    }

    /// Rebuild the raster from an exported composite. Only its alpha is
    /// kept; `restore_raster` recolours it.
    pub fn restore_alpha(&mut self, image: &RgbaImage) -> bool {
        self.restore_raster(image.width(), image.height(), image.as_raw().clone())
    }

    /// True if the world point is fully revealed.
    pub fn is_revealed(&self, world: Point) -> bool {
        let g = self.gutter as f32;
        let (x, y) = (world.x + g, world.y + g);
        if x < 0.0 || y < 0.0 {
            return false;
        }
        let (x, y) = (x as u32, y as u32);
        if x >= self.raster.width() || y >= self.raster.height() {
            return false;
        }
        self.raster.get_pixel(x, y)[3] == 0
    }

    pub fn export_png(&self) -> Result<Vec<u8>, ImageIoError> {
        match &self.composite {
            Some(image) => crate::io::encode_png(image),
            None => self.raster.export_png(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn ready(strategy: MaskStrategy, fill: Rgba<u8>) -> MaskState {
        let mut m = MaskState::new(Some(fill), strategy, 20);
        m.allocate(100, 100);
        m
    }

    #[test]
    fn allocate_adds_gutter_and_hides_everything() {
        let m = ready(MaskStrategy::Tint, RED);
        assert_eq!((m.raster().width(), m.raster().height()), (140, 140));
        assert!(!m.is_revealed(Point::new(50.0, 50.0)));
        assert!(!m.is_revealed(Point::new(-15.0, -15.0)));
    }

    #[test]
    fn ops_before_allocation_are_ignored() {
        let mut m = MaskState::new(Some(RED), MaskStrategy::Tint, 20);
        m.apply(MaskOp::Stamp { center: Point::new(5.0, 5.0), radius: 4.0 });
        assert!(m.pending().is_empty());
        assert!(m.regenerate().is_none());
    }

    #[test]
    fn stamp_reveals_in_world_coordinates() {
        let mut m = ready(MaskStrategy::Tint, RED);
        m.apply(MaskOp::Stamp { center: Point::new(10.0, 10.0), radius: 5.0 });
        assert!(m.is_revealed(Point::new(10.0, 10.0)));
        assert!(m.is_revealed(Point::new(13.0, 10.0)));
        assert!(!m.is_revealed(Point::new(17.0, 10.0)));
    }

    #[test]
    fn gutter_can_be_revealed() {
        let mut m = ready(MaskStrategy::Tint, RED);
        m.apply(MaskOp::Segment { from: Point::new(-10.0, 50.0), to: Point::new(10.0, 50.0), width: 6.0 });
        assert!(m.is_revealed(Point::new(-10.0, 50.0)));
    }

    #[test]
    fn tint_recolours_hidden_area() {
        let mut m = ready(MaskStrategy::Tint, RED);
        m.apply(MaskOp::Stamp { center: Point::new(50.0, 50.0), radius: 10.0 });
        let img = m.regenerate().unwrap();
        assert_eq!(*img.get_pixel(0, 0), RED);
        assert_eq!(img.get_pixel(70, 70)[3], 0);
    }

    #[test]
    fn erase_and_tint_agree_for_opaque_fill() {
        let mut erase = ready(MaskStrategy::Erase, RED);
        let mut tint = ready(MaskStrategy::Tint, RED);
        for m in [&mut erase, &mut tint] {
            m.apply(MaskOp::Segment { from: Point::new(5.0, 5.0), to: Point::new(60.0, 40.0), width: 12.0 });
        }
        assert_eq!(erase.regenerate(), tint.regenerate());
    }

    #[test]
    fn same_reveals_give_identical_masks() {
        let ops = [
            MaskOp::Stamp { center: Point::new(30.0, 30.0), radius: 8.0 },
            MaskOp::Shape(Shape::polygon(
                vec![Point::new(60.0, 60.0), Point::new(90.0, 60.0), Point::new(75.0, 90.0)],
                OPAQUE_BLACK,
            )),
        ];
        let mut a = ready(MaskStrategy::Tint, RED);
        let mut b = ready(MaskStrategy::Tint, RED);
        for op in &ops {
            a.apply(op.clone());
            b.apply(op.clone());
        }
        let first = a.regenerate();
        assert_eq!(a.regenerate(), first);
        assert_eq!(b.regenerate(), first);
        assert_eq!(a.export_png().unwrap(), b.export_png().unwrap());
    }

    #[test]
    fn pending_reveals_are_dropped_on_regenerate() {
        let mut m = ready(MaskStrategy::Tint, RED);
        for stroke in 0..20 {
            for step in 0..50 {
                let p = Point::new(step as f32, stroke as f32);
                m.apply(MaskOp::Stamp { center: p, radius: 2.0 });
            }
            assert_eq!(m.pending().len(), 50);
            m.regenerate();
            assert!(m.pending().is_empty());
        }
    }

    #[test]
    fn disabled_fill_has_no_composite() {
        let mut m = MaskState::new(None, MaskStrategy::Tint, 0);
        m.allocate(10, 10);
        assert!(m.regenerate().is_none());
        assert!(m.composite().is_none());
    }

    #[test]
    fn erase_fill_change_keeps_reveals() {
        let mut m = ready(MaskStrategy::Erase, RED);
        m.apply(MaskOp::Stamp { center: Point::new(50.0, 50.0), radius: 10.0 });
        m.set_fill(Some(Rgba([0, 0, 255, 255])));
        assert!(m.is_revealed(Point::new(50.0, 50.0)));
        assert_eq!(m.raster().get_pixel(0, 0), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn erase_fill_change_keeps_restored_reveals() {
        let mut source = ready(MaskStrategy::Erase, RED);
        source.apply(MaskOp::Stamp { center: Point::new(50.0, 50.0), radius: 10.0 });
        let composite = source.regenerate().unwrap();

        let mut m = ready(MaskStrategy::Erase, RED);
        assert!(m.restore_alpha(&composite));
        assert!(m.is_revealed(Point::new(50.0, 50.0)));
        m.set_fill(Some(Rgba([0, 0, 255, 255])));
        assert!(m.is_revealed(Point::new(50.0, 50.0)));
        assert!(!m.is_revealed(Point::new(10.0, 10.0)));
        assert_eq!(m.composite().unwrap().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn tint_raster_restored_into_erase_takes_fill_colour() {
        let mut tint = ready(MaskStrategy::Tint, RED);
        tint.apply(MaskOp::Stamp { center: Point::new(40.0, 40.0), radius: 6.0 });
        let pixels = tint.raster().as_raw().to_vec();
        assert_eq!(tint.raster().get_pixel(0, 0), OPAQUE_BLACK);

        let blue = Rgba([0, 0, 255, 255]);
        let mut erase = ready(MaskStrategy::Erase, blue);
        assert!(erase.restore_raster(140, 140, pixels));
        assert!(erase.is_revealed(Point::new(40.0, 40.0)));
        assert_eq!(erase.raster().get_pixel(0, 0), blue);
        assert_eq!(*erase.regenerate().unwrap().get_pixel(0, 0), blue);
    }

    #[test]
    fn exported_composite_restores_reveals() {
        let mut source = ready(MaskStrategy::Tint, RED);
        source.apply(MaskOp::Stamp { center: Point::new(40.0, 40.0), radius: 6.0 });
        let composite = source.regenerate().unwrap();

        let mut target = ready(MaskStrategy::Erase, Rgba([0, 0, 255, 255]));
        assert!(target.restore_alpha(&composite));
        assert!(target.is_revealed(Point::new(40.0, 40.0)));
        assert!(!target.is_revealed(Point::new(60.0, 60.0)));
        assert_eq!(target.raster().get_pixel(0, 0), Rgba([0, 0, 255, 255]));
        assert!(!target.restore_alpha(&RgbaImage::new(3, 3)));
    }

    #[test]
    fn restore_rejects_wrong_size() {
        let mut m = ready(MaskStrategy::Tint, RED);
        assert!(!m.restore_raster(10, 10, vec![0; 400]));
        assert!(m.restore_raster(140, 140, vec![0; 140 * 140 * 4]));
        assert!(m.is_revealed(Point::new(0.0, 0.0)));
    }
}
