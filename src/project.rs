use std::path::{Path, PathBuf};
use std::time::Instant;

use uuid::Uuid;

use crate::canvas::CanvasState;
use crate::io::{self, ImageIoError};
use crate::ops::raster::{Raster, Surface};
use crate::settings::HostConfig;

/// Whether a view edits the mask or only mirrors it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewRole {
    Editor,
    Player,
}

/// One open view: its canvas and the frame it renders into.
pub struct Project {
    pub id: Uuid,
    pub role: ViewRole,
    pub canvas: CanvasState,
    /// Last rendered frame, sized to the viewport.
    pub frame: Raster,
    /// `None` until a map is opened.
    pub map_path: Option<PathBuf>,
    /// Display name (derived from the map path or "Untitled-X")
    pub name: String,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, role: ViewRole, width: u32, height: u32, config: HostConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            canvas: CanvasState::new(width, height, config),
            frame: Raster::new(width, height),
            map_path: None,
            name: format!("Untitled-{}", untitled_counter),
        }
    }

    /// Start decoding a map file in the background.
    pub fn open_map(&mut self, path: PathBuf) {
        log_info!("Opening map {}", path.display());
        self.canvas.load_map_path(&path);
        self.map_path = Some(path);
        self.update_name_from_path();
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.map_path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    pub fn display_title(&self) -> String {
        match self.role {
            ViewRole::Editor => self.name.clone(),
            ViewRole::Player => format!("{} (player)", self.name),
        }
    }

    /// Keep the frame and overlay matched to the on-screen size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (self.frame.width(), self.frame.height()) != (width, height) {
            self.frame.resize(width, height);
            self.canvas.resize_viewport(width, height);
        }
    }

    /// Advance the render timer. Returns true when the frame changed.
    pub fn render(&mut self, now: Instant) -> bool {
        self.canvas.tick(now, &mut self.frame)
    }

    /// Render the current view into a fresh frame and write it as PNG.
    pub fn save_composite(&mut self, path: &Path) -> Result<(), ImageIoError> {
        let (w, h) = self.canvas.viewport();
        let mut out = Raster::new(w, h);
        self.canvas.invalidate();
        self.canvas.draw(&mut out);
        io::write_png(&out.to_rgba_image(), path)?;
        log_info!("Saved composite {}x{} to {}", w, h, path.display());
        Ok(())
    }

    pub fn save_mask(&self, path: &Path) -> Result<(), ImageIoError> {
        let png = self.canvas.mask.export_png()?;
        std::fs::write(path, png)?;
        log_info!("Saved mask to {}", path.display());
        Ok(())
    }

    pub fn save_session(&self, path: &Path) -> Result<(), ImageIoError> {
        let session = io::build_session(&self.canvas, self.map_path.as_deref())
            .ok_or_else(|| ImageIoError::InvalidFormat("no map loaded".into()))?;
        io::save_session(&session, path)?;
        log_info!("Saved session to {}", path.display());
        Ok(())
    }

    /// Restore a session into this view. The map must already be loaded.
    pub fn load_session(&mut self, path: &Path) -> Result<(), ImageIoError> {
        let session = io::load_session(path)?;
        if !self.canvas.restore_session(&session) {
            return Err(ImageIoError::InvalidFormat(
                "session does not match the loaded map".into(),
            ));
        }
        log_info!("Restored session from {}", path.display());
        Ok(())
    }
}
