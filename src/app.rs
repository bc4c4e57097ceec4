use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use eframe::egui;
use fogview::canvas::CanvasEvent;
use fogview::components::input::{dispatch, PointerButton, PointerEvent};
use fogview::components::tools::ToolMode;
use fogview::ipc::{MaskEndpoint, MaskHub};
use fogview::ops::raster::Surface;
use fogview::project::{Project, ViewRole};
use fogview::settings::HostConfig;
use fogview::{log_err, log_info, log_warn};

const EDITOR_SIZE: (u32, u32) = (1280, 720);
const PLAYER_SIZE: (u32, u32) = (640, 480);
const MAP_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

fn map_button(button: egui::PointerButton) -> Option<PointerButton> {
    match button {
        egui::PointerButton::Primary => Some(PointerButton::Primary),
        egui::PointerButton::Middle => Some(PointerButton::Middle),
        egui::PointerButton::Secondary => Some(PointerButton::Secondary),
        _ => None,
    }
}

// ============================================================================
// VIEW PANEL
// ============================================================================

/// A project shown on screen: the editor in the central panel, or a player
/// view in a floating window.
struct ViewPanel {
    project: Project,
    endpoint: MaskEndpoint,
    texture: Option<egui::TextureHandle>,
    /// Button currently held over this view.
    held: Option<PointerButton>,
    open: bool,
}

impl ViewPanel {
    fn new(project: Project, endpoint: MaskEndpoint) -> Self {
        Self { project, endpoint, texture: None, held: None, open: true }
    }

    fn receive_masks(&mut self) {
        for msg in self.endpoint.try_recv_all() {
            self.project.canvas.apply_remote_mask(msg.png);
        }
    }

    fn show(&mut self, ui: &mut egui::Ui, now: Instant) {
        let size = ui.available_size();
        let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click_and_drag());
        let w = rect.width().max(1.0) as u32;
        let h = rect.height().max(1.0) as u32;
        self.project.resize(w, h);

        self.feed_input(ui, rect, &response);

        if self.project.render(now) || self.texture.is_none() {
            self.upload(ui.ctx());
        }
        if let Some(texture) = &self.texture {
            let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
            ui.painter().image(texture.id(), rect, uv, egui::Color32::WHITE);
        }
    }

    fn upload(&mut self, ctx: &egui::Context) {
        let frame = &self.project.frame;
        let size = [frame.width() as usize, frame.height() as usize];
        let image = egui::ColorImage::from_rgba_unmultiplied(size, frame.as_raw());
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::NEAREST),
            None => {
                self.texture = Some(ctx.load_texture(
                    format!("view_{}", self.project.id),
                    image,
                    egui::TextureOptions::NEAREST,
                ));
            }
        }
    }

    /// Translate this frame's egui events into canvas pointer events.
    fn feed_input(&mut self, ui: &egui::Ui, rect: egui::Rect, response: &egui::Response) {
        let (events, hover) = ui.input(|i| (i.events.clone(), i.pointer.hover_pos()));
        let local = |pos: egui::Pos2| (pos.x - rect.min.x, pos.y - rect.min.y);

        for event in events {
            let translated = match event {
                egui::Event::PointerMoved(pos) => {
                    if !response.hovered() && self.held.is_none() {
                        continue;
                    }
                    let (x, y) = local(pos);
                    PointerEvent::moved(x, y, self.held)
                }
                egui::Event::PointerButton { pos, button, pressed, .. } => {
                    let Some(b) = map_button(button) else { continue };
                    let (x, y) = local(pos);
                    if pressed {
                        if !response.hovered() {
                            continue;
                        }
                        self.held = Some(b);
                        PointerEvent::down(x, y, b)
                    } else {
                        if self.held != Some(b) {
                            continue;
                        }
                        self.held = None;
                        PointerEvent::up(x, y, b)
                    }
                }
                egui::Event::Scroll(delta) => {
                    let Some(pos) = hover else { continue };
                    if !response.hovered() || delta.y == 0.0 {
                        continue;
                    }
                    let (x, y) = local(pos);
                    // egui reports wheel-up as positive y.
                    PointerEvent::wheel(x, y, -delta.y)
                }
                egui::Event::PointerGone => {
                    self.held = None;
                    PointerEvent::leave()
                }
                _ => continue,
            };
            dispatch(&mut self.project.canvas, translated);
        }
    }
}

// ============================================================================
// APPLICATION
// ============================================================================

pub struct FogViewApp {
    config: HostConfig,
    hub: MaskHub,
    editor: ViewPanel,
    players: Vec<ViewPanel>,
    untitled_counter: usize,
    status: String,
    /// Push the editor's mask to players on the next event pass.
    sync_players: bool,
}

impl FogViewApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: HostConfig, startup_files: Vec<PathBuf>) -> Self {
        let hub = MaskHub::new();
        let (w, h) = EDITOR_SIZE;
        let project = Project::new_untitled(1, ViewRole::Editor, w, h, config.clone());
        let mut app = Self {
            editor: ViewPanel::new(project, hub.connect()),
            config,
            hub,
            players: Vec::new(),
            untitled_counter: 1,
            status: "Open a map to begin (Ctrl+O)".to_string(),
            sync_players: false,
        };
        if let Some(path) = startup_files.into_iter().next() {
            app.open_map(path);
        }
        app
    }

    fn open_map(&mut self, path: PathBuf) {
        self.status = format!("Loading {}", path.display());
        for player in &mut self.players {
            player.project.open_map(path.clone());
        }
        self.editor.project.open_map(path);
    }

    fn open_player(&mut self) {
        self.untitled_counter += 1;
        let (w, h) = PLAYER_SIZE;
        let mut project = Project::new_untitled(self.untitled_counter, ViewRole::Player, w, h, self.config.clone());
        if let Some(path) = self.editor.project.map_path.clone() {
            project.open_map(path);
        }
        log_info!("Opened player view {} ({} views on channel)", project.id, self.hub.peer_count() + 1);
        self.players.push(ViewPanel::new(project, self.hub.connect()));
    }

    fn open_map_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new().add_filter("Maps", MAP_EXTENSIONS).pick_file() {
            self.open_map(path);
        }
    }

    fn save_session_dialog(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("FogView session", &["fog"])
            .set_file_name("session.fog")
            .save_file()
        else {
            return;
        };
        self.status = match self.editor.project.save_session(&path) {
            Ok(()) => format!("Saved session {}", path.display()),
            Err(e) => {
                log_err!("Session save failed: {}", e);
                format!("Session save failed: {}", e)
            }
        };
    }

    fn load_session_dialog(&mut self) {
        let Some(path) = rfd::FileDialog::new().add_filter("FogView session", &["fog"]).pick_file() else {
            return;
        };
        self.status = match self.editor.project.load_session(&path) {
            Ok(()) => format!("Restored session {}", path.display()),
            Err(e) => {
                log_err!("Session load failed: {}", e);
                format!("Session load failed: {}", e)
            }
        };
    }

    fn export_dialog(&mut self, mask_only: bool) {
        let name = if mask_only { "mask.png" } else { "view.png" };
        let Some(path) = rfd::FileDialog::new().add_filter("PNG", &["png"]).set_file_name(name).save_file() else {
            return;
        };
        let result = if mask_only {
            self.editor.project.save_mask(&path)
        } else {
            self.editor.project.save_composite(&path)
        };
        self.status = match result {
            Ok(()) => format!("Exported {}", path.display()),
            Err(e) => {
                log_err!("Export failed: {}", e);
                format!("Export failed: {}", e)
            }
        };
    }

    fn save_settings(&mut self) {
        self.config.brush_width = self.editor.project.canvas.tool.brush_width();
        self.status = match self.config.save() {
            Ok(()) => "Settings saved".to_string(),
            Err(e) => format!("Settings not saved: {}", e),
        };
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (brush, polygon, navigate, up, down, command) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::B),
                i.key_pressed(egui::Key::P),
                i.key_pressed(egui::Key::N) || i.key_pressed(egui::Key::Escape),
                i.key_pressed(egui::Key::ArrowUp),
                i.key_pressed(egui::Key::ArrowDown),
                i.modifiers.command,
            )
        });
        let (open, save, load, export, player) = ctx.input(|i| {
            (
                command && i.key_pressed(egui::Key::O),
                command && i.key_pressed(egui::Key::S),
                command && i.key_pressed(egui::Key::L),
                command && i.key_pressed(egui::Key::E),
                i.key_pressed(egui::Key::F2),
            )
        });

        let canvas = &mut self.editor.project.canvas;
        if !command {
            if brush {
                canvas.set_mode(ToolMode::Brush);
            } else if polygon {
                canvas.set_mode(ToolMode::Polygon);
            } else if navigate {
                canvas.set_mode(ToolMode::Navigate);
            }
        }
        if up {
            canvas.brush_size_up();
        }
        if down {
            canvas.brush_size_down();
        }
        if open {
            self.open_map_dialog();
        }
        if save {
            self.save_session_dialog();
        }
        if load {
            self.load_session_dialog();
        }
        if export {
            self.export_dialog(false);
        }
        if player {
            self.open_player();
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if let Some(path) = dropped.into_iter().find_map(|f| f.path) {
            self.open_map(path);
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Open map").clicked() {
                self.open_map_dialog();
            }
            ui.separator();
            let current = self.editor.project.canvas.mode();
            for mode in ToolMode::all() {
                if ui.selectable_label(current == *mode, mode.label()).clicked() {
                    self.editor.project.canvas.set_mode(*mode);
                }
            }
            ui.separator();
            let canvas = &mut self.editor.project.canvas;
            if ui.button("-").clicked() {
                canvas.brush_size_down();
            }
            ui.label(format!("Brush {:.0}", canvas.tool.brush_width()));
            if ui.button("+").clicked() {
                canvas.brush_size_up();
            }
            ui.separator();
            if ui.button("Player view").clicked() {
                self.open_player();
            }
            if ui.button("Save session").clicked() {
                self.save_session_dialog();
            }
            if ui.button("Load session").clicked() {
                self.load_session_dialog();
            }
            if ui.button("Export view").clicked() {
                self.export_dialog(false);
            }
            if ui.button("Export mask").clicked() {
                self.export_dialog(true);
            }
            if ui.button("Save settings").clicked() {
                self.save_settings();
            }
        });
    }

    fn handle_events(&mut self) {
        for event in self.editor.project.canvas.drain_events() {
            match event {
                CanvasEvent::MaskCommitted { png } => {
                    self.editor.endpoint.broadcast(png);
                }
                CanvasEvent::MapLoaded { width, height } => {
                    self.status = format!("{} ({}x{})", self.editor.project.name, width, height);
                    self.sync_players = true;
                }
                CanvasEvent::DecodeFailed { message, .. } => {
                    self.status = format!("Failed to load: {}", message);
                }
            }
        }
        for player in &mut self.players {
            for event in player.project.canvas.drain_events() {
                match event {
                    CanvasEvent::MapLoaded { .. } => self.sync_players = true,
                    CanvasEvent::DecodeFailed { message, .. } => {
                        log_warn!("Player view {} decode failed: {}", player.project.id, message);
                    }
                    CanvasEvent::MaskCommitted { .. } => {}
                }
            }
        }
        if self.sync_players && self.editor.project.canvas.mask.composite().is_some() {
            self.sync_players = false;
            match self.editor.project.canvas.mask.export_png() {
                Ok(png) => {
                    self.editor.endpoint.broadcast(Arc::new(png));
                }
                Err(e) => log_err!("Mask sync failed: {}", e),
            }
        }
    }
}

impl eframe::App for FogViewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        ctx.send_viewport_cmd(egui::ViewportCommand::Title(format!(
            "FogView - {}",
            self.editor.project.display_title()
        )));

        self.handle_shortcuts(ctx);
        self.handle_dropped_files(ctx);

        self.editor.receive_masks();
        for player in &mut self.players {
            player.receive_masks();
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.label(&self.status);
        });
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.editor.show(ui, now));

        for player in &mut self.players {
            let mut open = player.open;
            egui::Window::new(player.project.display_title())
                .id(egui::Id::new(player.project.id))
                .open(&mut open)
                .default_size([480.0, 360.0])
                .show(ctx, |ui| player.show(ui, now));
            player.open = open;
        }
        self.players.retain(|p| p.open);

        self.handle_events();
        ctx.request_repaint_after(self.editor.project.canvas.render_interval());
    }
}
