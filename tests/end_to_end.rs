use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use image::{Rgba, RgbaImage};

use fogview::canvas::{CanvasEvent, CanvasState, Point};
use fogview::cli::{self, CliArgs};
use fogview::components::input::{dispatch, EventResponse, PointerButton, PointerEvent};
use fogview::components::tools::ToolMode;
use fogview::io;
use fogview::ipc::MaskHub;
use fogview::ops::mask::MaskOp;
use fogview::ops::raster::Raster;
use fogview::settings::HostConfig;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

fn config(brush: f32) -> HostConfig {
    let mut config = HostConfig::default();
    config.gutter = 20;
    config.brush_width = brush;
    config
}

fn loaded_canvas(brush: f32) -> CanvasState {
    let mut canvas = CanvasState::new(200, 200, config(brush));
    canvas.on_map_loaded(RgbaImage::from_pixel(200, 200, WHITE));
    canvas.drain_events();
    canvas
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fogview-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn brush_stroke_reveals_segment_and_commits() {
    let mut canvas = loaded_canvas(20.0);
    canvas.set_mode(ToolMode::Brush);

    let mut frame = Raster::new(200, 200);
    canvas.draw(&mut frame);
    assert!(canvas.is_valid());

    dispatch(&mut canvas, PointerEvent::down(50.0, 50.0, PointerButton::Primary));
    dispatch(&mut canvas, PointerEvent::moved(80.0, 50.0, Some(PointerButton::Primary)));
    assert!(canvas.tool.overlay.has_content());
    dispatch(&mut canvas, PointerEvent::up(80.0, 50.0, PointerButton::Primary));

    assert!(canvas.mask.is_revealed(Point::new(65.0, 50.0)));
    assert!(canvas.mask.is_revealed(Point::new(65.0, 59.0)));
    assert!(!canvas.mask.is_revealed(Point::new(65.0, 61.0)));
    assert!(!canvas.mask.is_revealed(Point::new(150.0, 150.0)));
    assert!(!canvas.tool.overlay.has_content());
    assert!(!canvas.is_valid());

    let events = canvas.drain_events();
    assert!(matches!(events.as_slice(), [CanvasEvent::MaskCommitted { .. }]));

    assert!(canvas.draw(&mut frame));
    assert!(canvas.is_valid());
    assert_eq!(frame.get_pixel(65, 50), WHITE);
    assert_eq!(frame.get_pixel(150, 150), Rgba([0, 0, 0, 255]));
}

#[test]
fn committed_mask_reaches_player_view() {
    let hub = MaskHub::new();
    let editor_end = hub.connect();
    let player_end = hub.connect();

    let mut editor = loaded_canvas(20.0);
    let mut player = loaded_canvas(20.0);

    editor.mask.apply(MaskOp::Stamp { center: Point::new(100.0, 100.0), radius: 30.0 });
    editor.commit_mask();
    for event in editor.drain_events() {
        if let CanvasEvent::MaskCommitted { png } = event {
            assert_eq!(editor_end.broadcast(png), 1);
        }
    }

    let received = player_end.try_recv_all();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from, editor_end.id());
    assert!(editor_end.try_recv_all().is_empty());

    for msg in received {
        player.apply_remote_mask(msg.png);
    }
    player.wait_for_decodes(Duration::from_secs(5));
    assert_eq!(player.pending_decodes(), 0);
    assert_eq!(player.mask.composite(), editor.mask.composite());

    let mut frame = Raster::new(200, 200);
    assert!(player.tick(Instant::now(), &mut frame));
    assert_eq!(frame.get_pixel(100, 100), WHITE);
    assert_eq!(frame.get_pixel(10, 10), Rgba([0, 0, 0, 255]));
}

#[test]
fn player_keeps_navigating_while_editor_paints() {
    let mut player = loaded_canvas(20.0);
    assert_eq!(player.mode(), ToolMode::Navigate);

    dispatch(&mut player, PointerEvent::down(10.0, 10.0, PointerButton::Primary));
    dispatch(&mut player, PointerEvent::moved(40.0, 25.0, Some(PointerButton::Primary)));
    dispatch(&mut player, PointerEvent::up(40.0, 25.0, PointerButton::Primary));
    assert_eq!(player.view.pan, Point::new(30.0, 15.0));
    assert!(player.drain_events().is_empty());

    let response = dispatch(&mut player, PointerEvent::wheel(0.0, 0.0, -1.0));
    assert_eq!(response, EventResponse::PreventDefault);
    assert!((player.view.zoom - 1.2).abs() < 1e-5);
}

#[test]
fn flatten_writes_hidden_map_without_mask() {
    let dir = scratch_dir();
    let map_path = dir.join("map.png");
    let out_path = dir.join("out.png");
    io::write_png(&RgbaImage::from_pixel(40, 30, WHITE), &map_path).unwrap();

    let args = CliArgs::try_parse_from([
        "fogview",
        "--map",
        map_path.to_str().unwrap(),
        "--output",
        out_path.to_str().unwrap(),
    ])
    .unwrap();
    let report = cli::flatten(&args).unwrap();
    assert_eq!((report.width, report.height), (40, 30));
    assert!(!report.mask_restored);

    let out = io::decode_file(&out_path).unwrap();
    assert_eq!(out.dimensions(), (40, 30));
    assert_eq!(*out.get_pixel(20, 15), Rgba([0, 0, 0, 255]));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn flatten_applies_exported_mask() {
    let dir = scratch_dir();
    let map_path = dir.join("map.png");
    let mask_path = dir.join("mask.png");
    let out_path = dir.join("out.png");
    let map = RgbaImage::from_pixel(60, 40, Rgba([10, 200, 30, 255]));
    io::write_png(&map, &map_path).unwrap();

    let mut canvas = CanvasState::new(60, 40, HostConfig::default());
    canvas.on_map_loaded(map);
    canvas.mask.apply(MaskOp::Stamp { center: Point::new(30.0, 20.0), radius: 8.0 });
    canvas.commit_mask();
    std::fs::write(&mask_path, canvas.mask.export_png().unwrap()).unwrap();

    let args = CliArgs::try_parse_from([
        "fogview",
        "-m",
        map_path.to_str().unwrap(),
        "--mask",
        mask_path.to_str().unwrap(),
        "-o",
        out_path.to_str().unwrap(),
    ])
    .unwrap();
    let report = cli::flatten(&args).unwrap();
    assert!(report.mask_restored);

    let out = io::decode_file(&out_path).unwrap();
    assert_eq!(*out.get_pixel(30, 20), Rgba([10, 200, 30, 255]));
    assert_eq!(*out.get_pixel(2, 2), Rgba([0, 0, 0, 255]));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn flatten_rejects_mask_of_wrong_size() {
    let dir = scratch_dir();
    let map_path = dir.join("map.png");
    let mask_path = dir.join("mask.png");
    io::write_png(&RgbaImage::from_pixel(16, 16, WHITE), &map_path).unwrap();
    io::write_png(&RgbaImage::from_pixel(16, 16, WHITE), &mask_path).unwrap();

    let args = CliArgs::try_parse_from([
        "fogview",
        "-m",
        map_path.to_str().unwrap(),
        "--mask",
        mask_path.to_str().unwrap(),
        "-o",
        dir.join("out.png").to_str().unwrap(),
    ])
    .unwrap();
    assert!(matches!(cli::flatten(&args), Err(cli::CliError::Usage(_))));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn session_file_restores_mask_and_view() {
    let dir = scratch_dir();
    let path = dir.join("table.fog");

    let mut canvas = loaded_canvas(20.0);
    canvas.mask.apply(MaskOp::Segment {
        from: Point::new(20.0, 20.0),
        to: Point::new(120.0, 20.0),
        width: 10.0,
    });
    canvas.commit_mask();
    canvas.view.pan = Point::new(-12.0, 7.5);
    canvas.view.zoom = 1.44;
    let session = io::build_session(&canvas, None).unwrap();
    io::save_session(&session, &path).unwrap();

    let mut restored = loaded_canvas(20.0);
    assert!(restored.restore_session(&io::load_session(&path).unwrap()));
    assert_eq!(restored.view.pan, Point::new(-12.0, 7.5));
    assert_eq!(restored.view.zoom, 1.44);
    assert!(restored.mask.is_revealed(Point::new(70.0, 20.0)));
    assert!(!restored.mask.is_revealed(Point::new(70.0, 40.0)));
    assert_eq!(restored.mask.composite(), canvas.mask.composite());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn undecodable_remote_mask_is_reported() {
    let mut canvas = loaded_canvas(20.0);
    canvas.apply_remote_mask(Arc::new(vec![1, 2, 3, 4]));
    canvas.wait_for_decodes(Duration::from_secs(5));
    let events = canvas.drain_events();
    assert!(matches!(events.as_slice(), [CanvasEvent::DecodeFailed { .. }]));
}

#[test]
fn flatten_accepts_session_file_as_mask() {
    let dir = scratch_dir();
    let map_path = dir.join("map.png");
    let session_path = dir.join("table.fog");
    let out_path = dir.join("out.png");
    let map = RgbaImage::from_pixel(50, 50, WHITE);
    io::write_png(&map, &map_path).unwrap();

    let mut canvas = CanvasState::new(50, 50, HostConfig::default());
    canvas.on_map_loaded(map);
    canvas.mask.apply(MaskOp::Stamp { center: Point::new(25.0, 25.0), radius: 6.0 });
    canvas.commit_mask();
    canvas.view.pan = Point::new(100.0, 100.0);
    io::save_session(&io::build_session(&canvas, Some(&map_path)).unwrap(), &session_path).unwrap();

    let args = CliArgs::try_parse_from([
        "fogview",
        "-m",
        map_path.to_str().unwrap(),
        "--mask",
        session_path.to_str().unwrap(),
        "-o",
        out_path.to_str().unwrap(),
    ])
    .unwrap();
    assert!(cli::flatten(&args).unwrap().mask_restored);

    let out = io::decode_file(&out_path).unwrap();
    assert_eq!(*out.get_pixel(25, 25), WHITE);
    assert_eq!(*out.get_pixel(3, 3), Rgba([0, 0, 0, 255]));

    std::fs::remove_dir_all(&dir).ok();
}
