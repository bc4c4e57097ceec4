use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::CanvasState;
use crate::ops::raster::Surface;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ImageIoError {
    Io(std::io::Error),
    Decode(String),
    Encode(String),
    InvalidFormat(String),
    Serialize(String),
}

impl std::fmt::Display for ImageIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageIoError::Io(e) => write!(f, "I/O error: {}", e),
            ImageIoError::Decode(e) => write!(f, "Decode error: {}", e),
            ImageIoError::Encode(e) => write!(f, "Encode error: {}", e),
            ImageIoError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
            ImageIoError::Serialize(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ImageIoError {}

impl From<std::io::Error> for ImageIoError {
    fn from(e: std::io::Error) -> Self {
        ImageIoError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for ImageIoError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        ImageIoError::Serialize(e.to_string())
    }
}

// ============================================================================
// DECODE / ENCODE
// ============================================================================

/// Maximum accepted image dimension per axis.
const MAX_IMAGE_DIM: u32 = 32_768;

fn check_dimensions(image: &RgbaImage) -> Result<(), ImageIoError> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(ImageIoError::InvalidFormat("image has no pixels".into()));
    }
    if w > MAX_IMAGE_DIM || h > MAX_IMAGE_DIM {
        return Err(ImageIoError::InvalidFormat(format!(
            "image {}x{} exceeds maximum {}",
            w, h, MAX_IMAGE_DIM
        )));
    }
    Ok(())
}

/// Decode any supported encoded image (PNG, JPEG, WebP, BMP) to RGBA.
/// A `data:image/...;base64,` URL is unwrapped first.
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage, ImageIoError> {
    if bytes.is_empty() {
        return Err(ImageIoError::Decode("empty input".into()));
    }
    if bytes.starts_with(b"data:") {
        let payload = decode_data_url(bytes)?;
        return decode_bytes(&payload);
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| ImageIoError::Decode(e.to_string()))?
        .into_rgba8();
    check_dimensions(&image)?;
    Ok(image)
}

fn decode_data_url(url: &[u8]) -> Result<Vec<u8>, ImageIoError> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    let comma = url
        .iter()
        .position(|&b| b == b',')
        .ok_or_else(|| ImageIoError::Decode("data URL has no payload".into()))?;
    let header = &url[..comma];
    if !header.ends_with(b";base64") {
        return Err(ImageIoError::Decode("only base64 data URLs are supported".into()));
    }
    let payload: Vec<u8> = url[comma + 1..].iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    BASE64
        .decode(payload)
        .map_err(|e| ImageIoError::Decode(format!("data URL: {}", e)))
}

pub fn decode_file(path: &Path) -> Result<RgbaImage, ImageIoError> {
    let image = image::open(path)
        .map_err(|e| ImageIoError::Decode(format!("{}: {}", path.display(), e)))?
        .into_rgba8();
    check_dimensions(&image)?;
    Ok(image)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageIoError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ImageIoError::Encode("cannot encode an empty image".into()));
    }
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)
        .map_err(|e| ImageIoError::Encode(e.to_string()))?;
    Ok(out)
}

pub fn write_png(image: &RgbaImage, path: &Path) -> Result<(), ImageIoError> {
    let png = encode_png(image)?;
    std::fs::write(path, png)?;
    Ok(())
}

// ============================================================================
// BACKGROUND DECODER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodeSlot {
    Map,
    Mask,
}

impl DecodeSlot {
    fn index(self) -> usize {
        match self {
            DecodeSlot::Map => 0,
            DecodeSlot::Mask => 1,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ImageSource {
    Bytes(Arc<Vec<u8>>),
    File(PathBuf),
}

pub struct DecodeResult {
    pub slot: DecodeSlot,
    pub token: u64,
    pub result: Result<RgbaImage, ImageIoError>,
}

/// Decodes on the rayon pool and hands results back over a channel.
///
/// Each slot keeps a monotonically increasing token; a result carrying an
/// older token than the slot's latest request is discarded on receipt.
pub struct ImageLoader {
    sender: Sender<DecodeResult>,
    receiver: Receiver<DecodeResult>,
    next_token: u64,
    latest: [u64; 2],
    pending: usize,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageLoader {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver, next_token: 0, latest: [0; 2], pending: 0 }
    }

    pub fn request(&mut self, slot: DecodeSlot, source: ImageSource) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        self.latest[slot.index()] = token;
        self.pending += 1;

        let sender = self.sender.clone();
        rayon::spawn(move || {
            let result = match source {
                ImageSource::Bytes(bytes) => decode_bytes(&bytes),
                ImageSource::File(path) => decode_file(&path),
            };
            let _ = sender.send(DecodeResult { slot, token, result });
        });
        token
    }

    pub fn is_latest(&self, slot: DecodeSlot, token: u64) -> bool {
        self.latest[slot.index()] == token
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    fn accept(&mut self, done: DecodeResult, out: &mut Vec<DecodeResult>) {
        self.pending = self.pending.saturating_sub(1);
        if self.is_latest(done.slot, done.token) {
            out.push(done);
        } else {
            log_info!("Discarding stale {:?} decode (token {})", done.slot, done.token);
        }
    }

    /// Collect finished decodes without blocking.
    pub fn poll(&mut self) -> Vec<DecodeResult> {
        let mut out = Vec::new();
        while let Ok(done) = self.receiver.try_recv() {
            self.accept(done, &mut out);
        }
        out
    }

    /// Block until every outstanding request reports or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> Vec<DecodeResult> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while self.pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(done) => self.accept(done, &mut out),
                Err(_) => break,
            }
        }
        out
    }
}

// ============================================================================
// SESSION FILE FORMAT (.fog)
// ============================================================================

const SESSION_MAGIC: &str = "FOG1";

/// Saved view and mask raster. The map itself is referenced by path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionFile {
    magic: String,
    pub map_path: Option<String>,
    pub gutter: u32,
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
    pub mask_width: u32,
    pub mask_height: u32,
    pub mask_pixels: Vec<u8>,
}

/// Snapshot a canvas. `None` until a map is loaded.
pub fn build_session(canvas: &CanvasState, map_path: Option<&Path>) -> Option<SessionFile> {
    let raster = canvas.mask.raster();
    if raster.is_empty() {
        return None;
    }
    Some(SessionFile {
        magic: SESSION_MAGIC.to_string(),
        map_path: map_path.map(|p| p.to_string_lossy().into_owned()),
        gutter: canvas.gutter(),
        pan_x: canvas.view.pan.x,
        pan_y: canvas.view.pan.y,
        zoom: canvas.view.zoom,
        mask_width: raster.width(),
        mask_height: raster.height(),
        mask_pixels: raster.as_raw().to_vec(),
    })
}

pub fn save_session(session: &SessionFile, path: &Path) -> Result<(), ImageIoError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, session)?;
    Ok(())
}

pub fn load_session(path: &Path) -> Result<SessionFile, ImageIoError> {
    let file = File::open(path)?;
    let session: SessionFile = bincode::deserialize_from(BufReader::new(file))?;
    validate_session(session)
}

pub fn decode_session(raw: &[u8]) -> Result<SessionFile, ImageIoError> {
    validate_session(bincode::deserialize(raw)?)
}

fn validate_session(session: SessionFile) -> Result<SessionFile, ImageIoError> {
    if session.magic != SESSION_MAGIC {
        return Err(ImageIoError::InvalidFormat(format!("Unknown magic '{}'", session.magic)));
    }
    if session.mask_width > MAX_IMAGE_DIM || session.mask_height > MAX_IMAGE_DIM {
        return Err(ImageIoError::InvalidFormat(format!(
            "Mask {}x{} exceeds maximum {}",
            session.mask_width, session.mask_height, MAX_IMAGE_DIM
        )));
    }
    let expected = session.mask_width as usize * session.mask_height as usize * 4;
    if session.mask_pixels.len() != expected {
        return Err(ImageIoError::InvalidFormat(format!(
            "Mask pixel data is {} bytes, expected {}",
            session.mask_pixels.len(),
            expected
        )));
    }
    if !(session.zoom.is_finite() && session.zoom > 0.0) {
        return Err(ImageIoError::InvalidFormat(format!("Invalid zoom {}", session.zoom)));
    }
    Ok(session)
}
