//! Clipboard backends and image data-url conversion

use super::BrokerError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::Cursor;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid clipboard image: {0}")]
    Image(String),
}

/// Raw RGBA image as exchanged with the platform clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

/// Access to a clipboard
pub trait ClipboardBackend: Send + Sync {
    /// Current text, `None` when the clipboard holds no text
    fn read_text(&self) -> Result<Option<String>, ClipboardError>;

    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;

    fn read_image(&self) -> Result<Option<ImageData>, ClipboardError>;

    fn write_image(&self, image: ImageData) -> Result<(), ClipboardError>;
}

/// In-process clipboard for tests and headless hosts
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<Option<String>>,
    image: Mutex<Option<ImageData>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read_text(&self) -> Result<Option<String>, ClipboardError> {
        Ok(self.text.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
        Ok(())
    }

    fn read_image(&self) -> Result<Option<ImageData>, ClipboardError> {
        Ok(self.image.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write_image(&self, image: ImageData) -> Result<(), ClipboardError> {
        *self.image.lock().unwrap_or_else(|e| e.into_inner()) = Some(image);
        Ok(())
    }
}

/// The operating system clipboard
#[cfg(feature = "system-clipboard")]
#[derive(Debug, Default)]
pub struct SystemClipboard;

#[cfg(feature = "system-clipboard")]
impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }

    fn open() -> Result<arboard::Clipboard, ClipboardError> {
        arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
}

#[cfg(feature = "system-clipboard")]
impl ClipboardBackend for SystemClipboard {
    fn read_text(&self) -> Result<Option<String>, ClipboardError> {
        match Self::open()?.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipboardError::Unavailable(e.to_string())),
        }
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        Self::open()?
            .set_text(text.to_string())
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }

    fn read_image(&self) -> Result<Option<ImageData>, ClipboardError> {
        match Self::open()?.get_image() {
            Ok(image) => Ok(Some(ImageData {
                width: image.width,
                height: image.height,
                rgba: image.bytes.into_owned(),
            })),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipboardError::Unavailable(e.to_string())),
        }
    }

    fn write_image(&self, image: ImageData) -> Result<(), ClipboardError> {
        Self::open()?
            .set_image(arboard::ImageData {
                width: image.width,
                height: image.height,
                bytes: image.rgba.into(),
            })
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
}

/// Default backend: the system clipboard when compiled in
pub fn default_backend() -> std::sync::Arc<dyn ClipboardBackend> {
    #[cfg(feature = "system-clipboard")]
    {
        std::sync::Arc::new(SystemClipboard::new())
    }
    #[cfg(not(feature = "system-clipboard"))]
    {
        std::sync::Arc::new(MemoryClipboard::new())
    }
}

// ============================================================================
// Data URL conversion
// ============================================================================

/// Encode an RGBA image as a `data:image/png;base64,` url
pub fn image_to_data_url(image: &ImageData) -> Result<String, ClipboardError> {
    let buffer = image::RgbaImage::from_raw(
        image.width as u32,
        image.height as u32,
        image.rgba.clone(),
    )
    .ok_or_else(|| ClipboardError::Image("pixel buffer does not match dimensions".into()))?;

    let mut png = Vec::new();
    buffer
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ClipboardError::Image(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

/// Decode a base64 image data url into RGBA pixels
pub fn data_url_to_image(data_url: &str) -> Result<ImageData, ClipboardError> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| ClipboardError::Image("not a data url".into()))?;
    if !header.starts_with("data:image/") || !header.ends_with(";base64") {
        return Err(ClipboardError::Image(
            "expected a base64 encoded image data url".into(),
        ));
    }

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ClipboardError::Image(e.to_string()))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| ClipboardError::Image(e.to_string()))?
        .to_rgba8();

    Ok(ImageData {
        width: decoded.width() as usize,
        height: decoded.height() as usize,
        rgba: decoded.into_raw(),
    })
}

impl From<ClipboardError> for BrokerError {
    fn from(e: ClipboardError) -> Self {
        BrokerError::Clipboard(e.to_string())
    }
}
