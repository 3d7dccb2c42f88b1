//! Current background selection.
//!
//! The store holds one `Arc<Background>` and replaces it wholesale; readers
//! take a clone of the `Arc` and keep a consistent value for a whole cycle.

use crate::error::{PipelineError, Result};
use crate::raster::Raster;
use crate::session::Liveness;
use image::Rgba;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fill used when no background image has been chosen
pub const DEFAULT_FILL: Rgba<u8> = Rgba([0, 255, 0, 255]);

#[derive(Debug, Clone, PartialEq)]
pub enum Background {
    /// Constant color; alpha is forced opaque when rendered
    Solid(Rgba<u8>),
    /// Still image, stretched to the canvas when rendered
    Image(Raster),
}

/// What the user handed us as a new background
pub enum BackgroundSource {
    /// Already decoded image
    Image(Raster),
    /// Encoded file bytes (PNG, JPEG, ...) that still need decoding
    Payload(Vec<u8>),
    Solid(Rgba<u8>),
}

pub struct BackgroundStore {
    current: RwLock<Option<Arc<Background>>>,
    // Bumped by every set_background call; only the latest call may install
    generation: AtomicU64,
    liveness: Liveness,
}

impl BackgroundStore {
    pub fn new(initial: Option<Background>, liveness: Liveness) -> Self {
        Self {
            current: RwLock::new(initial.map(Arc::new)),
            generation: AtomicU64::new(0),
            liveness,
        }
    }

    /// Snapshot of the current background, if one is set
    pub fn current(&self) -> Option<Arc<Background>> {
        self.current.read().clone()
    }

    /// Replace the current background.
    ///
    /// Payloads are decoded on the blocking pool first; until decoding
    /// finishes the previous background stays current. A payload that fails
    /// to decode is discarded and the previous background is kept. When calls
    /// overlap, the most recently requested one wins even if an earlier
    /// payload finishes decoding later.
    pub async fn set_background(&self, source: BackgroundSource) -> Result<()> {
        let ticket = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let background = match source {
            BackgroundSource::Image(image) => Background::Image(image),
            BackgroundSource::Solid(color) => Background::Solid(color),
            BackgroundSource::Payload(bytes) => Background::Image(decode_payload(bytes).await?),
        };

        if !self.liveness.is_alive() {
            tracing::debug!("Session torn down, dropping background replacement");
            return Ok(());
        }

        self.replace(background, ticket);
        Ok(())
    }

    /// Read an image file and install it as the background
    pub async fn load_file(&self, path: &Path) -> Result<()> {
        tracing::info!("Loading background from {}", path.display());
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PipelineError::BackgroundDecode(format!("{}: {}", path.display(), e))
        })?;
        self.set_background(BackgroundSource::Payload(bytes)).await
    }

    fn replace(&self, background: Background, ticket: u64) {
        let mut current = self.current.write();
        if self.generation.load(Ordering::Acquire) != ticket {
            tracing::debug!("Background request {} superseded, discarding", ticket);
            return;
        }
        match &background {
            Background::Solid(color) => tracing::info!("Background set to solid {:?}", color.0),
            Background::Image(image) => {
                tracing::info!("Background set to {}x{} image", image.width(), image.height())
            }
        }
        *current = Some(Arc::new(background));
    }
}

async fn decode_payload(bytes: Vec<u8>) -> Result<Raster> {
    tokio::task::spawn_blocking(move || {
        let _span = tracing::debug_span!("decode_background", bytes = bytes.len()).entered();
        image::load_from_memory(&bytes)
            .map(|decoded| decoded.to_rgba8())
            .map_err(|e| PipelineError::BackgroundDecode(e.to_string()))
    })
    .await
    .map_err(|e| PipelineError::BackgroundDecode(format!("decode task failed: {e}")))?
}

/// Parse an `RRGGBB` hex color, with or without a leading `#`
pub fn parse_hex_color(text: &str) -> Result<Rgba<u8>> {
    let hex = text.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(PipelineError::InvalidConfig(format!(
            "color '{text}' is not RRGGBB"
        )));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16)
            .map_err(|_| PipelineError::InvalidConfig(format!("color '{text}' is not RRGGBB")))
    };
    Ok(Rgba([channel(0..2)?, channel(2..4)?, channel(4..6)?, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(Raster::from_pixel(width, height, color));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn payload_is_decoded_before_becoming_current() {
        let store = BackgroundStore::new(None, Liveness::new());
        assert!(store.current().is_none());

        let blue = Rgba([0, 0, 255, 255]);
        store
            .set_background(BackgroundSource::Payload(png_bytes(3, 2, blue)))
            .await
            .unwrap();

        match store.current().as_deref() {
            Some(Background::Image(image)) => {
                assert_eq!(image.dimensions(), (3, 2));
                assert!(image.pixels().all(|p| *p == blue));
            }
            other => panic!("unexpected background {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_payload_keeps_previous_background() {
        let store = BackgroundStore::new(Some(Background::Solid(DEFAULT_FILL)), Liveness::new());
        let err = store
            .set_background(BackgroundSource::Payload(b"not an image".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BackgroundDecode(_)));
        assert_eq!(store.current().as_deref(), Some(&Background::Solid(DEFAULT_FILL)));
    }

    #[tokio::test]
    async fn snapshot_survives_replacement() {
        let store = BackgroundStore::new(Some(Background::Solid(DEFAULT_FILL)), Liveness::new());
        let snapshot = store.current().unwrap();

        store
            .set_background(BackgroundSource::Solid(Rgba([1, 2, 3, 255])))
            .await
            .unwrap();

        assert_eq!(*snapshot, Background::Solid(DEFAULT_FILL));
        assert_eq!(
            store.current().as_deref(),
            Some(&Background::Solid(Rgba([1, 2, 3, 255])))
        );
    }

    #[tokio::test]
    async fn later_request_wins_over_slower_upload() {
        let store = BackgroundStore::new(Some(Background::Solid(DEFAULT_FILL)), Liveness::new());
        let blue = Rgba([0, 0, 255, 255]);
        let upload = png_bytes(1024, 1024, Rgba([200, 10, 10, 255]));

        let (first, second) = tokio::join!(
            store.set_background(BackgroundSource::Payload(upload)),
            store.set_background(BackgroundSource::Solid(blue)),
        );

        first.unwrap();
        second.unwrap();
        assert_eq!(store.current().as_deref(), Some(&Background::Solid(blue)));
    }

    #[tokio::test]
    async fn sequential_requests_all_apply() {
        let store = BackgroundStore::new(None, Liveness::new());
        let blue = Rgba([0, 0, 255, 255]);
        store
            .set_background(BackgroundSource::Solid(blue))
            .await
            .unwrap();
        store
            .set_background(BackgroundSource::Payload(png_bytes(2, 2, DEFAULT_FILL)))
            .await
            .unwrap();
        assert!(matches!(store.current().as_deref(), Some(Background::Image(_))));
    }

    #[tokio::test]
    async fn replacement_after_teardown_is_discarded() {
        let liveness = Liveness::new();
        let store = BackgroundStore::new(None, liveness.clone());
        liveness.teardown();
        store
            .set_background(BackgroundSource::Solid(DEFAULT_FILL))
            .await
            .unwrap();
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_decode_error() {
        let store = BackgroundStore::new(None, Liveness::new());
        let err = store
            .load_file(Path::new("/nonexistent/background.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BackgroundDecode(_)));
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("00ff00").unwrap(), DEFAULT_FILL);
        assert_eq!(parse_hex_color("#FF0000").unwrap(), Rgba([255, 0, 0, 255]));
        assert!(parse_hex_color("fff").is_err());
        assert!(parse_hex_color("gg0000").is_err());
    }
}
