use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}

/// Tightly packed RGBA8 pixels, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (rgba.len() == expected).then_some(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Image decode surface.
#[async_trait]
pub trait RasterSurface: Send + Sync {
    /// Decode enough of `bytes` to know the pixel dimensions (preload).
    async fn decode(&self, bytes: Arc<[u8]>) -> Result<ImageDimensions>;

    /// Load `url`, downsample so the longest edge is at most `max_edge`, and
    /// read back the pixels. Returns the original dimensions alongside.
    ///
    /// Sources that refuse pixel readback fail with
    /// [`crate::BackdropError::ReadbackDenied`].
    async fn sample(
        &self,
        url: &str,
        max_edge: u32,
    ) -> Result<(ImageDimensions, PixelBuffer)>;
}
