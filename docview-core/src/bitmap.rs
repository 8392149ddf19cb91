use anyhow::{ensure, Result};

/// Raster resources owned by the render cache. `dispose` must release the
/// backing memory; the cache calls it before dropping an entry.
pub trait Disposable {
    fn dispose(&mut self);
    fn size_bytes(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    disposed: bool,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * 4],
            disposed: false,
        }
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        ensure!(
            pixels.len() == width as usize * height as usize * 4,
            "pixel buffer of {} bytes does not match {}x{} RGBA",
            pixels.len(),
            width,
            height
        );
        Ok(Self {
            width,
            height,
            pixels,
            disposed: false,
        })
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn copy_from(&mut self, source: &Bitmap) {
        self.width = source.width;
        self.height = source.height;
        self.pixels.clear();
        self.pixels.extend_from_slice(&source.pixels);
        self.disposed = false;
    }

    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: [u8; 3], alpha: f32) {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        let x0 = x0.min(x1);
        let y0 = y0.min(y1);
        let width = self.width as usize;
        for y in y0..y1 {
            let row_start = y as usize * width * 4;
            for x in x0..x1 {
                let idx = row_start + x as usize * 4;
                blend_pixel(&mut self.pixels[idx..idx + 4], color, alpha);
            }
        }
    }
}

impl Disposable for Bitmap {
    fn dispose(&mut self) {
        self.pixels = Vec::new();
        self.disposed = true;
    }

    fn size_bytes(&self) -> usize {
        self.pixels.len()
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.iter_mut().take(3).zip(color) {
        *channel = ((*channel as f32 * inv) + (target as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_releases_pixels() {
        let mut bitmap = Bitmap::new(4, 4);
        assert_eq!(bitmap.size_bytes(), 64);
        bitmap.dispose();
        assert!(bitmap.is_disposed());
        assert_eq!(bitmap.size_bytes(), 0);
        assert_eq!(bitmap.pixels.capacity(), 0);
    }

    #[test]
    fn from_rgba_rejects_mismatched_buffers() {
        assert!(Bitmap::from_rgba(2, 2, vec![0; 15]).is_err());
        assert!(Bitmap::from_rgba(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn fill_rect_blends_inside_bounds_only() {
        let mut bitmap = Bitmap::from_rgba(2, 1, vec![0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        bitmap.fill_rect(1, 0, 10, 10, [255, 255, 255], 1.0);
        assert_eq!(&bitmap.pixels[0..4], &[0, 0, 0, 255]);
        assert_eq!(&bitmap.pixels[4..8], &[255, 255, 255, 255]);
    }
}
