use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::Rect;

/// The lock guarding the animator's pixel memory.
///
/// The server acquires it for every read of pixel bytes and for nothing
/// else; the animator is expected to hold it while drawing. Pixel data is
/// copied out under the lock and converted after it is released, so the
/// critical section is bounded by the size of the dirty region.
pub type SurfaceLock = Arc<Mutex<()>>;

/// Descriptor of the animator-owned pixel memory served to clients.
///
/// Pixels are 32-bit ARGB words in little-endian byte order
/// (`0xAARRGGBB`); `stride` is the distance between rows in bytes. The
/// server only ever reads through `base`, never writes and never frees,
/// and only while holding the [`SurfaceLock`] the surface was registered
/// with.
#[derive(Debug, Clone, Copy)]
pub struct Surface {
    width: u16,
    height: u16,
    stride: usize,
    base: *const u8,
}

// The descriptor is handed to connection tasks. The from_raw contract makes
// the animator responsible for keeping the memory alive and for doing all
// mutation under the surface lock.
unsafe impl Send for Surface {}
unsafe impl Sync for Surface {}

impl Surface {
    /// Describe a pixel buffer owned by the caller.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `stride * height` readable bytes laid
    /// out as `height` rows of `width` ARGB32 pixels each, with
    /// `stride >= width * 4`. The memory must stay valid until the surface
    /// has been replaced through `change_surface` and every in-flight
    /// update has completed, or until the server is stopped. All writes to
    /// it must happen while holding the [`SurfaceLock`] registered
    /// alongside it.
    pub unsafe fn from_raw(base: *const u8, width: u16, height: u16, stride: usize) -> Self {
        Self {
            width,
            height,
            stride,
            base,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn bounds(&self) -> Rect {
        Rect::full(self.width, self.height)
    }

    /// Copy `rect` out as packed rows of `width * 4` ARGB bytes.
    ///
    /// `rect` must already be clipped to this surface's bounds, and the
    /// caller must hold the surface lock.
    pub(crate) fn copy_rect(&self, rect: &Rect) -> Vec<u8> {
        let row_bytes = usize::from(rect.width) * 4;
        let mut data = Vec::with_capacity(row_bytes * usize::from(rect.height));
        for y in rect.y..rect.y + rect.height {
            let offset = usize::from(y) * self.stride + usize::from(rect.x) * 4;
            let row = unsafe { std::slice::from_raw_parts(self.base.add(offset), row_bytes) };
            data.extend_from_slice(row);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_rect_respects_stride_and_offset() {
        // 4x2 surface with an extra padding pixel per row.
        let pixels: Vec<u32> = (0..10).collect();
        let surface = unsafe { Surface::from_raw(pixels.as_ptr().cast(), 4, 2, 5 * 4) };

        let data = surface.copy_rect(&Rect::new(1, 0, 2, 2));
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![1, 2, 6, 7]);
    }

    #[test]
    fn bounds_cover_the_whole_surface() {
        let pixels = vec![0_u32; 6];
        let surface = unsafe { Surface::from_raw(pixels.as_ptr().cast(), 3, 2, 3 * 4) };
        assert_eq!(surface.bounds(), Rect::full(3, 2));
    }
}
