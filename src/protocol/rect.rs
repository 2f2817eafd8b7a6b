use bytes::{BufMut, BytesMut};

/// A rectangle of the framebuffer in pixel coordinates.
///
/// Coordinates are non-negative by construction; validity against the
/// surface (`x + width <= surface.width`, likewise for rows) is enforced by
/// clipping against the current surface bounds at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The full extent of a `width` x `height` surface.
    pub fn full(width: u16, height: u16) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn x1(&self) -> u32 {
        u32::from(self.x) + u32::from(self.width)
    }

    fn y1(&self) -> u32 {
        u32::from(self.y) + u32::from(self.height)
    }

    /// The overlap of two rectangles, `None` when they share no pixels.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x1().min(other.x1());
        let y1 = self.y1().min(other.y1());
        if u32::from(x0) >= x1 || u32::from(y0) >= y1 {
            return None;
        }
        Some(Rect::new(
            x0,
            y0,
            (x1 - u32::from(x0)) as u16,
            (y1 - u32::from(y0)) as u16,
        ))
    }

    /// The bounding box of two rectangles. Extents beyond the coordinate
    /// range saturate; out-of-surface excess is removed by clipping later.
    pub fn union(&self, other: &Rect) -> Rect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.x1().max(other.x1());
        let y1 = self.y1().max(other.y1());
        Rect::new(
            x0,
            y0,
            (x1 - u32::from(x0)).min(u32::from(u16::MAX)) as u16,
            (y1 - u32::from(y0)).min(u32::from(u16::MAX)) as u16,
        )
    }

    /// Whether the rectangles overlap or share an edge, i.e. their union
    /// contains no pixels belonging to neither.
    pub fn touches(&self, other: &Rect) -> bool {
        u32::from(self.x) <= other.x1()
            && u32::from(other.x) <= self.x1()
            && u32::from(self.y) <= other.y1()
            && u32::from(other.y) <= self.y1()
    }

    /// Append the update-rectangle header of RFC 6143 section 7.6.1:
    /// position, size and the encoding of the payload that follows.
    pub(crate) fn write_header(&self, encoding: i32, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(encoding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_clips_to_overlap() {
        let a = Rect::new(10, 10, 20, 20);
        let b = Rect::new(20, 0, 30, 15);
        assert_eq!(a.intersect(&b), Some(Rect::new(20, 10, 10, 5)));
        assert_eq!(b.intersect(&a), Some(Rect::new(20, 10, 10, 5)));
    }

    #[test]
    fn intersect_of_disjoint_rects_is_none() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn union_is_the_bounding_box() {
        let a = Rect::new(0, 0, 4, 4);
        let b = Rect::new(8, 8, 4, 4);
        assert_eq!(a.union(&b), Rect::new(0, 0, 12, 12));
    }

    #[test]
    fn touching_edges_count_as_touching() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.touches(&Rect::new(10, 0, 5, 10)));
        assert!(a.touches(&Rect::new(0, 10, 10, 5)));
        assert!(!a.touches(&Rect::new(11, 0, 5, 10)));
    }

    #[test]
    fn header_layout_is_big_endian() {
        let mut buf = BytesMut::new();
        Rect::new(1, 2, 3, 4).write_header(-223, &mut buf);
        assert_eq!(
            &buf[..],
            &[0, 1, 0, 2, 0, 3, 0, 4, 0xff, 0xff, 0xff, 0x21]
        );
    }
}
