use crate::protocol::Rect;

/// Dirty-region accumulator for a single connection.
///
/// The region is an approximation of the union of everything marked since
/// the client's last update: overlapping and adjacent rectangles are
/// coalesced into their bounding box, so the set stays small at the cost
/// of occasionally covering a few clean pixels.
#[derive(Debug, Default)]
pub(crate) struct Damage {
    rects: Vec<Rect>,
}

impl Damage {
    pub(crate) fn mark(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut merged = rect;
        // Absorbing one rectangle can make the union touch another, so
        // keep sweeping until nothing more coalesces.
        loop {
            let before = self.rects.len();
            self.rects.retain(|r| {
                if r.touches(&merged) {
                    merged = merged.union(r);
                    false
                } else {
                    true
                }
            });
            if self.rects.len() == before {
                break;
            }
        }
        self.rects.push(merged);
    }

    /// Replace the region with the full surface rectangle.
    pub(crate) fn mark_all(&mut self, bounds: Rect) {
        self.rects.clear();
        if !bounds.is_empty() {
            self.rects.push(bounds);
        }
    }

    /// Take the whole region, clipped to the current surface bounds.
    pub(crate) fn drain_clipped(&mut self, bounds: Rect) -> Vec<Rect> {
        self.rects
            .drain(..)
            .filter_map(|r| r.intersect(&bounds))
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}
