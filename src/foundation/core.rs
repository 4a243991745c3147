use std::sync::atomic::{AtomicU64, Ordering};

pub use kurbo::{Point, Rect, Vec2};

/// Monotonic source of storage tags.
///
/// Every freshly allocated pooled resource gets one tag for its whole life, including every trip
/// through its pool, so reuse is observable from the outside.
#[derive(Debug, Default)]
pub(crate) struct TagSequence(AtomicU64);

impl TagSequence {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Component-wise product, used for scale composition.
pub(crate) fn mul_components(a: Vec2, b: Vec2) -> Vec2 {
    Vec2::new(a.x * b.x, a.y * b.y)
}
