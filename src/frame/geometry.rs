use crate::foundation::core::{Point, Rect};
use crate::foundation::error::{MixerError, MixerResult};

/// One corner: where it lands on the canvas and where it samples the source, both normalized.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coord {
    pub vertex: Point,
    pub texture: Point,
}

impl Coord {
    pub fn new(vx: f64, vy: f64, tx: f64, ty: f64) -> Self {
        Self {
            vertex: Point::new(vx, vy),
            texture: Point::new(tx, ty),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryKind {
    Quad,
    QuadList,
}

/// How a source image maps onto the target canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameGeometry {
    kind: GeometryKind,
    coords: Vec<Coord>,
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            kind: GeometryKind::Quad,
            coords: vec![
                Coord::new(0.0, 0.0, 0.0, 0.0),
                Coord::new(1.0, 0.0, 1.0, 0.0),
                Coord::new(1.0, 1.0, 1.0, 1.0),
                Coord::new(0.0, 1.0, 0.0, 1.0),
            ],
        }
    }
}

impl FrameGeometry {
    /// Full-canvas quad sampling the whole source.
    pub fn full_canvas() -> Self {
        Self::default()
    }

    /// Build a geometry from corner coordinates, four per quad.
    pub fn new(kind: GeometryKind, coords: Vec<Coord>) -> MixerResult<Self> {
        if coords.is_empty() || !coords.len().is_multiple_of(4) {
            return Err(MixerError::validation(format!(
                "geometry needs a non-zero multiple of 4 coords, got {}",
                coords.len()
            )));
        }
        if kind == GeometryKind::Quad && coords.len() != 4 {
            return Err(MixerError::validation("quad geometry takes exactly 4 coords"));
        }
        Ok(Self { kind, coords })
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn quads(&self) -> impl Iterator<Item = &[Coord]> {
        self.coords.chunks_exact(4)
    }

    /// Axis-aligned canvas and texture bounds of every quad.
    pub(crate) fn quad_bounds(&self) -> impl Iterator<Item = (Rect, Rect)> + '_ {
        self.quads().map(|q| {
            let vertex = q
                .iter()
                .skip(1)
                .fold(Rect::from_points(q[0].vertex, q[0].vertex), |r, c| {
                    r.union_pt(c.vertex)
                });
            let texture = q
                .iter()
                .skip(1)
                .fold(Rect::from_points(q[0].texture, q[0].texture), |r, c| {
                    r.union_pt(c.texture)
                });
            (vertex, texture)
        })
    }

    /// `true` when no quad covers any area.
    pub fn is_degenerate(&self) -> bool {
        self.quad_bounds().all(|(v, _)| v.area() <= 0.0)
    }
}
