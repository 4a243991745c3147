use smallvec::SmallVec;

use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::data::{ConstFrame, ImageData};
use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel::{PixelFormatDesc, PlaneDesc};
use crate::frame::transform::{BlendMode, FrameTransform, ImageTransform};

/// Stable handle of a layer node inside a [`LayerTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(u32);

impl LayerId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One visited frame. `P` is whatever stands for an uploaded plane.
#[derive(Clone, Debug)]
pub struct Item<P> {
    pub pix_desc: PixelFormatDesc,
    pub transform: ImageTransform,
    pub geometry: FrameGeometry,
    /// One per plane of `pix_desc`.
    pub textures: SmallVec<[P; 4]>,
}

#[derive(Clone, Debug)]
pub struct Layer<P> {
    pub blend_mode: BlendMode,
    /// Drawn before this layer's own items, in order.
    pub sublayers: Vec<LayerId>,
    /// In z-order, bottom first.
    pub items: Vec<Item<P>>,
}

impl<P> Layer<P> {
    fn new(blend_mode: BlendMode) -> Self {
        Self {
            blend_mode,
            sublayers: Vec::new(),
            items: Vec::new(),
        }
    }
}

/// Layers of one tick, stored flat and linked by [`LayerId`].
#[derive(Clone, Debug)]
pub struct LayerTree<P> {
    nodes: Vec<Layer<P>>,
    roots: Vec<LayerId>,
}

impl<P> Default for LayerTree<P> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }
}

impl<P> LayerTree<P> {
    pub fn roots(&self) -> &[LayerId] {
        &self.roots
    }

    /// `None` for an id minted by another tree.
    pub fn layer(&self, id: LayerId) -> Option<&Layer<P>> {
        self.nodes.get(id.index())
    }

    /// No root layers at all.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn layer_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn item_count(&self) -> usize {
        self.nodes.iter().map(|l| l.items.len()).sum()
    }

    fn add_layer(&mut self, parent: Option<LayerId>, blend_mode: BlendMode) -> LayerId {
        let id = LayerId(self.nodes.len() as u32);
        self.nodes.push(Layer::new(blend_mode));
        match parent {
            Some(p) => self.nodes[p.index()].sublayers.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Convert every plane handle, keeping the shape of the tree.
    pub fn try_map<Q, E>(self, mut f: impl FnMut(P) -> Result<Q, E>) -> Result<LayerTree<Q>, E> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for layer in self.nodes {
            let mut items = Vec::with_capacity(layer.items.len());
            for item in layer.items {
                items.push(Item {
                    pix_desc: item.pix_desc,
                    transform: item.transform,
                    geometry: item.geometry,
                    textures: item.textures.into_iter().map(&mut f).collect::<Result<_, E>>()?,
                });
            }
            nodes.push(Layer {
                blend_mode: layer.blend_mode,
                sublayers: layer.sublayers,
                items,
            });
        }
        Ok(LayerTree {
            nodes,
            roots: self.roots,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Scope {
    transform: ImageTransform,
    /// Open layers while this scope is on top.
    open_layers: usize,
}

/// Builds a [`LayerTree`] from a push/visit/pop trace.
#[derive(Debug)]
pub struct LayerBuilder<P> {
    tree: LayerTree<P>,
    scopes: Vec<Scope>,
    layers: Vec<LayerId>,
}

impl<P> Default for LayerBuilder<P> {
    fn default() -> Self {
        Self {
            tree: LayerTree::default(),
            scopes: vec![Scope {
                transform: ImageTransform::identity(),
                open_layers: 0,
            }],
            layers: Vec::new(),
        }
    }
}

impl<P> LayerBuilder<P> {
    pub fn new() -> Self {
        Self::default()
    }

    fn top(&self) -> Scope {
        self.scopes.last().copied().unwrap_or(Scope {
            transform: ImageTransform::identity(),
            open_layers: 0,
        })
    }

    /// Number of pushes not yet popped.
    pub fn depth(&self) -> usize {
        self.scopes.len().saturating_sub(1)
    }

    pub fn open_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_balanced(&self) -> bool {
        self.depth() == 0 && self.layers.is_empty()
    }

    /// The transform every visit at this point is drawn with.
    pub fn current_transform(&self) -> ImageTransform {
        self.top().transform
    }

    pub fn push(&mut self, transform: &FrameTransform) {
        let parent = self.top().transform;
        let composed = parent * transform.image_transform;
        if composed.layer_depth > parent.layer_depth {
            let id = self
                .tree
                .add_layer(self.layers.last().copied(), composed.blend_mode);
            self.layers.push(id);
        }
        self.scopes.push(Scope {
            transform: composed,
            open_layers: self.layers.len(),
        });
    }

    /// Record `frame` in the innermost open layer, requesting one upload per plane.
    ///
    /// Frames without a drawable description, with no visible field, or covering no area are
    /// skipped without uploading anything.
    pub fn visit(
        &mut self,
        frame: &ConstFrame,
        mut upload: impl FnMut(&ImageData, &PlaneDesc, bool) -> P,
    ) -> MixerResult<()> {
        let desc = frame.pixel_desc();
        let transform = self.top().transform;
        if !desc.is_drawable() {
            tracing::trace!(tag = frame.tag().0, "skipping frame without a drawable description");
            return Ok(());
        }
        if transform.field_mode.is_empty() {
            tracing::trace!(tag = frame.tag().0, "skipping frame with no visible field");
            return Ok(());
        }
        if frame.geometry().is_degenerate() {
            tracing::trace!(tag = frame.tag().0, "skipping frame with zero-area geometry");
            return Ok(());
        }
        let Some(&layer) = self.layers.last() else {
            return Err(MixerError::validation("visit outside of any layer scope"));
        };
        if frame.planes().len() < desc.planes.len() {
            return Err(MixerError::validation(format!(
                "frame carries {} planes, its description lists {}",
                frame.planes().len(),
                desc.planes.len()
            )));
        }

        let textures = frame
            .planes()
            .iter()
            .zip(&desc.planes)
            .map(|(data, plane)| upload(data, plane, transform.use_mipmap))
            .collect();
        self.tree.nodes[layer.index()].items.push(Item {
            pix_desc: desc.clone(),
            transform,
            geometry: frame.geometry().clone(),
            textures,
        });
        Ok(())
    }

    pub fn pop(&mut self) -> MixerResult<()> {
        if self.scopes.len() <= 1 {
            return Err(MixerError::validation("pop without a matching push"));
        }
        self.scopes.pop();
        let open = self.top().open_layers;
        self.layers.truncate(open);
        Ok(())
    }

    /// Hand over the finished tree and start a new one.
    ///
    /// Fails, leaving everything in place, while scopes are still open.
    pub fn finish(&mut self) -> MixerResult<LayerTree<P>> {
        if !self.is_balanced() {
            return Err(MixerError::validation(format!(
                "render requested with {} open scopes",
                self.depth()
            )));
        }
        Ok(std::mem::take(&mut self.tree))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/mixer/tree.rs"]
mod tests;
