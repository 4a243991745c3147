use futures::{FutureExt, TryFutureExt};
use futures::future::{self, BoxFuture};
use smallvec::SmallVec;

use crate::backend::{GpuBackend, KernelParams, Keyer};
use crate::device::Device;
use crate::device::executor::{Priority, TaskFuture};
use crate::device::texture::Texture;
use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::data::FrameBytes;
use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel::PixelFormatDesc;
use crate::frame::transform::{BlendMode, FieldMode, ImageTransform};
use crate::frame::video_format::VideoFormatDesc;
use crate::mixer::tree::{Item, Layer, LayerId, LayerTree};

/// A composited frame on its way back from the GPU.
pub type FrameFuture = BoxFuture<'static, MixerResult<FrameBytes>>;

/// Tree as built during a tick: every plane still uploading.
pub(crate) type PendingTree<B> = LayerTree<TaskFuture<Texture<B>>>;

type ResolvedTree<B> = LayerTree<Texture<B>>;

pub(crate) struct Renderer<B: GpuBackend> {
    device: Device<B>,
    blend_modes: bool,
}

impl<B: GpuBackend> Renderer<B> {
    pub(crate) fn new(device: Device<B>, blend_modes: bool) -> Self {
        Self {
            device,
            blend_modes,
        }
    }

    pub(crate) fn render(
        &self,
        tree: PendingTree<B>,
        format: &VideoFormatDesc,
        straighten: bool,
    ) -> FrameFuture {
        if tree.is_empty() {
            return future::ready(Ok(FrameBytes::zeroed(format.size))).boxed();
        }

        let device = self.device.clone();
        let blend_modes = self.blend_modes;
        let format = format.clone();
        let job = self.device.begin_invoke(Priority::Normal, move || {
            let tree = tree.try_map(resolve_upload)?;
            let pass = Pass {
                device: &device,
                blend_modes,
            };
            let target = device.create_texture(format.width, format.height, 4, false, true)?;
            if format.field_mode == FieldMode::Progressive {
                pass.draw_layers(&target, &tree, tree.roots(), FieldMode::Progressive)?;
            } else {
                pass.draw_layers(&target, &tree, tree.roots(), FieldMode::Upper)?;
                pass.draw_layers(&target, &tree, tree.roots(), FieldMode::Lower)?;
            }
            device.post_process(&target, straighten)?;
            device.read_back(&target)
        });

        job.and_then(|readback| readback).boxed()
    }
}

/// Uploads are queued at high priority before the render job, so they have all run by the
/// time the job does.
fn resolve_upload<B: GpuBackend>(pending: TaskFuture<Texture<B>>) -> MixerResult<Texture<B>> {
    pending
        .now_or_never()
        .unwrap_or_else(|| Err(MixerError::gpu("plane upload still pending at draw time")))
}

struct Pass<'a, B: GpuBackend> {
    device: &'a Device<B>,
    blend_modes: bool,
}

impl<B: GpuBackend> Pass<'_, B> {
    /// Sublayers of each sibling first, then its own items. The key left by one sibling gates
    /// the next.
    fn draw_layers(
        &self,
        target: &Texture<B>,
        tree: &ResolvedTree<B>,
        layers: &[LayerId],
        field: FieldMode,
    ) -> MixerResult<()> {
        let mut layer_key: Option<Texture<B>> = None;
        for &id in layers {
            let layer = tree.layer(id).ok_or_else(|| {
                MixerError::validation(format!("{id:?} is not in this tree"))
            })?;
            self.draw_layers(target, tree, &layer.sublayers, field)?;
            self.draw_layer(target, layer, &mut layer_key, field)?;
        }
        Ok(())
    }

    fn draw_layer(
        &self,
        target: &Texture<B>,
        layer: &Layer<Texture<B>>,
        layer_key: &mut Option<Texture<B>>,
        field: FieldMode,
    ) -> MixerResult<()> {
        let items: Vec<(ImageTransform, &Item<Texture<B>>)> = layer
            .items
            .iter()
            .filter_map(|item| {
                let mut transform = item.transform;
                transform.field_mode &= field;
                (!transform.field_mode.is_empty()).then_some((transform, item))
            })
            .collect();
        if items.is_empty() {
            return Ok(());
        }

        let mut local_key = None;
        let mut local_mix = None;

        if layer.blend_mode.is_normal() {
            for (transform, item) in items {
                self.draw_item(
                    target,
                    item,
                    transform,
                    layer_key.as_ref(),
                    &mut local_key,
                    &mut local_mix,
                )?;
            }
            self.draw_buffer(target, local_mix.take(), BlendMode::Normal)?;
        } else {
            let isolated =
                self.device
                    .create_texture(target.width(), target.height(), 4, false, true)?;
            for (transform, item) in items {
                self.draw_item(
                    &isolated,
                    item,
                    transform,
                    layer_key.as_ref(),
                    &mut local_key,
                    &mut local_mix,
                )?;
            }
            self.draw_buffer(&isolated, local_mix.take(), BlendMode::Normal)?;
            let blend_mode = if self.blend_modes {
                layer.blend_mode
            } else {
                BlendMode::Normal
            };
            self.draw_buffer(target, Some(isolated), blend_mode)?;
        }

        *layer_key = local_key;
        Ok(())
    }

    fn draw_item(
        &self,
        target: &Texture<B>,
        item: &Item<Texture<B>>,
        transform: ImageTransform,
        layer_key: Option<&Texture<B>>,
        local_key: &mut Option<Texture<B>>,
        local_mix: &mut Option<Texture<B>>,
    ) -> MixerResult<()> {
        if transform.is_key {
            let key = self.lazy(local_key, target, 1, transform.use_mipmap)?;
            self.kernel(&key, item, transform, Keyer::Linear, None, None)
        } else if transform.is_mix {
            let mix = self.lazy(local_mix, target, 4, transform.use_mipmap)?;
            let key = local_key.take();
            self.kernel(&mix, item, transform, Keyer::Additive, key.as_ref(), layer_key)
        } else {
            self.draw_buffer(target, local_mix.take(), BlendMode::Normal)?;
            let key = local_key.take();
            self.kernel(target, item, transform, Keyer::Linear, key.as_ref(), layer_key)
        }
    }

    /// The texture in `slot`, created cleared at the target's size on first use. The first
    /// item to need it picks the mipmap flag.
    fn lazy(
        &self,
        slot: &mut Option<Texture<B>>,
        target: &Texture<B>,
        stride: u32,
        mipmapped: bool,
    ) -> MixerResult<Texture<B>> {
        if let Some(texture) = slot {
            return Ok(texture.clone());
        }
        let texture = self.device.create_texture(
            target.width(),
            target.height(),
            stride,
            mipmapped,
            true,
        )?;
        *slot = Some(texture.clone());
        Ok(texture)
    }

    fn kernel(
        &self,
        target: &Texture<B>,
        item: &Item<Texture<B>>,
        transform: ImageTransform,
        keyer: Keyer,
        local_key: Option<&Texture<B>>,
        layer_key: Option<&Texture<B>>,
    ) -> MixerResult<()> {
        self.device.draw(&KernelParams {
            target: target.as_ref(),
            textures: item.textures.iter().map(Texture::as_ref).collect(),
            pix_desc: &item.pix_desc,
            transform,
            geometry: &item.geometry,
            blend_mode: BlendMode::Normal,
            keyer,
            local_key: local_key.map(Texture::as_ref),
            layer_key: layer_key.map(Texture::as_ref),
        })
    }

    /// Composite a whole intermediate buffer onto `target`.
    fn draw_buffer(
        &self,
        target: &Texture<B>,
        source: Option<Texture<B>>,
        blend_mode: BlendMode,
    ) -> MixerResult<()> {
        let Some(source) = source else {
            return Ok(());
        };
        let pix_desc = PixelFormatDesc::bgra(source.width(), source.height());
        let geometry = FrameGeometry::default();
        let mut textures = SmallVec::new();
        textures.push(source.as_ref());
        self.device.draw(&KernelParams {
            target: target.as_ref(),
            textures,
            pix_desc: &pix_desc,
            transform: ImageTransform::identity(),
            geometry: &geometry,
            blend_mode,
            keyer: Keyer::Linear,
            local_key: None,
            layer_key: None,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/mixer/renderer.rs"]
mod tests;
