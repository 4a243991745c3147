//! The image mixer: collects one tick's visited frames into a layer tree and renders it.

pub mod renderer;
pub mod tree;

use crate::backend::GpuBackend;
use crate::device::Device;
use crate::device::buffer::BufferUsage;
use crate::device::executor::TaskFuture;
use crate::device::texture::Texture;
use crate::foundation::error::MixerResult;
use crate::frame::data::{AudioChannelLayout, ConstFrame, FrameTag, MutableFrame};
use crate::frame::draw::{FrameFactory, FrameVisitor};
use crate::frame::pixel::PixelFormatDesc;
use crate::frame::transform::FrameTransform;
use crate::frame::video_format::VideoFormatDesc;

use self::renderer::{FrameFuture, Renderer};
use self::tree::LayerBuilder;

/// Construction options of an [`ImageMixer`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MixerOpts {
    /// Composite isolated layers with their own blend mode. When off, layers still isolate but
    /// land with normal blending.
    pub blend_modes: bool,
    /// Honour straighten requests in [`ImageMixer::render`].
    pub straight_alpha: bool,
    /// Owning channel, for log correlation only.
    pub channel_id: u32,
}

impl Default for MixerOpts {
    fn default() -> Self {
        Self {
            blend_modes: true,
            straight_alpha: true,
            channel_id: 1,
        }
    }
}

impl MixerOpts {
    pub fn with_blend_modes(mut self, on: bool) -> Self {
        self.blend_modes = on;
        self
    }

    pub fn with_straight_alpha(mut self, on: bool) -> Self {
        self.straight_alpha = on;
        self
    }

    pub fn with_channel_id(mut self, id: u32) -> Self {
        self.channel_id = id;
        self
    }
}

/// Per-channel compositor.
///
/// Producers drive it as a [`FrameVisitor`] with a balanced `push`/`visit`/`pop` trace, then the
/// channel calls [`render`](Self::render) once per tick. Plane uploads start as soon as a frame
/// is visited.
pub struct ImageMixer<B: GpuBackend> {
    opts: MixerOpts,
    device: Device<B>,
    renderer: Renderer<B>,
    builder: LayerBuilder<TaskFuture<Texture<B>>>,
}

impl<B: GpuBackend> ImageMixer<B> {
    pub fn new(device: Device<B>, opts: MixerOpts) -> Self {
        tracing::info!(
            channel = opts.channel_id,
            blend_modes = opts.blend_modes,
            straight_alpha = opts.straight_alpha,
            "image mixer initialized"
        );
        Self {
            renderer: Renderer::new(device.clone(), opts.blend_modes),
            builder: LayerBuilder::new(),
            device,
            opts,
        }
    }

    pub fn opts(&self) -> &MixerOpts {
        &self.opts
    }

    pub fn device(&self) -> &Device<B> {
        &self.device
    }

    /// Open scopes of the current trace.
    pub fn depth(&self) -> usize {
        self.builder.depth()
    }

    /// Largest single texture dimension the device accepts, for validating producer geometry.
    pub fn max_frame_size(&self) -> MixerResult<u32> {
        self.device.max_texture_size()
    }

    /// Composite everything visited since the last render.
    ///
    /// Fails while scopes are still open, keeping what was collected. An empty tick resolves
    /// immediately to a zeroed frame of `format.size` bytes.
    #[tracing::instrument(
        level = "debug",
        skip(self, format),
        fields(channel = self.opts.channel_id, format = %format.name)
    )]
    pub fn render(
        &mut self,
        format: &VideoFormatDesc,
        straighten: bool,
    ) -> MixerResult<FrameFuture> {
        let tree = self.builder.finish()?;
        tracing::debug!(
            layers = tree.layer_count(),
            items = tree.item_count(),
            "rendering tick"
        );
        Ok(self
            .renderer
            .render(tree, format, straighten && self.opts.straight_alpha))
    }
}

impl<B: GpuBackend> FrameVisitor for ImageMixer<B> {
    fn push(&mut self, transform: &FrameTransform) {
        self.builder.push(transform);
    }

    fn visit(&mut self, frame: &ConstFrame) -> MixerResult<()> {
        let device = &self.device;
        self.builder.visit(frame, |data, plane, mipmapped| {
            device.copy_async(data, plane.width, plane.height, plane.stride, mipmapped)
        })
    }

    fn pop(&mut self) -> MixerResult<()> {
        self.builder.pop()
    }
}

impl<B: GpuBackend> FrameFactory for ImageMixer<B> {
    /// One pooled write-only buffer per plane. Frozen frames keep the buffer identity, so
    /// visiting the same frame on later ticks reuses its upload.
    fn create_frame(
        &self,
        tag: FrameTag,
        desc: PixelFormatDesc,
        channel_layout: AudioChannelLayout,
    ) -> MixerResult<MutableFrame> {
        let planes = desc
            .planes
            .iter()
            .map(|plane| self.device.create_buffer(plane.size, BufferUsage::WriteOnly))
            .collect::<MixerResult<Vec<_>>>()?;
        Ok(MutableFrame::new(tag, desc, channel_layout, planes))
    }
}
