//! The seam between the device/renderer and the actual pixel pushing.
//!
//! A [`GpuBackend`] owns raw textures and implements the compositing kernel. The device only ever
//! calls it from its execution context.

pub mod blend;
pub mod cpu;
#[cfg(feature = "gpu")]
pub mod wgpu;


use smallvec::SmallVec;

use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel::{PixelFormat, PixelFormatDesc};
use crate::frame::transform::{BlendMode, ImageTransform};

/// How a draw combines with its target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Keyer {
    /// Source over target through the draw's blend mode.
    #[default]
    Linear,
    /// Saturating per-channel add. Used to accumulate mix buffers.
    Additive,
}

/// Borrowed view of a pooled texture handed to the kernel.
#[derive(Debug)]
pub struct TextureRef<'a, T> {
    pub raw: &'a T,
    /// Storage tag of the pooled texture.
    pub tag: u64,
    pub width: u32,
    pub height: u32,
    /// Channels per pixel (1..=4).
    pub stride: u32,
}

impl<T> Clone for TextureRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TextureRef<'_, T> {}

/// One fully described draw.
///
/// `textures` holds one texture per plane of `pix_desc`. Keys are single-channel textures the
/// size of the target; the source is multiplied by both before it reaches the target.
#[derive(Debug)]
pub struct KernelParams<'a, T> {
    pub target: TextureRef<'a, T>,
    pub textures: SmallVec<[TextureRef<'a, T>; 4]>,
    pub pix_desc: &'a PixelFormatDesc,
    pub transform: ImageTransform,
    pub geometry: &'a FrameGeometry,
    pub blend_mode: BlendMode,
    pub keyer: Keyer,
    pub local_key: Option<TextureRef<'a, T>>,
    pub layer_key: Option<TextureRef<'a, T>>,
}

impl<T> KernelParams<'_, T> {
    /// Reject draws no kernel can express: missing planes, planes with too few channels, keys
    /// not matching the target, sources aliasing the target and targets that are neither alpha
    /// nor BGRA.
    pub(crate) fn validate(&self) -> MixerResult<()> {
        let format = self.pix_desc.format;
        let needed = format.plane_count();
        if self.textures.len() < needed {
            return Err(MixerError::validation(format!(
                "{format:?} needs {needed} planes, got {}",
                self.textures.len()
            )));
        }
        let channels = channels_needed(format);
        if let Some(t) = self.textures.iter().find(|t| t.stride < channels) {
            return Err(MixerError::validation(format!(
                "{format:?} needs {channels} channels per texel, texture {} has {}",
                t.tag, t.stride
            )));
        }

        let target = self.target;
        for key in self.local_key.iter().chain(self.layer_key.iter()) {
            if key.width != target.width || key.height != target.height {
                return Err(MixerError::validation(format!(
                    "key {}x{} does not match target {}x{}",
                    key.width, key.height, target.width, target.height
                )));
            }
        }
        let aliases_target = self
            .textures
            .iter()
            .chain(self.local_key.iter())
            .chain(self.layer_key.iter())
            .any(|t| std::ptr::eq(t.raw, target.raw));
        if aliases_target {
            return Err(MixerError::validation("draw source aliases its target"));
        }
        if !matches!(target.stride, 1 | 4) {
            return Err(MixerError::validation(format!(
                "draw target must have 1 or 4 channels, got {}",
                target.stride
            )));
        }
        Ok(())
    }
}

/// Channels per texel the first plane of `format` must carry.
pub(crate) fn channels_needed(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Bgra | PixelFormat::Rgba | PixelFormat::Argb | PixelFormat::Abgr => 4,
        PixelFormat::Bgr | PixelFormat::Rgb => 3,
        _ => 1,
    }
}

/// GPU primitives plus the compositing kernel.
///
/// Four-channel textures hold premultiplied BGRA. Every method is only ever invoked on the
/// device's execution context.
pub trait GpuBackend: Send + Sync + 'static {
    type Texture: Send + Sync + 'static;
    /// A GPU to host copy that has been scheduled but not yet mapped.
    type Readback: Send + 'static;

    /// Human-readable adapter/driver description.
    fn describe(&self) -> MixerResult<String>;

    /// Largest single texture dimension.
    fn max_texture_size(&self) -> u32;

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        mipmapped: bool,
    ) -> MixerResult<Self::Texture>;

    fn clear_texture(&self, texture: &Self::Texture) -> MixerResult<()>;

    /// Replace the texture contents with tightly packed rows of `width * stride` bytes.
    fn upload(&self, texture: &Self::Texture, data: &[u8]) -> MixerResult<()>;

    /// Schedule a copy of the texture into host-visible memory.
    fn begin_readback(&self, texture: &Self::Texture) -> MixerResult<Self::Readback>;

    /// Wait for a scheduled copy and write tightly packed rows into `out`.
    fn finish_readback(&self, pending: Self::Readback, out: &mut [u8]) -> MixerResult<()>;

    fn draw(&self, params: &KernelParams<'_, Self::Texture>) -> MixerResult<()>;

    /// Final pass over the composited target. `straighten` converts premultiplied to straight
    /// alpha.
    fn post_process(&self, target: &Self::Texture, straighten: bool) -> MixerResult<()>;

    /// Host memory for a transfer buffer.
    fn allocate_host(&self, size: usize) -> Vec<u8> {
        vec![0; size]
    }
}
