//! layermix is the compositing core of a real-time broadcast video mixer.
//!
//! Producers describe each output tick as a nested `push`/`visit`/`pop` trace. The mixer turns
//! that trace into a tree of layers, composites it on a single GPU execution context and hands
//! back the finished frame as bytes.
//!
//! # Pipeline overview
//!
//! 1. **Accumulate**: an [`ImageMixer`] acts as a [`FrameVisitor`]. Every visited frame starts
//!    uploading its planes right away and lands in the innermost open layer.
//! 2. **Render**: [`ImageMixer::render`] walks the layer tree once per field, resolving keys,
//!    mix buffers and isolated blend-mode layers through the [`GpuBackend`] kernel.
//! 3. **Read back**: the composited target is copied into a pooled host buffer and the returned
//!    [`FrameFuture`] resolves to its bytes.
//!
//! Resources are pooled by exact shape on the [`Device`]. Every GPU call happens on the device's
//! execution context; calling in from any other thread yields [`MixerError::InvalidOperation`].
//!
//! Images are premultiplied BGRA8 throughout. The software [`CpuBackend`] is always available;
//! enable the `gpu` feature for the wgpu backend.
#![forbid(unsafe_code)]

mod foundation;

pub mod backend;
pub mod device;
pub mod frame;
pub mod mixer;

pub use backend::cpu::{CpuBackend, CpuBackendOpts, CpuTexture};
pub use backend::{GpuBackend, KernelParams, Keyer, TextureRef};
pub use device::buffer::{BufferUsage, HostBuffer};
pub use device::executor::{Priority, TaskFuture};
pub use device::texture::Texture;
pub use device::{Device, DeviceOpts, DeviceStats, Readback};
pub use foundation::core::{Point, Rect, Vec2};
pub use foundation::error::{MixerError, MixerResult};
pub use frame::data::{
    AudioChannelLayout, ConstFrame, FrameBytes, FrameTag, ImageData, MutableFrame,
};
pub use frame::draw::{DrawFrame, FrameFactory, FrameVisitor};
pub use frame::geometry::{Coord, FrameGeometry, GeometryKind};
pub use frame::pixel::{PixelFormat, PixelFormatDesc, PlaneDesc};
pub use frame::transform::{BlendMode, FieldMode, FrameTransform, ImageTransform};
pub use frame::video_format::{
    VideoFormat, VideoFormatDesc, all_formats, max_video_format_size,
};
pub use mixer::renderer::FrameFuture;
pub use mixer::tree::{Item, Layer, LayerBuilder, LayerId, LayerTree};
pub use mixer::{ImageMixer, MixerOpts};

#[cfg(feature = "gpu")]
pub use backend::wgpu::{WgpuBackend, WgpuBackendOpts};
