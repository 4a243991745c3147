use std::fmt;
use std::sync::Arc;

use crate::backend::{GpuBackend, TextureRef};
use crate::device::pool::Lease;

/// Raw backend texture as it sits in a pool bucket.
pub(crate) struct PooledTexture<T> {
    pub(crate) tag: u64,
    pub(crate) raw: T,
}

/// Shape of a texture and the pool bucket it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TextureShape {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) stride: u32,
    pub(crate) mipmapped: bool,
}

impl TextureShape {
    /// Pool class: one per (stride, mipmapped) pair.
    pub(crate) fn class(self) -> usize {
        (self.stride as usize - 1) + if self.mipmapped { 4 } else { 0 }
    }

    /// Packed `(width, height)` bucket key.
    pub(crate) fn size_key(self) -> u32 {
        ((self.width << 16) & 0xFFFF_0000) | (self.height & 0xFFFF)
    }

    pub(crate) fn from_class_key(class: usize, key: u32) -> Self {
        Self {
            width: key >> 16,
            height: key & 0xFFFF,
            stride: (class % 4) as u32 + 1,
            mipmapped: class >= 4,
        }
    }

    pub(crate) fn byte_len(self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.stride as usize)
    }
}

/// A GPU-resident image leased from the device.
///
/// Clones share the same storage. When the last clone goes away the storage returns to the pool
/// bucket of its exact shape.
pub struct Texture<B: GpuBackend> {
    inner: Arc<TextureInner<B>>,
}

struct TextureInner<B: GpuBackend> {
    shape: TextureShape,
    lease: Lease<PooledTexture<B::Texture>>,
}

impl<B: GpuBackend> Texture<B> {
    pub(crate) fn new(shape: TextureShape, lease: Lease<PooledTexture<B::Texture>>) -> Self {
        Self {
            inner: Arc::new(TextureInner { shape, lease }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.shape.width
    }

    pub fn height(&self) -> u32 {
        self.inner.shape.height
    }

    /// Channels per pixel.
    pub fn stride(&self) -> u32 {
        self.inner.shape.stride
    }

    pub fn mipmapped(&self) -> bool {
        self.inner.shape.mipmapped
    }

    /// Identity of the underlying storage. Stable across pool round trips.
    pub fn tag(&self) -> u64 {
        self.inner.lease.tag
    }

    /// Bytes in one tightly packed copy of this texture.
    pub fn size(&self) -> usize {
        self.inner.shape.byte_len()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn shape(&self) -> TextureShape {
        self.inner.shape
    }

    pub(crate) fn raw(&self) -> &B::Texture {
        &self.inner.lease.raw
    }

    pub(crate) fn as_ref(&self) -> TextureRef<'_, B::Texture> {
        TextureRef {
            raw: self.raw(),
            tag: self.tag(),
            width: self.width(),
            height: self.height(),
            stride: self.stride(),
        }
    }
}

impl<B: GpuBackend> Clone for Texture<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: GpuBackend> fmt::Debug for Texture<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("tag", &self.tag())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("stride", &self.stride())
            .field("mipmapped", &self.mipmapped())
            .finish()
    }
}
