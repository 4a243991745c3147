use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use crate::device::buffer::HostBuffer;
use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel::PixelFormatDesc;
use crate::frame::video_format::max_video_format_size;

/// Opaque identity of the producer a frame belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FrameTag(pub u64);

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioChannelLayout {
    pub num_channels: u32,
    pub kind: String,
}

impl AudioChannelLayout {
    pub fn stereo() -> Self {
        Self {
            num_channels: 2,
            kind: "stereo".to_string(),
        }
    }

    pub fn invalid() -> Self {
        Self {
            num_channels: 0,
            kind: "invalid".to_string(),
        }
    }
}

impl Default for AudioChannelLayout {
    fn default() -> Self {
        Self::stereo()
    }
}

/// Bytes of one image plane.
///
/// Pooled data keeps the identity of the host buffer it lives in, which is what the device's
/// upload cache keys on. Owned data has no identity and is uploaded fresh every time.
#[derive(Clone)]
pub enum ImageData {
    Pooled(Arc<HostBuffer>),
    Owned(Arc<[u8]>),
}

impl ImageData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Pooled(buf) => buf.as_slice(),
            Self::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tag of the backing host buffer, if any.
    pub fn buffer_tag(&self) -> Option<u64> {
        match self {
            Self::Pooled(buf) => Some(buf.tag()),
            Self::Owned(_) => None,
        }
    }
}

impl AsRef<[u8]> for ImageData {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Vec<u8>> for ImageData {
    fn from(v: Vec<u8>) -> Self {
        Self::Owned(v.into())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pooled(buf) => f.debug_tuple("Pooled").field(buf).finish(),
            Self::Owned(bytes) => f.debug_tuple("Owned").field(&bytes.len()).finish(),
        }
    }
}

/// A composited output frame.
pub struct FrameBytes(Repr);

enum Repr {
    Static(&'static [u8]),
    Host(HostBuffer),
    Owned(Vec<u8>),
}

impl FrameBytes {
    /// `size` zero bytes without allocating, as long as `size` fits the largest known format.
    pub fn zeroed(size: usize) -> Self {
        static ZEROS: OnceLock<Vec<u8>> = OnceLock::new();
        let zeros = ZEROS.get_or_init(|| vec![0u8; max_video_format_size()]);
        match zeros.get(..size) {
            Some(slice) => Self(Repr::Static(slice)),
            None => Self(Repr::Owned(vec![0u8; size])),
        }
    }

    pub(crate) fn from_host(buf: HostBuffer) -> Self {
        Self(Repr::Host(buf))
    }

    /// Whether these bytes alias the shared zero buffer.
    pub fn is_shared_zero(&self) -> bool {
        matches!(self.0, Repr::Static(_))
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self.0 {
            Repr::Owned(v) => v,
            Repr::Static(s) => s.to_vec(),
            Repr::Host(buf) => buf.as_slice().to_vec(),
        }
    }
}

impl Deref for FrameBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.0 {
            Repr::Static(s) => s,
            Repr::Host(buf) => buf.as_slice(),
            Repr::Owned(v) => v,
        }
    }
}

impl fmt::Debug for FrameBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBytes")
            .field("len", &self.len())
            .field("shared_zero", &self.is_shared_zero())
            .finish()
    }
}

/// A freshly allocated frame a producer writes into before handing it to the mixer.
#[derive(Debug)]
pub struct MutableFrame {
    tag: FrameTag,
    pixel_desc: PixelFormatDesc,
    channel_layout: AudioChannelLayout,
    planes: Vec<HostBuffer>,
    geometry: FrameGeometry,
}

impl MutableFrame {
    pub(crate) fn new(
        tag: FrameTag,
        pixel_desc: PixelFormatDesc,
        channel_layout: AudioChannelLayout,
        planes: Vec<HostBuffer>,
    ) -> Self {
        Self {
            tag,
            pixel_desc,
            channel_layout,
            planes,
            geometry: FrameGeometry::default(),
        }
    }

    pub fn tag(&self) -> FrameTag {
        self.tag
    }

    pub fn pixel_desc(&self) -> &PixelFormatDesc {
        &self.pixel_desc
    }

    pub fn channel_layout(&self) -> &AudioChannelLayout {
        &self.channel_layout
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn image_data(&self, plane: usize) -> Option<&[u8]> {
        self.planes.get(plane).map(HostBuffer::as_slice)
    }

    pub fn image_data_mut(&mut self, plane: usize) -> Option<&mut [u8]> {
        self.planes.get_mut(plane).map(HostBuffer::as_mut_slice)
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    pub fn set_geometry(&mut self, geometry: FrameGeometry) {
        self.geometry = geometry;
    }

    /// Seal the frame. Its buffers keep their identity so repeated visits hit the upload cache.
    pub fn freeze(self) -> ConstFrame {
        ConstFrame {
            tag: self.tag,
            pixel_desc: self.pixel_desc,
            channel_layout: self.channel_layout,
            planes: self
                .planes
                .into_iter()
                .map(|b| ImageData::Pooled(Arc::new(b)))
                .collect(),
            geometry: self.geometry,
        }
    }
}

/// An immutable, cheaply clonable frame as seen by `visit`.
#[derive(Clone, Debug)]
pub struct ConstFrame {
    tag: FrameTag,
    pixel_desc: PixelFormatDesc,
    channel_layout: AudioChannelLayout,
    planes: Vec<ImageData>,
    geometry: FrameGeometry,
}

impl ConstFrame {
    /// A frame with no image. Visiting it contributes nothing.
    pub fn empty() -> Self {
        Self {
            tag: FrameTag::default(),
            pixel_desc: PixelFormatDesc::default(),
            channel_layout: AudioChannelLayout::invalid(),
            planes: Vec::new(),
            geometry: FrameGeometry::default(),
        }
    }

    /// Wrap caller-owned plane bytes. Each plane must match its description's size.
    pub fn from_planes(
        tag: FrameTag,
        pixel_desc: PixelFormatDesc,
        planes: Vec<ImageData>,
    ) -> MixerResult<Self> {
        if planes.len() != pixel_desc.planes.len() {
            return Err(MixerError::validation(format!(
                "frame has {} planes but its description lists {}",
                planes.len(),
                pixel_desc.planes.len()
            )));
        }
        for (i, (data, plane)) in planes.iter().zip(&pixel_desc.planes).enumerate() {
            if data.len() != plane.size {
                return Err(MixerError::validation(format!(
                    "plane {i} holds {} bytes, expected {}",
                    data.len(),
                    plane.size
                )));
            }
        }
        Ok(Self {
            tag,
            pixel_desc,
            channel_layout: AudioChannelLayout::default(),
            planes,
            geometry: FrameGeometry::default(),
        })
    }

    pub fn with_geometry(mut self, geometry: FrameGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn tag(&self) -> FrameTag {
        self.tag
    }

    pub fn pixel_desc(&self) -> &PixelFormatDesc {
        &self.pixel_desc
    }

    pub fn channel_layout(&self) -> &AudioChannelLayout {
        &self.channel_layout
    }

    pub fn planes(&self) -> &[ImageData] {
        &self.planes
    }

    pub fn image_data(&self, plane: usize) -> Option<&ImageData> {
        self.planes.get(plane)
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }
}

impl From<MutableFrame> for ConstFrame {
    fn from(frame: MutableFrame) -> Self {
        frame.freeze()
    }
}
