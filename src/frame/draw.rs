use crate::foundation::error::MixerResult;
use crate::frame::data::{AudioChannelLayout, ConstFrame, FrameTag, MutableFrame};
use crate::frame::pixel::PixelFormatDesc;
use crate::frame::transform::{FieldMode, FrameTransform};

/// Receiver of the per-tick push/visit/pop trace.
///
/// Calls must nest like scopes: every `push` is matched by exactly one `pop`, and each produced
/// frame is visited once.
pub trait FrameVisitor {
    fn push(&mut self, transform: &FrameTransform);
    fn visit(&mut self, frame: &ConstFrame) -> MixerResult<()>;
    fn pop(&mut self) -> MixerResult<()>;
}

/// The sanctioned way for producers to obtain GPU-eligible frame storage.
pub trait FrameFactory {
    fn create_frame(
        &self,
        tag: FrameTag,
        pixel_desc: PixelFormatDesc,
        channel_layout: AudioChannelLayout,
    ) -> MixerResult<MutableFrame>;
}

#[derive(Clone, Debug)]
enum Content {
    Empty,
    Leaf(ConstFrame),
    Group(Vec<DrawFrame>),
}

/// Producer-side scene node: a frame or a group of nodes, each under its own transform.
#[derive(Clone, Debug)]
pub struct DrawFrame {
    transform: FrameTransform,
    content: Content,
}

impl DrawFrame {
    pub fn new(frame: ConstFrame) -> Self {
        Self {
            transform: FrameTransform::default(),
            content: Content::Leaf(frame),
        }
    }

    pub fn empty() -> Self {
        Self {
            transform: FrameTransform::default(),
            content: Content::Empty,
        }
    }

    pub fn group(frames: Vec<DrawFrame>) -> Self {
        Self {
            transform: FrameTransform::default(),
            content: Content::Group(frames),
        }
    }

    /// `above` drawn on top of `below`.
    pub fn over(below: DrawFrame, above: DrawFrame) -> Self {
        Self::group(vec![below, above])
    }

    /// `fill` gated by the alpha of `key`.
    pub fn mask(fill: DrawFrame, mut key: DrawFrame) -> Self {
        key.transform.image_transform.is_key = true;
        Self::group(vec![key, fill])
    }

    /// Field-interleave two frames. `first` takes the field named by `mode`, `second` the other.
    ///
    /// A progressive mode has no fields to split and yields `second`.
    pub fn interlace(mut first: DrawFrame, mut second: DrawFrame, mode: FieldMode) -> Self {
        let (a, b) = match mode {
            FieldMode::Upper => (FieldMode::Upper, FieldMode::Lower),
            FieldMode::Lower => (FieldMode::Lower, FieldMode::Upper),
            FieldMode::Progressive | FieldMode::Empty => return second,
        };
        first.transform.image_transform.field_mode = a;
        second.transform.image_transform.field_mode = b;
        Self::group(vec![first, second])
    }

    pub fn with_transform(mut self, transform: impl Into<FrameTransform>) -> Self {
        self.transform = transform.into();
        self
    }

    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut FrameTransform {
        &mut self.transform
    }

    pub fn is_empty(&self) -> bool {
        match &self.content {
            Content::Empty => true,
            Content::Leaf(_) => false,
            Content::Group(children) => children.iter().all(DrawFrame::is_empty),
        }
    }

    /// Emit this node as a balanced push/visit/pop trace.
    pub fn accept(&self, visitor: &mut dyn FrameVisitor) -> MixerResult<()> {
        visitor.push(&self.transform);
        let visited = match &self.content {
            Content::Empty => Ok(()),
            Content::Leaf(frame) => visitor.visit(frame),
            Content::Group(children) => children.iter().try_for_each(|c| c.accept(visitor)),
        };
        let popped = visitor.pop();
        visited.and(popped)
    }
}
