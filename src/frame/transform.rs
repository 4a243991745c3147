use std::ops::{BitAnd, BitAndAssign, BitOr, Mul, MulAssign};

use crate::foundation::core::{Vec2, mul_components};

/// Scan convention of a frame, doubling as a two-bit field mask.
///
/// `Progressive` is `Lower | Upper`; intersecting with a single field pass selects what a draw
/// may touch, and `Empty` means nothing is visible.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    Empty,
    /// Odd rows (1, 3, 5, ...).
    Lower,
    /// Even rows (0, 2, 4, ...).
    Upper,
    #[default]
    Progressive,
}

impl FieldMode {
    pub fn bits(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Lower => 1,
            Self::Upper => 2,
            Self::Progressive => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Empty,
            1 => Self::Lower,
            2 => Self::Upper,
            _ => Self::Progressive,
        }
    }

    pub fn is_empty(self) -> bool {
        self == Self::Empty
    }

    /// Whether target row `y` belongs to this mask.
    pub fn covers_row(self, y: u32) -> bool {
        match self {
            Self::Empty => false,
            Self::Lower => y % 2 == 1,
            Self::Upper => y % 2 == 0,
            Self::Progressive => true,
        }
    }
}

impl BitAnd for FieldMode {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() & rhs.bits())
    }
}

impl BitAndAssign for FieldMode {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitOr for FieldMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() | rhs.bits())
    }
}

/// How a layer's isolated output is combined with what is already on the target.
///
/// Declaration order matters: composing transforms keeps the highest-ordered mode, so every
/// mode overrides `Normal`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Lighten,
    Darken,
    Multiply,
    Average,
    Add,
    Subtract,
    Difference,
    Negation,
    Exclusion,
    Screen,
    Overlay,
    SoftLight,
    HardLight,
    ColorDodge,
    ColorBurn,
    LinearDodge,
    LinearBurn,
    LinearLight,
    VividLight,
    PinLight,
    HardMix,
    Reflect,
    Glow,
    Phoenix,
}

impl BlendMode {
    pub const ALL: [Self; 25] = [
        Self::Normal,
        Self::Lighten,
        Self::Darken,
        Self::Multiply,
        Self::Average,
        Self::Add,
        Self::Subtract,
        Self::Difference,
        Self::Negation,
        Self::Exclusion,
        Self::Screen,
        Self::Overlay,
        Self::SoftLight,
        Self::HardLight,
        Self::ColorDodge,
        Self::ColorBurn,
        Self::LinearDodge,
        Self::LinearBurn,
        Self::LinearLight,
        Self::VividLight,
        Self::PinLight,
        Self::HardMix,
        Self::Reflect,
        Self::Glow,
        Self::Phoenix,
    ];

    /// Stable index, shared with the GPU kernel.
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn is_normal(self) -> bool {
        self == Self::Normal
    }
}

/// Per-layer/per-item image state, composed down the push stack with `parent * child`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageTransform {
    pub opacity: f64,
    /// Placement of the source on the canvas, normalized to the canvas size.
    pub fill_translation: Vec2,
    pub fill_scale: Vec2,
    /// Visible window, normalized to the canvas size.
    pub clip_translation: Vec2,
    pub clip_scale: Vec2,
    pub field_mode: FieldMode,
    pub use_mipmap: bool,
    pub is_key: bool,
    pub is_mix: bool,
    pub blend_mode: BlendMode,
    /// Nesting counter. An increase while pushing opens a new layer node.
    pub layer_depth: u32,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            fill_translation: Vec2::ZERO,
            fill_scale: Vec2::new(1.0, 1.0),
            clip_translation: Vec2::ZERO,
            clip_scale: Vec2::new(1.0, 1.0),
            field_mode: FieldMode::Progressive,
            use_mipmap: false,
            is_key: false,
            is_mix: false,
            blend_mode: BlendMode::Normal,
            layer_depth: 0,
        }
    }
}

impl ImageTransform {
    pub fn identity() -> Self {
        Self::default()
    }

    /// A transform that opens one nested layer scope with `blend_mode`.
    pub fn layer(blend_mode: BlendMode) -> Self {
        Self {
            blend_mode,
            layer_depth: 1,
            ..Self::default()
        }
    }

    pub fn with_field_mode(mut self, field_mode: FieldMode) -> Self {
        self.field_mode = field_mode;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_fill(mut self, translation: Vec2, scale: Vec2) -> Self {
        self.fill_translation = translation;
        self.fill_scale = scale;
        self
    }

    pub fn with_clip(mut self, translation: Vec2, scale: Vec2) -> Self {
        self.clip_translation = translation;
        self.clip_scale = scale;
        self
    }

    pub fn keyed(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn mixed(mut self) -> Self {
        self.is_mix = true;
        self
    }

    pub fn with_mipmap(mut self, use_mipmap: bool) -> Self {
        self.use_mipmap = use_mipmap;
        self
    }
}

impl Mul for ImageTransform {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            opacity: self.opacity * rhs.opacity,
            fill_translation: self.fill_translation
                + mul_components(self.fill_scale, rhs.fill_translation),
            fill_scale: mul_components(self.fill_scale, rhs.fill_scale),
            clip_translation: self.clip_translation
                + mul_components(self.clip_scale, rhs.clip_translation),
            clip_scale: mul_components(self.clip_scale, rhs.clip_scale),
            field_mode: self.field_mode & rhs.field_mode,
            use_mipmap: self.use_mipmap || rhs.use_mipmap,
            is_key: self.is_key || rhs.is_key,
            is_mix: self.is_mix || rhs.is_mix,
            blend_mode: self.blend_mode.max(rhs.blend_mode),
            layer_depth: self.layer_depth.saturating_add(rhs.layer_depth),
        }
    }
}

impl MulAssign for ImageTransform {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

/// Everything a producer attaches to a pushed scope. Only the image part is mixed here.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTransform {
    pub image_transform: ImageTransform,
}

impl FrameTransform {
    pub fn new(image_transform: ImageTransform) -> Self {
        Self { image_transform }
    }
}

impl From<ImageTransform> for FrameTransform {
    fn from(image_transform: ImageTransform) -> Self {
        Self { image_transform }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/frame/transform.rs"]
mod tests;
