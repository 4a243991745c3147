//! Per-pixel compositing math for the software kernel.
//!
//! Pixels are premultiplied `[b, g, r, a]`. Only the color channels go through a blend function;
//! alpha always combines as source-over.

use crate::frame::transform::BlendMode;

pub type PremulBgra8 = [u8; 4];

/// Premultiplied source-over.
pub fn over(dst: PremulBgra8, src: PremulBgra8) -> PremulBgra8 {
    if src[3] == 0 && src[..3].iter().all(|&c| c == 0) {
        return dst;
    }
    let inv = 255u16 - u16::from(src[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255(u16::from(dst[i]), inv));
    }
    out
}

/// Saturating per-channel add.
pub fn add(dst: PremulBgra8, src: PremulBgra8) -> PremulBgra8 {
    [
        dst[0].saturating_add(src[0]),
        dst[1].saturating_add(src[1]),
        dst[2].saturating_add(src[2]),
        dst[3].saturating_add(src[3]),
    ]
}

/// Alpha-over on a single-channel key.
pub fn over_alpha(dst: u8, src_alpha: u8) -> u8 {
    src_alpha.saturating_add(mul_div255(u16::from(dst), 255 - u16::from(src_alpha)))
}

/// Scale every channel by `factor / 255`.
pub fn scale(px: PremulBgra8, factor: u8) -> PremulBgra8 {
    if factor == 255 {
        return px;
    }
    let f = u16::from(factor);
    [
        mul_div255(u16::from(px[0]), f),
        mul_div255(u16::from(px[1]), f),
        mul_div255(u16::from(px[2]), f),
        mul_div255(u16::from(px[3]), f),
    ]
}

/// Separable blend of `src` onto `dst`:
/// `co = (1 - ab) * cs + (1 - as) * cb + as * ab * B(Cb, Cs)`, `ao = as + ab - as * ab`.
pub fn composite(mode: BlendMode, dst: PremulBgra8, src: PremulBgra8) -> PremulBgra8 {
    if mode.is_normal() {
        return over(dst, src);
    }
    let sa = f32::from(src[3]) / 255.0;
    let da = f32::from(dst[3]) / 255.0;
    if sa <= 0.0 {
        return dst;
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let cs = f32::from(src[i]) / 255.0;
        let cb = f32::from(dst[i]) / 255.0;
        let straight_s = (cs / sa).min(1.0);
        let straight_b = if da > 0.0 { (cb / da).min(1.0) } else { 0.0 };
        let mixed = blend_channel(mode, straight_b, straight_s);
        let co = (1.0 - da) * cs + (1.0 - sa) * cb + sa * da * mixed;
        out[i] = to_u8(co);
    }
    out[3] = to_u8(sa + da - sa * da);
    out
}

/// `B(base, blend)` on straight color values in `0..=1`.
pub fn blend_channel(mode: BlendMode, b: f32, s: f32) -> f32 {
    use BlendMode as M;
    let v = match mode {
        M::Normal => s,
        M::Lighten => b.max(s),
        M::Darken => b.min(s),
        M::Multiply => b * s,
        M::Average => (b + s) * 0.5,
        M::Add | M::LinearDodge => (b + s).min(1.0),
        M::Subtract | M::LinearBurn => (b + s - 1.0).max(0.0),
        M::Difference => (b - s).abs(),
        M::Negation => 1.0 - (1.0 - b - s).abs(),
        M::Exclusion => b + s - 2.0 * b * s,
        M::Screen => 1.0 - (1.0 - b) * (1.0 - s),
        M::Overlay => overlay(b, s),
        M::SoftLight => {
            if s < 0.5 {
                2.0 * b * s + b * b * (1.0 - 2.0 * s)
            } else {
                b.sqrt() * (2.0 * s - 1.0) + 2.0 * b * (1.0 - s)
            }
        }
        M::HardLight => overlay(s, b),
        M::ColorDodge => color_dodge(b, s),
        M::ColorBurn => color_burn(b, s),
        M::LinearLight => {
            if s < 0.5 {
                (b + 2.0 * s - 1.0).max(0.0)
            } else {
                (b + 2.0 * (s - 0.5)).min(1.0)
            }
        }
        M::VividLight => vivid_light(b, s),
        M::PinLight => {
            if s < 0.5 {
                b.min(2.0 * s)
            } else {
                b.max(2.0 * (s - 0.5))
            }
        }
        M::HardMix => {
            if vivid_light(b, s) < 0.5 {
                0.0
            } else {
                1.0
            }
        }
        M::Reflect => reflect(b, s),
        M::Glow => reflect(s, b),
        M::Phoenix => b.min(s) - b.max(s) + 1.0,
    };
    v.clamp(0.0, 1.0)
}

fn overlay(b: f32, s: f32) -> f32 {
    if b < 0.5 {
        2.0 * b * s
    } else {
        1.0 - 2.0 * (1.0 - b) * (1.0 - s)
    }
}

fn color_dodge(b: f32, s: f32) -> f32 {
    if s >= 1.0 { 1.0 } else { (b / (1.0 - s)).min(1.0) }
}

fn color_burn(b: f32, s: f32) -> f32 {
    if s <= 0.0 { 0.0 } else { (1.0 - (1.0 - b) / s).max(0.0) }
}

fn vivid_light(b: f32, s: f32) -> f32 {
    if s < 0.5 {
        color_burn(b, 2.0 * s)
    } else {
        color_dodge(b, 2.0 * (s - 0.5))
    }
}

fn reflect(b: f32, s: f32) -> f32 {
    if s >= 1.0 { 1.0 } else { (b * b / (1.0 - s)).min(1.0) }
}

/// Undo premultiplication in place.
pub fn straighten(px: PremulBgra8) -> PremulBgra8 {
    let a = px[3];
    if a == 0 || a == 255 {
        return px;
    }
    let a16 = u32::from(a);
    let un = |c: u8| ((u32::from(c) * 255 + a16 / 2) / a16).min(255) as u8;
    [un(px[0]), un(px[1]), un(px[2]), a]
}

pub(crate) fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub(crate) fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/backend/blend.rs"]
mod tests;
