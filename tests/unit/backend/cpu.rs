use super::*;

use crate::backend::TextureRef;
use crate::foundation::core::Vec2;
use crate::frame::geometry::FrameGeometry;
use crate::frame::pixel::{PixelFormatDesc, PlaneDesc};
use crate::frame::transform::{BlendMode, FieldMode, ImageTransform};

fn backend() -> CpuBackend {
    CpuBackend::default()
}

fn texture(b: &CpuBackend, w: u32, h: u32, stride: u32, fill: &[u8]) -> CpuTexture {
    let t = b.create_texture(w, h, stride, false).unwrap();
    let data: Vec<u8> = fill.iter().copied().cycle().take((w * h * stride) as usize).collect();
    b.upload(&t, &data).unwrap();
    t
}

fn tref(t: &CpuTexture, tag: u64) -> TextureRef<'_, CpuTexture> {
    TextureRef {
        raw: t,
        tag,
        width: t.width(),
        height: t.height(),
        stride: t.stride(),
    }
}

struct Draw<'a> {
    target: &'a CpuTexture,
    sources: Vec<&'a CpuTexture>,
    desc: PixelFormatDesc,
    transform: ImageTransform,
    geometry: FrameGeometry,
    blend_mode: BlendMode,
    keyer: Keyer,
    local_key: Option<&'a CpuTexture>,
    layer_key: Option<&'a CpuTexture>,
}

impl<'a> Draw<'a> {
    fn bgra(target: &'a CpuTexture, source: &'a CpuTexture) -> Self {
        Self {
            target,
            sources: vec![source],
            desc: PixelFormatDesc::bgra(source.width(), source.height()),
            transform: ImageTransform::identity(),
            geometry: FrameGeometry::default(),
            blend_mode: BlendMode::Normal,
            keyer: Keyer::Linear,
            local_key: None,
            layer_key: None,
        }
    }

    fn run(&self, b: &CpuBackend) -> MixerResult<()> {
        let params = KernelParams {
            target: tref(self.target, 0),
            textures: self.sources.iter().enumerate().map(|(i, t)| tref(t, i as u64 + 1)).collect(),
            pix_desc: &self.desc,
            transform: self.transform,
            geometry: &self.geometry,
            blend_mode: self.blend_mode,
            keyer: self.keyer,
            local_key: self.local_key.map(|k| tref(k, 100)),
            layer_key: self.layer_key.map(|k| tref(k, 101)),
        };
        b.draw(&params)
    }
}

fn px(t: &CpuTexture, x: u32, y: u32) -> Vec<u8> {
    let s = t.stride() as usize;
    let i = (y * t.width() + x) as usize * s;
    t.snapshot()[i..i + s].to_vec()
}

#[test]
fn opaque_full_canvas_copies_source() {
    let b = backend();
    let target = b.create_texture(4, 4, 4, false).unwrap();
    let src = texture(&b, 4, 4, 4, &[10, 20, 30, 255]);
    Draw::bgra(&target, &src).run(&b).unwrap();
    assert_eq!(target.snapshot(), src.snapshot());
}

#[test]
fn rgba_is_swizzled_to_bgra() {
    let b = backend();
    let target = b.create_texture(2, 2, 4, false).unwrap();
    let src = texture(&b, 2, 2, 4, &[10, 20, 30, 255]);
    let mut d = Draw::bgra(&target, &src);
    d.desc.format = PixelFormat::Rgba;
    d.run(&b).unwrap();
    assert_eq!(px(&target, 1, 1), vec![30, 20, 10, 255]);
}

#[test]
fn upper_field_touches_even_rows_only() {
    let b = backend();
    let target = b.create_texture(2, 4, 4, false).unwrap();
    let src = texture(&b, 2, 4, 4, &[255, 255, 255, 255]);
    let mut d = Draw::bgra(&target, &src);
    d.transform = d.transform.with_field_mode(FieldMode::Upper);
    d.run(&b).unwrap();
    for y in 0..4 {
        let expect = if y % 2 == 0 { 255 } else { 0 };
        assert_eq!(px(&target, 0, y)[3], expect, "row {y}");
    }
}

#[test]
fn fill_places_source_in_a_quadrant() {
    let b = backend();
    let target = b.create_texture(4, 4, 4, false).unwrap();
    let src = texture(&b, 1, 1, 4, &[0, 0, 255, 255]);
    let mut d = Draw::bgra(&target, &src);
    d.transform = d
        .transform
        .with_fill(Vec2::new(0.5, 0.5), Vec2::new(0.5, 0.5));
    d.run(&b).unwrap();
    assert_eq!(px(&target, 0, 0), vec![0, 0, 0, 0]);
    assert_eq!(px(&target, 1, 1), vec![0, 0, 0, 0]);
    assert_eq!(px(&target, 2, 2), vec![0, 0, 255, 255]);
    assert_eq!(px(&target, 3, 3), vec![0, 0, 255, 255]);
}

#[test]
fn clip_limits_the_visible_window() {
    let b = backend();
    let target = b.create_texture(4, 1, 4, false).unwrap();
    let src = texture(&b, 4, 1, 4, &[1, 2, 3, 255]);
    let mut d = Draw::bgra(&target, &src);
    d.transform = d.transform.with_clip(Vec2::ZERO, Vec2::new(0.5, 1.0));
    d.run(&b).unwrap();
    assert_eq!(px(&target, 1, 0)[3], 255);
    assert_eq!(px(&target, 2, 0)[3], 0);
}

#[test]
fn opacity_scales_premultiplied_source() {
    let b = backend();
    let target = b.create_texture(1, 1, 4, false).unwrap();
    let src = texture(&b, 1, 1, 4, &[200, 100, 0, 255]);
    let mut d = Draw::bgra(&target, &src);
    d.transform = d.transform.with_opacity(0.5);
    d.run(&b).unwrap();
    assert_eq!(px(&target, 0, 0), vec![100, 50, 0, 128]);
}

#[test]
fn zero_keys_block_the_draw() {
    let b = backend();
    let target = b.create_texture(2, 1, 4, false).unwrap();
    let src = texture(&b, 2, 1, 4, &[9, 9, 9, 255]);
    let key = b.create_texture(2, 1, 1, false).unwrap();
    b.upload(&key, &[255, 0]).unwrap();
    let mut d = Draw::bgra(&target, &src);
    d.local_key = Some(&key);
    d.run(&b).unwrap();
    assert_eq!(px(&target, 0, 0), vec![9, 9, 9, 255]);
    assert_eq!(px(&target, 1, 0), vec![0, 0, 0, 0]);

    let layer_key = b.create_texture(2, 1, 1, false).unwrap();
    let target2 = b.create_texture(2, 1, 4, false).unwrap();
    let mut d = Draw::bgra(&target2, &src);
    d.layer_key = Some(&layer_key);
    d.run(&b).unwrap();
    assert!(target2.snapshot().iter().all(|&v| v == 0));
}

#[test]
fn single_channel_target_accumulates_alpha() {
    let b = backend();
    let key = b.create_texture(1, 1, 1, false).unwrap();
    let src = texture(&b, 1, 1, 4, &[0, 0, 0, 128]);
    let d = Draw::bgra(&key, &src);
    d.run(&b).unwrap();
    assert_eq!(key.snapshot(), vec![128]);
    d.run(&b).unwrap();
    assert_eq!(key.snapshot(), vec![192]);
}

#[test]
fn additive_keyer_saturates() {
    let b = backend();
    let mix = texture(&b, 1, 1, 4, &[200, 0, 0, 200]);
    let src = texture(&b, 1, 1, 4, &[100, 10, 0, 100]);
    let mut d = Draw::bgra(&mix, &src);
    d.keyer = Keyer::Additive;
    d.run(&b).unwrap();
    assert_eq!(mix.snapshot(), vec![255, 10, 0, 255]);
}

#[test]
fn blend_mode_applies_against_target() {
    let b = backend();
    let target = texture(&b, 1, 1, 4, &[255, 128, 0, 255]);
    let src = texture(&b, 1, 1, 4, &[128, 128, 128, 255]);
    let mut d = Draw::bgra(&target, &src);
    d.blend_mode = BlendMode::Multiply;
    d.run(&b).unwrap();
    assert_eq!(target.snapshot(), vec![128, 64, 0, 255]);
}

#[test]
fn neutral_ycbcr_is_gray() {
    let b = backend();
    let target = b.create_texture(2, 2, 4, false).unwrap();
    let y = texture(&b, 2, 2, 1, &[128]);
    let cb = texture(&b, 1, 2, 1, &[128]);
    let cr = texture(&b, 1, 2, 1, &[128]);
    let mut d = Draw::bgra(&target, &y);
    d.sources = vec![&y, &cb, &cr];
    d.desc = PixelFormatDesc::ycbcr(2, 2, 2, 1, false);
    d.run(&b).unwrap();
    let p = px(&target, 1, 1);
    assert_eq!(p[3], 255);
    for c in &p[..3] {
        assert!((*c as i32 - 128).abs() <= 1, "{p:?}");
    }
}

#[test]
fn gray_plane_is_opaque() {
    let b = backend();
    let target = b.create_texture(1, 1, 4, false).unwrap();
    let src = texture(&b, 1, 1, 1, &[77]);
    let mut d = Draw::bgra(&target, &src);
    d.desc = PixelFormatDesc::new(PixelFormat::Gray).with_plane(PlaneDesc::new(1, 1, 1));
    d.run(&b).unwrap();
    assert_eq!(target.snapshot(), vec![77, 77, 77, 255]);
}

#[test]
fn narrow_texture_for_packed_format_is_rejected() {
    let b = backend();
    let target = b.create_texture(1, 1, 4, false).unwrap();
    let src = texture(&b, 1, 1, 1, &[1]);
    let err = Draw::bgra(&target, &src).run(&b).unwrap_err();
    assert!(matches!(err, MixerError::Validation(_)));
}

#[test]
fn missing_planes_are_rejected() {
    let b = backend();
    let target = b.create_texture(2, 2, 4, false).unwrap();
    let y = texture(&b, 2, 2, 1, &[1]);
    let mut d = Draw::bgra(&target, &y);
    d.desc = PixelFormatDesc::ycbcr(2, 2, 1, 1, false);
    assert!(d.run(&b).is_err());
}

#[test]
fn straighten_post_process() {
    let b = backend();
    let target = texture(&b, 1, 1, 4, &[64, 32, 0, 128]);
    b.post_process(&target, false).unwrap();
    assert_eq!(target.snapshot(), vec![64, 32, 0, 128]);
    b.post_process(&target, true).unwrap();
    assert_eq!(target.snapshot(), vec![128, 64, 0, 128]);
}

#[test]
fn readback_copies_contents() {
    let b = backend();
    let t = texture(&b, 2, 1, 4, &[1, 2, 3, 4]);
    let pending = b.begin_readback(&t).unwrap();
    b.clear_texture(&t).unwrap();
    let mut out = vec![0u8; 8];
    b.finish_readback(pending, &mut out).unwrap();
    assert_eq!(out, vec![1, 2, 3, 4, 1, 2, 3, 4]);
    assert!(b.finish_readback(vec![0; 3], &mut out).is_err());
}

#[test]
fn upload_size_mismatch_is_rejected() {
    let b = backend();
    let t = b.create_texture(2, 2, 4, false).unwrap();
    assert!(b.upload(&t, &[0; 15]).is_err());
}
