use super::*;
use crate::backend::recording::{Call, Recorder, RecordingBackend};
use crate::device::DeviceOpts;
use crate::frame::data::{ConstFrame, FrameTag, ImageData};
use crate::frame::pixel::{PixelFormat, PlaneDesc};
use crate::frame::draw::FrameVisitor;
use crate::mixer::{ImageMixer, MixerOpts};

fn mixer(opts: MixerOpts) -> (ImageMixer<RecordingBackend>, Recorder) {
    let (backend, recorder) = RecordingBackend::new();
    let device = Device::new(backend, DeviceOpts::default()).unwrap();
    (ImageMixer::new(device, opts), recorder)
}

fn progressive() -> VideoFormatDesc {
    VideoFormatDesc::custom(4, 4, FieldMode::Progressive, 25, 1).unwrap()
}

fn interlaced() -> VideoFormatDesc {
    VideoFormatDesc::custom(4, 4, FieldMode::Upper, 25, 1).unwrap()
}

fn solid(px: [u8; 4]) -> ConstFrame {
    let bytes: Vec<u8> = px.iter().copied().cycle().take(4 * 4 * 4).collect();
    ConstFrame::from_planes(FrameTag(1), PixelFormatDesc::bgra(4, 4), vec![bytes.into()]).unwrap()
}

fn visit_with(m: &mut ImageMixer<RecordingBackend>, transform: ImageTransform, frame: &ConstFrame) {
    m.push(&transform.into());
    m.visit(frame).unwrap();
    m.pop().unwrap();
}

fn open_layer(m: &mut ImageMixer<RecordingBackend>, blend_mode: BlendMode) {
    m.push(&ImageTransform::layer(blend_mode).into());
}

fn render(m: &mut ImageMixer<RecordingBackend>, format: &VideoFormatDesc, straighten: bool) -> FrameBytes {
    pollster::block_on(m.render(format, straighten).unwrap()).unwrap()
}

fn key() -> ImageTransform {
    ImageTransform::identity().keyed()
}

fn mix() -> ImageTransform {
    ImageTransform::identity().mixed()
}

fn plain() -> ImageTransform {
    ImageTransform::identity()
}

#[test]
fn empty_tick_resolves_without_touching_the_context() {
    let (mut m, rec) = mixer(MixerOpts::default());
    let format = progressive();
    let frame = m
        .render(&format, true)
        .unwrap()
        .now_or_never()
        .expect("empty tick must be ready")
        .unwrap();
    assert_eq!(frame.len(), format.size);
    assert!(frame.is_shared_zero());
    assert!(rec.calls().is_empty());
}

#[test]
fn key_mix_fill_sequence() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, key(), &solid([0, 0, 0, 255]));
    visit_with(&mut m, mix(), &solid([255, 0, 0, 255]));
    visit_with(&mut m, plain(), &solid([0, 255, 0, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 4, "{draws:#?}");
    let (k, mx, flush, fill) = (&draws[0], &draws[1], &draws[2], &draws[3]);

    assert_eq!(k.target_stride, 1);
    assert_eq!(k.keyer, Keyer::Linear);
    assert_eq!((k.local_key, k.layer_key), (None, None));

    assert_eq!(mx.target_stride, 4);
    assert_eq!(mx.keyer, Keyer::Additive);
    assert_eq!(mx.local_key, Some(k.target));
    assert_eq!(mx.layer_key, None);

    assert_eq!(flush.sources, vec![mx.target]);
    assert_eq!(flush.blend_mode, BlendMode::Normal);
    assert_eq!(flush.target, fill.target);
    assert_ne!(fill.target, mx.target);

    assert_eq!(fill.keyer, Keyer::Linear);
    assert_eq!((fill.local_key, fill.layer_key), (None, None));
    assert!(draws.iter().all(|d| d.blend_mode == BlendMode::Normal));
}

#[test]
fn pending_key_gates_the_next_fill() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, key(), &solid([0, 0, 0, 255]));
    visit_with(&mut m, plain(), &solid([0, 255, 0, 255]));
    visit_with(&mut m, plain(), &solid([0, 0, 255, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 3);
    assert_eq!(draws[1].local_key, Some(draws[0].target));
    assert_eq!(draws[2].local_key, None);
}

#[test]
fn unconsumed_key_carries_to_the_next_sibling_layer() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, key(), &solid([0, 0, 0, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 255, 0, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 0, 255, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 3);
    assert_eq!(draws[1].layer_key, Some(draws[0].target));
    assert_eq!(draws[1].local_key, None);
    assert_eq!(draws[2].layer_key, None);
}

#[test]
fn key_chain_passes_through_three_sibling_layers() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, key(), &solid([0, 0, 0, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 255, 0, 255]));
    visit_with(&mut m, key(), &solid([0, 0, 0, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 0, 255, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 4, "{draws:#?}");
    let (first_key, gated, second_key, last) = (&draws[0], &draws[1], &draws[2], &draws[3]);
    assert_eq!(first_key.target_stride, 1);
    assert_eq!(gated.layer_key, Some(first_key.target));
    assert_eq!(gated.local_key, None);

    assert_eq!(second_key.target_stride, 1);
    assert_ne!(second_key.target, first_key.target);
    assert_eq!((second_key.local_key, second_key.layer_key), (None, None));

    assert_eq!(last.target, gated.target);
    assert_eq!(last.layer_key, Some(second_key.target));
    assert_eq!(last.local_key, None);
}

#[test]
fn local_key_follows_the_item_mipmap_flag() {
    let (mut m, _rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, key().with_mipmap(true), &solid([0, 0, 0, 255]));
    visit_with(&mut m, plain(), &solid([0, 255, 0, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let info = m.device().info();
    let keys: Vec<_> = info["textures"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|t| t["stride"] == 1)
        .collect();
    assert_eq!(keys.len(), 1, "{info:#}");
    assert_eq!(keys[0]["mipmapping"], true);
}

#[test]
fn each_field_pass_draws_only_matching_items() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain().with_field_mode(FieldMode::Upper), &solid([1, 1, 1, 255]));
    visit_with(&mut m, plain().with_field_mode(FieldMode::Lower), &solid([2, 2, 2, 255]));
    visit_with(&mut m, plain(), &solid([3, 3, 3, 255]));
    m.pop().unwrap();
    render(&mut m, &interlaced(), false);

    let draws = rec.draws();
    let fields: Vec<FieldMode> = draws.iter().map(|d| d.field_mode).collect();
    assert_eq!(fields, vec![
        FieldMode::Upper,
        FieldMode::Upper,
        FieldMode::Lower,
        FieldMode::Lower
    ]);
    assert_eq!(draws[1].sources, draws[3].sources);
    assert_ne!(draws[0].sources, draws[2].sources);
}

#[test]
fn progressive_format_renders_once() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([3, 3, 3, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].field_mode, FieldMode::Progressive);
}

#[test]
fn fully_pruned_layer_leaves_the_carried_key() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, key(), &solid([0, 0, 0, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain().with_field_mode(FieldMode::Upper), &solid([1, 1, 1, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([2, 2, 2, 255]));
    m.pop().unwrap();
    render(&mut m, &interlaced(), false);

    let draws = rec.draws();
    // upper: key, upper-only fill (keyed), fill; lower: key, fill (keyed)
    assert_eq!(draws.len(), 5, "{draws:#?}");
    assert_eq!(draws[1].layer_key, Some(draws[0].target));
    assert_eq!(draws[2].layer_key, None);
    assert_eq!(draws[3].target_stride, 1);
    assert_eq!(draws[4].field_mode, FieldMode::Lower);
    assert_eq!(draws[4].layer_key, Some(draws[3].target));
}

#[test]
fn blended_layer_is_isolated_then_composited() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Screen);
    visit_with(&mut m, plain(), &solid([0, 0, 128, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 2);
    let (item, composite) = (&draws[0], &draws[1]);
    assert_eq!(item.blend_mode, BlendMode::Normal);
    assert_eq!(composite.sources, vec![item.target]);
    assert_ne!(composite.target, item.target);
    assert_eq!(composite.blend_mode, BlendMode::Screen);
    assert_eq!(composite.format, PixelFormat::Bgra);
}

#[test]
fn blended_layer_between_normal_siblings() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([1, 1, 1, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Multiply);
    visit_with(&mut m, plain(), &solid([2, 2, 2, 255]));
    visit_with(&mut m, plain(), &solid([3, 3, 3, 255]));
    m.pop().unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([4, 4, 4, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 5, "{draws:#?}");
    let (before, a, b, composite, after) = (&draws[0], &draws[1], &draws[2], &draws[3], &draws[4]);
    let shared = before.target;
    assert_eq!(after.target, shared);
    assert_eq!(composite.target, shared);

    assert_eq!(a.target, b.target);
    assert_ne!(a.target, shared);
    assert!([a, b].iter().all(|d| d.blend_mode == BlendMode::Normal));
    assert_eq!(composite.sources, vec![a.target]);
    assert_eq!(composite.blend_mode, BlendMode::Multiply);
    assert_eq!(after.blend_mode, BlendMode::Normal);
}

#[test]
fn disabled_blend_modes_still_isolate() {
    let (mut m, rec) = mixer(MixerOpts::default().with_blend_modes(false));
    open_layer(&mut m, BlendMode::Multiply);
    visit_with(&mut m, plain(), &solid([0, 0, 128, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[1].sources, vec![draws[0].target]);
    assert_eq!(draws[1].blend_mode, BlendMode::Normal);
}

#[test]
fn leftover_mix_lands_in_the_isolated_buffer() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Overlay);
    visit_with(&mut m, mix(), &solid([10, 10, 10, 255]));
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let draws = rec.draws();
    assert_eq!(draws.len(), 3);
    let (mx, flush, composite) = (&draws[0], &draws[1], &draws[2]);
    assert_eq!(mx.keyer, Keyer::Additive);
    assert_eq!(flush.sources, vec![mx.target]);
    assert_eq!(composite.sources, vec![flush.target]);
    assert_eq!(composite.blend_mode, BlendMode::Overlay);
}

#[test]
fn sublayers_draw_before_their_parent_items() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([1, 1, 1, 255]));
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([2, 2, 2, 255]));
    m.pop().unwrap();
    m.pop().unwrap();
    render(&mut m, &progressive(), false);

    let calls = rec.calls();
    let draws = rec.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].target, draws[1].target);
    // the nested item was visited second but is drawn first
    assert!(draws[0].sources[0] > draws[1].sources[0]);
    assert_eq!(calls.last(), Some(&Call::PostProcess { straighten: false }));
}

#[test]
fn straighten_request_reaches_the_post_pass() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 0, 128, 128]));
    m.pop().unwrap();
    render(&mut m, &progressive(), true);
    assert_eq!(
        rec.calls().last(),
        Some(&Call::PostProcess { straighten: true })
    );

    let (mut m, rec) = mixer(MixerOpts::default().with_straight_alpha(false));
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 0, 128, 128]));
    m.pop().unwrap();
    render(&mut m, &progressive(), true);
    assert_eq!(
        rec.calls().last(),
        Some(&Call::PostProcess { straighten: false })
    );
}

#[test]
fn tree_is_consumed_by_render() {
    let (mut m, rec) = mixer(MixerOpts::default());
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &solid([0, 0, 128, 255]));
    m.pop().unwrap();
    let first = render(&mut m, &progressive(), false);
    assert_eq!(first.len(), progressive().size);
    rec.clear();

    let second = render(&mut m, &progressive(), false);
    assert!(second.is_shared_zero());
    assert!(rec.calls().is_empty());
}

#[test]
fn upload_error_fails_the_tick() {
    let (mut m, rec) = mixer(MixerOpts::default());
    let oversized = ConstFrame::from_planes(
        FrameTag(9),
        PixelFormatDesc::new(PixelFormat::Bgra)
            .with_plane(PlaneDesc::new(4, 4, 5)),
        vec![ImageData::from(vec![0u8; 80])],
    )
    .unwrap();
    open_layer(&mut m, BlendMode::Normal);
    visit_with(&mut m, plain(), &oversized);
    m.pop().unwrap();
    let err = pollster::block_on(m.render(&progressive(), false).unwrap()).unwrap_err();
    assert!(matches!(err, MixerError::Validation(_)), "{err}");
    assert!(rec.draws().is_empty());
}
