use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use layermix::{
    AudioChannelLayout, BlendMode, ConstFrame, CpuBackend, CpuBackendOpts, Device, DeviceOpts,
    DrawFrame, FrameFactory, FrameTag, GpuBackend, ImageMixer, ImageTransform, MixerOpts,
    PixelFormat, PixelFormatDesc, PlaneDesc, Vec2, VideoFormatDesc,
};

#[derive(Parser, Debug)]
#[command(name = "layermix", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a synthetic key/fill and blend scene to PNG files.
    Render(RenderArgs),
    /// List the known video formats.
    Formats,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Video format name, e.g. `720p5000` or `PAL`.
    #[arg(long, default_value = "720p5000")]
    format: String,

    /// Number of ticks to render.
    #[arg(long, default_value_t = 10)]
    frames: u32,

    /// Output directory for `frame_NNNN.png`.
    #[arg(long)]
    out: PathBuf,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,

    /// Write straight instead of premultiplied alpha.
    #[arg(long)]
    straight: bool,

    /// Composite every layer with normal blending.
    #[arg(long)]
    no_blend_modes: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Cpu,
    Gpu,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Formats => {
            for f in layermix::all_formats() {
                println!(
                    "{:<12} {}x{} {:?} {:.3} fps",
                    f.name, f.width, f.height, f.field_mode, f.fps
                );
            }
            Ok(())
        }
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let format = VideoFormatDesc::by_name(&args.format)
        .with_context(|| format!("unknown video format '{}'", args.format))?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;

    let opts = MixerOpts::default().with_blend_modes(!args.no_blend_modes);
    match args.backend {
        BackendChoice::Cpu => {
            let backend = CpuBackend::new(CpuBackendOpts::default());
            let device = Device::new(backend, DeviceOpts::from_env())?;
            render_frames(device, opts, &format, &args)
        }
        BackendChoice::Gpu => render_gpu(opts, &format, &args),
    }
}

#[cfg(feature = "gpu")]
fn render_gpu(opts: MixerOpts, format: &VideoFormatDesc, args: &RenderArgs) -> anyhow::Result<()> {
    let backend = layermix::WgpuBackend::new(layermix::WgpuBackendOpts::default())?;
    let device = Device::new(backend, DeviceOpts::from_env())?;
    render_frames(device, opts, format, args)
}

#[cfg(not(feature = "gpu"))]
fn render_gpu(_: MixerOpts, _: &VideoFormatDesc, _: &RenderArgs) -> anyhow::Result<()> {
    anyhow::bail!("this build has no gpu backend; rebuild with `--features gpu`")
}

fn render_frames<B: GpuBackend>(
    device: Device<B>,
    opts: MixerOpts,
    format: &VideoFormatDesc,
    args: &RenderArgs,
) -> anyhow::Result<()> {
    eprintln!("device: {}", device.version());
    let mut mixer = ImageMixer::new(device, opts);
    let scene = Scene::new(&mixer, format)?;

    for i in 0..args.frames {
        let progress = if args.frames > 1 {
            f64::from(i) / f64::from(args.frames - 1)
        } else {
            1.0
        };
        scene.draw(progress)?.accept(&mut mixer)?;
        let frame = pollster::block_on(mixer.render(format, args.straight)?)?;

        let path = args.out.join(format!("frame_{i:04}.png"));
        write_png(&path, format.width, format.height, &frame)?;
        eprintln!("wrote {}", path.display());
    }

    let stats = mixer.device().stats();
    eprintln!(
        "textures allocated={} reused={}, uploads={} cache hits={}",
        stats.textures_allocated, stats.textures_reused, stats.uploads, stats.upload_cache_hits
    );
    Ok(())
}

/// Frames shared by every tick.
struct Scene {
    width: u32,
    height: u32,
    /// Pooled, so every tick after the first reuses its upload.
    background: ConstFrame,
    fill: ConstFrame,
    badge: ConstFrame,
}

impl Scene {
    fn new<B: GpuBackend>(mixer: &ImageMixer<B>, format: &VideoFormatDesc) -> anyhow::Result<Self> {
        let (w, h) = (format.width, format.height);

        let desc = PixelFormatDesc::ycbcr(w, h, 2, 2, false);
        let mut bg = mixer.create_frame(FrameTag(1), desc, AudioChannelLayout::stereo())?;
        for (plane, value) in [(0, 40u8), (1, 150), (2, 120)] {
            if let Some(data) = bg.image_data_mut(plane) {
                data.fill(value);
            }
        }
        let background = bg.freeze();

        let fill = solid(FrameTag(2), w, h, [0, 140, 255, 255])?;
        let badge = solid(FrameTag(3), 64, 64, [60, 200, 60, 255])?;
        Ok(Self {
            width: w,
            height: h,
            background,
            fill,
            badge,
        })
    }

    /// A left-to-right wipe of the orange fill over the background, plus a screen-blended
    /// badge sliding across the top.
    fn draw(&self, progress: f64) -> anyhow::Result<DrawFrame> {
        let edge = (f64::from(self.width) * progress).round() as u32;
        let key_bytes: Vec<u8> = (0..self.height)
            .flat_map(|_| (0..self.width).map(move |x| if x < edge { 255 } else { 0 }))
            .collect();
        let key = ConstFrame::from_planes(
            FrameTag(4),
            PixelFormatDesc::new(PixelFormat::Luma)
                .with_plane(PlaneDesc::new(self.width, self.height, 1)),
            vec![key_bytes.into()],
        )?;

        let wipe = DrawFrame::mask(DrawFrame::new(self.fill.clone()), DrawFrame::new(key));
        let badge = DrawFrame::new(self.badge.clone()).with_transform(
            ImageTransform::layer(BlendMode::Screen)
                .with_fill(Vec2::new(0.8 * progress, 0.05), Vec2::new(0.2, 0.2)),
        );

        let base = DrawFrame::group(vec![DrawFrame::new(self.background.clone()), wipe])
            .with_transform(ImageTransform::layer(BlendMode::Normal));
        Ok(DrawFrame::group(vec![base, badge]))
    }
}

fn solid(tag: FrameTag, w: u32, h: u32, bgra: [u8; 4]) -> anyhow::Result<ConstFrame> {
    let bytes: Vec<u8> = bgra.iter().copied().cycle().take((w * h * 4) as usize).collect();
    Ok(ConstFrame::from_planes(
        tag,
        PixelFormatDesc::bgra(w, h),
        vec![bytes.into()],
    )?)
}

fn write_png(path: &Path, width: u32, height: u32, bgra: &[u8]) -> anyhow::Result<()> {
    let rgba: Vec<u8> = bgra
        .chunks_exact(4)
        .flat_map(|px| [px[2], px[1], px[0], px[3]])
        .collect();
    let img = image::RgbaImage::from_raw(width, height, rgba)
        .context("frame bytes do not match the format size")?;
    img.save(path)
        .with_context(|| format!("write png '{}'", path.display()))?;
    Ok(())
}
