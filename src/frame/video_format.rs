use std::sync::OnceLock;

use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::transform::FieldMode;

/// Known broadcast output formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    Pal,
    Ntsc,
    X576p2500,
    X720p2398,
    X720p2400,
    X720p2500,
    X720p2997,
    X720p3000,
    X720p5000,
    X720p5994,
    X720p6000,
    X1080p2398,
    X1080p2400,
    X1080i5000,
    X1080i5994,
    X1080i6000,
    X1080p2500,
    X1080p2997,
    X1080p3000,
    X1080p5000,
    X1080p5994,
    X1080p6000,
    X1556p2398,
    X1556p2400,
    X1556p2500,
    Dci1080p2398,
    Dci1080p2400,
    Dci1080p2500,
    X2160p2398,
    X2160p2400,
    X2160p2500,
    X2160p2997,
    X2160p3000,
    X2160p5000,
    X2160p5994,
    X2160p6000,
    Dci2160p2398,
    Dci2160p2400,
    Dci2160p2500,
    /// Caller-defined dimensions and cadence.
    Custom,
}

/// Geometry, scan mode and cadence of an output format.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFormatDesc {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    /// Display dimensions for non-square pixel formats.
    pub square_width: u32,
    pub square_height: u32,
    pub field_mode: FieldMode,
    pub time_scale: u32,
    pub duration: u32,
    /// Frames per second (`time_scale / duration`).
    pub fps: f64,
    pub field_count: u32,
    /// Bytes in one BGRA output frame.
    pub size: usize,
    pub name: String,
}

impl VideoFormatDesc {
    fn build(
        format: VideoFormat,
        (width, height): (u32, u32),
        (square_width, square_height): (u32, u32),
        field_mode: FieldMode,
        time_scale: u32,
        duration: u32,
        name: &str,
    ) -> Self {
        Self {
            format,
            width,
            height,
            square_width,
            square_height,
            field_mode,
            time_scale,
            duration,
            fps: f64::from(time_scale) / f64::from(duration),
            field_count: if field_mode == FieldMode::Progressive {
                1
            } else {
                2
            },
            size: (width as usize) * (height as usize) * 4,
            name: name.to_string(),
        }
    }

    /// A custom format with square pixels.
    pub fn custom(
        width: u32,
        height: u32,
        field_mode: FieldMode,
        time_scale: u32,
        duration: u32,
    ) -> MixerResult<Self> {
        if width == 0 || height == 0 {
            return Err(MixerError::validation("video format must have a non-zero size"));
        }
        if time_scale == 0 || duration == 0 {
            return Err(MixerError::validation(
                "video format time_scale and duration must be > 0",
            ));
        }
        if field_mode == FieldMode::Empty {
            return Err(MixerError::validation("video format field mode cannot be empty"));
        }
        let name = format!("{width}x{height}");
        Ok(Self::build(
            VideoFormat::Custom,
            (width, height),
            (width, height),
            field_mode,
            time_scale,
            duration,
            &name,
        ))
    }

    /// Look up a known format by name (case-insensitive), e.g. `"1080i5000"` or `"PAL"`.
    pub fn by_name(name: &str) -> Option<Self> {
        all_formats()
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn of(format: VideoFormat) -> Option<Self> {
        all_formats().iter().find(|f| f.format == format).cloned()
    }

    pub fn is_interlaced(&self) -> bool {
        self.field_mode != FieldMode::Progressive
    }
}

/// Every known format. Built once.
pub fn all_formats() -> &'static [VideoFormatDesc] {
    static TABLE: OnceLock<Vec<VideoFormatDesc>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use FieldMode::{Lower, Progressive as P, Upper};
        use VideoFormat as F;

        const SD: (u32, u32) = (720, 576);
        const HD720: (u32, u32) = (1280, 720);
        const HD: (u32, u32) = (1920, 1080);
        const X1556: (u32, u32) = (2048, 1556);
        const DCI1080: (u32, u32) = (2048, 1080);
        const UHD: (u32, u32) = (3840, 2160);
        const DCI2160: (u32, u32) = (4096, 2160);

        let b = VideoFormatDesc::build;
        vec![
            b(F::Pal, SD, (1024, 576), Upper, 25000, 1000, "PAL"),
            b(F::Ntsc, (720, 486), (720, 540), Lower, 30000, 1001, "NTSC"),
            b(F::X576p2500, SD, (1024, 576), P, 25000, 1000, "576p2500"),
            b(F::X720p2398, HD720, HD720, P, 24000, 1001, "720p2398"),
            b(F::X720p2400, HD720, HD720, P, 24000, 1000, "720p2400"),
            b(F::X720p2500, HD720, HD720, P, 25000, 1000, "720p2500"),
            b(F::X720p2997, HD720, HD720, P, 30000, 1001, "720p2997"),
            b(F::X720p3000, HD720, HD720, P, 30000, 1000, "720p3000"),
            b(F::X720p5000, HD720, HD720, P, 50000, 1000, "720p5000"),
            b(F::X720p5994, HD720, HD720, P, 60000, 1001, "720p5994"),
            b(F::X720p6000, HD720, HD720, P, 60000, 1000, "720p6000"),
            b(F::X1080p2398, HD, HD, P, 24000, 1001, "1080p2398"),
            b(F::X1080p2400, HD, HD, P, 24000, 1000, "1080p2400"),
            b(F::X1080i5000, HD, HD, Upper, 25000, 1000, "1080i5000"),
            b(F::X1080i5994, HD, HD, Upper, 30000, 1001, "1080i5994"),
            b(F::X1080i6000, HD, HD, Upper, 30000, 1000, "1080i6000"),
            b(F::X1080p2500, HD, HD, P, 25000, 1000, "1080p2500"),
            b(F::X1080p2997, HD, HD, P, 30000, 1001, "1080p2997"),
            b(F::X1080p3000, HD, HD, P, 30000, 1000, "1080p3000"),
            b(F::X1080p5000, HD, HD, P, 50000, 1000, "1080p5000"),
            b(F::X1080p5994, HD, HD, P, 60000, 1001, "1080p5994"),
            b(F::X1080p6000, HD, HD, P, 60000, 1000, "1080p6000"),
            b(F::X1556p2398, X1556, X1556, P, 24000, 1001, "1556p2398"),
            b(F::X1556p2400, X1556, X1556, P, 24000, 1000, "1556p2400"),
            b(F::X1556p2500, X1556, X1556, P, 25000, 1000, "1556p2500"),
            b(F::Dci1080p2398, DCI1080, DCI1080, P, 24000, 1001, "dci1080p2398"),
            b(F::Dci1080p2400, DCI1080, DCI1080, P, 24000, 1000, "dci1080p2400"),
            b(F::Dci1080p2500, DCI1080, DCI1080, P, 25000, 1000, "dci1080p2500"),
            b(F::X2160p2398, UHD, UHD, P, 24000, 1001, "2160p2398"),
            b(F::X2160p2400, UHD, UHD, P, 24000, 1000, "2160p2400"),
            b(F::X2160p2500, UHD, UHD, P, 25000, 1000, "2160p2500"),
            b(F::X2160p2997, UHD, UHD, P, 30000, 1001, "2160p2997"),
            b(F::X2160p3000, UHD, UHD, P, 30000, 1000, "2160p3000"),
            b(F::X2160p5000, UHD, UHD, P, 50000, 1000, "2160p5000"),
            b(F::X2160p5994, UHD, UHD, P, 60000, 1001, "2160p5994"),
            b(F::X2160p6000, UHD, UHD, P, 60000, 1000, "2160p6000"),
            b(F::Dci2160p2398, DCI2160, DCI2160, P, 24000, 1001, "dci2160p2398"),
            b(F::Dci2160p2400, DCI2160, DCI2160, P, 24000, 1000, "dci2160p2400"),
            b(F::Dci2160p2500, DCI2160, DCI2160, P, 25000, 1000, "dci2160p2500"),
        ]
    })
}

/// Largest output frame across all known formats, in bytes.
pub fn max_video_format_size() -> usize {
    static MAX: OnceLock<usize> = OnceLock::new();
    *MAX.get_or_init(|| all_formats().iter().map(|f| f.size).max().unwrap_or(0))
}
