use smallvec::SmallVec;

/// Pixel layout of a producer frame.
///
/// Packed formats carry one plane; planar YCbCr carries three (four with alpha).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Single channel, treated as opaque gray.
    Gray,
    Bgra,
    Rgba,
    Argb,
    Abgr,
    /// Planar Y, Cb, Cr.
    Ycbcr,
    /// Planar Y, Cb, Cr, A.
    Ycbcra,
    /// Single channel whose value is used as both gray level and alpha.
    Luma,
    Bgr,
    Rgb,
    #[default]
    Invalid,
}

impl PixelFormat {
    /// Number of planes a well-formed description of this format carries.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Gray | Self::Luma => 1,
            Self::Bgra | Self::Rgba | Self::Argb | Self::Abgr | Self::Bgr | Self::Rgb => 1,
            Self::Ycbcr => 3,
            Self::Ycbcra => 4,
            Self::Invalid => 0,
        }
    }
}

/// One plane of a frame: dimensions plus byte layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlaneDesc {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel (1..=4).
    pub stride: u32,
    /// Bytes per row.
    pub linesize: u32,
    /// Total bytes.
    pub size: usize,
}

impl PlaneDesc {
    pub fn new(width: u32, height: u32, stride: u32) -> Self {
        let linesize = width.saturating_mul(stride);
        Self {
            width,
            height,
            stride,
            linesize,
            size: (linesize as usize).saturating_mul(height as usize),
        }
    }
}

/// Ordered planes plus the format tag that says how to read them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelFormatDesc {
    pub format: PixelFormat,
    pub planes: SmallVec<[PlaneDesc; 4]>,
}

impl PixelFormatDesc {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            planes: SmallVec::new(),
        }
    }

    pub fn with_plane(mut self, plane: PlaneDesc) -> Self {
        self.planes.push(plane);
        self
    }

    /// Single packed BGRA plane, the layout of every intermediate and output image.
    pub fn bgra(width: u32, height: u32) -> Self {
        Self::new(PixelFormat::Bgra).with_plane(PlaneDesc::new(width, height, 4))
    }

    /// Planar YCbCr with chroma subsampled by `(cx, cy)`.
    pub fn ycbcr(width: u32, height: u32, cx: u32, cy: u32, alpha: bool) -> Self {
        let cw = width.div_ceil(cx.max(1));
        let ch = height.div_ceil(cy.max(1));
        let format = if alpha {
            PixelFormat::Ycbcra
        } else {
            PixelFormat::Ycbcr
        };
        let mut desc = Self::new(format)
            .with_plane(PlaneDesc::new(width, height, 1))
            .with_plane(PlaneDesc::new(cw, ch, 1))
            .with_plane(PlaneDesc::new(cw, ch, 1));
        if alpha {
            desc = desc.with_plane(PlaneDesc::new(width, height, 1));
        }
        desc
    }

    /// Whether this description may contribute to a mix at all.
    ///
    /// Descriptions with the invalid tag or without planes are dropped before they reach the tree.
    pub fn is_drawable(&self) -> bool {
        self.format != PixelFormat::Invalid && !self.planes.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.planes.iter().map(|p| p.size).sum()
    }
}
