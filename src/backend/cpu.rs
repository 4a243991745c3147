//! Software reference kernel. Always available; everything the hardware backend does is defined
//! here first.

use parking_lot::RwLock;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::backend::blend::{self, PremulBgra8};
use crate::backend::{GpuBackend, KernelParams, Keyer};
use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::pixel::PixelFormat;

/// Options for the software backend.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackendOpts {
    pub max_texture_size: u32,
}

impl Default for CpuBackendOpts {
    fn default() -> Self {
        Self {
            max_texture_size: 16384,
        }
    }
}

impl CpuBackendOpts {
    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }
}

/// Texture storage: tightly packed rows of `width * stride` bytes.
#[derive(Debug)]
pub struct CpuTexture {
    width: u32,
    height: u32,
    stride: u32,
    pixels: RwLock<Vec<u8>>,
}

impl CpuTexture {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.pixels.read().clone()
    }

    fn len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.stride as usize)
    }
}

#[derive(Debug, Default)]
pub struct CpuBackend {
    opts: CpuBackendOpts,
}

impl CpuBackend {
    pub fn new(opts: CpuBackendOpts) -> Self {
        Self { opts }
    }
}

impl GpuBackend for CpuBackend {
    type Texture = CpuTexture;
    type Readback = Vec<u8>;

    fn describe(&self) -> MixerResult<String> {
        Ok(format!(
            "cpu reference kernel ({} threads)",
            rayon::current_num_threads()
        ))
    }

    fn max_texture_size(&self) -> u32 {
        self.opts.max_texture_size
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        _mipmapped: bool,
    ) -> MixerResult<CpuTexture> {
        let mut texture = CpuTexture {
            width,
            height,
            stride,
            pixels: RwLock::new(Vec::new()),
        };
        let len = texture.len();
        *texture.pixels.get_mut() = vec![0; len];
        Ok(texture)
    }

    fn clear_texture(&self, texture: &CpuTexture) -> MixerResult<()> {
        texture.pixels.write().fill(0);
        Ok(())
    }

    fn upload(&self, texture: &CpuTexture, data: &[u8]) -> MixerResult<()> {
        let mut pixels = texture.pixels.write();
        if data.len() != pixels.len() {
            return Err(MixerError::validation(format!(
                "upload of {} bytes into a {} byte texture",
                data.len(),
                pixels.len()
            )));
        }
        pixels.copy_from_slice(data);
        Ok(())
    }

    fn begin_readback(&self, texture: &CpuTexture) -> MixerResult<Vec<u8>> {
        Ok(texture.snapshot())
    }

    fn finish_readback(&self, pending: Vec<u8>, out: &mut [u8]) -> MixerResult<()> {
        if pending.len() != out.len() {
            return Err(MixerError::validation(format!(
                "readback of {} bytes into a {} byte buffer",
                pending.len(),
                out.len()
            )));
        }
        out.copy_from_slice(&pending);
        Ok(())
    }

    fn draw(&self, params: &KernelParams<'_, CpuTexture>) -> MixerResult<()> {
        draw(params)
    }

    fn post_process(&self, target: &CpuTexture, straighten: bool) -> MixerResult<()> {
        if !straighten || target.stride != 4 {
            return Ok(());
        }
        target.pixels.write().as_mut_slice().par_chunks_mut(4).for_each(|px| {
            let out = blend::straighten([px[0], px[1], px[2], px[3]]);
            px.copy_from_slice(&out);
        });
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Plane<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: u32,
}

impl Plane<'_> {
    fn texel(&self, u: f64, v: f64) -> &[u8] {
        let x = ((u * f64::from(self.width)).floor() as i64).clamp(0, i64::from(self.width) - 1);
        let y = ((v * f64::from(self.height)).floor() as i64).clamp(0, i64::from(self.height) - 1);
        let stride = self.stride as usize;
        let i = (y as usize * self.width as usize + x as usize) * stride;
        &self.data[i..i + stride]
    }

    /// Value of the last channel at a target pixel. Keys are target-sized.
    fn key_at(&self, x: usize, y: usize) -> u8 {
        let stride = self.stride as usize;
        self.data[(y * self.width as usize + x) * stride + stride - 1]
    }
}

/// Canvas to texture mapping of one quad, corner 0 to corner 2.
struct QuadMap {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    u0: f64,
    u1: f64,
    v0: f64,
    v1: f64,
}

impl QuadMap {
    fn texcoord(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        let tx = (px - self.x0) / (self.x1 - self.x0);
        let ty = (py - self.y0) / (self.y1 - self.y0);
        if !(0.0..1.0).contains(&tx) || !(0.0..1.0).contains(&ty) {
            return None;
        }
        Some((
            self.u0 + tx * (self.u1 - self.u0),
            self.v0 + ty * (self.v1 - self.v0),
        ))
    }
}

fn sample(format: PixelFormat, planes: &[Plane<'_>], u: f64, v: f64) -> PremulBgra8 {
    let t = planes[0].texel(u, v);
    match format {
        PixelFormat::Bgra => [t[0], t[1], t[2], t[3]],
        PixelFormat::Rgba => [t[2], t[1], t[0], t[3]],
        PixelFormat::Argb => [t[3], t[2], t[1], t[0]],
        PixelFormat::Abgr => [t[1], t[2], t[3], t[0]],
        PixelFormat::Bgr => [t[0], t[1], t[2], 255],
        PixelFormat::Rgb => [t[2], t[1], t[0], 255],
        PixelFormat::Gray => [t[0], t[0], t[0], 255],
        PixelFormat::Luma => [t[0], t[0], t[0], t[0]],
        PixelFormat::Ycbcr | PixelFormat::Ycbcra => {
            let y = f32::from(t[0]) / 255.0;
            let cb = f32::from(planes[1].texel(u, v)[0]) / 255.0 - 0.5;
            let cr = f32::from(planes[2].texel(u, v)[0]) / 255.0 - 0.5;
            let a = if format == PixelFormat::Ycbcra {
                planes[3].texel(u, v)[0]
            } else {
                255
            };
            // BT.709, full range.
            let r = y + 1.5748 * cr;
            let g = y - 0.1873 * cb - 0.4681 * cr;
            let b = y + 1.8556 * cb;
            blend::scale([blend::to_u8(b), blend::to_u8(g), blend::to_u8(r), 255], a)
        }
        PixelFormat::Invalid => [0, 0, 0, 0],
    }
}

fn draw(p: &KernelParams<'_, CpuTexture>) -> MixerResult<()> {
    let format = p.pix_desc.format;
    if format == PixelFormat::Invalid || p.transform.field_mode.is_empty() {
        return Ok(());
    }
    p.validate()?;

    let target = p.target;

    let source_guards: SmallVec<[_; 4]> = p.textures.iter().map(|t| t.raw.pixels.read()).collect();
    let planes: SmallVec<[Plane<'_>; 4]> = source_guards
        .iter()
        .zip(&p.textures)
        .map(|(g, t)| Plane {
            data: g.as_slice(),
            width: t.width,
            height: t.height,
            stride: t.stride,
        })
        .collect();
    let local_guard = p.local_key.map(|k| k.raw.pixels.read());
    let local_key = local_guard.as_ref().zip(p.local_key).map(|(g, k)| Plane {
        data: g.as_slice(),
        width: k.width,
        height: k.height,
        stride: k.stride,
    });
    let layer_guard = p.layer_key.map(|k| k.raw.pixels.read());
    let layer_key = layer_guard.as_ref().zip(p.layer_key).map(|(g, k)| Plane {
        data: g.as_slice(),
        width: k.width,
        height: k.height,
        stride: k.stride,
    });

    let it = p.transform;
    let quads: Vec<QuadMap> = p
        .geometry
        .quads()
        .map(|q| QuadMap {
            x0: it.fill_translation.x + it.fill_scale.x * q[0].vertex.x,
            x1: it.fill_translation.x + it.fill_scale.x * q[2].vertex.x,
            y0: it.fill_translation.y + it.fill_scale.y * q[0].vertex.y,
            y1: it.fill_translation.y + it.fill_scale.y * q[2].vertex.y,
            u0: q[0].texture.x,
            u1: q[2].texture.x,
            v0: q[0].texture.y,
            v1: q[2].texture.y,
        })
        .filter(|m| m.x0 != m.x1 && m.y0 != m.y1)
        .collect();
    if quads.is_empty() {
        return Ok(());
    }

    let clip_x = it.clip_translation.x..it.clip_translation.x + it.clip_scale.x;
    let clip_y = it.clip_translation.y..it.clip_translation.y + it.clip_scale.y;
    let opacity = blend::to_u8(it.opacity as f32);
    let (keyer, blend_mode) = (p.keyer, p.blend_mode);
    let (tw, th) = (target.width as usize, target.height as usize);
    let tstride = target.stride as usize;

    let mut dst = target.raw.pixels.write();
    dst.as_mut_slice()
        .par_chunks_mut(tw * tstride)
        .enumerate()
        .for_each(|(y, row)| {
            if y >= th || !it.field_mode.covers_row(y as u32) {
                return;
            }
            let py = (y as f64 + 0.5) / th as f64;
            if !clip_y.contains(&py) {
                return;
            }
            for x in 0..tw {
                let px = (x as f64 + 0.5) / tw as f64;
                if !clip_x.contains(&px) {
                    continue;
                }
                let Some((u, v)) = quads.iter().rev().find_map(|q| q.texcoord(px, py)) else {
                    continue;
                };
                let mut src = blend::scale(sample(format, &planes, u, v), opacity);
                if let Some(k) = &local_key {
                    src = blend::scale(src, k.key_at(x, y));
                }
                if let Some(k) = &layer_key {
                    src = blend::scale(src, k.key_at(x, y));
                }

                let d = &mut row[x * tstride..(x + 1) * tstride];
                if tstride == 1 {
                    d[0] = blend::over_alpha(d[0], src[3]);
                    continue;
                }
                let cur = [d[0], d[1], d[2], d[3]];
                let out = match keyer {
                    Keyer::Additive => blend::add(cur, src),
                    Keyer::Linear => blend::composite(blend_mode, cur, src),
                };
                d.copy_from_slice(&out);
            }
        });
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/backend/cpu.rs"]
mod tests;
