//! Pixel format negotiation and software pixel conversion
//!
//! Client buffers arrive tagged either with a `wl_shm` format code or with a
//! DRM fourcc. Both are negotiated down to a [`PixelFormat`], which carries the
//! bytes-per-pixel used by stride validation and drives the CPU conversion
//! to RGBA8888 used by the software import path.

use log::{debug, warn};
use wayland_server::{protocol::wl_shm, WEnum};

/// DRM fourcc codes accepted on the hardware path
pub mod fourcc {
    pub const XRGB8888: u32 = 0x3432_5258; // 'XR24'
    pub const ARGB8888: u32 = 0x3432_5241; // 'AR24'
    pub const XBGR8888: u32 = 0x3432_4258; // 'XB24'
    pub const ABGR8888: u32 = 0x3432_4241; // 'AB24'
    pub const RGB565: u32 = 0x3631_4752; // 'RG16'
    pub const RGB888: u32 = 0x3432_4752; // 'RG24'
    pub const BGR888: u32 = 0x3432_4742; // 'BG24'
    pub const RGBA4444: u32 = 0x3434_4152; // 'RA44'
    pub const RGBA5551: u32 = 0x3531_4152; // 'RA15'
}

/// Negotiated pixel format of an imported buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Argb8888,
    Xrgb8888,
    Abgr8888,
    Xbgr8888,
    Rgb888,
    Bgr888,
    Rgb565,
    Rgba4444,
    Rgba5551,
    Invalid,
}

impl PixelFormat {
    /// Negotiates a `wl_shm` format code
    pub fn from_wl_shm(format: WEnum<wl_shm::Format>) -> Self {
        match format {
            WEnum::Value(wl_shm::Format::Argb8888) => PixelFormat::Argb8888,
            WEnum::Value(wl_shm::Format::Xrgb8888) => PixelFormat::Xrgb8888,
            WEnum::Value(wl_shm::Format::Rgba4444) => PixelFormat::Rgba4444,
            WEnum::Value(wl_shm::Format::Rgba5551) => PixelFormat::Rgba5551,
            WEnum::Value(wl_shm::Format::Rgb565) => PixelFormat::Rgb565,
            WEnum::Value(wl_shm::Format::Rgb888) => PixelFormat::Rgb888,
            WEnum::Value(wl_shm::Format::Bgr888) => PixelFormat::Bgr888,
            WEnum::Value(wl_shm::Format::Xbgr8888) => PixelFormat::Xbgr8888,
            WEnum::Value(wl_shm::Format::Abgr8888) => PixelFormat::Abgr8888,
            _ => PixelFormat::Invalid,
        }
    }

    /// Negotiates a DRM fourcc
    pub fn from_fourcc(code: u32) -> Self {
        match code {
            fourcc::ARGB8888 => PixelFormat::Argb8888,
            fourcc::XRGB8888 => PixelFormat::Xrgb8888,
            fourcc::ABGR8888 => PixelFormat::Abgr8888,
            fourcc::XBGR8888 => PixelFormat::Xbgr8888,
            fourcc::RGB888 => PixelFormat::Rgb888,
            fourcc::BGR888 => PixelFormat::Bgr888,
            fourcc::RGB565 => PixelFormat::Rgb565,
            fourcc::RGBA4444 => PixelFormat::Rgba4444,
            fourcc::RGBA5551 => PixelFormat::Rgba5551,
            _ => PixelFormat::Invalid,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Argb8888
            | PixelFormat::Xrgb8888
            | PixelFormat::Abgr8888
            | PixelFormat::Xbgr8888 => 4,
            PixelFormat::Rgb888 | PixelFormat::Bgr888 => 3,
            PixelFormat::Rgb565 | PixelFormat::Rgba4444 | PixelFormat::Rgba5551 => 2,
            PixelFormat::Invalid => 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != PixelFormat::Invalid
    }

    pub fn has_alpha(&self) -> bool {
        matches!(
            self,
            PixelFormat::Argb8888
                | PixelFormat::Abgr8888
                | PixelFormat::Rgba4444
                | PixelFormat::Rgba5551
        )
    }

    /// Decodes one little-endian pixel into RGBA8888
    fn decode(&self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Argb8888 => [px[2], px[1], px[0], px[3]],
            PixelFormat::Xrgb8888 => [px[2], px[1], px[0], 255],
            PixelFormat::Abgr8888 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Xbgr8888 => [px[0], px[1], px[2], 255],
            PixelFormat::Rgb888 => [px[2], px[1], px[0], 255],
            PixelFormat::Bgr888 => [px[0], px[1], px[2], 255],
            PixelFormat::Rgb565 => {
                let pixel = u16::from_le_bytes([px[0], px[1]]);
                let r = ((pixel >> 11) & 0x1F) as u8;
                let g = ((pixel >> 5) & 0x3F) as u8;
                let b = (pixel & 0x1F) as u8;
                [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
            }
            PixelFormat::Rgba4444 => {
                let pixel = u16::from_le_bytes([px[0], px[1]]);
                let r = ((pixel >> 12) & 0xF) as u8;
                let g = ((pixel >> 8) & 0xF) as u8;
                let b = ((pixel >> 4) & 0xF) as u8;
                let a = (pixel & 0xF) as u8;
                [(r << 4) | r, (g << 4) | g, (b << 4) | b, (a << 4) | a]
            }
            PixelFormat::Rgba5551 => {
                let pixel = u16::from_le_bytes([px[0], px[1]]);
                let r = ((pixel >> 11) & 0x1F) as u8;
                let g = ((pixel >> 6) & 0x1F) as u8;
                let b = ((pixel >> 1) & 0x1F) as u8;
                let a = if pixel & 0x1 == 1 { 255 } else { 0 };
                [(r << 3) | (r >> 2), (g << 3) | (g >> 2), (b << 3) | (b >> 2), a]
            }
            PixelFormat::Invalid => [0, 0, 0, 0],
        }
    }
}

/// Converts client pixel memory into tightly packed RGBA8888.
///
/// Returns `None` when the described image does not fit inside `src` or the
/// format is invalid.
pub fn convert_to_rgba(
    src: &[u8],
    width: i32,
    height: i32,
    stride: i32,
    offset: usize,
    format: PixelFormat,
) -> Option<Vec<u8>> {
    let width = width.max(0) as usize;
    let height = height.max(0) as usize;
    let stride = stride.max(0) as usize;
    let bpp = format.bytes_per_pixel();

    if width == 0 || height == 0 || bpp == 0 {
        return None;
    }

    // The last row only needs width * bpp bytes, not a full stride
    let needed = offset
        .checked_add(stride.checked_mul(height - 1)?)?
        .checked_add(width.checked_mul(bpp)?)?;
    if needed > src.len() {
        warn!("🔴 Buffer size mismatch: needed {} bytes, have {}", needed, src.len());
        return None;
    }

    let mut out = vec![0u8; width * height * 4];
    for y in 0..height {
        let row = &src[offset + y * stride..];
        let dst_row = &mut out[y * width * 4..(y + 1) * width * 4];
        for x in 0..width {
            let rgba = format.decode(&row[x * bpp..x * bpp + bpp]);
            dst_row[x * 4..x * 4 + 4].copy_from_slice(&rgba);
        }
    }

    debug!("✅ Converted {}x{} buffer from {:?} to RGBA", width, height, format);
    Some(out)
}
