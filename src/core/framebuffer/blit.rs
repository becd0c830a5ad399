use core::ops::Range;

use crate::core::{
    wasm4::{BLIT_2BPP, BLIT_FLIP_X, BLIT_FLIP_Y, BLIT_ROTATE},
    Sink, Source,
};

use super::{remap_draw_color, set_pixel_impl, Screen, Wasm4Screen};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Blit1BPP,
    Blit2BPP,
    #[cfg(test)]
    Framebuffer,
}

impl PixelFormat {
    /// Number of bits a single sprite pixel occupies.
    pub fn bits(self) -> u32 {
        match self {
            PixelFormat::Blit1BPP => 1,
            _ => 2,
        }
    }
}

/// The `flags` argument of `blit`/`blitSub`, decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlitFlags {
    pub format: PixelFormat,
    pub flip_x: bool,
    pub flip_y: bool,
    pub rotate: bool,
}

impl From<u32> for BlitFlags {
    fn from(flags: u32) -> Self {
        Self {
            format: if flags & BLIT_2BPP != 0 {
                PixelFormat::Blit2BPP
            } else {
                PixelFormat::Blit1BPP
            },
            flip_x: flags & BLIT_FLIP_X != 0,
            flip_y: flags & BLIT_FLIP_Y != 0,
            rotate: flags & BLIT_ROTATE != 0,
        }
    }
}

/// Copy a subregion within a larger sprite atlas to the framebuffer.
///
/// `stride` is the width of the whole atlas in pixels. Sprite pixels map through
/// the draw colors, so a transparent slot leaves the framebuffer untouched.
/// With `rotate` the sprite is turned 90° counter-clockwise.
#[allow(clippy::too_many_arguments)]
pub fn blit_sub<S, T>(
    target: &mut T,
    sprite: &S,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    src_x: u32,
    src_y: u32,
    stride: u32,
    flags: BlitFlags,
    draw_colors: u16,
) where
    S: Source<u8> + ?Sized,
    T: Source<u8> + Sink<u8> + ?Sized,
{
    blit_sub_impl(
        &mut Wasm4Screen { fb: target },
        sprite,
        x,
        y,
        width,
        height,
        src_x,
        src_y,
        stride,
        flags,
        draw_colors,
    )
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn blit_sub_impl<S, T>(
    screen: &mut T,
    sprite: &S,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    src_x: u32,
    src_y: u32,
    stride: u32,
    flags: BlitFlags,
    draw_colors: u16,
) where
    S: Source<u8> + ?Sized,
    T: Screen,
{
    let (x, y) = (x as i64, y as i64);
    let (width, height) = (width as i64, height as i64);
    let (src_x, src_y, stride) = (src_x as i64, src_y as i64, stride as i64);

    let clip_range_x = 0..(T::WIDTH as i64);
    let clip_range_y = 0..(T::HEIGHT as i64);

    // ranges within the sprite window, local to the target start coordinates.
    // rotating swaps the axes and implies a horizontal flip.
    let mut flip_x = flags.flip_x;
    let w_range_x;
    let w_range_y;
    if flags.rotate {
        flip_x = !flip_x;
        w_range_x = calculate_target_range(y, width, clip_range_y);
        w_range_y = calculate_target_range(x, height, clip_range_x);
    } else {
        w_range_x = calculate_target_range(x, width, clip_range_x);
        w_range_y = calculate_target_range(y, height, clip_range_y);
    }

    for wy in w_range_y {
        for wx in w_range_x.clone() {
            // target coordinates where the sprite pixel will be written to
            let (tx, ty) = if flags.rotate {
                (x + wy, y + wx)
            } else {
                (x + wx, y + wy)
            };

            // source coordinates where the sprite pixel will be read from
            let sx = src_x + if flip_x { width - wx - 1 } else { wx };
            let sy = src_y + if flags.flip_y { height - wy - 1 } else { wy };

            let draw_color_idx = get_sprite_pixel_draw_color(sprite, flags.format, sx, sy, stride);
            if let Some(color) = remap_draw_color(draw_color_idx, draw_colors) {
                set_pixel_impl(screen, tx as i32, ty as i32, color)
            }
        }
    }
}

/// Sample one sprite pixel. Pixels are packed most significant bits first;
/// reads past the end of the sprite yield index 0.
fn get_sprite_pixel_draw_color<T: Source<u8> + ?Sized>(
    sprite: &T,
    fmt: PixelFormat,
    x: i64,
    y: i64,
    stride: i64,
) -> u8 {
    let pixel_index = stride * y + x;
    match fmt {
        PixelFormat::Blit1BPP => {
            let byte = sprite.item_at((pixel_index >> 3) as usize).unwrap_or(0);
            (byte >> (7 - (pixel_index & 0x07))) & 0x01
        }
        PixelFormat::Blit2BPP => {
            let byte = sprite.item_at((pixel_index >> 2) as usize).unwrap_or(0);
            (byte >> (6 - ((pixel_index & 0x03) << 1))) & 0x03
        }
        #[cfg(test)]
        PixelFormat::Framebuffer => panic!("invalid pixel format for reading sprite data"),
    }
}

/// Number of sprite bytes a `blitSub` call may touch.
pub fn sprite_len(width: u32, height: u32, src_x: u32, src_y: u32, stride: u32, flags: BlitFlags) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    let last_pixel = (src_y as u64 + height as u64 - 1) * stride as u64 + src_x as u64 + width as u64;
    let bits = last_pixel * flags.format.bits() as u64;
    bits.div_ceil(8).min(usize::MAX as u64) as usize
}

fn calculate_target_range(tgt_coord: i64, tgt_extent: i64, clip_range: Range<i64>) -> Range<i64> {
    Range {
        start: i64::max(clip_range.start, tgt_coord) - tgt_coord,
        end: i64::min(tgt_extent, clip_range.end - tgt_coord),
    }
}
