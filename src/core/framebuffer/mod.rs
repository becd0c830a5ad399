//! Framebuffer rasterizer for the packed 2 bits per pixel screen.
//!
//! Pixel `x` of a byte lives in bits `(x & 3) * 2`, so the leftmost pixel
//! occupies the lowest bits. All primitives clip to the screen and take the
//! DRAW_COLORS register value for color indirection.

use crate::core::{wasm4::SCREEN_SIZE, Sink, Source};


mod blit;
mod font;
mod line;
mod oval;
mod rect;
mod text;

pub use blit::{blit_sub, sprite_len, BlitFlags, PixelFormat};
pub use line::{hline, line, vline};
pub use oval::oval;
pub use rect::rect;
pub use text::{text, text_utf16};

use line::{hline_span_impl, vline_impl};

const DRAW_COLOR_1: u8 = 0;
const DRAW_COLOR_2: u8 = 1;

/// A common trait for index-based framebuffers.
pub(crate) trait Screen {
    type Framebuffer: Source<u8> + Sink<u8> + ?Sized;
    const WIDTH: u32;
    const HEIGHT: u32;
    fn fb(&self) -> &Self::Framebuffer;
    fn fb_mut(&mut self) -> &mut Self::Framebuffer;
}

/// The WASM-4 specific implementation of [`Screen`].
struct Wasm4Screen<'a, B: Sink<u8> + Source<u8> + ?Sized> {
    fb: &'a mut B,
}

impl<'a, B: Sink<u8> + Source<u8> + ?Sized> Screen for Wasm4Screen<'a, B> {
    type Framebuffer = B;
    const WIDTH: u32 = SCREEN_SIZE;
    const HEIGHT: u32 = SCREEN_SIZE;

    fn fb(&self) -> &Self::Framebuffer {
        self.fb
    }

    fn fb_mut(&mut self) -> &mut Self::Framebuffer {
        self.fb
    }
}

/// Set a pixel on the screen as a color in the palette.
///
/// The coordinates must be on screen.
pub fn set_pixel<T: Source<u8> + Sink<u8> + ?Sized>(fb: &mut T, x: i32, y: i32, color: u8) {
    let mut screen = Wasm4Screen { fb };
    set_pixel_impl(&mut screen, x, y, color)
}

pub(crate) fn set_pixel_impl<S: Screen>(s: &mut S, x: i32, y: i32, color: u8) {
    let idx: usize = (S::WIDTH as usize * y as usize + x as usize) >> 2;
    let shift = (x & 0x3) << 1;
    let mask = 0x3 << shift;

    if let Some(fb_byte) = s.fb().item_at(idx) {
        s.fb_mut()
            .set_item_at(idx, ((color & 0x3) << shift) | (fb_byte & !mask));
    }
}

/// Set a pixel on the screen as a color in the palette, ignoring
/// coordinates that are off screen.
pub fn set_pixel_unclipped<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    x: i32,
    y: i32,
    color: u8,
) {
    let mut screen = Wasm4Screen { fb };
    set_pixel_unclipped_impl(&mut screen, x, y, color)
}

pub(crate) fn set_pixel_unclipped_impl<S: Screen>(s: &mut S, x: i32, y: i32, color: u8) {
    if x >= 0 && x < S::WIDTH as i32 && y >= 0 && y < S::HEIGHT as i32 {
        set_pixel_impl(s, x, y, color);
    }
}

/// Read back the palette index of a pixel, `None` when off screen.
pub fn get_pixel<T: Source<u8> + ?Sized>(fb: &T, x: i32, y: i32) -> Option<u8> {
    if x < 0 || x >= SCREEN_SIZE as i32 || y < 0 || y >= SCREEN_SIZE as i32 {
        return None;
    }
    let idx = (SCREEN_SIZE as usize * y as usize + x as usize) >> 2;
    let shift = (x & 0x3) << 1;
    fb.item_at(idx).map(|byte| (byte >> shift) & 0x3)
}

/// Clears an entire framebuffer.
pub fn clear<T: Sink<u8> + ?Sized>(fb: &mut T) {
    fb.fill(0u8);
}

/// Returns a Some<u8> palette index if the draw color at the index is opaque,
/// and None if transparent.
fn remap_draw_color(draw_color_idx: u8, draw_colors: u16) -> Option<u8> {
    let draw_color = (draw_colors as u32 >> (draw_color_idx as u32 * 4)) & 0xf;
    if draw_color == 0 {
        None
    } else {
        Some(((draw_color - 1) & 0x3) as u8)
    }
}
