use crate::core::{Sink, Source};

use super::{
    blit::{blit_sub_impl, BlitFlags},
    font::{FIRST_GLYPH, FONT, GLYPH_SIZE, LAST_GLYPH},
    Screen, Wasm4Screen,
};

/// Draw text from a byte string, as used by `text` and `textUtf8`.
///
/// A `0` byte ends the string and `\n` starts a new line at the original `x`.
/// Glyph pixels use draw color 1, their background draw color 2.
pub fn text<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    text: &[u8],
    x: i32,
    y: i32,
) {
    text_impl(
        &mut Wasm4Screen { fb },
        draw_colors,
        text.iter().map(|&b| b as u32),
        x,
        y,
    )
}

/// Draw text from UTF-16 code units, as used by `textUtf16`.
///
/// Code units above 255 have no glyph and only advance the cursor.
pub fn text_utf16<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    text: &[u16],
    x: i32,
    y: i32,
) {
    text_impl(
        &mut Wasm4Screen { fb },
        draw_colors,
        text.iter().map(|&c| c as u32),
        x,
        y,
    )
}

pub(crate) fn text_impl<S: Screen>(
    screen: &mut S,
    draw_colors: u16,
    chars: impl IntoIterator<Item = u32>,
    x: i32,
    mut y: i32,
) {
    let mut current_x = x;
    for c in chars {
        match c {
            0 => return,
            10 => {
                y = y.saturating_add(GLYPH_SIZE as i32);
                current_x = x;
            }
            FIRST_GLYPH..=LAST_GLYPH => {
                blit_sub_impl(
                    screen,
                    &FONT[..],
                    current_x,
                    y,
                    GLYPH_SIZE,
                    GLYPH_SIZE,
                    0,
                    (c - FIRST_GLYPH) * GLYPH_SIZE,
                    GLYPH_SIZE,
                    BlitFlags::default(),
                    draw_colors,
                );
                current_x = current_x.saturating_add(GLYPH_SIZE as i32);
            }
            _ => current_x = current_x.saturating_add(GLYPH_SIZE as i32),
        }
    }
}
