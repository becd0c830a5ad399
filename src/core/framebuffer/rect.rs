use crate::core::{Sink, Source};

use super::{
    hline_span_impl, remap_draw_color, vline_impl, Screen, Wasm4Screen, DRAW_COLOR_1,
    DRAW_COLOR_2,
};

/// Draw a rectangle.
///
/// The interior is filled with draw color 1 and the outline stroked with
/// draw color 2. A transparent slot skips that part.
pub fn rect<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
) {
    rect_impl(&mut Wasm4Screen { fb }, draw_colors, x, y, width, height)
}

pub(crate) fn rect_impl<T: Screen>(
    screen: &mut T,
    draw_colors: u16,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
) {
    if width == 0 || height == 0 {
        return;
    }

    let end_x = (x as i64 + width as i64).min(i32::MAX as i64) as i32;
    let end_y = (y as i64 + height as i64).min(i32::MAX as i64) as i32;

    if let Some(fill) = remap_draw_color(DRAW_COLOR_1, draw_colors) {
        for fy in y.max(0)..end_y.min(T::HEIGHT as i32) {
            hline_span_impl(screen, fill, x, fy, end_x);
        }
    }

    if let Some(stroke) = remap_draw_color(DRAW_COLOR_2, draw_colors) {
        vline_impl(screen, stroke, x, y, height);
        vline_impl(screen, stroke, end_x - 1, y, height);
        hline_span_impl(screen, stroke, x, y, end_x);
        hline_span_impl(screen, stroke, x, end_y - 1, end_x);
    }
}
