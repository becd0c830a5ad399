use crate::core::{Sink, Source};
use core::mem;

use super::{
    remap_draw_color, set_pixel_impl, set_pixel_unclipped_impl, Screen, Wasm4Screen, DRAW_COLOR_1,
};

/// Endpoints further out than this are clipped before walking the line.
const FAR: i64 = 1 << 16;

/// Draw a line between two points with draw color 1.
///
/// Bresenham, always walking from the point with the smaller `y`. See
/// <https://github.com/nesbox/TIC-80/blob/master/src/core/draw.c>.
pub fn line<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
) {
    if let Some(stroke) = remap_draw_color(DRAW_COLOR_1, draw_colors) {
        line_impl(&mut Wasm4Screen { fb }, stroke, x1, y1, x2, y2);
    }
}

pub(crate) fn line_impl<T: Screen>(
    screen: &mut T,
    stroke: u8,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
) {
    let (mut x1, mut y1, mut x2, mut y2) = (x1 as i64, y1 as i64, x2 as i64, y2 as i64);
    if y1 > y2 {
        mem::swap(&mut x1, &mut x2);
        mem::swap(&mut y1, &mut y2);
    }

    if [x1, y1, x2, y2].iter().any(|v| !(-FAR..FAR).contains(v)) {
        match clip_line::<T>(x1, y1, x2, y2) {
            Some(clipped) => (x1, y1, x2, y2) = clipped,
            None => return,
        }
    }

    let dx = (x2 - x1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let dy = y2 - y1;

    // error term kept doubled, so odd spans keep their half step
    let mut err = if dx > dy { dx } else { -dy };

    for _ in 0..=(dx + dy) {
        // y only grows and x only moves towards x2
        if y1 >= T::HEIGHT as i64 || (sx > 0 && x1 >= T::WIDTH as i64) || (sx < 0 && x1 < 0) {
            break;
        }

        set_pixel_unclipped_impl(screen, x1 as i32, y1 as i32, stroke);

        if x1 == x2 && y1 == y2 {
            break;
        }

        let err2 = err;

        if err2 > -2 * dx {
            err -= 2 * dy;
            x1 += sx;
        }

        if err2 < 2 * dy {
            err += 2 * dx;
            y1 += 1;
        }
    }
}

/// Clip a line to the screen plus a one pixel border (Liang-Barsky).
fn clip_line<T: Screen>(x1: i64, y1: i64, x2: i64, y2: i64) -> Option<(i64, i64, i64, i64)> {
    let (fx, fy) = (x1 as f64, y1 as f64);
    let (dx, dy) = ((x2 - x1) as f64, (y2 - y1) as f64);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);

    let edges = [
        (-dx, fx + 1.0),
        (dx, T::WIDTH as f64 - fx),
        (-dy, fy + 1.0),
        (dy, T::HEIGHT as f64 - fy),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else if p < 0.0 {
            t0 = t0.max(q / p);
        } else {
            t1 = t1.min(q / p);
        }
    }
    if t0 > t1 {
        return None;
    }

    let at = |t: f64| ((fx + t * dx).round() as i64, (fy + t * dy).round() as i64);
    let (cx1, cy1) = at(t0);
    let (cx2, cy2) = at(t1);
    Some((cx1, cy1, cx2, cy2))
}

/// Draw a horizontal line.
///
/// Specifically, between `(x, y)` and `(x + len - 1, y)`.
pub fn hline<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    x: i32,
    y: i32,
    len: u32,
) {
    if let Some(stroke) = remap_draw_color(DRAW_COLOR_1, draw_colors) {
        hline_impl(&mut Wasm4Screen { fb }, stroke, x, y, len);
    }
}

pub(crate) fn hline_impl<T: Screen>(screen: &mut T, stroke: u8, x: i32, y: i32, len: u32) {
    let end_x = (x as i64 + len as i64).min(i32::MAX as i64) as i32;
    hline_span_impl(screen, stroke, x, y, end_x);
}

/// Draw the pixels `start_x..end_x` of row `y`, clipped to the screen.
pub(crate) fn hline_span_impl<T: Screen>(
    screen: &mut T,
    stroke: u8,
    start_x: i32,
    y: i32,
    end_x: i32,
) {
    if y < 0 || y >= T::HEIGHT as i32 {
        return;
    }

    let start_x = start_x.max(0);
    let end_x = end_x.min(T::WIDTH as i32);

    if start_x < end_x {
        hline_fast(screen, stroke, start_x, y, end_x);
    }
}

/// Whole bytes inside the span are written at once; only the ragged
/// ends go pixel by pixel.
fn hline_fast<T: Screen>(screen: &mut T, stroke: u8, mut start_x: i32, y: i32, end_x: i32) {
    let fill_end = end_x - (end_x & 3);
    let fill_start = fill_end.min((start_x + 3) & !3);

    if fill_end - fill_start > 3 {
        for x in start_x..fill_start {
            set_pixel_impl(screen, x, y, stroke);
        }

        let from = ((T::WIDTH as i32 * y + fill_start) >> 2) as usize;
        let to = ((T::WIDTH as i32 * y + fill_end) >> 2) as usize;
        let byte_stroke = (stroke & 0x3) * 0x55;

        for idx in from..to {
            screen.fb_mut().set_item_at(idx, byte_stroke);
        }
        start_x = fill_end;
    }

    for x in start_x..end_x {
        set_pixel_impl(screen, x, y, stroke);
    }
}

/// Draw a vertical line.
pub fn vline<T: Source<u8> + Sink<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    x: i32,
    y: i32,
    len: u32,
) {
    if let Some(stroke) = remap_draw_color(DRAW_COLOR_1, draw_colors) {
        vline_impl(&mut Wasm4Screen { fb }, stroke, x, y, len);
    }
}

pub(crate) fn vline_impl<T: Screen>(screen: &mut T, stroke: u8, x: i32, y: i32, len: u32) {
    let end_y = (y as i64 + len as i64).min(T::HEIGHT as i64);
    if end_y <= 0 || x < 0 || x >= T::WIDTH as i32 {
        return;
    }

    for y in y.max(0)..end_y as i32 {
        set_pixel_impl(screen, x, y, stroke);
    }
}
