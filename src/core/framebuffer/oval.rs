use crate::core::{Sink, Source};

use super::{
    hline_span_impl, remap_draw_color, set_pixel_unclipped_impl, Screen, Wasm4Screen,
    DRAW_COLOR_1, DRAW_COLOR_2,
};

/// Ovals this wide or tall are drawn row by row from the ellipse equation,
/// visiting only the rows on screen.
const MAX_WALKED_OVAL: u32 = 1 << 16;

/// Draw an oval (circle).
///
/// An axis parallel ellipse inside the box at `x` and `y` with the given `width`
/// and `height`. Draw color 1 fills, draw color 2 strokes. Scans one quadrant
/// with the midpoint algorithm and mirrors it into the other three, see
/// <https://github.com/nesbox/TIC-80/blob/main/src/core/draw.c>.
pub fn oval<T: Sink<u8> + Source<u8> + ?Sized>(
    fb: &mut T,
    draw_colors: u16,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
) {
    let mut screen = Wasm4Screen { fb };
    oval_impl(&mut screen, draw_colors, x, y, width, height)
}

pub(crate) fn oval_impl<T: Screen>(
    screen: &mut T,
    draw_colors: u16,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
) {
    let fill = remap_draw_color(DRAW_COLOR_1, draw_colors);
    let stroke = remap_draw_color(DRAW_COLOR_2, draw_colors);

    if (fill.is_none() && stroke.is_none()) || width == 0 || height == 0 {
        return;
    }

    if width > MAX_WALKED_OVAL || height > MAX_WALKED_OVAL {
        oval_rows_impl(screen, fill, stroke, x as i64, y as i64, width as i64, height as i64);
        return;
    }

    let mut plot = |screen: &mut T, px: i64, py: i64| {
        if let Some(color) = stroke {
            set_pixel_unclipped_impl(screen, clamp(px), clamp(py), color);
        }
    };

    let (x, y) = (x as i64, y as i64);
    let (width, height) = (width as i64, height as i64);

    // decision terms grow with a²b²
    let mut a = (width - 1) as i128;
    let b = (height - 1) as i128;
    let mut b1 = b % 2;

    let mut north = y + height / 2;
    let mut west = x;
    let mut east = x + width - 1;
    let mut south = north - b1 as i64;

    let mut dx = 4 * (1 - a) * b * b;
    let mut dy = 4 * (b1 + 1) * a * a;
    let mut err = dx + dy + b1 * a * a;

    a *= 8 * a;
    b1 = 8 * b * b;

    loop {
        plot(screen, east, north);
        plot(screen, west, north);
        plot(screen, west, south);
        plot(screen, east, south);

        let start = west + 1;
        if let Some(color) = fill {
            if east - start > 0 {
                hline_span_impl(screen, color, clamp(start), clamp(north), clamp(east));
                hline_span_impl(screen, color, clamp(start), clamp(south), clamp(east));
            }
        }

        let err2 = 2 * err;

        if err2 <= dy {
            north += 1;
            south -= 1;
            dy += a;
            err += dy;
        }

        if err2 >= dx || 2 * err > dy {
            west += 1;
            east -= 1;
            dx += b1;
            err += dx;
        }

        if west > east {
            break;
        }
    }

    // flat ovals finish their top and bottom rows here
    while north - south < height {
        plot(screen, west - 1, north);
        plot(screen, east + 1, north);
        north += 1;

        plot(screen, west - 1, south);
        plot(screen, east + 1, south);
        south -= 1;
    }
}

fn oval_rows_impl<T: Screen>(
    screen: &mut T,
    fill: Option<u8>,
    stroke: Option<u8>,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
) {
    let rx = (width - 1) as f64 / 2.0;
    let ry = (height - 1) as f64 / 2.0;
    let cx = x as f64 + rx;
    let cy = y as f64 + ry;

    // leftmost and rightmost pixel of a row
    let extent = |row: i64| -> Option<(i64, i64)> {
        if row < y || row >= y + height {
            return None;
        }
        let half = if ry > 0.0 {
            let d = (row as f64 - cy) / ry;
            rx * (1.0 - d * d).max(0.0).sqrt()
        } else {
            rx
        };
        Some(((cx - half).round() as i64, (cx + half).round() as i64))
    };

    for row in y.max(0)..(y + height).min(T::HEIGHT as i64) {
        let Some((left, right)) = extent(row) else {
            continue;
        };

        if let Some(color) = fill {
            hline_span_impl(screen, color, clamp(left + 1), clamp(row), clamp(right));
        }

        if let Some(color) = stroke {
            // the outline covers what the next row further out does not
            let outer = if (row as f64) < cy { row - 1 } else { row + 1 };
            match extent(outer) {
                Some((outer_left, outer_right)) => {
                    let left_end = outer_left.max(left + 1).min(right + 1);
                    hline_span_impl(screen, color, clamp(left), clamp(row), clamp(left_end));
                    let right_start = (outer_right + 1).min(right).max(left);
                    hline_span_impl(screen, color, clamp(right_start), clamp(row), clamp(right + 1));
                }
                None => {
                    hline_span_impl(screen, color, clamp(left), clamp(row), clamp(right + 1));
                }
            }
        }
    }
}

fn clamp(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
