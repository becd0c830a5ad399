//! Various utility functions for WASM-4.

use byteorder::{ByteOrder, LittleEndian};

use super::{
    framebuffer,
    wasm4::{
        DRAW_COLORS_ADDR, FRAMEBUFFER_ADDR, FRAMEBUFFER_SIZE, MOUSE_BUTTONS_ADDR, MOUSE_X_ADDR,
        MOUSE_Y_ADDR, PALETTE_ADDR, SCREEN_SIZE,
    },
};

pub const DEFAULT_PALETTE: [u32; 4] = [0xe0f8cf, 0x86c06c, 0x306850, 0x071821];
pub const DEFAULT_DRAW_COLORS: u16 = 0x1203;

/// Palette shown on the crash screen.
pub const CRASH_PALETTE: [u32; 4] = [0x1111ee, 0x86c06c, 0xaaaaaa, 0xffffff];

/// Encode four colors the way the PALETTE register stores them.
pub fn palette_bytes(colors: [u32; 4]) -> [u8; 16] {
    let mut buf = [0u8; 16];
    LittleEndian::write_u32_into(&colors, &mut buf);
    buf
}

/// Returns the default WASM-4 palette.
pub fn default_palette() -> [u8; 16] {
    palette_bytes(DEFAULT_PALETTE)
}

/// Returns the default WASM-4 draw colors.
pub fn default_draw_colors() -> [u8; 2] {
    bytemuck::cast(DEFAULT_DRAW_COLORS.to_le())
}

/// Write the power-on register values: palette, draw colors and an offscreen mouse.
pub fn write_default_registers(mem: &mut [u8]) {
    mem[PALETTE_ADDR..PALETTE_ADDR + 16].copy_from_slice(&default_palette());
    mem[DRAW_COLORS_ADDR..DRAW_COLORS_ADDR + 2].copy_from_slice(&default_draw_colors());
    LittleEndian::write_i16(&mut mem[MOUSE_X_ADDR..], 0x7fff);
    LittleEndian::write_i16(&mut mem[MOUSE_Y_ADDR..], 0x7fff);
    mem[MOUSE_BUTTONS_ADDR] = 0;
}

/// Read the DRAW_COLORS register.
pub fn draw_colors(mem: &[u8]) -> u16 {
    LittleEndian::read_u16(&mem[DRAW_COLORS_ADDR..])
}

/// Split linear memory into the DRAW_COLORS register value and the framebuffer region.
pub fn screen_mut(mem: &mut [u8]) -> (u16, &mut [u8]) {
    let draw_colors = draw_colors(mem);
    (
        draw_colors,
        &mut mem[FRAMEBUFFER_ADDR..FRAMEBUFFER_ADDR + FRAMEBUFFER_SIZE],
    )
}

/// Replace the screen with a crash report: a centered `title` bar and
/// `message` below it, on the crash palette.
pub fn draw_crash_screen(mem: &mut [u8], title: &str, message: &str) {
    mem[PALETTE_ADDR..PALETTE_ADDR + 16].copy_from_slice(&palette_bytes(CRASH_PALETTE));

    let title = format!(" {title} ");
    let header_width = 8 * title.len() as u32;
    let header_x = (SCREEN_SIZE as i32 - header_width as i32) / 2;
    let header_y = 20;

    let (_, fb) = screen_mut(mem);
    framebuffer::clear(fb);
    framebuffer::hline(fb, DEFAULT_DRAW_COLORS, header_x, header_y - 1, header_width);
    framebuffer::text(fb, 0x1131, title.as_bytes(), header_x, header_y);
    framebuffer::text(fb, DEFAULT_DRAW_COLORS, message.as_bytes(), 9, 60);

    LittleEndian::write_u16(&mut mem[DRAW_COLORS_ADDR..], DEFAULT_DRAW_COLORS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wasm4::MEMORY_SIZE;

    #[test]
    fn default_registers() {
        let mut mem = vec![0u8; MEMORY_SIZE];
        write_default_registers(&mut mem);

        assert_eq!([0xcf, 0xf8, 0xe0, 0x00], mem[PALETTE_ADDR..PALETTE_ADDR + 4]);
        assert_eq!(0x1203, draw_colors(&mem));
        assert_eq!([0xff, 0x7f, 0xff, 0x7f], mem[MOUSE_X_ADDR..MOUSE_X_ADDR + 4]);
    }

    #[test]
    fn screen_split() {
        let mut mem = vec![0u8; MEMORY_SIZE];
        mem[DRAW_COLORS_ADDR] = 0x34;
        mem[DRAW_COLORS_ADDR + 1] = 0x12;
        let (dc, fb) = screen_mut(&mut mem);
        assert_eq!(0x1234, dc);
        assert_eq!(FRAMEBUFFER_SIZE, fb.len());
    }

    #[test]
    fn crash_screen() {
        let mut mem = vec![0xffu8; MEMORY_SIZE];
        draw_crash_screen(&mut mem, "ERROR", "hi");

        assert_eq!(
            palette_bytes(CRASH_PALETTE),
            mem[PALETTE_ADDR..PALETTE_ADDR + 16]
        );
        assert_eq!(DEFAULT_DRAW_COLORS, draw_colors(&mem));

        let fb = &mem[FRAMEBUFFER_ADDR..FRAMEBUFFER_ADDR + FRAMEBUFFER_SIZE];
        // " ERROR " is 56 px wide and starts at x = 52, its bar is color 2
        assert_eq!(Some(0), framebuffer::get_pixel(fb, 51, 19));
        assert_eq!(Some(2), framebuffer::get_pixel(fb, 52, 19));
        assert_eq!(Some(2), framebuffer::get_pixel(fb, 107, 19));
        assert_eq!(Some(0), framebuffer::get_pixel(fb, 108, 19));
        // the header text is color 0 on a color 2 background
        assert_eq!(Some(2), framebuffer::get_pixel(fb, 52, 20));
        assert!((60..68).any(|x| framebuffer::get_pixel(fb, x, 21) == Some(0)));
        // the message uses color 2 on color 0 as well
        assert!((9..25).any(|x| (60..68).any(|y| framebuffer::get_pixel(fb, x, y) == Some(2))));
        // everything else is cleared
        assert_eq!(Some(0), framebuffer::get_pixel(fb, 0, 159));
    }
}
