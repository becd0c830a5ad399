//! Text decoding for the `trace*` imports.

use log::error;

use super::Source;

/// Read a NUL-terminated string starting at `ptr`.
///
/// Bytes map to the first 256 code points. A string running off the end of
/// memory is cut there.
pub fn c_string<T: Source<u8> + ?Sized>(mem: &T, mut ptr: usize) -> String {
    let mut output = String::new();
    while let Some(byte) = mem.item_at(ptr) {
        if byte == 0 {
            break;
        }
        output.push(byte as char);
        ptr += 1;
    }
    output
}

/// Decode little endian UTF-16, replacing invalid sequences.
///
/// A trailing odd byte is ignored.
pub fn utf16_lossy(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Format the string at `fmt_ptr` with arguments read from `arg_ptr`.
///
/// Supported conversions:
/// - `%c`: an `i32` holding a character code
/// - `%d`, `%x`: an `i32` in decimal or lowercase hex, negative values get a leading `-`
/// - `%s`: an `u32` pointer to a NUL-terminated string
/// - `%f`: an `f64`
/// - `%%`: a literal `%`
///
/// Other conversions print nothing. Formatting stops early when an argument
/// lies outside of `mem`.
pub fn tracef<T: Source<u8> + ?Sized>(mem: &T, mut fmt_ptr: usize, mut arg_ptr: usize) -> String {
    let mut output = String::new();

    while let Some(ch) = mem.item_at(fmt_ptr) {
        fmt_ptr += 1;
        match ch {
            0 => break,
            b'%' => {}
            _ => {
                output.push(ch as char);
                continue;
            }
        }

        let Some(spec) = mem.item_at(fmt_ptr) else {
            break;
        };
        fmt_ptr += 1;

        match spec {
            0 => break,
            b'%' => output.push('%'),
            b'c' | b'd' | b'x' | b's' => {
                let Some(bytes) = mem.items_at::<4>(arg_ptr) else {
                    error!("tracef: argument at {arg_ptr} is out of bounds");
                    break;
                };
                arg_ptr += 4;

                match spec {
                    b'c' => {
                        let code = i32::from_le_bytes(bytes) as u32 & 0xffff;
                        output.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                    b'd' => output.push_str(&i32::from_le_bytes(bytes).to_string()),
                    b'x' => {
                        let val = i32::from_le_bytes(bytes);
                        if val < 0 {
                            output.push('-');
                        }
                        output.push_str(&format!("{:x}", val.unsigned_abs()));
                    }
                    _ => output.push_str(&c_string(mem, u32::from_le_bytes(bytes) as usize)),
                }
            }
            b'f' => {
                let Some(bytes) = mem.items_at::<8>(arg_ptr) else {
                    error!("tracef: argument at {arg_ptr} is out of bounds");
                    break;
                };
                arg_ptr += 8;
                output.push_str(&f64::from_le_bytes(bytes).to_string());
            }
            _ => {}
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Memory holding the format string at 0 and the argument block at 64.
    fn memory(fmt: &str, args: &[u8]) -> Vec<u8> {
        let mut mem = vec![0u8; 256];
        mem[..fmt.len()].copy_from_slice(fmt.as_bytes());
        mem[64..64 + args.len()].copy_from_slice(args);
        mem
    }

    #[test]
    fn tracef_float() {
        let mem = memory("%f;%f", bytemuck::cast_slice(&[0.473f64, 0.856]));
        assert_eq!("0.473;0.856", tracef(&mem, 0, 64));
    }

    #[test]
    fn tracef_int() {
        let mem = memory("%d;%d", bytemuck::cast_slice(&[4082i32, -8088i32]));
        assert_eq!("4082;-8088", tracef(&mem, 0, 64));
    }

    #[test]
    fn tracef_hex() {
        let mem = memory("%x %x %x", bytemuck::cast_slice(&[255i32, -255, i32::MIN]));
        assert_eq!("ff -ff -80000000", tracef(&mem, 0, 64));
    }

    #[test]
    fn tracef_str() {
        let mut mem = memory("here's your str: '%s'", bytemuck::cast_slice(&[139u32]));
        mem[128..153].copy_from_slice(b"before the inner string!\0");
        assert_eq!(
            "here's your str: 'inner string!'",
            tracef(&mem, 0, 64)
        );
    }

    #[test]
    fn tracef_char() {
        let mem = memory(
            "exclamation mark: %c; ampersand: %c",
            bytemuck::cast_slice(&[b'!' as i32, b'&' as i32]),
        );
        assert_eq!("exclamation mark: !; ampersand: &", tracef(&mem, 0, 64));
    }

    #[test]
    fn tracef_percent_and_unknown() {
        let mem = memory("100%% %q done", &[]);
        assert_eq!("100%  done", tracef(&mem, 0, 64));
    }

    #[test]
    fn tracef_stops_at_missing_arguments() {
        let mem = memory("a %d b", &[]);
        assert_eq!("a ", tracef(&mem, 0, 254));
        assert_eq!("a ", tracef(&mem[..10], 0, 64));
    }

    #[test]
    fn c_string_runs_to_the_end_of_memory() {
        assert_eq!("abc", c_string(b"xabc\0d".as_slice(), 1));
        assert_eq!("abc", c_string(b"abc".as_slice(), 0));
        assert_eq!("", c_string(b"abc".as_slice(), 7));
    }

    #[test]
    fn utf16_decoding() {
        let bytes: Vec<u8> = "héllo 🎮"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!("héllo 🎮", utf16_lossy(&bytes));

        // unpaired surrogate plus a trailing odd byte
        assert_eq!("\u{fffd}a", utf16_lossy(&[0x00, 0xd8, b'a', 0, 0x42]));
    }
}
