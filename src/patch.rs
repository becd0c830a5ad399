//! Binary rewriting of cart modules.
//!
//! State snapshots can only reach globals a module exports. [`export_globals`]
//! appends an export for every global that is not exported yet, touching
//! nothing but the export section.

use std::borrow::Cow;

use log::debug;

use crate::error::PatchError;

const MAGIC: &[u8; 4] = b"\0asm";
const VERSION: u32 = 1;

const SECTION_IMPORT: u8 = 2;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;

const EXTERNAL_FUNC: u8 = 0;
const EXTERNAL_TABLE: u8 = 1;
const EXTERNAL_MEMORY: u8 = 2;
const EXTERNAL_GLOBAL: u8 = 3;
const EXTERNAL_TAG: u8 = 4;

/// Sections that come before the export section in a valid module.
const SECTIONS_BEFORE_EXPORT: [u8; 7] = [1, 2, 3, 4, 5, 13, 6];

/// Name of the export added for global `index`.
pub fn global_export_name(index: u32) -> String {
    format!("__global_{index}")
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn byte(&mut self) -> Result<u8, PatchError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(PatchError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn skip(&mut self, len: usize) -> Result<(), PatchError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(PatchError::UnexpectedEof(self.data.len()))?;
        self.pos = end;
        Ok(())
    }

    fn leb128_u32(&mut self) -> Result<u32, PatchError> {
        let start = self.pos;
        let mut result: u64 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.byte()?;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return u32::try_from(result).map_err(|_| PatchError::MalformedLeb128(start));
            }
        }
        Err(PatchError::MalformedLeb128(start))
    }

    fn name(&mut self) -> Result<(), PatchError> {
        let len = self.leb128_u32()?;
        self.skip(len as usize)
    }

    fn limits(&mut self) -> Result<(), PatchError> {
        let flags = self.byte()?;
        self.leb128_u32()?;
        if flags & 1 != 0 {
            self.leb128_u32()?;
        }
        Ok(())
    }
}

fn write_leb128_u32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let low = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(low);
            return;
        }
        out.push(low | 0x80);
    }
}

#[derive(Debug, Clone, Copy)]
struct Section {
    id: u8,
    /// Offset of the section id byte.
    start: usize,
    /// Offset of the first payload byte.
    payload: usize,
    /// Offset just past the payload.
    end: usize,
}

fn sections(module: &[u8]) -> Result<Vec<Section>, PatchError> {
    if module.len() < 8 || &module[0..4] != MAGIC {
        return Err(PatchError::BadMagic);
    }
    let version = u32::from_le_bytes([module[4], module[5], module[6], module[7]]);
    if version != VERSION {
        return Err(PatchError::UnsupportedVersion(version));
    }

    let mut sections = Vec::new();
    let mut reader = Reader::new(module, 8);
    while reader.pos < module.len() {
        let start = reader.pos;
        let id = reader.byte()?;
        let size = reader.leb128_u32()? as usize;
        let payload = reader.pos;
        reader.skip(size)?;
        sections.push(Section {
            id,
            start,
            payload,
            end: reader.pos,
        });
    }
    Ok(sections)
}

fn imported_globals(module: &[u8], section: &Section) -> Result<u32, PatchError> {
    let mut reader = Reader::new(&module[..section.end], section.payload);
    let count = reader.leb128_u32()?;
    let mut globals = 0;
    for _ in 0..count {
        reader.name()?;
        reader.name()?;
        match reader.byte()? {
            EXTERNAL_FUNC => {
                reader.leb128_u32()?;
            }
            EXTERNAL_TABLE => {
                reader.byte()?;
                reader.limits()?;
            }
            EXTERNAL_MEMORY => reader.limits()?,
            EXTERNAL_GLOBAL => {
                reader.byte()?;
                reader.byte()?;
                globals += 1;
            }
            EXTERNAL_TAG => {
                reader.byte()?;
                reader.leb128_u32()?;
            }
            _ => {
                return Err(PatchError::MalformedSection {
                    id: section.id,
                    offset: section.start,
                })
            }
        }
    }
    Ok(globals)
}

/// Parsed export section: its entries as raw bytes plus the exported global indices.
fn exports<'a>(
    module: &'a [u8],
    section: &Section,
) -> Result<(u32, &'a [u8], Vec<u32>), PatchError> {
    let mut reader = Reader::new(&module[..section.end], section.payload);
    let count = reader.leb128_u32()?;
    let entries_start = reader.pos;
    let mut exported = Vec::new();
    for _ in 0..count {
        reader.name()?;
        let kind = reader.byte()?;
        let index = reader.leb128_u32()?;
        if kind == EXTERNAL_GLOBAL {
            exported.push(index);
        }
    }
    if reader.pos != section.end {
        return Err(PatchError::MalformedSection {
            id: section.id,
            offset: section.start,
        });
    }
    Ok((count, &module[entries_start..section.end], exported))
}

/// Export every global of `module` that is not exported yet.
///
/// Imported globals count too. A module with nothing to add is returned
/// as it is.
pub fn export_globals(module: &[u8]) -> Result<Cow<'_, [u8]>, PatchError> {
    let sections = sections(module)?;

    let mut global_count: u32 = 0;
    for section in &sections {
        match section.id {
            SECTION_IMPORT => global_count += imported_globals(module, section)?,
            SECTION_GLOBAL => {
                global_count += Reader::new(&module[..section.end], section.payload).leb128_u32()?
            }
            _ => {}
        }
    }

    let export_section = sections.iter().find(|s| s.id == SECTION_EXPORT);
    let (export_count, entries, exported) = match export_section {
        Some(section) => exports(module, section)?,
        None => (0, &module[0..0], Vec::new()),
    };

    let missing: Vec<u32> = (0..global_count)
        .filter(|index| !exported.contains(index))
        .collect();
    if missing.is_empty() {
        return Ok(Cow::Borrowed(module));
    }
    debug!("exporting {} hidden globals", missing.len());

    let mut payload = Vec::with_capacity(entries.len() + missing.len() * 16);
    write_leb128_u32(&mut payload, export_count + missing.len() as u32);
    payload.extend_from_slice(entries);
    for index in missing {
        let name = global_export_name(index);
        write_leb128_u32(&mut payload, name.len() as u32);
        payload.extend_from_slice(name.as_bytes());
        payload.push(EXTERNAL_GLOBAL);
        write_leb128_u32(&mut payload, index);
    }

    let mut new_section = vec![SECTION_EXPORT];
    write_leb128_u32(&mut new_section, payload.len() as u32);
    new_section.extend_from_slice(&payload);

    // splice the new section over the old one, or right behind the
    // last section that has to precede it
    let (cut_start, cut_end) = match export_section {
        Some(section) => (section.start, section.end),
        None => {
            let at = sections
                .iter()
                .filter(|s| SECTIONS_BEFORE_EXPORT.contains(&s.id))
                .map(|s| s.end)
                .last()
                .unwrap_or(8);
            (at, at)
        }
    };

    let mut patched = Vec::with_capacity(module.len() + new_section.len());
    patched.extend_from_slice(&module[..cut_start]);
    patched.extend_from_slice(&new_section);
    patched.extend_from_slice(&module[cut_end..]);
    Ok(Cow::Owned(patched))
}
