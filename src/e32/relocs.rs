//! Translation of ELF relocations into E32 relocation sections.
//!
//! The output stores one 16-bit word per relocation: the high nibble is the
//! relocation kind (text, data, inferred), the low 12 bits the offset
//! within a 4 KiB page. Words are grouped into page blocks, emitted in
//! ascending page order with ascending offsets inside each block.

use crate::common::{push_u16, push_u32};
use crate::elf::image::ElfImage;
use crate::elf::relocations::{LocalRelocation, SegmentKind};

use super::{RELOC_DATA, RELOC_INFERRED, RELOC_PAGE_SIZE, RELOC_TEXT};

/// E32 relocation kind for a local relocation: decided by the segment of
/// the value being relocated (the referenced symbol's segment, or for
/// symbol-less relative fix-ups the segment the addend points into).
/// Veneer fix-ups always hold code addresses.
pub fn reloc_kind(reloc: &LocalRelocation, image: &ElfImage) -> u16 {
    if reloc.veneer {
        return RELOC_TEXT;
    }
    let value_segment = if reloc.sym_idx != 0 {
        image.segment_type(image.dyn_symbol(reloc.sym_idx as usize).st_value)
    } else {
        image.segment_type(reloc.addend)
    };
    match value_segment {
        SegmentKind::Ro => RELOC_TEXT,
        SegmentKind::Rw => RELOC_DATA,
        SegmentKind::Undefined => RELOC_INFERRED,
    }
}

/// Serialize one relocation section: an 8-byte section header (byte size of
/// the block data, relocation count) followed by the page blocks. Each
/// block is {page offset, block byte size, 16-bit words, zero-padded to a
/// word count multiple of two}. Returns an empty vector when there is
/// nothing to relocate.
pub fn build_reloc_section(relocs: &[(u32, u16)]) -> Vec<u8> {
    if relocs.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<(u32, u16)> = relocs.to_vec();
    sorted.sort_by_key(|&(off, _)| off);

    // cluster into 4 KiB pages
    let mut pages: Vec<(u32, Vec<u16>)> = Vec::new();
    for &(off, kind) in &sorted {
        let page = off & !(RELOC_PAGE_SIZE - 1);
        let word = kind | (off & (RELOC_PAGE_SIZE - 1)) as u16;
        match pages.last_mut() {
            Some((p, words)) if *p == page => words.push(word),
            _ => pages.push((page, vec![word])),
        }
    }

    let mut blocks: Vec<u8> = Vec::new();
    for (page, words) in &pages {
        let padded = words.len() + (words.len() & 1);
        push_u32(&mut blocks, *page);
        push_u32(&mut blocks, (8 + padded * 2) as u32);
        for &w in words {
            push_u16(&mut blocks, w);
        }
        if words.len() & 1 == 1 {
            push_u16(&mut blocks, 0);
        }
    }

    let mut out: Vec<u8> = Vec::with_capacity(8 + blocks.len());
    push_u32(&mut out, blocks.len() as u32);
    push_u32(&mut out, relocs.len() as u32);
    out.extend_from_slice(&blocks);
    out
}
