//! Export table construction.
//!
//! Assigns ordinals (fresh on a first build, DEF-driven on a rebuild),
//! reconciles the DEF and ELF views of the export surface, and encodes the
//! "holes" left by absent ordinals as the compact export description
//! carried in the extended header.

use crate::common::error::{Diagnostics, Elf2e32Error};
use crate::elf::exports::Symbol;

use super::{EXPORT_DESC_FULL_BITMAP, EXPORT_DESC_NO_HOLES, EXPORT_DESC_SPARSE_BITMAP_8};

/// Assign first-build ordinals: 1..N in the order the ELF presented the
/// exports.
pub fn assign_ordinals(symbols: &mut [Symbol]) {
    for (i, sym) in symbols.iter_mut().enumerate() {
        sym.ordinal = Some(i as u32 + 1);
    }
}

/// Reconcile the ELF export list against a DEF file's frozen ordering.
///
/// The DEF ordinals are authoritative. DEF symbols missing from the ELF
/// become absent entries that keep their slot; ELF symbols the DEF does not
/// know get new ordinals above the frozen range when `unfrozen` is set, and
/// are an error otherwise. Returns the merged list.
pub fn reconcile_with_def(
    elf_exports: &[Symbol],
    def_exports: &[Symbol],
    elf_file: &str,
    unfrozen: bool,
    diag: &mut Diagnostics,
) -> Result<Vec<Symbol>, Elf2e32Error> {
    let mut merged: Vec<Symbol> = Vec::with_capacity(def_exports.len());
    let mut missing: Vec<String> = Vec::new();

    for def_sym in def_exports {
        let mut sym = def_sym.clone();
        match elf_exports.iter().find(|e| e.name == def_sym.name) {
            Some(elf_sym) => {
                sym.value = elf_sym.value;
                sym.size = elf_sym.size;
                sym.kind = elf_sym.kind;
                sym.link_as = elf_sym.link_as.clone();
            }
            None => {
                if !def_sym.absent {
                    missing.push(def_sym.name.clone());
                }
                sym.absent = true;
            }
        }
        merged.push(sym);
    }

    if !missing.is_empty() {
        if unfrozen {
            diag.warning(format!(
                "{} frozen export(s) missing from the ELF file: {}",
                missing.len(),
                missing.join(", ")
            ));
        } else {
            return Err(Elf2e32Error::SymbolMissingFromElf {
                file: elf_file.to_string(),
                symbols: missing.join(", "),
            });
        }
    }

    // new exports the DEF has not frozen yet
    let mut next_ordinal =
        def_exports.iter().filter_map(|s| s.ordinal).max().unwrap_or(0) + 1;
    for elf_sym in elf_exports {
        if def_exports.iter().any(|d| d.name == elf_sym.name) {
            continue;
        }
        if !unfrozen {
            return Err(Elf2e32Error::SymbolMissingFromElf {
                file: elf_file.to_string(),
                symbols: format!("{} (not in DEF file)", elf_sym.name),
            });
        }
        diag.warning(format!("New export {} assigned ordinal {}", elf_sym.name, next_ordinal));
        let mut sym = elf_sym.clone();
        sym.ordinal = Some(next_ordinal);
        next_ordinal += 1;
        merged.push(sym);
    }

    Ok(merged)
}

/// The dense ordinal-indexed export directory: per ordinal, the symbol's
/// code-segment offset, with absent slots trapped at the entry point.
/// Returns (entries, absent bitmap positions).
pub fn export_directory(
    symbols: &[Symbol],
    code_base: u32,
    entry_point_offset: u32,
) -> (Vec<u32>, Vec<bool>) {
    let max_ordinal =
        symbols.iter().filter_map(|s| s.ordinal).max().unwrap_or(0) as usize;
    let mut entries = vec![entry_point_offset; max_ordinal];
    let mut present = vec![false; max_ordinal];
    for sym in symbols {
        let ord = match sym.ordinal {
            Some(o) => o as usize,
            None => continue,
        };
        if sym.absent {
            continue;
        }
        entries[ord - 1] = sym.value.wrapping_sub(code_base);
        present[ord - 1] = true;
    }
    (entries, present)
}

/// The export description encoding which ordinals are present.
pub struct ExportDescription {
    pub desc_type: u8,
    pub bytes: Vec<u8>,
}

/// Choose the most compact description for the presence bitmap: nothing
/// when every ordinal is present, otherwise a sparse meta-bitmap (one bit
/// per bitmap byte, plus the non-full bytes) when that wins, else the full
/// bitmap.
pub fn build_export_description(present: &[bool]) -> ExportDescription {
    let holes = present.iter().filter(|&&p| !p).count();
    if holes == 0 {
        return ExportDescription { desc_type: EXPORT_DESC_NO_HOLES, bytes: Vec::new() };
    }

    let bitmap_size = (present.len() + 7) >> 3;
    let mut bitmap = vec![0xffu8; bitmap_size];
    for (i, &p) in present.iter().enumerate() {
        if !p {
            bitmap[i >> 3] &= !(1 << (i & 7));
        }
    }
    // trailing slack bits beyond the highest ordinal stay set

    let meta_size = (bitmap_size + 7) >> 3;
    let partial_bytes = bitmap.iter().filter(|&&b| b != 0xff).count();

    if meta_size + partial_bytes < bitmap_size {
        let mut bytes = vec![0u8; meta_size + partial_bytes];
        let (meta, grains) = bytes.split_at_mut(meta_size);
        let mut g = 0;
        for (i, &b) in bitmap.iter().enumerate() {
            if b != 0xff {
                meta[i >> 3] |= 1 << (i & 7);
                grains[g] = b;
                g += 1;
            }
        }
        ExportDescription { desc_type: EXPORT_DESC_SPARSE_BITMAP_8, bytes }
    } else {
        ExportDescription { desc_type: EXPORT_DESC_FULL_BITMAP, bytes: bitmap }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::exports::SymbolKind;

    fn sym(name: &str, ordinal: u32) -> Symbol {
        let mut s = Symbol::new(name, SymbolKind::Code);
        s.ordinal = Some(ordinal);
        s
    }

    #[test]
    fn first_build_ordinals_follow_elf_order() {
        let mut symbols =
            vec![Symbol::new("B", SymbolKind::Code), Symbol::new("A", SymbolKind::Code)];
        assign_ordinals(&mut symbols);
        assert_eq!(symbols[0].ordinal, Some(1));
        assert_eq!(symbols[1].ordinal, Some(2));
    }

    #[test]
    fn rebuild_keeps_def_ordinals_and_marks_absentees() {
        let mut diag = Diagnostics::new();
        let mut elf_a = Symbol::new("A", SymbolKind::Code);
        elf_a.value = 0x8020;
        let def = vec![sym("Gone", 1), sym("A", 2)];

        // frozen mode refuses to lose an export
        let err = reconcile_with_def(&[elf_a.clone()], &def, "t.elf", false, &mut diag);
        assert!(matches!(err, Err(Elf2e32Error::SymbolMissingFromElf { .. })));

        // unfrozen mode keeps the slot as absent
        let merged = reconcile_with_def(&[elf_a], &def, "t.elf", true, &mut diag).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged[0].absent);
        assert_eq!(merged[0].ordinal, Some(1));
        assert_eq!(merged[1].value, 0x8020);
    }

    #[test]
    fn rebuild_assigns_new_ordinals_above_frozen_range() {
        let mut diag = Diagnostics::new();
        let elf = vec![Symbol::new("A", SymbolKind::Code), Symbol::new("New", SymbolKind::Code)];
        let def = vec![sym("A", 3)];
        let merged = reconcile_with_def(&elf, &def, "t.elf", true, &mut diag).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].name, "New");
        assert_eq!(merged[1].ordinal, Some(4));

        // and without --unfrozen a new export is an error
        assert!(reconcile_with_def(&elf, &def, "t.elf", false, &mut diag).is_err());
    }

    #[test]
    fn directory_entries_are_code_offsets_with_trapped_holes() {
        let mut a = sym("A", 1);
        a.value = 0x8020;
        let mut gone = sym("Gone", 2);
        gone.absent = true;
        let mut b = sym("B", 4);
        b.value = 0x8100;

        let (entries, present) = export_directory(&[a, gone, b], 0x8000, 0x44);
        assert_eq!(entries, vec![0x20, 0x44, 0x44, 0x100]);
        assert_eq!(present, vec![true, false, false, true]);
    }

    #[test]
    fn description_all_present() {
        let desc = build_export_description(&[true; 17]);
        assert_eq!(desc.desc_type, EXPORT_DESC_NO_HOLES);
        assert!(desc.bytes.is_empty());
    }

    #[test]
    fn description_small_bitmap_stays_full() {
        // 16 ordinals, one hole: full bitmap is 2 bytes, sparse would be
        // meta(1) + grains(1) = 2, not smaller, so full wins
        let mut present = vec![true; 16];
        present[3] = false;
        let desc = build_export_description(&present);
        assert_eq!(desc.desc_type, EXPORT_DESC_FULL_BITMAP);
        assert_eq!(desc.bytes, vec![0xf7, 0xff]);
    }

    #[test]
    fn description_sparse_wins_at_low_hole_density() {
        // 256 ordinals (32 bitmap bytes), a single hole: sparse needs
        // meta(4) + grains(1) = 5 bytes versus 32
        let mut present = vec![true; 256];
        present[9] = false;
        let desc = build_export_description(&present);
        assert_eq!(desc.desc_type, EXPORT_DESC_SPARSE_BITMAP_8);
        assert_eq!(desc.bytes.len(), 4 + 1);
        // bitmap byte 1 is the partial one
        assert_eq!(desc.bytes[0], 0b0000_0010);
        assert_eq!(desc.bytes[4], 0b1111_1101);
    }

    #[test]
    fn description_slack_bits_do_not_count_as_holes() {
        // 9 ordinals, all present: the bitmap's 7 slack bits must not
        // produce a description
        let desc = build_export_description(&[true; 9]);
        assert_eq!(desc.desc_type, EXPORT_DESC_NO_HOLES);
    }
}
