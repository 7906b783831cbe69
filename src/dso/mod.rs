//! DSO import libraries.
//!
//! A DSO is a stripped ELF32 dynamic object standing in for a DLL at link
//! time: its code section holds one 32-bit word per exported symbol, and
//! that word is the symbol's 1-based export ordinal. The reader half
//! resolves an imported symbol name to its ordinal through the DSO named by
//! the import's version record; the writer half produces such a DSO from an
//! export list.

use std::path::Path;

use crate::common::error::{Diagnostics, Elf2e32Error};
use crate::common::{align4, push_u16, push_u32, write_u32};
use crate::elf::exports::{Symbol, SymbolKind};
use crate::elf::image::ElfImage;
use crate::elf::relocations::ElfImports;
use crate::elf::*;

/// One resolved import fix-up: the virtual address of the word to patch and
/// the ordinal to store there.
#[derive(Debug)]
pub struct ResolvedImport {
    pub addr: u32,
    pub ordinal: u32,
}

/// All resolved imports against one DLL, in input order.
#[derive(Debug)]
pub struct ResolvedImportBlock {
    pub dll_name: String,
    pub imports: Vec<ResolvedImport>,
}

/// Locate a DSO file by the SONAME recorded in the version-needed table,
/// searching the working directory and then each `--libpath` entry.
pub fn find_dso_file(soname: &str, lib_paths: &[String]) -> Result<String, Elf2e32Error> {
    let mut candidates: Vec<String> = vec![soname.to_string()];
    if !soname.ends_with(".dso") {
        candidates.push(format!("{}.dso", soname));
    }
    for dir in lib_paths {
        for cand in [soname.to_string(), format!("{}.dso", soname)] {
            candidates.push(format!("{}/{}", dir, cand));
        }
    }
    for cand in &candidates {
        if Path::new(cand).is_file() {
            return Ok(cand.clone());
        }
    }
    Err(Elf2e32Error::FileOpen(soname.to_string()))
}

/// Resolve every import group against its DSO. Each group's DSO is loaded,
/// consulted for all of the group's symbols, and released before the next
/// group is processed.
pub fn resolve_imports(
    imports: &ElfImports,
    lib_paths: &[String],
    diag: &mut Diagnostics,
) -> Result<Vec<ResolvedImportBlock>, Elf2e32Error> {
    let mut blocks = Vec::with_capacity(imports.groups.len());
    for group in &imports.groups {
        let dso_path = find_dso_file(&group.soname, lib_paths)?;
        let dso = ElfImage::read(&dso_path, diag)?;
        let mut resolved = Vec::with_capacity(group.relocs.len());
        for reloc in &group.relocs {
            let ordinal = dso
                .find_symbol(&reloc.symbol_name)
                .and_then(|idx| dso.symbol_ordinal(idx))
                .ok_or_else(|| Elf2e32Error::SymbolNotInDso {
                    dso: dso_path.clone(),
                    symbol: reloc.symbol_name.clone(),
                })?;
            resolved.push(ResolvedImport { addr: reloc.addr, ordinal });
        }
        blocks.push(ResolvedImportBlock { dll_name: group.link_as.clone(), imports: resolved });
    }
    Ok(blocks)
}

// ── DSO emission ────────────────────────────────────────────────────────

const CODE_OFF: usize = 0x100;

/// Produce the import-library bytes for an export list. `dso_name` is the
/// SONAME stamped into the file (normally the DSO's own file name);
/// `dll_name` is the link-as name other modules resolve against.
pub fn build_dso(dso_name: &str, dll_name: &str, symbols: &[Symbol]) -> Vec<u8> {
    let n = symbols.len();
    let code_vaddr = CODE_OFF as u32;

    // code section: the ordinal table itself
    let mut code: Vec<u8> = Vec::with_capacity(n * 4);
    for (i, sym) in symbols.iter().enumerate() {
        push_u32(&mut code, sym.ordinal.unwrap_or(i as u32 + 1));
    }

    // ── dynstr ──
    let mut dynstr: Vec<u8> = vec![0];
    let str_off = |dynstr: &mut Vec<u8>, s: &str| -> u32 {
        let off = dynstr.len() as u32;
        dynstr.extend_from_slice(s.as_bytes());
        dynstr.push(0);
        off
    };
    let dso_name_off = str_off(&mut dynstr, dso_name);
    let dll_name_off = str_off(&mut dynstr, dll_name);
    let sym_name_offs: Vec<u32> =
        symbols.iter().map(|s| str_off(&mut dynstr, &s.name)).collect();

    // ── dynsym: null entry, then one symbol per ordinal word ──
    let mut dynsym: Vec<u8> = Vec::new();
    dynsym.extend_from_slice(&[0u8; SYM_SIZE]);
    for (i, sym) in symbols.iter().enumerate() {
        let st_type = match sym.kind {
            SymbolKind::Code => STT_FUNC,
            SymbolKind::Data => STT_OBJECT,
        };
        push_u32(&mut dynsym, sym_name_offs[i]);
        push_u32(&mut dynsym, code_vaddr + 4 * i as u32);
        push_u32(&mut dynsym, 4);
        dynsym.push((STB_GLOBAL << 4) | st_type);
        dynsym.push(STV_DEFAULT);
        push_u16(&mut dynsym, 1);
    }

    // ── versym: every export bound to the link-as version definition ──
    let mut versym: Vec<u8> = Vec::new();
    push_u16(&mut versym, 0);
    for _ in symbols {
        push_u16(&mut versym, 2);
    }

    // ── verdef: 1 = the DSO itself, 2 = the DLL it links as ──
    let mut verdef: Vec<u8> = Vec::new();
    let def = |verdef: &mut Vec<u8>, ndx: u16, flags: u16, name_off: u32, next: u32| {
        push_u16(verdef, 1);
        push_u16(verdef, flags);
        push_u16(verdef, ndx);
        push_u16(verdef, 1);
        push_u32(verdef, 0);
        push_u32(verdef, 20);
        push_u32(verdef, next);
        push_u32(verdef, name_off);
        push_u32(verdef, 0);
    };
    def(&mut verdef, 1, VER_FLG_BASE, dso_name_off, 28);
    def(&mut verdef, 2, 0, dll_name_off, 0);

    // ── hash: one bucket chaining through all symbols ──
    let n_syms = n + 1;
    let mut hash: Vec<u8> = Vec::new();
    push_u32(&mut hash, 1);
    push_u32(&mut hash, n_syms as u32);
    push_u32(&mut hash, if n_syms > 1 { 1 } else { 0 });
    for i in 0..n_syms {
        let next = if i > 0 && i + 1 < n_syms { (i + 1) as u32 } else { 0 };
        push_u32(&mut hash, next);
    }

    // ── layout ──
    let dynsym_off = align4(CODE_OFF + code.len());
    let dynstr_off = align4(dynsym_off + dynsym.len());
    let versym_off = align4(dynstr_off + dynstr.len());
    let verdef_off = align4(versym_off + versym.len());
    let hash_off = align4(verdef_off + verdef.len());
    let dyn_off = align4(hash_off + hash.len());

    let mut dynamic: Vec<u8> = Vec::new();
    let mut dyn_entry = |tag: u32, val: u32| {
        push_u32(&mut dynamic, tag);
        push_u32(&mut dynamic, val);
    };
    dyn_entry(DT_SONAME, dso_name_off);
    dyn_entry(DT_HASH, hash_off as u32);
    dyn_entry(DT_STRTAB, dynstr_off as u32);
    dyn_entry(DT_STRSZ, dynstr.len() as u32);
    dyn_entry(DT_SYMTAB, dynsym_off as u32);
    dyn_entry(DT_SYMENT, SYM_SIZE as u32);
    dyn_entry(DT_ARM_SYMTABSZ, n_syms as u32);
    dyn_entry(DT_VERSYM, versym_off as u32);
    dyn_entry(DT_VERDEF, verdef_off as u32);
    dyn_entry(DT_VERDEFNUM, 2);
    dyn_entry(DT_NULL, 0);

    // ── sections ──
    let mut shstrtab: Vec<u8> = vec![0];
    let mut sec_name = |s: &str| -> u32 {
        let off = shstrtab.len() as u32;
        shstrtab.extend_from_slice(s.as_bytes());
        shstrtab.push(0);
        off
    };
    let n_es = sec_name("ER_RO");
    let n_dynsym = sec_name(".dynsym");
    let n_dynstr = sec_name(".dynstr");
    let n_versym = sec_name(".version");
    let n_verdef = sec_name(".version_d");
    let n_hash = sec_name(".hash");
    let n_dynamic = sec_name(".dynamic");
    let n_shstrtab = sec_name(".shstrtab");

    let shstrtab_off = align4(dyn_off + dynamic.len());
    let shdr_off = align4(shstrtab_off + shstrtab.len());

    // name, type, flags, addr, off, size, link, info, entsize
    let dynsym_idx = 2u32;
    let dynstr_idx = 3u32;
    let shdrs: Vec<[u32; 9]> = vec![
        [0, SHT_NULL, 0, 0, 0, 0, 0, 0, 0],
        [n_es, SHT_PROGBITS, 0x6, code_vaddr, CODE_OFF as u32, code.len() as u32, 0, 0, 0],
        [
            n_dynsym,
            SHT_DYNSYM,
            0x2,
            dynsym_off as u32,
            dynsym_off as u32,
            dynsym.len() as u32,
            dynstr_idx,
            1,
            SYM_SIZE as u32,
        ],
        [
            n_dynstr,
            SHT_STRTAB,
            0x2,
            dynstr_off as u32,
            dynstr_off as u32,
            dynstr.len() as u32,
            0,
            0,
            0,
        ],
        [
            n_versym,
            SHT_GNU_VERSYM,
            0x2,
            versym_off as u32,
            versym_off as u32,
            versym.len() as u32,
            dynsym_idx,
            0,
            2,
        ],
        [
            n_verdef,
            SHT_GNU_VERDEF,
            0x2,
            verdef_off as u32,
            verdef_off as u32,
            verdef.len() as u32,
            dynstr_idx,
            2,
            0,
        ],
        [
            n_hash,
            SHT_HASH,
            0x2,
            hash_off as u32,
            hash_off as u32,
            hash.len() as u32,
            dynsym_idx,
            0,
            4,
        ],
        [
            n_dynamic,
            SHT_DYNAMIC,
            0x3,
            dyn_off as u32,
            dyn_off as u32,
            dynamic.len() as u32,
            dynstr_idx,
            0,
            8,
        ],
        [n_shstrtab, SHT_STRTAB, 0, 0, shstrtab_off as u32, shstrtab.len() as u32, 0, 0, 0],
    ];

    let total = shdr_off + shdrs.len() * SHDR_SIZE;
    let mut out = vec![0u8; total];

    // ── ELF header ──
    out[0..4].copy_from_slice(&ELF_MAGIC);
    out[4] = ELFCLASS32;
    out[5] = ELFDATA2LSB;
    out[6] = EV_CURRENT as u8;
    let mut h = Vec::new();
    push_u16(&mut h, ET_DYN);
    push_u16(&mut h, EM_ARM);
    push_u32(&mut h, EV_CURRENT);
    push_u32(&mut h, 0); // no entry point
    push_u32(&mut h, EHDR_SIZE as u32);
    push_u32(&mut h, shdr_off as u32);
    push_u32(&mut h, 0x0500_0200); // EABI v5, soft-float
    push_u16(&mut h, EHDR_SIZE as u16);
    push_u16(&mut h, PHDR_SIZE as u16);
    push_u16(&mut h, 2);
    push_u16(&mut h, SHDR_SIZE as u16);
    push_u16(&mut h, shdrs.len() as u16);
    push_u16(&mut h, shdrs.len() as u16 - 1); // .shstrtab is last
    out[16..16 + h.len()].copy_from_slice(&h);

    // ── program headers: the ordinal table as code, plus the dynamic segment ──
    let mut p = EHDR_SIZE;
    for (p_type, off, size, flags) in [
        (PT_LOAD, CODE_OFF as u32, code.len() as u32, PF_R | PF_X),
        (PT_DYNAMIC, dyn_off as u32, dynamic.len() as u32, PF_R),
    ] {
        write_u32(&mut out, p, p_type);
        write_u32(&mut out, p + 4, off);
        write_u32(&mut out, p + 8, off);
        write_u32(&mut out, p + 12, off);
        write_u32(&mut out, p + 16, size);
        write_u32(&mut out, p + 20, size);
        write_u32(&mut out, p + 24, flags);
        write_u32(&mut out, p + 28, 4);
        p += PHDR_SIZE;
    }

    // ── payload ──
    let place = |out: &mut Vec<u8>, off: usize, bytes: &[u8]| {
        out[off..off + bytes.len()].copy_from_slice(bytes);
    };
    place(&mut out, CODE_OFF, &code);
    place(&mut out, dynsym_off, &dynsym);
    place(&mut out, dynstr_off, &dynstr);
    place(&mut out, versym_off, &versym);
    place(&mut out, verdef_off, &verdef);
    place(&mut out, hash_off, &hash);
    place(&mut out, dyn_off, &dynamic);
    place(&mut out, shstrtab_off, &shstrtab);

    // ── section headers ──
    for (i, fields) in shdrs.iter().enumerate() {
        let base = shdr_off + i * SHDR_SIZE;
        for (j, v) in fields.iter().enumerate() {
            write_u32(&mut out, base + j * 4, *v);
        }
    }

    out
}

/// Write a DSO file for an export list.
pub fn write_dso(
    path: &str,
    dso_name: &str,
    dll_name: &str,
    symbols: &[Symbol],
) -> Result<(), Elf2e32Error> {
    let bytes = build_dso(dso_name, dll_name, symbols);
    std::fs::write(path, bytes).map_err(|_| Elf2e32Error::FileWrite(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::Diagnostics;

    fn symbol(name: &str, ordinal: u32, kind: SymbolKind) -> Symbol {
        let mut s = Symbol::new(name, kind);
        s.ordinal = Some(ordinal);
        s
    }

    #[test]
    fn dso_round_trips_through_the_elf_model() {
        let mut diag = Diagnostics::new();
        let symbols = vec![
            symbol("First", 1, SymbolKind::Code),
            symbol("Second", 2, SymbolKind::Data),
            symbol("Third", 7, SymbolKind::Code),
        ];
        let bytes = build_dso("mylib{000a0000}.dso", "mylib{000a0000}.dll", &symbols);
        let dso = ElfImage::parse(bytes, "mylib.dso", &mut diag).unwrap();

        assert_eq!(dso.soname.as_deref(), Some("mylib{000a0000}.dso"));
        for sym in &symbols {
            let idx = dso.find_symbol(&sym.name).unwrap();
            assert_eq!(dso.symbol_ordinal(idx), sym.ordinal);
        }
        assert!(dso.find_symbol("Absent").is_none());

        // the model re-derives the export list with the link-as name
        assert_eq!(dso.exports.len(), 3);
        assert_eq!(
            dso.exports.symbols[0].link_as.as_deref(),
            Some("mylib{000a0000}.dll")
        );
    }

    #[test]
    fn resolves_imports_against_written_dso() {
        let mut diag = Diagnostics::new();
        let dir = std::env::temp_dir().join(format!("elf2e32-dso-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dso_path = dir.join("dep{000a0000}.dso");
        write_dso(
            dso_path.to_str().unwrap(),
            "dep{000a0000}.dso",
            "dep{000a0000}.dll",
            &[symbol("DepFn", 3, SymbolKind::Code)],
        )
        .unwrap();

        let elf = crate::elf::test_elf::ElfBuilder::new()
            .import("DepFn", "dep{000a0000}.dll", "dep{000a0000}.dso", 0x30)
            .build();
        let image = ElfImage::parse(elf, "user.elf", &mut diag).unwrap();
        let blocks = resolve_imports(
            &image.imports,
            &[dir.to_str().unwrap().to_string()],
            &mut diag,
        )
        .unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].dll_name, "dep{000a0000}.dll");
        assert_eq!(blocks[0].imports.len(), 1);
        assert_eq!(blocks[0].imports[0].ordinal, 3);
        assert_eq!(blocks[0].imports[0].addr, image.ro_base() + 0x30);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_symbol_in_dso_is_an_error() {
        let mut diag = Diagnostics::new();
        let dir = std::env::temp_dir().join(format!("elf2e32-dso2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dso_path = dir.join("dep{000a0000}.dso");
        write_dso(
            dso_path.to_str().unwrap(),
            "dep{000a0000}.dso",
            "dep{000a0000}.dll",
            &[symbol("Other", 1, SymbolKind::Code)],
        )
        .unwrap();

        let elf = crate::elf::test_elf::ElfBuilder::new()
            .import("DepFn", "dep{000a0000}.dll", "dep{000a0000}.dso", 0x30)
            .build();
        let image = ElfImage::parse(elf, "user.elf", &mut diag).unwrap();
        let err = resolve_imports(
            &image.imports,
            &[dir.to_str().unwrap().to_string()],
            &mut diag,
        )
        .unwrap_err();
        assert!(matches!(err, Elf2e32Error::SymbolNotInDso { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }
}
