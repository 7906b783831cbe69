//! Synthetic ARM ELF32 images for tests.
//!
//! Builds a minimal dynamic object the parser accepts: one code segment
//! (identity-mapped, so virtual addresses equal file offsets), an optional
//! data segment, a dynamic table with symbol/version/hash machinery, and
//! optional static-symbol and comment sections for the veneer workaround.

use crate::common::{align4, push_u16, push_u32, write_u32};

use super::exports::SymbolKind;
use super::*;

const CODE_OFF: usize = 0x100;

struct ImportSpec {
    symbol: String,
    link_as: String,
    soname: String,
    fixup_code_off: u32,
}

pub(crate) struct ElfBuilder {
    code: Vec<u8>,
    data: Vec<u8>,
    bss: u32,
    entry_off: u32,
    exports: Vec<(String, u32, SymbolKind)>,
    imports: Vec<ImportSpec>,
    raw_relocs: Vec<(u32, u32, u32)>,
    comment: Option<String>,
    static_syms: Vec<(String, u32)>,
    link_as: String,
    soname: String,
    versym_zero_for_imports: bool,
}

impl ElfBuilder {
    pub fn new() -> ElfBuilder {
        let mut code = vec![0u8; 0x100];
        // default entry stub: the 'tst pc, #n' marker the validator accepts
        write_u32(&mut code, 0, 0xE31F_0004);
        ElfBuilder {
            code,
            data: Vec::new(),
            bss: 0,
            entry_off: 0,
            exports: Vec::new(),
            imports: Vec::new(),
            raw_relocs: Vec::new(),
            comment: None,
            static_syms: Vec::new(),
            link_as: "test{000a0000}.dll".to_string(),
            soname: "test{000a0000}.dso".to_string(),
            versym_zero_for_imports: false,
        }
    }

    pub fn code_word(mut self, off: usize, value: u32) -> Self {
        if self.code.len() < off + 4 {
            self.code.resize(off + 4, 0);
        }
        write_u32(&mut self.code, off, value);
        self
    }

    pub fn data_bytes(mut self, bytes: &[u8]) -> Self {
        self.data = bytes.to_vec();
        self
    }

    pub fn bss(mut self, size: u32) -> Self {
        self.bss = size;
        self
    }

    pub fn export(mut self, name: &str, code_off: u32, kind: SymbolKind) -> Self {
        self.exports.push((name.to_string(), code_off, kind));
        self
    }

    pub fn import(mut self, symbol: &str, link_as: &str, soname: &str, fixup_off: u32) -> Self {
        self.imports.push(ImportSpec {
            symbol: symbol.to_string(),
            link_as: link_as.to_string(),
            soname: soname.to_string(),
            fixup_code_off: fixup_off,
        });
        self
    }

    /// A local relocation entry with an arbitrary type against symbol 0.
    pub fn raw_reloc(mut self, code_off: u32, rel_type: u32, sym_idx: u32) -> Self {
        self.raw_relocs.push((code_off, rel_type, sym_idx));
        self
    }

    pub fn comment(mut self, text: &str) -> Self {
        self.comment = Some(text.to_string());
        self
    }

    /// Lay down a veneer body at `code_off` (instruction word, then the
    /// target word) and a static symbol naming it.
    pub fn veneer(mut self, name: &str, code_off: u32, instruction: u32, target: u32) -> Self {
        self = self.code_word(code_off as usize, instruction);
        self = self.code_word(code_off as usize + 4, target);
        self.static_syms.push((name.to_string(), CODE_OFF as u32 + code_off));
        self
    }

    /// Point import versym entries at no version record, so imported
    /// symbols lose their version-needed coverage.
    pub fn strip_version_needed(mut self) -> Self {
        self.versym_zero_for_imports = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let has_data = !self.data.is_empty() || self.bss > 0;
        let code_vaddr = CODE_OFF as u32;
        let data_off = align4(CODE_OFF + self.code.len());
        let data_vaddr = data_off as u32;

        // unique DSOs in first-reference order
        let mut dsos: Vec<(String, String)> = Vec::new();
        for imp in &self.imports {
            if !dsos.iter().any(|(s, _)| *s == imp.soname) {
                dsos.push((imp.soname.clone(), imp.link_as.clone()));
            }
        }

        // ── dynstr ──
        let mut dynstr: Vec<u8> = vec![0];
        let str_off = |dynstr: &mut Vec<u8>, s: &str| -> u32 {
            let off = dynstr.len() as u32;
            dynstr.extend_from_slice(s.as_bytes());
            dynstr.push(0);
            off
        };
        let soname_off = str_off(&mut dynstr, &self.soname);
        let linkas_off = str_off(&mut dynstr, &self.link_as);
        let export_name_offs: Vec<u32> =
            self.exports.iter().map(|(n, _, _)| str_off(&mut dynstr, n)).collect();
        let import_name_offs: Vec<u32> =
            self.imports.iter().map(|i| str_off(&mut dynstr, &i.symbol)).collect();
        let dso_offs: Vec<(u32, u32)> = dsos
            .iter()
            .map(|(soname, link_as)| {
                (str_off(&mut dynstr, soname), str_off(&mut dynstr, link_as))
            })
            .collect();

        // ── dynsym: null, exports, imports ──
        let n_syms = 1 + self.exports.len() + self.imports.len();
        let mut dynsym: Vec<u8> = Vec::new();
        dynsym.extend_from_slice(&[0u8; SYM_SIZE]);
        for (i, (_, code_off, kind)) in self.exports.iter().enumerate() {
            let st_type = match kind {
                SymbolKind::Code => STT_FUNC,
                SymbolKind::Data => STT_OBJECT,
            };
            push_u32(&mut dynsym, export_name_offs[i]);
            push_u32(&mut dynsym, code_vaddr + code_off);
            push_u32(&mut dynsym, 4); // st_size
            dynsym.push((STB_GLOBAL << 4) | st_type);
            dynsym.push(STV_DEFAULT);
            push_u16(&mut dynsym, 1); // defined section index
        }
        for (i, _) in self.imports.iter().enumerate() {
            push_u32(&mut dynsym, import_name_offs[i]);
            push_u32(&mut dynsym, 0);
            push_u32(&mut dynsym, 0);
            dynsym.push((STB_GLOBAL << 4) | STT_FUNC);
            dynsym.push(STV_DEFAULT);
            push_u16(&mut dynsym, SHN_UNDEF);
        }

        // ── versym ──
        let mut versym: Vec<u8> = Vec::new();
        push_u16(&mut versym, 0);
        for _ in &self.exports {
            push_u16(&mut versym, 1);
        }
        for imp in &self.imports {
            if self.versym_zero_for_imports {
                push_u16(&mut versym, 0);
            } else {
                let dso_idx = dsos.iter().position(|(s, _)| *s == imp.soname).unwrap();
                push_u16(&mut versym, 2 + dso_idx as u16);
            }
        }

        // ── verdef (index 1 = this module's link-as name) ──
        let mut verdef: Vec<u8> = Vec::new();
        if !self.exports.is_empty() {
            push_u16(&mut verdef, 1); // vd_version
            push_u16(&mut verdef, VER_FLG_BASE);
            push_u16(&mut verdef, 1); // vd_ndx
            push_u16(&mut verdef, 1); // vd_cnt
            push_u32(&mut verdef, 0); // vd_hash
            push_u32(&mut verdef, 20); // vd_aux
            push_u32(&mut verdef, 0); // vd_next
            push_u32(&mut verdef, linkas_off);
            push_u32(&mut verdef, 0);
        }

        // ── verneed (one record per DSO, version index 2+i) ──
        let mut verneed: Vec<u8> = Vec::new();
        for (i, (soname_str_off, linkas_str_off)) in dso_offs.iter().enumerate() {
            let last = i + 1 == dso_offs.len();
            push_u16(&mut verneed, 1); // vn_version
            push_u16(&mut verneed, 1); // vn_cnt
            push_u32(&mut verneed, *soname_str_off); // vn_file
            push_u32(&mut verneed, 16); // vn_aux
            push_u32(&mut verneed, if last { 0 } else { 32 }); // vn_next
            push_u32(&mut verneed, 0); // vna_hash
            push_u16(&mut verneed, 0); // vna_flags
            push_u16(&mut verneed, 2 + i as u16); // vna_other
            push_u32(&mut verneed, *linkas_str_off); // vna_name
            push_u32(&mut verneed, 0); // vna_next
        }

        // ── hash: single bucket chaining through every symbol ──
        let mut hash: Vec<u8> = Vec::new();
        push_u32(&mut hash, 1); // nbuckets
        push_u32(&mut hash, n_syms as u32); // nchains
        push_u32(&mut hash, if n_syms > 1 { 1 } else { 0 });
        for i in 0..n_syms {
            let next = if i > 0 && i + 1 < n_syms { (i + 1) as u32 } else { 0 };
            push_u32(&mut hash, next);
        }

        // ── relocation table ──
        let mut rel: Vec<u8> = Vec::new();
        for (i, imp) in self.imports.iter().enumerate() {
            let sym_idx = (1 + self.exports.len() + i) as u32;
            push_u32(&mut rel, code_vaddr + imp.fixup_code_off);
            push_u32(&mut rel, (sym_idx << 8) | R_ARM_ABS32);
        }
        for (code_off, rel_type, sym_idx) in &self.raw_relocs {
            push_u32(&mut rel, code_vaddr + code_off);
            push_u32(&mut rel, (sym_idx << 8) | rel_type);
        }

        // ── layout ──
        let dynsym_off = align4(data_off + self.data.len());
        let dynstr_off = align4(dynsym_off + dynsym.len());
        let versym_off = align4(dynstr_off + dynstr.len());
        let verdef_off = align4(versym_off + versym.len());
        let verneed_off = align4(verdef_off + verdef.len());
        let hash_off = align4(verneed_off + verneed.len());
        let rel_off = align4(hash_off + hash.len());
        let dyn_off = align4(rel_off + rel.len());

        // ── dynamic table ──
        let mut dynamic: Vec<u8> = Vec::new();
        let mut dyn_entry = |tag: u32, val: u32| {
            push_u32(&mut dynamic, tag);
            push_u32(&mut dynamic, val);
        };
        dyn_entry(DT_SONAME, soname_off);
        dyn_entry(DT_HASH, hash_off as u32);
        dyn_entry(DT_STRTAB, dynstr_off as u32);
        dyn_entry(DT_STRSZ, dynstr.len() as u32);
        dyn_entry(DT_SYMTAB, dynsym_off as u32);
        dyn_entry(DT_SYMENT, SYM_SIZE as u32);
        dyn_entry(DT_ARM_SYMTABSZ, n_syms as u32);
        if !rel.is_empty() {
            dyn_entry(DT_REL, rel_off as u32);
            dyn_entry(DT_RELSZ, rel.len() as u32);
            dyn_entry(DT_RELENT, 8);
        }
        dyn_entry(DT_VERSYM, versym_off as u32);
        if !verdef.is_empty() {
            dyn_entry(DT_VERDEF, verdef_off as u32);
            dyn_entry(DT_VERDEFNUM, 1);
        }
        if !verneed.is_empty() {
            dyn_entry(DT_VERNEED, verneed_off as u32);
            dyn_entry(DT_VERNEEDNUM, dsos.len() as u32);
        }
        for (soname_str_off, _) in &dso_offs {
            dyn_entry(DT_NEEDED, *soname_str_off);
        }
        dyn_entry(DT_NULL, 0);

        // ── sections: null, .shstrtab, [.comment], [.symtab, .strtab] ──
        let mut shstrtab: Vec<u8> = vec![0];
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        let comment_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".comment\0");
        let symtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".symtab\0");
        let strtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".strtab\0");

        let mut strtab: Vec<u8> = vec![0];
        let mut symtab: Vec<u8> = Vec::new();
        if !self.static_syms.is_empty() {
            symtab.extend_from_slice(&[0u8; SYM_SIZE]);
            for (name, vaddr) in &self.static_syms {
                let name_off = strtab.len() as u32;
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);
                push_u32(&mut symtab, name_off);
                push_u32(&mut symtab, *vaddr);
                push_u32(&mut symtab, 0);
                symtab.push((STB_GLOBAL << 4) | STT_FUNC);
                symtab.push(STV_DEFAULT);
                push_u16(&mut symtab, 1);
            }
        }
        let comment = self.comment.as_deref().unwrap_or("").as_bytes().to_vec();

        let shstrtab_off = align4(dyn_off + dynamic.len());
        let comment_off = align4(shstrtab_off + shstrtab.len());
        let symtab_off = align4(comment_off + comment.len());
        let strtab_off = align4(symtab_off + symtab.len());
        let shdr_off = align4(strtab_off + strtab.len());

        let mut shdrs: Vec<(u32, u32, u32, u32, u32)> = Vec::new(); // name, type, off, size, entsize
        shdrs.push((0, SHT_NULL, 0, 0, 0));
        shdrs.push((shstrtab_name, SHT_STRTAB, shstrtab_off as u32, shstrtab.len() as u32, 0));
        if !comment.is_empty() {
            shdrs.push((comment_name, SHT_PROGBITS, comment_off as u32, comment.len() as u32, 0));
        }
        if !symtab.is_empty() {
            shdrs.push((symtab_name, SHT_SYMTAB, symtab_off as u32, symtab.len() as u32, SYM_SIZE as u32));
            shdrs.push((strtab_name, SHT_STRTAB, strtab_off as u32, strtab.len() as u32, 0));
        }

        let total = shdr_off + shdrs.len() * SHDR_SIZE;
        let mut out = vec![0u8; total];

        // ── ELF header ──
        out[0..4].copy_from_slice(&ELF_MAGIC);
        out[4] = ELFCLASS32;
        out[5] = ELFDATA2LSB;
        out[6] = EV_CURRENT as u8;
        let n_phdrs: u16 = if has_data { 3 } else { 2 };
        let mut h = Vec::new();
        push_u16(&mut h, ET_DYN);
        push_u16(&mut h, EM_ARM);
        push_u32(&mut h, EV_CURRENT);
        push_u32(&mut h, code_vaddr + self.entry_off); // e_entry
        push_u32(&mut h, EHDR_SIZE as u32); // e_phoff
        push_u32(&mut h, shdr_off as u32); // e_shoff
        push_u32(&mut h, 0x0500_0200); // e_flags: EABI v5, soft-float
        push_u16(&mut h, EHDR_SIZE as u16);
        push_u16(&mut h, PHDR_SIZE as u16);
        push_u16(&mut h, n_phdrs);
        push_u16(&mut h, SHDR_SIZE as u16);
        push_u16(&mut h, shdrs.len() as u16);
        push_u16(&mut h, 1); // e_shstrndx
        out[16..16 + h.len()].copy_from_slice(&h);

        // ── program headers ──
        let mut p = EHDR_SIZE;
        let phdr = |out: &mut Vec<u8>,
                        p: &mut usize,
                        p_type: u32,
                        off: u32,
                        vaddr: u32,
                        filesz: u32,
                        memsz: u32,
                        flags: u32| {
            write_u32(out, *p, p_type);
            write_u32(out, *p + 4, off);
            write_u32(out, *p + 8, vaddr);
            write_u32(out, *p + 12, vaddr);
            write_u32(out, *p + 16, filesz);
            write_u32(out, *p + 20, memsz);
            write_u32(out, *p + 24, flags);
            write_u32(out, *p + 28, 4);
            *p += PHDR_SIZE;
        };
        phdr(
            &mut out,
            &mut p,
            PT_LOAD,
            CODE_OFF as u32,
            code_vaddr,
            self.code.len() as u32,
            self.code.len() as u32,
            PF_R | PF_X | PF_ARM_ENTRY,
        );
        if has_data {
            phdr(
                &mut out,
                &mut p,
                PT_LOAD,
                data_off as u32,
                data_vaddr,
                self.data.len() as u32,
                self.data.len() as u32 + self.bss,
                PF_R | PF_W,
            );
        }
        phdr(
            &mut out,
            &mut p,
            PT_DYNAMIC,
            dyn_off as u32,
            dyn_off as u32,
            dynamic.len() as u32,
            dynamic.len() as u32,
            PF_R,
        );

        // ── payload blocks ──
        let place = |out: &mut Vec<u8>, off: usize, bytes: &[u8]| {
            out[off..off + bytes.len()].copy_from_slice(bytes);
        };
        place(&mut out, CODE_OFF, &self.code);
        place(&mut out, data_off, &self.data);
        place(&mut out, dynsym_off, &dynsym);
        place(&mut out, dynstr_off, &dynstr);
        place(&mut out, versym_off, &versym);
        place(&mut out, verdef_off, &verdef);
        place(&mut out, verneed_off, &verneed);
        place(&mut out, hash_off, &hash);
        place(&mut out, rel_off, &rel);
        place(&mut out, dyn_off, &dynamic);
        place(&mut out, shstrtab_off, &shstrtab);
        place(&mut out, comment_off, &comment);
        place(&mut out, symtab_off, &symtab);
        place(&mut out, strtab_off, &strtab);

        // ── section headers ──
        for (i, (name, sh_type, off, size, entsize)) in shdrs.iter().enumerate() {
            let base = shdr_off + i * SHDR_SIZE;
            write_u32(&mut out, base, *name);
            write_u32(&mut out, base + 4, *sh_type);
            write_u32(&mut out, base + 16, *off);
            write_u32(&mut out, base + 20, *size);
            write_u32(&mut out, base + 36, *entsize);
        }

        out
    }
}
