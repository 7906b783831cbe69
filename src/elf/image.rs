//! In-memory model of an ARM ELF32 dynamic object.
//!
//! The raw file stays in one immutable byte buffer; every decoded table is
//! an offset into it, checked when the table is located. Parsing walks the
//! program headers to classify the code and data segments, the dynamic
//! table for the symbol/version/relocation machinery, and then materializes
//! the export list, the import groups and the local relocations.

use std::fs::File;
use std::io::Read;

use crate::common::error::{Diagnostics, Elf2e32Error};
use crate::common::{bytes_at, read_cstr, read_u16, read_u32};

use super::exports::{ElfExports, Symbol, SymbolKind};
use super::relocations::{
    valid_reloc_type, ElfImports, ImportRelocation, LocalRelocation, LocalRelocations, SegmentKind,
};
use super::*;

/// Some hosts limit single I/O transfers; read the input in bounded chunks.
const MAX_IO_CHUNK: usize = 32 * 1024 * 1024;

/// Name of the static symbol carrying the C++ exception descriptor.
pub const EXCEPTION_DESCRIPTOR_SYMBOL: &str = "Symbian$$CPP$$Exception$$Descriptor";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerCategory {
    None,
    Defined,
    Needed,
}

#[derive(Clone, Debug)]
pub struct VersionInfo {
    pub soname: Option<String>,
    pub link_as: Option<String>,
    pub category: VerCategory,
}

impl Default for VersionInfo {
    fn default() -> Self {
        VersionInfo { soname: None, link_as: None, category: VerCategory::None }
    }
}

pub struct ElfImage {
    pub name: String,
    pub data: Vec<u8>,
    pub header: Elf32Ehdr,
    sections: Vec<Elf32Shdr>,
    phdrs: Vec<Elf32Phdr>,
    shstr_off: usize,

    code_phdr: Option<usize>,
    data_phdr: Option<usize>,

    dynsym_off: usize,
    dynstr_off: usize,
    dynstr_size: usize,
    sym_count: usize,
    sym_ent: usize,
    hash_off: Option<usize>,
    versym_off: Option<usize>,
    pub soname: Option<String>,
    pub needed: Vec<String>,
    version_info: Vec<VersionInfo>,

    rel_tables: RelTables,

    pub exports: ElfExports,
    pub imports: ElfImports,
    pub locals: LocalRelocations,
}

impl ElfImage {
    /// Read and parse an ELF file from disk.
    pub fn read(path: &str, diag: &mut Diagnostics) -> Result<ElfImage, Elf2e32Error> {
        let data = read_file(path)?;
        ElfImage::parse(data, path, diag)
    }

    pub fn parse(
        data: Vec<u8>,
        name: &str,
        diag: &mut Diagnostics,
    ) -> Result<ElfImage, Elf2e32Error> {
        let file = name.to_string();
        if data.len() < EHDR_SIZE {
            return Err(Elf2e32Error::ElfTruncated(file));
        }
        if data[0..4] != ELF_MAGIC {
            return Err(Elf2e32Error::ElfMagic(file));
        }
        if data[4] != ELFCLASS32 {
            return Err(Elf2e32Error::ElfClass(file));
        }
        if data[5] != ELFDATA2LSB {
            return Err(Elf2e32Error::ElfEndianness(file));
        }
        let header = Elf32Ehdr::parse(&data);
        if header.e_type != ET_EXEC && header.e_type != ET_DYN {
            return Err(Elf2e32Error::ElfExecutable(file));
        }

        // section header table
        let mut sections = Vec::with_capacity(header.e_shnum as usize);
        let shent = (header.e_shentsize as usize).max(SHDR_SIZE);
        for i in 0..header.e_shnum as usize {
            let off = header.e_shoff as usize + i * shent;
            if bytes_at(&data, off, SHDR_SIZE).is_none() {
                return Err(Elf2e32Error::ElfTruncated(file));
            }
            sections.push(Elf32Shdr::parse(&data, off));
        }
        let shstr_off = if header.e_shstrndx != SHN_UNDEF {
            if header.e_shstrndx >= header.e_shnum {
                return Err(Elf2e32Error::ElfShStrIndex(file));
            }
            sections[header.e_shstrndx as usize].sh_offset as usize
        } else {
            0
        };

        // program header table
        let mut phdrs = Vec::with_capacity(header.e_phnum as usize);
        let phent = (header.e_phentsize as usize).max(PHDR_SIZE);
        for i in 0..header.e_phnum as usize {
            let off = header.e_phoff as usize + i * phent;
            if bytes_at(&data, off, PHDR_SIZE).is_none() {
                return Err(Elf2e32Error::ElfTruncated(file));
            }
            phdrs.push(Elf32Phdr::parse(&data, off));
        }

        let mut image = ElfImage {
            name: file,
            data,
            header,
            sections,
            phdrs,
            shstr_off,
            code_phdr: None,
            data_phdr: None,
            dynsym_off: 0,
            dynstr_off: 0,
            dynstr_size: 0,
            sym_count: 0,
            sym_ent: SYM_SIZE,
            hash_off: None,
            versym_off: None,
            soname: None,
            needed: Vec::new(),
            version_info: Vec::new(),
            rel_tables: RelTables::default(),
            exports: ElfExports::default(),
            imports: ElfImports::default(),
            locals: LocalRelocations::default(),
        };

        let mut dyn_phdr = None;
        for (idx, phdr) in image.phdrs.iter().enumerate() {
            match phdr.p_type {
                PT_DYNAMIC => dyn_phdr = Some(idx),
                PT_LOAD => {
                    if phdr.p_flags & (PF_X | PF_ARM_ENTRY) != 0 {
                        if image.code_phdr.is_none() {
                            image.code_phdr = Some(idx);
                        }
                    } else if phdr.p_flags & (PF_W | PF_R) != 0 && image.data_phdr.is_none() {
                        image.data_phdr = Some(idx);
                    }
                }
                _ => {}
            }
        }

        if let Some(dyn_idx) = dyn_phdr {
            image.process_dynamic_entries(dyn_idx)?;
            image.process_symbols()?;
            image.process_relocations()?;
            image.process_veneers(diag);
        }
        Ok(image)
    }

    // ── Dynamic table ───────────────────────────────────────────────────

    fn process_dynamic_entries(&mut self, dyn_idx: usize) -> Result<(), Elf2e32Error> {
        let seg = self.phdrs[dyn_idx];
        let base = seg.p_offset as usize;
        let limit = base + seg.p_filesz as usize;

        let mut needed_offs: Vec<u32> = Vec::new();
        let mut soname_off: Option<u32> = None;
        let mut rel: Option<(usize, usize)> = None;
        let mut rela: Option<(usize, usize)> = None;
        let mut rel_ent = 8usize;
        let mut rela_ent = 12usize;
        let mut plt_rel_size = 0usize;
        let mut plt_rel_type: Option<u32> = None;
        let mut jmp_rel_off: Option<usize> = None;
        let mut verdef: Option<usize> = None;
        let mut verdef_count = 0usize;
        let mut verneed: Option<usize> = None;
        let mut verneed_count = 0usize;

        let mut off = base;
        while off + DYN_SIZE <= limit && off + DYN_SIZE <= self.data.len() {
            let tag = read_u32(&self.data, off);
            let val = read_u32(&self.data, off + 4);
            off += DYN_SIZE;
            match tag {
                DT_NULL => break,
                DT_NEEDED => needed_offs.push(val),
                DT_HASH => self.hash_off = Some(val as usize),
                DT_STRTAB => self.dynstr_off = val as usize,
                DT_STRSZ => self.dynstr_size = val as usize,
                DT_SYMTAB => self.dynsym_off = val as usize,
                DT_SYMENT => self.sym_ent = (val as usize).max(SYM_SIZE),
                DT_REL => rel = Some((val as usize, rel.map(|r: (usize, usize)| r.1).unwrap_or(0))),
                DT_RELSZ => rel = Some((rel.map(|r| r.0).unwrap_or(0), val as usize)),
                DT_RELENT => rel_ent = (val as usize).max(8),
                DT_RELA => {
                    rela = Some((val as usize, rela.map(|r: (usize, usize)| r.1).unwrap_or(0)))
                }
                DT_RELASZ => rela = Some((rela.map(|r| r.0).unwrap_or(0), val as usize)),
                DT_RELAENT => rela_ent = (val as usize).max(12),
                DT_SONAME => soname_off = Some(val),
                DT_VERSYM => self.versym_off = Some(val as usize),
                DT_VERDEF => verdef = Some(val as usize),
                DT_VERDEFNUM => verdef_count = val as usize,
                DT_VERNEED => verneed = Some(val as usize),
                DT_VERNEEDNUM => verneed_count = val as usize,
                DT_PLTRELSZ => plt_rel_size = val as usize,
                DT_PLTREL => plt_rel_type = Some(val),
                DT_JMPREL => jmp_rel_off = Some(val as usize),
                DT_ARM_SYMTABSZ => self.sym_count = val as usize,
                // PLTGOT base/limit and the remaining standard tags carry
                // nothing the post-link step needs
                DT_PLTGOT | DT_ARM_PLTGOTBASE | DT_ARM_PLTGOTLIMIT => {}
                _ => {}
            }
        }

        if let Some(off) = soname_off {
            self.soname = Some(self.dynstr(off));
        }
        for name_off in needed_offs {
            let s = self.dynstr(name_off);
            self.needed.push(s);
        }

        if verdef_count + verneed_count > 0 {
            self.process_version_info(verdef, verneed);
        }

        if let Some(hash_off) = self.hash_off {
            if bytes_at(&self.data, hash_off, 8).is_none() {
                return Err(Elf2e32Error::ElfTruncated(self.name.clone()));
            }
            let n_chains = read_u32(&self.data, hash_off + 4) as usize;
            // the chain count is by construction the symbol count
            if self.sym_count != 0 && self.sym_count != n_chains {
                return Err(Elf2e32Error::SymbolCountMismatch(self.name.clone()));
            }
            self.sym_count = n_chains;
        }

        // A PLT relocation table overlapping the main table carries no new
        // information; drop it.
        self.rel_tables = RelTables::default();
        if let Some((off, size)) = rel {
            if size > 0 {
                self.rel_tables.rel = Some(RelTable { off, size, ent: rel_ent, rela: false });
            }
        }
        if let Some((off, size)) = rela {
            if size > 0 {
                self.rel_tables.rela = Some(RelTable { off, size, ent: rela_ent, rela: true });
            }
        }
        if let (Some(plt_type), Some(plt_off)) = (plt_rel_type, jmp_rel_off) {
            if plt_rel_size > 0 {
                if plt_type == DT_REL {
                    let covered = self
                        .rel_tables
                        .rel
                        .map(|t| t.off <= plt_off && plt_off < t.off + t.size)
                        .unwrap_or(false);
                    if !covered {
                        self.rel_tables.plt =
                            Some(RelTable { off: plt_off, size: plt_rel_size, ent: rel_ent, rela: false });
                    }
                } else {
                    let covered = self
                        .rel_tables
                        .rela
                        .map(|t| t.off <= plt_off && plt_off < t.off + t.size)
                        .unwrap_or(false);
                    if !covered {
                        self.rel_tables.plt =
                            Some(RelTable { off: plt_off, size: plt_rel_size, ent: rela_ent, rela: true });
                    }
                }
            }
        }
        Ok(())
    }

    fn process_version_info(&mut self, verdef: Option<usize>, verneed: Option<usize>) {
        let mut info: Vec<VersionInfo> = Vec::new();
        let mut put = |idx: usize, entry: VersionInfo| {
            if info.len() <= idx {
                info.resize(idx + 1, VersionInfo::default());
            }
            info[idx] = entry;
        };

        if let Some(mut off) = verdef {
            loop {
                if bytes_at(&self.data, off, 20).is_none() {
                    break;
                }
                let vd_ndx = read_u16(&self.data, off + 4) as usize;
                let vd_aux = read_u32(&self.data, off + 12) as usize;
                let vd_next = read_u32(&self.data, off + 16) as usize;
                if bytes_at(&self.data, off + vd_aux, 8).is_some() {
                    let name_off = read_u32(&self.data, off + vd_aux);
                    put(
                        vd_ndx,
                        VersionInfo {
                            soname: self.soname.clone(),
                            link_as: Some(self.dynstr(name_off)),
                            category: VerCategory::Defined,
                        },
                    );
                }
                if vd_next == 0 {
                    break;
                }
                off += vd_next;
            }
        }

        if let Some(mut off) = verneed {
            loop {
                if bytes_at(&self.data, off, 16).is_none() {
                    break;
                }
                let vn_file = read_u32(&self.data, off + 4);
                let vn_aux = read_u32(&self.data, off + 8) as usize;
                let vn_next = read_u32(&self.data, off + 12) as usize;
                if bytes_at(&self.data, off + vn_aux, 16).is_some() {
                    let aux = off + vn_aux;
                    let vna_other = read_u16(&self.data, aux + 6) as usize;
                    let vna_name = read_u32(&self.data, aux + 8);
                    put(
                        vna_other,
                        VersionInfo {
                            soname: Some(self.dynstr(vn_file)),
                            link_as: Some(self.dynstr(vna_name)),
                            category: VerCategory::Needed,
                        },
                    );
                }
                if vn_next == 0 {
                    break;
                }
                off += vn_next;
            }
        }
        self.version_info = info;
    }

    // ── Symbols ─────────────────────────────────────────────────────────

    pub fn dyn_symbol(&self, idx: usize) -> Elf32Sym {
        Elf32Sym::parse(&self.data, self.dynsym_off + idx * self.sym_ent)
    }

    pub fn symbol_name(&self, idx: usize) -> String {
        let sym = self.dyn_symbol(idx);
        self.dynstr(sym.st_name)
    }

    fn dynstr(&self, off: u32) -> String {
        let off = self.dynstr_off + off as usize;
        if self.dynstr_size > 0 && off >= self.dynstr_off + self.dynstr_size {
            return String::new();
        }
        read_cstr(&self.data, off)
    }

    /// Version record attached to dynamic symbol `idx`, if any.
    pub fn version_record(&self, idx: usize) -> Option<&VersionInfo> {
        let versym_off = self.versym_off?;
        bytes_at(&self.data, versym_off + idx * 2, 2)?;
        let half = read_u16(&self.data, versym_off + idx * 2) & 0x7fff;
        self.version_info.get(half as usize)
    }

    fn global(&self, sym: &Elf32Sym) -> bool {
        sym.binding() == STB_GLOBAL
    }

    fn visible(&self, sym: &Elf32Sym) -> bool {
        sym.visibility() == STV_DEFAULT || sym.visibility() == STV_PROTECTED
    }

    fn defined(&self, sym: &Elf32Sym) -> bool {
        if sym.st_shndx == SHN_UNDEF {
            return false;
        }
        matches!(self.segment_type(sym.st_value), SegmentKind::Ro | SegmentKind::Rw)
    }

    pub fn function_symbol(&self, sym: &Elf32Sym) -> bool {
        sym.sym_type() == STT_FUNC
    }

    pub fn data_symbol(&self, sym: &Elf32Sym) -> bool {
        sym.sym_type() == STT_OBJECT
    }

    pub fn exported_symbol(&self, sym: &Elf32Sym) -> bool {
        self.global(sym)
            && self.visible(sym)
            && self.defined(sym)
            && sym.st_shndx != SHN_UNDEF
            && sym.st_shndx < SHN_ABS
            && (self.function_symbol(sym) || self.data_symbol(sym))
    }

    pub fn imported_symbol(&self, sym: &Elf32Sym) -> bool {
        sym.st_shndx == SHN_UNDEF && self.global(sym) && self.visible(sym) && !self.defined(sym)
    }

    fn process_symbols(&mut self) -> Result<(), Elf2e32Error> {
        for idx in 0..self.sym_count {
            if bytes_at(&self.data, self.dynsym_off + idx * self.sym_ent, SYM_SIZE).is_none() {
                return Err(Elf2e32Error::ElfTruncated(self.name.clone()));
            }
            let sym = self.dyn_symbol(idx);
            if self.exported_symbol(&sym) {
                let kind =
                    if self.function_symbol(&sym) { SymbolKind::Code } else { SymbolKind::Data };
                let link_as = self.version_record(idx).and_then(|v| v.link_as.clone());
                let mut symbol = Symbol::new(self.dynstr(sym.st_name), kind);
                symbol.value = sym.st_value;
                symbol.size = sym.st_size;
                self.exports.add(link_as.as_deref(), symbol);
            } else if self.imported_symbol(&sym) {
                // every import must be covered by a version-needed record
                let needed = self
                    .version_record(idx)
                    .map(|v| v.category == VerCategory::Needed)
                    .unwrap_or(false);
                if !needed {
                    return Err(Elf2e32Error::UndefinedSymbol {
                        file: self.name.clone(),
                        symbol: self.dynstr(sym.st_name),
                    });
                }
            }
        }
        Ok(())
    }

    // ── Relocations ─────────────────────────────────────────────────────

    fn process_relocations(&mut self) -> Result<(), Elf2e32Error> {
        for table in [self.rel_tables.rel, self.rel_tables.rela, self.rel_tables.plt] {
            if let Some(t) = table {
                self.process_reloc_table(t)?;
            }
        }
        Ok(())
    }

    fn process_reloc_table(&mut self, table: RelTable) -> Result<(), Elf2e32Error> {
        let count = table.size / table.ent;
        for i in 0..count {
            let off = table.off + i * table.ent;
            if bytes_at(&self.data, off, table.ent).is_none() {
                return Err(Elf2e32Error::ElfTruncated(self.name.clone()));
            }
            let r_offset = read_u32(&self.data, off);
            let r_info = read_u32(&self.data, off + 4);
            let rel_type = r_info & 0xff;
            let sym_idx = r_info >> 8;

            if rel_type == R_ARM_NONE {
                continue;
            }
            if !valid_reloc_type(rel_type) {
                return Err(Elf2e32Error::UnknownRelocation {
                    file: self.name.clone(),
                    rel_type,
                });
            }

            let addend = if table.rela {
                read_u32(&self.data, off + 8)
            } else {
                self.value_at(r_offset).unwrap_or(0)
            };

            if sym_idx as usize >= self.sym_count {
                return Err(Elf2e32Error::ElfTruncated(self.name.clone()));
            }
            let sym = self.dyn_symbol(sym_idx as usize);
            if self.imported_symbol(&sym) {
                let (link_as, soname) = match self.version_record(sym_idx as usize) {
                    Some(v) => (
                        v.link_as.clone().unwrap_or_default(),
                        v.soname.clone().unwrap_or_default(),
                    ),
                    None => (String::new(), String::new()),
                };
                let reloc = ImportRelocation {
                    addr: r_offset,
                    addend,
                    sym_idx,
                    rel_type,
                    segment: self.segment_type(r_offset),
                    symbol_name: self.dynstr(sym.st_name),
                };
                self.imports.add(&link_as, &soname, reloc);
            } else {
                self.locals.add(LocalRelocation {
                    addr: r_offset,
                    addend,
                    sym_idx,
                    rel_type,
                    segment: self.segment_type(r_offset),
                    veneer: false,
                });
            }
        }
        Ok(())
    }

    // ── Veneer workaround ───────────────────────────────────────────────

    /// RVCT below 2.2 build 616 emits long ARM-to-Thumb veneers without a
    /// relocation for the embedded target address. Synthesize the missing
    /// fix-up for each affected veneer symbol.
    fn process_veneers(&mut self, _diag: &mut Diagnostics) {
        let comment = match self.find_comment_section() {
            Some(c) => c,
            None => return,
        };
        if !rvct_needs_veneer_workaround(&comment) {
            return;
        }
        let (symtab, strtab) = match self.find_static_symtab() {
            Some(t) => t,
            None => return,
        };

        let count = (symtab.sh_size as usize) / SYM_SIZE.max(symtab.sh_entsize as usize).max(1);
        let mut synthesized: Vec<LocalRelocation> = Vec::new();
        for i in 0..count {
            let off = symtab.sh_offset as usize + i * SYM_SIZE.max(symtab.sh_entsize as usize);
            if bytes_at(&self.data, off, SYM_SIZE).is_none() {
                break;
            }
            let sym = Elf32Sym::parse(&self.data, off);
            if sym.st_name == 0 {
                continue;
            }
            let name = read_cstr(&self.data, strtab.sh_offset as usize + sym.st_name as usize);
            if !name.starts_with("$Ven$AT$L$$") {
                continue;
            }
            let target = sym.st_value + 4;
            let instruction = self.value_at(sym.st_value);
            let pointer = self.value_at(target);
            let already = self.locals.code.iter().any(|r| r.addr == target);
            // the veneer body must be 'LDR pc, [pc, #-4]' followed by a
            // Thumb address (low bit set)
            if instruction == Some(0xE51F_F004)
                && !already
                && pointer.map(|p| p & 1 == 1).unwrap_or(false)
            {
                synthesized.push(LocalRelocation {
                    addr: target,
                    addend: pointer.unwrap_or(0),
                    sym_idx: 0,
                    rel_type: R_ARM_NONE,
                    segment: SegmentKind::Ro,
                    veneer: true,
                });
            }
        }
        for reloc in synthesized {
            self.locals.add(reloc);
        }
    }

    fn section_name(&self, shdr: &Elf32Shdr) -> String {
        read_cstr(&self.data, self.shstr_off + shdr.sh_name as usize)
    }

    fn find_comment_section(&self) -> Option<String> {
        for shdr in &self.sections {
            if shdr.sh_type == SHT_PROGBITS && self.section_name(shdr).starts_with(".comment") {
                return Some(read_cstr(&self.data, shdr.sh_offset as usize));
            }
        }
        None
    }

    fn find_static_symtab(&self) -> Option<(Elf32Shdr, Elf32Shdr)> {
        let mut symtab = None;
        let mut strtab = None;
        for shdr in &self.sections {
            if shdr.sh_type == SHT_SYMTAB {
                symtab = Some(*shdr);
            } else if shdr.sh_type == SHT_STRTAB && self.section_name(shdr) == ".strtab" {
                strtab = Some(*shdr);
            }
        }
        Some((symtab?, strtab?))
    }

    /// Look up a symbol in the static symbol table by exact name.
    pub fn lookup_static_symbol(&self, name: &str) -> Option<Elf32Sym> {
        let (symtab, strtab) = self.find_static_symtab()?;
        let ent = SYM_SIZE.max(symtab.sh_entsize as usize);
        let count = symtab.sh_size as usize / ent;
        for i in 0..count {
            let off = symtab.sh_offset as usize + i * ent;
            if bytes_at(&self.data, off, SYM_SIZE).is_none() {
                break;
            }
            let sym = Elf32Sym::parse(&self.data, off);
            if sym.st_name != 0
                && read_cstr(&self.data, strtab.sh_offset as usize + sym.st_name as usize) == name
            {
                return Some(sym);
            }
        }
        None
    }

    // ── Segments ────────────────────────────────────────────────────────

    fn segment_at(&self, addr: u32) -> Option<&Elf32Phdr> {
        for idx in [self.code_phdr, self.data_phdr].into_iter().flatten() {
            let phdr = &self.phdrs[idx];
            if phdr.p_vaddr <= addr && addr < phdr.p_vaddr + phdr.p_memsz {
                return Some(phdr);
            }
        }
        None
    }

    pub fn segment_type(&self, addr: u32) -> SegmentKind {
        if let Some(i) = self.code_phdr {
            let p = &self.phdrs[i];
            if p.p_vaddr <= addr && addr < p.p_vaddr + p.p_memsz {
                return SegmentKind::Ro;
            }
        }
        if let Some(i) = self.data_phdr {
            let p = &self.phdrs[i];
            if p.p_vaddr <= addr && addr < p.p_vaddr + p.p_memsz {
                return SegmentKind::Rw;
            }
        }
        SegmentKind::Undefined
    }

    /// The word stored at a virtual address, read through the containing
    /// segment's file mapping.
    pub fn value_at(&self, addr: u32) -> Option<u32> {
        let phdr = self.segment_at(addr)?;
        let off = phdr.p_offset as usize + (addr - phdr.p_vaddr) as usize;
        bytes_at(&self.data, off, 4).map(|b| read_u32(b, 0))
    }

    pub fn ro_base(&self) -> u32 {
        self.code_phdr.map(|i| self.phdrs[i].p_vaddr).unwrap_or(0)
    }

    pub fn ro_size(&self) -> u32 {
        self.code_phdr.map(|i| self.phdrs[i].p_filesz).unwrap_or(0)
    }

    pub fn ro_segment(&self) -> &[u8] {
        match self.code_phdr {
            Some(i) => {
                let phdr = &self.phdrs[i];
                bytes_at(&self.data, phdr.p_offset as usize, phdr.p_filesz as usize).unwrap_or(&[])
            }
            None => &[],
        }
    }

    pub fn rw_base(&self) -> u32 {
        self.data_phdr.map(|i| self.phdrs[i].p_vaddr).unwrap_or(0)
    }

    pub fn rw_size(&self) -> u32 {
        self.data_phdr.map(|i| self.phdrs[i].p_filesz).unwrap_or(0)
    }

    pub fn rw_segment(&self) -> &[u8] {
        match self.data_phdr {
            Some(i) => {
                let phdr = &self.phdrs[i];
                bytes_at(&self.data, phdr.p_offset as usize, phdr.p_filesz as usize).unwrap_or(&[])
            }
            None => &[],
        }
    }

    pub fn bss_size(&self) -> u32 {
        self.data_phdr
            .map(|i| {
                let phdr = &self.phdrs[i];
                phdr.p_memsz.saturating_sub(phdr.p_filesz)
            })
            .unwrap_or(0)
    }

    /// Entry point as an offset into the code segment. A zero entry with a
    /// zero code base is tolerated with a warning; a zero entry anywhere
    /// else is an error.
    pub fn entry_point_offset(&self, diag: &mut Diagnostics) -> Result<u32, Elf2e32Error> {
        if self.header.e_entry == 0 && self.ro_base() == 0 {
            diag.warning(format!("Entry point is undefined in ELF file {}", self.name));
            return Ok(0);
        }
        if self.header.e_entry == 0 {
            return Err(Elf2e32Error::EntryPointNotSet(self.name.clone()));
        }
        Ok(self.header.e_entry.wrapping_sub(self.ro_base()))
    }

    /// True if the image carries an `.ARM.exidx` exception index table.
    pub fn exceptions_present(&self) -> bool {
        self.sections.iter().any(|s| {
            s.sh_type == SHT_ARM_EXIDX && self.section_name(s) == ".ARM.exidx"
        })
    }

    // ── Hashed lookup (DSO ordinal resolution) ──────────────────────────

    /// Find a dynamic symbol by name through the SysV hash table.
    pub fn find_symbol(&self, name: &str) -> Option<usize> {
        let hash_off = self.hash_off?;
        bytes_at(&self.data, hash_off, 8)?;
        let n_buckets = read_u32(&self.data, hash_off) as usize;
        if n_buckets == 0 {
            return None;
        }
        let buckets = hash_off + 8;
        let chains = buckets + 4 * n_buckets;
        bytes_at(&self.data, chains, 4 * self.sym_count)?;
        let h = elf_hash(name.as_bytes()) as usize;
        let mut idx = read_u32(&self.data, buckets + 4 * (h % n_buckets)) as usize;
        while idx > 0 && idx < self.sym_count {
            if self.symbol_name(idx) == name {
                return Some(idx);
            }
            idx = read_u32(&self.data, chains + 4 * idx) as usize;
        }
        None
    }

    /// The ordinal a DSO stores for one of its exports: the word at the
    /// symbol's code-segment location.
    pub fn symbol_ordinal(&self, idx: usize) -> Option<u32> {
        let sym = self.dyn_symbol(idx);
        if self.segment_type(sym.st_value) != SegmentKind::Ro {
            return None;
        }
        self.value_at(sym.st_value)
    }
}

#[derive(Clone, Copy, Default)]
struct RelTables {
    rel: Option<RelTable>,
    rela: Option<RelTable>,
    plt: Option<RelTable>,
}

#[derive(Clone, Copy)]
struct RelTable {
    off: usize,
    size: usize,
    ent: usize,
    rela: bool,
}

fn rvct_needs_veneer_workaround(comment: &str) -> bool {
    const PREFIX: &str = "ARM Linker, RVCT";
    if !comment.starts_with(PREFIX) {
        return false;
    }
    // the version tail reads like "2.2 [Build 593]"
    let version = &comment[PREFIX.len()..];
    let mut chars = version.chars();
    let major = chars.next();
    let dot = chars.next();
    let minor = chars.next();
    if major != Some('2') || dot != Some('.') || minor != Some('2') {
        return false;
    }
    let build: u32 = match version.rfind(' ') {
        Some(pos) => version[pos + 1..]
            .trim_end_matches(']')
            .parse()
            .unwrap_or(u32::MAX),
        None => return false,
    };
    build < 616
}

fn read_file(path: &str) -> Result<Vec<u8>, Elf2e32Error> {
    let mut file = File::open(path).map_err(|_| Elf2e32Error::FileOpen(path.to_string()))?;
    let size = file
        .metadata()
        .map_err(|_| Elf2e32Error::FileOpen(path.to_string()))?
        .len() as usize;
    let mut data = vec![0u8; size];
    let mut done = 0usize;
    while done < size {
        let chunk = (size - done).min(MAX_IO_CHUNK);
        file.read_exact(&mut data[done..done + chunk])
            .map_err(|_| Elf2e32Error::FileRead(path.to_string()))?;
        done += chunk;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::test_elf::ElfBuilder;

    #[test]
    fn rejects_bad_magic() {
        let mut diag = Diagnostics::new();
        let data = vec![0u8; 64];
        assert!(matches!(
            ElfImage::parse(data, "bad.elf", &mut diag),
            Err(Elf2e32Error::ElfMagic(_))
        ));
    }

    #[test]
    fn rejects_wrong_class_and_endianness() {
        let mut diag = Diagnostics::new();
        let mut data = ElfBuilder::new().build();
        data[4] = 2; // ELFCLASS64
        assert!(matches!(
            ElfImage::parse(data, "c.elf", &mut diag),
            Err(Elf2e32Error::ElfClass(_))
        ));

        let mut data = ElfBuilder::new().build();
        data[5] = 2; // big-endian
        assert!(matches!(
            ElfImage::parse(data, "e.elf", &mut diag),
            Err(Elf2e32Error::ElfEndianness(_))
        ));
    }

    #[test]
    fn rejects_relocatable_type() {
        let mut diag = Diagnostics::new();
        let mut data = ElfBuilder::new().build();
        data[16] = 1; // ET_REL
        data[17] = 0;
        assert!(matches!(
            ElfImage::parse(data, "r.elf", &mut diag),
            Err(Elf2e32Error::ElfExecutable(_))
        ));
    }

    #[test]
    fn classifies_segments_and_collects_exports() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .export("TestExport", 0x20, SymbolKind::Code)
            .export("TestData", 0x40, SymbolKind::Data)
            .build();
        let image = ElfImage::parse(data, "t.elf", &mut diag).unwrap();

        assert_eq!(image.exports.len(), 2);
        assert_eq!(image.exports.symbols[0].name, "TestExport");
        assert_eq!(image.exports.symbols[0].kind, SymbolKind::Code);
        assert_eq!(image.exports.symbols[0].value - image.ro_base(), 0x20);
        assert_eq!(image.exports.symbols[1].kind, SymbolKind::Data);
        assert_eq!(image.segment_type(image.ro_base()), SegmentKind::Ro);
        assert_eq!(image.segment_type(0xdead_0000), SegmentKind::Undefined);
    }

    #[test]
    fn collects_imports_by_dll() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .import("ExtA", "liba{000a0000}.dll", "liba.dso", 0x30)
            .import("ExtB", "libb{000a0000}.dll", "libb.dso", 0x38)
            .import("ExtC", "liba{000a0000}.dll", "liba.dso", 0x3c)
            .build();
        let image = ElfImage::parse(data, "i.elf", &mut diag).unwrap();

        assert_eq!(image.imports.dll_count(), 2);
        assert_eq!(image.imports.import_count(), 3);
        let group = &image.imports.groups[0];
        assert_eq!(group.link_as, "liba{000a0000}.dll");
        assert_eq!(group.soname, "liba.dso");
        assert_eq!(group.relocs[0].symbol_name, "ExtA");
    }

    #[test]
    fn unknown_relocation_type_aborts() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .raw_reloc(0x20, crate::elf::R_ARM_THM_CALL, 0)
            .build();
        assert!(matches!(
            ElfImage::parse(data, "u.elf", &mut diag),
            Err(Elf2e32Error::UnknownRelocation { rel_type: 10, .. })
        ));
    }

    #[test]
    fn none_relocation_is_dropped() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new().raw_reloc(0x20, R_ARM_NONE, 0).build();
        let image = ElfImage::parse(data, "n.elf", &mut diag).unwrap();
        assert!(image.locals.code.is_empty());
        assert!(image.locals.data.is_empty());
    }

    #[test]
    fn local_relative_reloc_lands_in_code_partition() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new().raw_reloc(0x20, R_ARM_RELATIVE, 0).build();
        let image = ElfImage::parse(data, "l.elf", &mut diag).unwrap();
        assert_eq!(image.locals.code.len(), 1);
        assert_eq!(image.locals.code[0].addr - image.ro_base(), 0x20);
    }

    #[test]
    fn import_without_needed_version_aborts() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .import("Orphan", "lib{000a0000}.dll", "lib.dso", 0x30)
            .strip_version_needed()
            .build();
        assert!(matches!(
            ElfImage::parse(data, "v.elf", &mut diag),
            Err(Elf2e32Error::UndefinedSymbol { .. })
        ));
    }

    #[test]
    fn veneer_workaround_synthesizes_one_reloc() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .comment("ARM Linker, RVCT2.2 [Build 593]")
            .veneer("$Ven$AT$L$$thumb_fn", 0x40, 0xE51F_F004, 0x8031) // thumb target
            .build();
        let image = ElfImage::parse(data, "w.elf", &mut diag).unwrap();
        let veneers: Vec<_> = image.locals.code.iter().filter(|r| r.veneer).collect();
        assert_eq!(veneers.len(), 1);
        assert_eq!(veneers[0].addr, image.ro_base() + 0x44);
    }

    #[test]
    fn veneer_workaround_skips_later_builds() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .comment("ARM Linker, RVCT2.2 [Build 616]")
            .veneer("$Ven$AT$L$$thumb_fn", 0x40, 0xE51F_F004, 0x8031)
            .build();
        let image = ElfImage::parse(data, "w.elf", &mut diag).unwrap();
        assert!(image.locals.code.iter().all(|r| !r.veneer));
    }

    #[test]
    fn veneer_workaround_requires_the_load_pattern_and_thumb_target() {
        let mut diag = Diagnostics::new();
        // wrong instruction
        let data = ElfBuilder::new()
            .comment("ARM Linker, RVCT2.2 [Build 593]")
            .veneer("$Ven$AT$L$$a", 0x40, 0xE1A0_0000, 0x8031)
            .build();
        let image = ElfImage::parse(data, "w.elf", &mut diag).unwrap();
        assert!(image.locals.code.iter().all(|r| !r.veneer));

        // ARM (even) target
        let data = ElfBuilder::new()
            .comment("ARM Linker, RVCT2.2 [Build 593]")
            .veneer("$Ven$AT$L$$b", 0x40, 0xE51F_F004, 0x8030)
            .build();
        let image = ElfImage::parse(data, "w.elf", &mut diag).unwrap();
        assert!(image.locals.code.iter().all(|r| !r.veneer));
    }

    #[test]
    fn rvct_version_gate() {
        assert!(rvct_needs_veneer_workaround("ARM Linker, RVCT2.2 [Build 593]"));
        assert!(!rvct_needs_veneer_workaround("ARM Linker, RVCT2.2 [Build 616]"));
        assert!(!rvct_needs_veneer_workaround("ARM Linker, RVCT3.0 [Build 100]"));
        assert!(!rvct_needs_veneer_workaround("GNU ld 2.30"));
    }

    #[test]
    fn hashed_symbol_lookup() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new()
            .export("Lookup1", 0x20, SymbolKind::Code)
            .export("Lookup2", 0x24, SymbolKind::Code)
            .build();
        let image = ElfImage::parse(data, "h.elf", &mut diag).unwrap();
        let idx = image.find_symbol("Lookup2").unwrap();
        assert_eq!(image.symbol_name(idx), "Lookup2");
        assert!(image.find_symbol("Missing").is_none());
    }

    #[test]
    fn entry_point_offset_rules() {
        let mut diag = Diagnostics::new();
        let data = ElfBuilder::new().build();
        let image = ElfImage::parse(data, "e.elf", &mut diag).unwrap();
        assert_eq!(image.entry_point_offset(&mut diag).unwrap(), 0);
    }
}
