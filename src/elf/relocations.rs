//! Relocation records decoded from the ELF image.
//!
//! Local relocations resolve against the image's own segments and are
//! partitioned by the segment containing the fix-up location. Import
//! relocations reference an external dynamic symbol and are grouped by the
//! DLL the symbol is linked against, one group per future import block.

use super::{R_ARM_ABS32, R_ARM_GLOB_DAT, R_ARM_GOT_BREL, R_ARM_JUMP_SLOT, R_ARM_RELATIVE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Undefined,
    /// Read-only code segment.
    Ro,
    /// Read-write data segment.
    Rw,
}

/// True for the relocation types the post-linker forwards into the image.
/// R_ARM_NONE is silently dropped; every other type is a hard error at the
/// call site.
pub fn valid_reloc_type(rel_type: u32) -> bool {
    matches!(
        rel_type,
        R_ARM_ABS32 | R_ARM_GLOB_DAT | R_ARM_JUMP_SLOT | R_ARM_RELATIVE | R_ARM_GOT_BREL
    )
}

/// A relocation resolved against the image's own segments.
#[derive(Clone, Debug)]
pub struct LocalRelocation {
    /// Virtual address of the word being fixed up.
    pub addr: u32,
    pub addend: u32,
    /// Index into the dynamic symbol table; 0 for relative relocations.
    pub sym_idx: u32,
    pub rel_type: u32,
    /// Segment containing `addr`.
    pub segment: SegmentKind,
    /// Set for fix-ups synthesized by the veneer workaround.
    pub veneer: bool,
}

/// A relocation referencing an imported dynamic symbol.
#[derive(Clone, Debug)]
pub struct ImportRelocation {
    pub addr: u32,
    pub addend: u32,
    pub sym_idx: u32,
    pub rel_type: u32,
    pub segment: SegmentKind,
    pub symbol_name: String,
}

/// All import relocations against one DLL, in input order.
#[derive(Clone, Debug)]
pub struct ImportGroup {
    /// Name the DLL is to be resolved against at load time.
    pub link_as: String,
    /// Import library (DSO) carrying the ordinal table for this DLL.
    pub soname: String,
    pub relocs: Vec<ImportRelocation>,
}

/// Import groups in first-reference order.
#[derive(Default)]
pub struct ElfImports {
    pub groups: Vec<ImportGroup>,
}

impl ElfImports {
    pub fn add(&mut self, link_as: &str, soname: &str, reloc: ImportRelocation) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.link_as == link_as) {
            group.relocs.push(reloc);
            return;
        }
        self.groups.push(ImportGroup {
            link_as: link_as.to_string(),
            soname: soname.to_string(),
            relocs: vec![reloc],
        });
    }

    pub fn dll_count(&self) -> usize {
        self.groups.len()
    }

    pub fn import_count(&self) -> usize {
        self.groups.iter().map(|g| g.relocs.len()).sum()
    }
}

/// Local relocations partitioned by the segment of the fix-up location.
#[derive(Default)]
pub struct LocalRelocations {
    pub code: Vec<LocalRelocation>,
    pub data: Vec<LocalRelocation>,
}

impl LocalRelocations {
    pub fn add(&mut self, reloc: LocalRelocation) {
        match reloc.segment {
            SegmentKind::Ro => self.code.push(reloc),
            SegmentKind::Rw => self.data.push(reloc),
            // fix-ups outside any loadable segment carry no meaning in the
            // output image
            SegmentKind::Undefined => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{R_ARM_NONE, R_ARM_THM_CALL};

    #[test]
    fn accepted_type_set() {
        for t in [R_ARM_ABS32, R_ARM_GLOB_DAT, R_ARM_JUMP_SLOT, R_ARM_RELATIVE, R_ARM_GOT_BREL] {
            assert!(valid_reloc_type(t));
        }
        assert!(!valid_reloc_type(R_ARM_NONE));
        assert!(!valid_reloc_type(R_ARM_THM_CALL));
    }

    #[test]
    fn imports_group_by_dll() {
        let mut imports = ElfImports::default();
        let reloc = |name: &str| ImportRelocation {
            addr: 0x8000,
            addend: 0,
            sym_idx: 1,
            rel_type: R_ARM_ABS32,
            segment: SegmentKind::Ro,
            symbol_name: name.to_string(),
        };
        imports.add("euser{000a0000}.dll", "euser.dso", reloc("User::Alloc"));
        imports.add("estlib{000a0000}.dll", "estlib.dso", reloc("memcpy"));
        imports.add("euser{000a0000}.dll", "euser.dso", reloc("User::Free"));

        assert_eq!(imports.dll_count(), 2);
        assert_eq!(imports.import_count(), 3);
        assert_eq!(imports.groups[0].relocs.len(), 2);
        assert_eq!(imports.groups[0].link_as, "euser{000a0000}.dll");
    }

    #[test]
    fn locals_partition_by_segment() {
        let mut locals = LocalRelocations::default();
        let reloc = |segment| LocalRelocation {
            addr: 0,
            addend: 0,
            sym_idx: 0,
            rel_type: R_ARM_RELATIVE,
            segment,
            veneer: false,
        };
        locals.add(reloc(SegmentKind::Ro));
        locals.add(reloc(SegmentKind::Rw));
        locals.add(reloc(SegmentKind::Undefined));
        assert_eq!(locals.code.len(), 1);
        assert_eq!(locals.data.len(), 1);
    }
}
