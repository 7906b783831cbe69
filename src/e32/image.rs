//! E32 image layout and emission.
//!
//! The image is assembled as an ordered list of chunks (header, code, data,
//! import section, relocation sections) at pre-computed offsets; chunks
//! never overlap and their extent equals the recorded image size. Once the
//! layout is fixed the pipeline is linear: fill, validate the entry point,
//! optionally compress everything after the header, then stamp the UID
//! checksum and the header CRC.

use crate::codec::deflate;
use crate::common::crc::{crc32, uid_checksum, IMAGE_CRC_INITIALISER};
use crate::common::error::{Diagnostics, Elf2e32Error};
use crate::common::{align4, push_u32, read_u32, write_u32};
use crate::dso::ResolvedImportBlock;
use crate::elf::exports::Symbol;
use crate::elf::image::{ElfImage, EXCEPTION_DESCRIPTOR_SYMBOL};

use super::exports::{build_export_description, export_directory};
use super::relocs::{build_reloc_section, reloc_kind};
use super::*;

pub const TOOLS_VERSION_MAJOR: u8 = 2;
pub const TOOLS_VERSION_MINOR: u8 = 1;
pub const TOOLS_VERSION_BUILD: u16 = 601;

/// Image-shaping options, a digest of the CLI surface.
#[derive(Clone)]
pub struct E32Settings {
    pub is_dll: bool,
    pub fixed_address: bool,
    pub uid1: u32,
    pub uid2: u32,
    pub uid3: u32,
    pub secure_id: u32,
    pub vendor_id: u32,
    pub capabilities: [u32; 2],
    pub heap_min: u32,
    pub heap_max: u32,
    pub stack_size: u32,
    pub priority: u16,
    pub module_version: u32,
    /// Compression method UID, or 0 for an uncompressed image.
    pub compression: u32,
    pub fpu: u32,
    pub paged: Option<bool>,
    pub debuggable: bool,
    pub smp_safe: bool,
    pub cpu: u16,
}

impl Default for E32Settings {
    fn default() -> Self {
        E32Settings {
            is_dll: false,
            fixed_address: false,
            uid1: 0,
            uid2: 0,
            uid3: 0,
            secure_id: 0,
            vendor_id: 0,
            capabilities: [0, 0],
            heap_min: 0x1000,
            heap_max: 0x0010_0000,
            stack_size: 0x2000,
            priority: PRIORITY_FOREGROUND,
            module_version: 0x000a_0000,
            compression: UID_COMPRESSION_DEFLATE,
            fpu: FP_TYPE_NONE,
            paged: None,
            debuggable: false,
            smp_safe: false,
            cpu: CPU_ARM_V5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPointStatus {
    Ok,
    Corrupt,
    NotSupported,
}

/// Inspect the first instruction pair at the entry point. Thumb entries
/// (misaligned) pass unchecked; the known Eka2 prologues pass; an all-zero
/// pair is the corrupt sentinel; anything else is merely unsupported.
pub fn validate_entry_point(code: &[u8], entry_point: u32) -> EntryPointStatus {
    if entry_point & 3 != 0 {
        return EntryPointStatus::Ok;
    }
    let ep = entry_point as usize;
    if ep + 8 > code.len() {
        return EntryPointStatus::Corrupt;
    }
    let w0 = read_u32(code, ep);
    let w1 = read_u32(code, ep + 4);
    if w0 & 0xffff_ff00 == 0xE31F_0000 {
        // 'tst pc, #n' marker
        return EntryPointStatus::Ok;
    }
    if w0 == 0xE51F_F004 {
        // 'ldr pc, [pc, #-4]' veneer prologue
        return EntryPointStatus::Ok;
    }
    if w0 == 0 && w1 == 0 {
        return EntryPointStatus::Corrupt;
    }
    EntryPointStatus::NotSupported
}

struct Chunk {
    offset: usize,
    bytes: Vec<u8>,
    tag: &'static str,
}

#[derive(Default)]
struct Chunks {
    list: Vec<Chunk>,
}

impl Chunks {
    fn add(&mut self, offset: usize, bytes: Vec<u8>, tag: &'static str) {
        if bytes.is_empty() {
            return;
        }
        if let Some(last) = self.list.last() {
            debug_assert!(
                last.offset + last.bytes.len() <= offset,
                "chunk {} overlaps {}",
                tag,
                last.tag
            );
        }
        self.list.push(Chunk { offset, bytes, tag });
    }

    fn total_size(&self) -> usize {
        self.list.last().map(|c| c.offset + c.bytes.len()).unwrap_or(0)
    }

    fn assemble(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.total_size()];
        for chunk in &self.list {
            out[chunk.offset..chunk.offset + chunk.bytes.len()].copy_from_slice(&chunk.bytes);
        }
        out
    }
}

/// Build the complete image for an ELF input, a finished export list and
/// the resolved import blocks.
pub fn build_e32_image(
    elf: &ElfImage,
    exports: &[Symbol],
    import_blocks: &[ResolvedImportBlock],
    settings: &E32Settings,
    diag: &mut Diagnostics,
) -> Result<Vec<u8>, Elf2e32Error> {
    let ro_base = elf.ro_base();
    let entry_point = elf.entry_point_offset(diag)?;

    // ── code section: RO segment, import fix-ups, export directory ──
    let mut code = elf.ro_segment().to_vec();
    code.resize(align4(code.len()), 0);

    for block in import_blocks {
        for import in &block.imports {
            let off = import.addr.wrapping_sub(ro_base) as usize;
            if off + 4 <= code.len() {
                write_u32(&mut code, off, import.ordinal);
            }
        }
    }

    let mut export_dir_offset = 0usize;
    let export_dir_count = exports.iter().filter_map(|s| s.ordinal).max().unwrap_or(0);
    let description = if exports.is_empty() {
        None
    } else {
        let (entries, present) = export_directory(exports, ro_base, entry_point);
        export_dir_offset = code.len() + 4; // past the count word
        push_u32(&mut code, entries.len() as u32);
        for entry in &entries {
            push_u32(&mut code, *entry);
        }
        Some(build_export_description(&present))
    };

    // ── import section ──
    let import_section = build_import_section(import_blocks, ro_base);

    // ── relocation sections ──
    let code_relocs: Vec<(u32, u16)> = elf
        .locals
        .code
        .iter()
        .map(|r| (r.addr.wrapping_sub(ro_base), reloc_kind(r, elf)))
        .collect();
    let data_relocs: Vec<(u32, u16)> = elf
        .locals
        .data
        .iter()
        .map(|r| (r.addr.wrapping_sub(elf.rw_base()), reloc_kind(r, elf)))
        .collect();
    let code_reloc_section = build_reloc_section(&code_relocs);
    let data_reloc_section = build_reloc_section(&data_relocs);

    // ── header ──
    let mut flags = IMAGE_ABI_EABI | IMAGE_EPT_EKA2 | IMAGE_HDR_FMT_V | IMAGE_IMP_FMT_ELF;
    if settings.is_dll {
        flags |= IMAGE_DLL;
    }
    if settings.fixed_address && !settings.is_dll {
        flags |= IMAGE_FIXED_ADDRESS_EXE;
    }
    flags |= settings.fpu << IMAGE_HW_FLOAT_SHIFT;
    match settings.paged {
        Some(true) => flags |= IMAGE_CODE_PAGED,
        Some(false) => flags |= IMAGE_CODE_UNPAGED,
        None => {}
    }
    if settings.debuggable {
        flags |= IMAGE_DEBUGGABLE;
    }
    if settings.smp_safe {
        flags |= IMAGE_SMP_SAFE;
    }

    match validate_entry_point(&code, entry_point) {
        EntryPointStatus::Ok => {}
        EntryPointStatus::Corrupt => {
            return Err(Elf2e32Error::EntryPointCorrupt(elf.name.clone()));
        }
        EntryPointStatus::NotSupported => {
            diag.warning(format!(
                "Entry point format not recognized in {}; the loader will not call it",
                elf.name
            ));
            flags |= IMAGE_NO_CALL_ENTRY_POINT;
        }
    }

    let exception_descriptor = if elf.exceptions_present() {
        elf.lookup_static_symbol(EXCEPTION_DESCRIPTOR_SYMBOL)
            .map(|sym| sym.st_value.wrapping_sub(ro_base) | 1)
            .unwrap_or(0)
    } else {
        0
    };

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (time_lo, time_hi) = image_timestamp(now);

    let mut hdr = E32ImageHeader {
        uid1: settings.uid1,
        uid2: settings.uid2,
        uid3: settings.uid3,
        uid_checksum: 0,
        signature: SIGNATURE,
        header_crc: 0,
        module_version: settings.module_version,
        compression_type: if settings.compression == UID_COMPRESSION_DEFLATE {
            UID_COMPRESSION_DEFLATE
        } else {
            0
        },
        tools_version: tools_version(
            TOOLS_VERSION_MAJOR,
            TOOLS_VERSION_MINOR,
            TOOLS_VERSION_BUILD,
        ),
        time_lo,
        time_hi,
        flags,
        code_size: code.len() as u32,
        data_size: elf.rw_size(),
        heap_size_min: settings.heap_min,
        heap_size_max: settings.heap_max,
        stack_size: settings.stack_size,
        bss_size: elf.bss_size(),
        entry_point,
        code_base: ro_base,
        data_base: elf.rw_base(),
        dll_ref_table_count: import_blocks.len() as u32,
        export_dir_count,
        export_dir_offset: 0,
        text_size: code.len() as u32,
        code_offset: 0,
        data_offset: 0,
        import_offset: 0,
        code_reloc_offset: 0,
        data_reloc_offset: 0,
        process_priority: if settings.is_dll { 0 } else { settings.priority },
        cpu_identifier: settings.cpu,
        secure_id: settings.secure_id,
        vendor_id: settings.vendor_id,
        capabilities: settings.capabilities,
        exception_descriptor,
        spare2: 0,
        export_desc_type: EXPORT_DESC_NO_HOLES,
        export_description: Vec::new(),
        uncompressed_size: 0,
    };
    if let Some(desc) = description {
        hdr.export_desc_type = desc.desc_type;
        hdr.export_description = desc.bytes;
    }

    // ── layout ──
    let header_size = hdr.total_size();
    hdr.code_offset = header_size as u32;
    if export_dir_count > 0 {
        hdr.export_dir_offset = (header_size + export_dir_offset) as u32;
    }

    let data = elf.rw_segment().to_vec();
    let mut offset = header_size + code.len();
    if !data.is_empty() {
        hdr.data_offset = offset as u32;
        offset += align4(data.len());
    }
    hdr.import_offset = offset as u32;
    offset += import_section.len();
    if !code_reloc_section.is_empty() {
        hdr.code_reloc_offset = offset as u32;
        offset += code_reloc_section.len();
    }
    if !data_reloc_section.is_empty() {
        hdr.data_reloc_offset = offset as u32;
        offset += data_reloc_section.len();
    }
    let total_size = offset;

    // ── fill ──
    let mut chunks = Chunks::default();
    chunks.add(0, hdr.to_bytes(), "header");
    chunks.add(hdr.code_offset as usize, code, "code section");
    if !data.is_empty() {
        let mut padded = data;
        padded.resize(align4(padded.len()), 0);
        chunks.add(hdr.data_offset as usize, padded, "data section");
    }
    chunks.add(hdr.import_offset as usize, import_section, "import section");
    if !code_reloc_section.is_empty() {
        chunks.add(hdr.code_reloc_offset as usize, code_reloc_section, "code relocs");
    }
    if !data_reloc_section.is_empty() {
        chunks.add(hdr.data_reloc_offset as usize, data_reloc_section, "data relocs");
    }
    debug_assert_eq!(chunks.total_size(), total_size);
    let mut image = chunks.assemble();

    // ── optional compression of everything after the header ──
    if settings.compression == UID_COMPRESSION_DEFLATE {
        let payload = image[header_size..].to_vec();
        hdr.uncompressed_size = payload.len() as u32;
        let packed = deflate::deflate(&payload)?;
        image.truncate(0);
        image.extend_from_slice(&hdr.to_bytes());
        image.extend_from_slice(&packed);
    }

    // ── checksums last: UID checksum, then the header CRC over the header
    // bytes with the CRC field zeroed ──
    let checksum = uid_checksum(hdr.uid1, hdr.uid2, hdr.uid3);
    write_u32(&mut image, 12, checksum);
    write_u32(&mut image, E32ImageHeader::CRC_OFFSET, 0);
    let crc = crc32(IMAGE_CRC_INITIALISER, &image[..header_size]);
    write_u32(&mut image, E32ImageHeader::CRC_OFFSET, crc);

    Ok(image)
}

/// Serialize the import section: total size word, one block per DLL
/// ({name offset, import count, code offsets of the fix-up words}), then
/// the NUL-terminated DLL names. An import-free image still carries the
/// size word, holding zero.
fn build_import_section(blocks: &[ResolvedImportBlock], ro_base: u32) -> Vec<u8> {
    let mut out = Vec::new();
    if blocks.is_empty() {
        push_u32(&mut out, 0);
        return out;
    }

    let blocks_size: usize = 4 + blocks.iter().map(|b| 8 + 4 * b.imports.len()).sum::<usize>();
    let mut name_off = blocks_size;
    let mut name_offsets = Vec::with_capacity(blocks.len());
    for block in blocks {
        name_offsets.push(name_off as u32);
        name_off += block.dll_name.len() + 1;
    }
    let total = align4(name_off);

    push_u32(&mut out, total as u32);
    for (block, &off) in blocks.iter().zip(&name_offsets) {
        push_u32(&mut out, off);
        push_u32(&mut out, block.imports.len() as u32);
        for import in &block.imports {
            push_u32(&mut out, import.addr.wrapping_sub(ro_base));
        }
    }
    for block in blocks {
        out.extend_from_slice(block.dll_name.as_bytes());
        out.push(0);
    }
    out.resize(total, 0);
    out
}

/// Write a finished image to disk in one sequential pass.
pub fn write_image_file(path: &str, image: &[u8]) -> Result<(), Elf2e32Error> {
    std::fs::write(path, image).map_err(|_| Elf2e32Error::FileWrite(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::read_u16;
    use crate::dso::ResolvedImport;
    use crate::elf::exports::SymbolKind;
    use crate::elf::test_elf::ElfBuilder;

    fn dll_settings() -> E32Settings {
        E32Settings {
            is_dll: true,
            uid1: UID1_DLL,
            uid2: 0x1000_008d,
            uid3: 0x0e32_0001,
            compression: COMPRESSION_NONE,
            ..Default::default()
        }
    }

    fn parse(image: &[u8]) -> E32ImageHeader {
        E32ImageHeader::read_from(image).unwrap()
    }

    fn export(name: &str, value: u32, ordinal: u32) -> Symbol {
        let mut s = Symbol::new(name, SymbolKind::Code);
        s.value = value;
        s.ordinal = Some(ordinal);
        s
    }

    #[test]
    fn minimal_dll_image() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new().export("f", 0x20, SymbolKind::Code).build();
        let elf = ElfImage::parse(elf_bytes, "min.elf", &mut diag).unwrap();
        let exports = vec![export("f", elf.ro_base() + 0x20, 1)];

        let image = build_e32_image(&elf, &exports, &[], &dll_settings(), &mut diag).unwrap();
        let hdr = parse(&image);

        assert_eq!(hdr.signature, SIGNATURE);
        assert_ne!(hdr.flags & IMAGE_DLL, 0);
        assert_eq!(hdr.export_dir_count, 1);
        assert_eq!(hdr.export_desc_type, EXPORT_DESC_NO_HOLES);
        assert!(hdr.export_description.is_empty());

        // the export directory's first entry is f's code offset
        assert_eq!(read_u32(&image, hdr.export_dir_offset as usize), 0x20);
        // preceded by the entry count word
        assert_eq!(read_u32(&image, hdr.export_dir_offset as usize - 4), 1);

        // import section is just a zero size word
        assert_eq!(read_u32(&image, hdr.import_offset as usize), 0);
        assert_eq!(hdr.dll_ref_table_count, 0);

        // CRC self-check: recompute with the field zeroed
        let mut header_bytes = image[..hdr.total_size()].to_vec();
        let stored = read_u32(&header_bytes, E32ImageHeader::CRC_OFFSET);
        write_u32(&mut header_bytes, E32ImageHeader::CRC_OFFSET, 0);
        assert_eq!(crc32(IMAGE_CRC_INITIALISER, &header_bytes), stored);

        // UID checksum invariant
        assert_eq!(hdr.uid_checksum, uid_checksum(hdr.uid1, hdr.uid2, hdr.uid3));
    }

    #[test]
    fn import_fixups_store_ordinals_and_blocks_record_offsets() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new()
            .import("DepFn", "dep{000a0000}.dll", "dep{000a0000}.dso", 0x30)
            .build();
        let elf = ElfImage::parse(elf_bytes, "imp.elf", &mut diag).unwrap();
        let blocks = vec![ResolvedImportBlock {
            dll_name: "dep{000a0000}.dll".to_string(),
            imports: vec![ResolvedImport { addr: elf.ro_base() + 0x30, ordinal: 5 }],
        }];

        let image = build_e32_image(&elf, &[], &blocks, &dll_settings(), &mut diag).unwrap();
        let hdr = parse(&image);
        assert_eq!(hdr.dll_ref_table_count, 1);

        // the code word at the fix-up offset now holds the ordinal
        assert_eq!(read_u32(&image, hdr.code_offset as usize + 0x30), 5);

        // import block: name offset, count, one code-offset entry
        let imp = hdr.import_offset as usize;
        let name_off = read_u32(&image, imp + 4) as usize;
        assert_eq!(read_u32(&image, imp + 8), 1);
        assert_eq!(read_u32(&image, imp + 12), 0x30);
        let name_end = name_off + "dep{000a0000}.dll".len();
        assert_eq!(&image[imp + name_off..imp + name_end], b"dep{000a0000}.dll");
        // total size covers the names
        assert!(read_u32(&image, imp) as usize >= name_end - 0);
    }

    #[test]
    fn local_relocations_cluster_into_the_code_reloc_section() {
        let mut diag = Diagnostics::new();
        // a relative fix-up whose addend points into the code segment
        let elf_bytes = ElfBuilder::new()
            .raw_reloc(0x20, crate::elf::R_ARM_RELATIVE, 0)
            .code_word(0x20, 0x120) // addend: inside the code segment
            .build();
        let elf = ElfImage::parse(elf_bytes, "rel.elf", &mut diag).unwrap();

        let image = build_e32_image(&elf, &[], &[], &dll_settings(), &mut diag).unwrap();
        let hdr = parse(&image);
        assert_ne!(hdr.code_reloc_offset, 0);
        assert_eq!(hdr.data_reloc_offset, 0);

        let cr = hdr.code_reloc_offset as usize;
        assert_eq!(read_u32(&image, cr + 4), 1); // one relocation
        assert_eq!(read_u32(&image, cr + 8), 0); // page 0
        assert_eq!(read_u16(&image, cr + 16), RELOC_TEXT | 0x20);
    }

    #[test]
    fn sparse_export_description_reaches_the_header() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new().export("only", 0x20, SymbolKind::Code).build();
        let elf = ElfImage::parse(elf_bytes, "sp.elf", &mut diag).unwrap();
        // 300 ordinals, just one present: sparse bitmap wins
        let exports = vec![export("only", elf.ro_base() + 0x20, 300)];

        let image = build_e32_image(&elf, &exports, &[], &dll_settings(), &mut diag).unwrap();
        let hdr = parse(&image);
        assert_eq!(hdr.export_dir_count, 300);
        assert_eq!(hdr.export_desc_type, EXPORT_DESC_SPARSE_BITMAP_8);
        assert!(!hdr.export_description.is_empty());
        // header grows with the description yet stays 4-aligned
        assert_eq!(hdr.code_offset as usize, hdr.total_size());
        assert_eq!(hdr.code_offset % 4, 0);
    }

    #[test]
    fn compressed_image_round_trips() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new().export("f", 0x20, SymbolKind::Code).build();
        let elf = ElfImage::parse(elf_bytes, "cmp.elf", &mut diag).unwrap();
        let exports = vec![export("f", elf.ro_base() + 0x20, 1)];

        let mut settings = dll_settings();
        settings.compression = COMPRESSION_NONE;
        let plain = build_e32_image(&elf, &exports, &[], &settings, &mut diag).unwrap();

        settings.compression = UID_COMPRESSION_DEFLATE;
        let packed = build_e32_image(&elf, &exports, &[], &settings, &mut diag).unwrap();
        let hdr = parse(&packed);

        assert_eq!(hdr.compression_type, UID_COMPRESSION_DEFLATE);
        let header_size = hdr.total_size();
        assert_eq!(hdr.uncompressed_size as usize, plain.len() - header_size);

        let unpacked =
            deflate::inflate(&packed[header_size..], hdr.uncompressed_size as usize).unwrap();
        assert_eq!(unpacked, plain[header_size..]);

        // the CRC covers the compressed file's header
        let mut header_bytes = packed[..header_size].to_vec();
        let stored = read_u32(&header_bytes, E32ImageHeader::CRC_OFFSET);
        write_u32(&mut header_bytes, E32ImageHeader::CRC_OFFSET, 0);
        assert_eq!(crc32(IMAGE_CRC_INITIALISER, &header_bytes), stored);
    }

    #[test]
    fn corrupt_entry_point_aborts() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new().code_word(0, 0).build();
        let elf = ElfImage::parse(elf_bytes, "bad.elf", &mut diag).unwrap();
        assert!(matches!(
            build_e32_image(&elf, &[], &[], &dll_settings(), &mut diag),
            Err(Elf2e32Error::EntryPointCorrupt(_))
        ));
    }

    #[test]
    fn unsupported_entry_point_warns_and_sets_no_call_flag() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new().code_word(0, 0xE1A0_0000).build(); // plain mov
        let elf = ElfImage::parse(elf_bytes, "odd.elf", &mut diag).unwrap();
        let image = build_e32_image(&elf, &[], &[], &dll_settings(), &mut diag).unwrap();
        let hdr = parse(&image);
        assert_ne!(hdr.flags & IMAGE_NO_CALL_ENTRY_POINT, 0);
        assert_eq!(diag.warning_count(), 1);
    }

    #[test]
    fn entry_point_patterns() {
        let mut code = vec![0u8; 16];
        write_u32(&mut code, 0, 0xE31F_0042);
        assert_eq!(validate_entry_point(&code, 0), EntryPointStatus::Ok);
        write_u32(&mut code, 0, 0xE51F_F004);
        assert_eq!(validate_entry_point(&code, 0), EntryPointStatus::Ok);
        write_u32(&mut code, 0, 0);
        assert_eq!(validate_entry_point(&code, 0), EntryPointStatus::Corrupt);
        write_u32(&mut code, 0, 0xE1A0_0000);
        assert_eq!(validate_entry_point(&code, 0), EntryPointStatus::NotSupported);
        // thumb entry points are not inspected
        assert_eq!(validate_entry_point(&code, 1), EntryPointStatus::Ok);
        // entry beyond the code section
        assert_eq!(validate_entry_point(&code, 64), EntryPointStatus::Corrupt);
    }

    #[test]
    fn chunk_extents_cover_the_file_exactly() {
        let mut diag = Diagnostics::new();
        let elf_bytes = ElfBuilder::new()
            .export("f", 0x20, SymbolKind::Code)
            .data_bytes(&[1, 2, 3, 4, 5, 6, 7, 8])
            .bss(0x40)
            .build();
        let elf = ElfImage::parse(elf_bytes, "full.elf", &mut diag).unwrap();
        let exports = vec![export("f", elf.ro_base() + 0x20, 1)];
        let image = build_e32_image(&elf, &exports, &[], &dll_settings(), &mut diag).unwrap();
        let hdr = parse(&image);

        assert_eq!(hdr.data_size, 8);
        assert_eq!(hdr.bss_size, 0x40);
        // header, code, data and the import size word tile the file
        let expected = hdr.total_size()
            + hdr.code_size as usize
            + align4(hdr.data_size as usize)
            + 4;
        assert_eq!(image.len(), expected);
        assert_eq!(hdr.data_offset, hdr.code_offset + hdr.code_size);
    }
}
