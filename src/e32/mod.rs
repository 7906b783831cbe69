//! E32 image format: constants, the image header record, and the packed
//! flags word.
//!
//! The header is a fixed little-endian record. The base layout is shared by
//! every header format; the V format appends security info, the exception
//! descriptor, the export description and the uncompressed size. Legacy
//! images (Original and J formats) are readable; the builder only ever
//! emits the V format.

pub mod exports;
pub mod image;
pub mod info;
pub mod reader;
pub mod relocs;

use crate::common::{align4, push_u16, push_u32, read_u16, read_u32};

pub const SIGNATURE: u32 = 0x434F_5045; // 'EPOC'

pub const BASE_HEADER_SIZE: usize = 124;
/// V header with a zero/one-byte export description and its padding.
pub const V_HEADER_SIZE: usize = 156;

pub const ORDINAL_BASE: u32 = 1;

// ── Flags word ──────────────────────────────────────────────────────────
pub const IMAGE_DLL: u32 = 0x0000_0001;
pub const IMAGE_NO_CALL_ENTRY_POINT: u32 = 0x0000_0002;
pub const IMAGE_FIXED_ADDRESS_EXE: u32 = 0x0000_0004;
pub const IMAGE_OLD_J_FLAG: u32 = 0x0000_0008;
pub const IMAGE_OLD_ELF_FLAG: u32 = 0x0000_0010;
pub const IMAGE_ABI_MASK: u32 = 0x0000_0018;
pub const IMAGE_ABI_GCC98R2: u32 = 0x0000_0000;
pub const IMAGE_ABI_EABI: u32 = 0x0000_0008;
pub const IMAGE_EPT_MASK: u32 = 0x0000_00e0;
pub const IMAGE_EPT_EKA1: u32 = 0x0000_0000;
pub const IMAGE_EPT_EKA2: u32 = 0x0000_0020;
pub const IMAGE_CODE_UNPAGED: u32 = 0x0000_0100;
pub const IMAGE_CODE_PAGED: u32 = 0x0000_0200;
pub const IMAGE_NMD_EXP_DATA: u32 = 0x0000_0400;
pub const IMAGE_DEBUGGABLE: u32 = 0x0000_0800;
pub const IMAGE_SMP_SAFE: u32 = 0x0000_4000;
pub const IMAGE_HW_FLOAT_MASK: u32 = 0x00f0_0000;
pub const IMAGE_HW_FLOAT_SHIFT: u32 = 20;
pub const IMAGE_HDR_FMT_MASK: u32 = 0x0f00_0000;
pub const IMAGE_HDR_FMT_ORIGINAL: u32 = 0x0000_0000;
pub const IMAGE_HDR_FMT_J: u32 = 0x0100_0000;
pub const IMAGE_HDR_FMT_V: u32 = 0x0200_0000;
pub const IMAGE_IMP_FMT_MASK: u32 = 0xf000_0000;
pub const IMAGE_IMP_FMT_PE: u32 = 0x0000_0000;
pub const IMAGE_IMP_FMT_ELF: u32 = 0x1000_0000;
pub const IMAGE_IMP_FMT_PE2: u32 = 0x2000_0000;

// Floating point types, pre-shift
pub const FP_TYPE_NONE: u32 = 0;
pub const FP_TYPE_VFPV2: u32 = 1;

// Compression method UIDs
pub const COMPRESSION_NONE: u32 = 0;
pub const UID_COMPRESSION_DEFLATE: u32 = 0x101F_7AFC;

// Export description types
pub const EXPORT_DESC_NO_HOLES: u8 = 0x00;
pub const EXPORT_DESC_FULL_BITMAP: u8 = 0x01;
pub const EXPORT_DESC_SPARSE_BITMAP_8: u8 = 0x02;
/// Defined by the format for execute-in-place images; never emitted here.
pub const EXPORT_DESC_XIP: u8 = 0xff;

// E32 relocation kinds (high nibble of the 16-bit relocation word)
pub const RELOC_RESERVED: u16 = 0x0000;
pub const RELOC_TEXT: u16 = 0x1000;
pub const RELOC_DATA: u16 = 0x2000;
pub const RELOC_INFERRED: u16 = 0x3000;

pub const RELOC_PAGE_SIZE: u32 = 0x1000;

// CPU identifiers
pub const CPU_UNKNOWN: u16 = 0x0000;
pub const CPU_X86: u16 = 0x1000;
pub const CPU_ARM_V4: u16 = 0x2000;
pub const CPU_ARM_V5: u16 = 0x2001;
pub const CPU_ARM_V6: u16 = 0x2002;

// Well-known first UIDs
pub const UID1_DLL: u32 = 0x1000_0079;
pub const UID1_EXE: u32 = 0x1000_007A;
/// Second UID stamped on STDLIB-aware executables.
pub const UID2_STDEXE: u32 = 0x2000_4C45;

// Process priorities
pub const PRIORITY_LOW: u16 = 150;
pub const PRIORITY_BACKGROUND: u16 = 250;
pub const PRIORITY_FOREGROUND: u16 = 350;
pub const PRIORITY_HIGH: u16 = 450;
pub const PRIORITY_WINDOW_SERVER: u16 = 650;
pub const PRIORITY_FILE_SERVER: u16 = 750;
pub const PRIORITY_REAL_TIME_SERVER: u16 = 850;
pub const PRIORITY_SUPERVISOR: u16 = 950;

/// Capability bit names, in bit order.
pub const CAPABILITY_NAMES: [&str; 20] = [
    "TCB",
    "CommDD",
    "PowerMgmt",
    "MultimediaDD",
    "ReadDeviceData",
    "WriteDeviceData",
    "DRM",
    "TrustedUI",
    "ProtServ",
    "DiskAdmin",
    "NetworkControl",
    "AllFiles",
    "SwEvent",
    "NetworkServices",
    "LocalServices",
    "ReadUserData",
    "WriteUserData",
    "Location",
    "SurroundingsDD",
    "UserEnvironment",
];

// ── Flag field extraction, with the legacy-format compatibility rules ───

pub fn hdr_fmt_from_flags(flags: u32) -> u32 {
    if flags & IMAGE_HDR_FMT_MASK != 0 {
        flags & IMAGE_HDR_FMT_MASK
    } else if flags & IMAGE_OLD_J_FLAG != 0 {
        IMAGE_HDR_FMT_J
    } else {
        IMAGE_HDR_FMT_ORIGINAL
    }
}

pub fn abi_from_flags(flags: u32) -> u32 {
    if flags & IMAGE_HDR_FMT_MASK != 0 {
        flags & IMAGE_ABI_MASK
    } else if flags & IMAGE_OLD_ELF_FLAG != 0 {
        IMAGE_ABI_EABI
    } else {
        IMAGE_ABI_GCC98R2
    }
}

pub fn ept_from_flags(flags: u32) -> u32 {
    if flags & IMAGE_HDR_FMT_MASK != 0 {
        flags & IMAGE_EPT_MASK
    } else if flags & IMAGE_OLD_J_FLAG != 0 {
        IMAGE_EPT_EKA2
    } else {
        IMAGE_EPT_EKA1
    }
}

pub fn imp_fmt_from_flags(flags: u32) -> u32 {
    if flags & IMAGE_HDR_FMT_MASK != 0 {
        flags & IMAGE_IMP_FMT_MASK
    } else if flags & IMAGE_OLD_ELF_FLAG != 0 {
        IMAGE_IMP_FMT_ELF
    } else {
        IMAGE_IMP_FMT_PE
    }
}

/// Convert a host time (seconds since the Unix epoch) to the image's
/// microseconds-since-year-0 pair.
pub fn image_timestamp(unix_secs: u64) -> (u32, u32) {
    const SECS_1970_TO_2000: u64 = (30 * 365 + 7) * 24 * 60 * 60;
    const DAYS_TO_2000AD: u64 = 730_497;
    let since_2000 = unix_secs.saturating_sub(SECS_1970_TO_2000);
    let t = (DAYS_TO_2000AD * 24 * 3600 + since_2000 + 3600) * 1_000_000;
    (t as u32, (t >> 32) as u32)
}

/// The E32 image header, V layout. Legacy formats parse into the same
/// record with the extension fields zeroed.
#[derive(Clone, Debug, Default)]
pub struct E32ImageHeader {
    pub uid1: u32,
    pub uid2: u32,
    pub uid3: u32,
    pub uid_checksum: u32,
    pub signature: u32,
    pub header_crc: u32,
    pub module_version: u32,
    pub compression_type: u32,
    pub tools_version: u32,
    pub time_lo: u32,
    pub time_hi: u32,
    pub flags: u32,
    pub code_size: u32,
    pub data_size: u32,
    pub heap_size_min: u32,
    pub heap_size_max: u32,
    pub stack_size: u32,
    pub bss_size: u32,
    pub entry_point: u32,
    pub code_base: u32,
    pub data_base: u32,
    pub dll_ref_table_count: u32,
    pub export_dir_offset: u32,
    pub export_dir_count: u32,
    pub text_size: u32,
    pub code_offset: u32,
    pub data_offset: u32,
    pub import_offset: u32,
    pub code_reloc_offset: u32,
    pub data_reloc_offset: u32,
    pub process_priority: u16,
    pub cpu_identifier: u16,
    // V extension
    pub secure_id: u32,
    pub vendor_id: u32,
    pub capabilities: [u32; 2],
    pub exception_descriptor: u32,
    pub spare2: u32,
    pub export_desc_type: u8,
    pub export_description: Vec<u8>,
    pub uncompressed_size: u32,
}

pub fn tools_version(major: u8, minor: u8, build: u16) -> u32 {
    (major as u32) << 24 | (minor as u32) << 16 | build as u32
}

impl E32ImageHeader {
    pub fn header_format(&self) -> u32 {
        hdr_fmt_from_flags(self.flags)
    }

    /// Total header size; for the V format this is where the code starts.
    pub fn total_size(&self) -> usize {
        V_HEADER_SIZE + align4(self.export_description.len().saturating_sub(1))
    }

    /// File offset of the header CRC field, needed to zero it for the
    /// CRC computation itself.
    pub const CRC_OFFSET: usize = 20;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let desc_len = self.export_description.len();
        push_u32(out, self.uid1);
        push_u32(out, self.uid2);
        push_u32(out, self.uid3);
        push_u32(out, self.uid_checksum);
        push_u32(out, self.signature);
        push_u32(out, self.header_crc);
        push_u32(out, self.module_version);
        push_u32(out, self.compression_type);
        push_u32(out, self.tools_version);
        push_u32(out, self.time_lo);
        push_u32(out, self.time_hi);
        push_u32(out, self.flags);
        push_u32(out, self.code_size);
        push_u32(out, self.data_size);
        push_u32(out, self.heap_size_min);
        push_u32(out, self.heap_size_max);
        push_u32(out, self.stack_size);
        push_u32(out, self.bss_size);
        push_u32(out, self.entry_point);
        push_u32(out, self.code_base);
        push_u32(out, self.data_base);
        push_u32(out, self.dll_ref_table_count);
        push_u32(out, self.export_dir_offset);
        push_u32(out, self.export_dir_count);
        push_u32(out, self.text_size);
        push_u32(out, self.code_offset);
        push_u32(out, self.data_offset);
        push_u32(out, self.import_offset);
        push_u32(out, self.code_reloc_offset);
        push_u32(out, self.data_reloc_offset);
        push_u16(out, self.process_priority);
        push_u16(out, self.cpu_identifier);
        // V extension
        push_u32(out, self.secure_id);
        push_u32(out, self.vendor_id);
        push_u32(out, self.capabilities[0]);
        push_u32(out, self.capabilities[1]);
        push_u32(out, self.exception_descriptor);
        push_u32(out, self.spare2);
        push_u16(out, desc_len as u16);
        out.push(self.export_desc_type);
        // the description area spans at least one byte and pads so the
        // trailing size field stays aligned
        let desc_area = 1 + align4(desc_len.saturating_sub(1));
        let mut desc = self.export_description.clone();
        desc.resize(desc_area, 0);
        out.extend_from_slice(&desc);
        push_u32(out, self.uncompressed_size);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_size());
        self.write_to(&mut out);
        out
    }

    /// Parse a header from the start of an image file. Handles the V
    /// format fully; legacy formats get the base fields only.
    pub fn read_from(data: &[u8]) -> Option<E32ImageHeader> {
        if data.len() < BASE_HEADER_SIZE {
            return None;
        }
        let mut hdr = E32ImageHeader {
            uid1: read_u32(data, 0),
            uid2: read_u32(data, 4),
            uid3: read_u32(data, 8),
            uid_checksum: read_u32(data, 12),
            signature: read_u32(data, 16),
            header_crc: read_u32(data, 20),
            module_version: read_u32(data, 24),
            compression_type: read_u32(data, 28),
            tools_version: read_u32(data, 32),
            time_lo: read_u32(data, 36),
            time_hi: read_u32(data, 40),
            flags: read_u32(data, 44),
            code_size: read_u32(data, 48),
            data_size: read_u32(data, 52),
            heap_size_min: read_u32(data, 56),
            heap_size_max: read_u32(data, 60),
            stack_size: read_u32(data, 64),
            bss_size: read_u32(data, 68),
            entry_point: read_u32(data, 72),
            code_base: read_u32(data, 76),
            data_base: read_u32(data, 80),
            dll_ref_table_count: read_u32(data, 84),
            export_dir_offset: read_u32(data, 88),
            export_dir_count: read_u32(data, 92),
            text_size: read_u32(data, 96),
            code_offset: read_u32(data, 100),
            data_offset: read_u32(data, 104),
            import_offset: read_u32(data, 108),
            code_reloc_offset: read_u32(data, 112),
            data_reloc_offset: read_u32(data, 116),
            process_priority: read_u16(data, 120),
            cpu_identifier: read_u16(data, 122),
            ..E32ImageHeader::default()
        };

        if hdr.header_format() == IMAGE_HDR_FMT_V {
            if data.len() < V_HEADER_SIZE {
                return None;
            }
            hdr.secure_id = read_u32(data, 124);
            hdr.vendor_id = read_u32(data, 128);
            hdr.capabilities = [read_u32(data, 132), read_u32(data, 136)];
            hdr.exception_descriptor = read_u32(data, 140);
            hdr.spare2 = read_u32(data, 144);
            let desc_len = read_u16(data, 148) as usize;
            hdr.export_desc_type = data[150];
            let desc_area = 1 + align4(desc_len.saturating_sub(1));
            if data.len() < 151 + desc_area + 4 {
                return None;
            }
            hdr.export_description = data[151..151 + desc_len].to_vec();
            hdr.uncompressed_size = read_u32(data, 151 + desc_area);
        } else if hdr.header_format() == IMAGE_HDR_FMT_J
            && hdr.compression_type != 0
            && data.len() >= BASE_HEADER_SIZE + 4
        {
            hdr.uncompressed_size = read_u32(data, BASE_HEADER_SIZE);
        }
        Some(hdr)
    }

    /// Uncompressed payload+header size, when the image is compressed.
    /// Mirrors the legacy quirk that the J format counts from the end of
    /// the base header while V counts from the end of the full header.
    pub fn uncompressed_file_size(&self) -> Option<usize> {
        if self.header_format() == IMAGE_HDR_FMT_ORIGINAL || self.compression_type == 0 {
            None
        } else if self.header_format() == IMAGE_HDR_FMT_J {
            Some(self.uncompressed_size as usize + BASE_HEADER_SIZE)
        } else {
            Some(self.uncompressed_size as usize + self.total_size())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut hdr = E32ImageHeader {
            uid1: UID1_DLL,
            uid2: 0x1000_008d,
            uid3: 0x0bad_f00d,
            signature: SIGNATURE,
            flags: IMAGE_DLL | IMAGE_ABI_EABI | IMAGE_EPT_EKA2 | IMAGE_HDR_FMT_V
                | IMAGE_IMP_FMT_ELF,
            code_size: 0x400,
            entry_point: 0x10,
            process_priority: PRIORITY_FOREGROUND,
            cpu_identifier: CPU_ARM_V5,
            secure_id: 0x1234,
            capabilities: [0xfffff, 0],
            export_desc_type: EXPORT_DESC_NO_HOLES,
            ..Default::default()
        };
        hdr.code_offset = hdr.total_size() as u32;

        let bytes = hdr.to_bytes();
        assert_eq!(bytes.len(), V_HEADER_SIZE);
        let back = E32ImageHeader::read_from(&bytes).unwrap();
        assert_eq!(back.uid1, hdr.uid1);
        assert_eq!(back.flags, hdr.flags);
        assert_eq!(back.code_size, 0x400);
        assert_eq!(back.secure_id, 0x1234);
        assert_eq!(back.capabilities, [0xfffff, 0]);
        assert_eq!(back.process_priority, PRIORITY_FOREGROUND);
        assert_eq!(back.cpu_identifier, CPU_ARM_V5);
        assert_eq!(back.total_size(), hdr.total_size());
    }

    #[test]
    fn header_round_trip_with_description() {
        let hdr = E32ImageHeader {
            signature: SIGNATURE,
            flags: IMAGE_HDR_FMT_V,
            export_desc_type: EXPORT_DESC_FULL_BITMAP,
            export_description: vec![0xfe, 0xff, 0x3f],
            uncompressed_size: 0x1234,
            ..Default::default()
        };
        let bytes = hdr.to_bytes();
        assert_eq!(bytes.len(), V_HEADER_SIZE + 4);
        assert_eq!(bytes.len(), hdr.total_size());
        let back = E32ImageHeader::read_from(&bytes).unwrap();
        assert_eq!(back.export_description, vec![0xfe, 0xff, 0x3f]);
        assert_eq!(back.export_desc_type, EXPORT_DESC_FULL_BITMAP);
        assert_eq!(back.uncompressed_size, 0x1234);
    }

    #[test]
    fn legacy_flag_compatibility() {
        // header format nibble wins when present
        let v = IMAGE_HDR_FMT_V | IMAGE_ABI_EABI | IMAGE_EPT_EKA2 | IMAGE_IMP_FMT_PE2;
        assert_eq!(hdr_fmt_from_flags(v), IMAGE_HDR_FMT_V);
        assert_eq!(abi_from_flags(v), IMAGE_ABI_EABI);
        assert_eq!(ept_from_flags(v), IMAGE_EPT_EKA2);
        assert_eq!(imp_fmt_from_flags(v), IMAGE_IMP_FMT_PE2);

        // legacy bits: old ELF flag implies EABI + ELF imports
        let old_elf = IMAGE_OLD_ELF_FLAG;
        assert_eq!(abi_from_flags(old_elf), IMAGE_ABI_EABI);
        assert_eq!(imp_fmt_from_flags(old_elf), IMAGE_IMP_FMT_ELF);
        // old J flag implies the J format and the Eka2 entry point
        let old_j = IMAGE_OLD_J_FLAG;
        assert_eq!(hdr_fmt_from_flags(old_j), IMAGE_HDR_FMT_J);
        assert_eq!(ept_from_flags(old_j), IMAGE_EPT_EKA2);
        // nothing set: the oldest of everything
        assert_eq!(hdr_fmt_from_flags(0), IMAGE_HDR_FMT_ORIGINAL);
        assert_eq!(abi_from_flags(0), IMAGE_ABI_GCC98R2);
        assert_eq!(ept_from_flags(0), IMAGE_EPT_EKA1);
        assert_eq!(imp_fmt_from_flags(0), IMAGE_IMP_FMT_PE);
    }

    #[test]
    fn timestamp_is_in_the_image_epoch() {
        // 2000-01-01T00:00:00Z plus the 3600s skew used by the tooling
        let (lo, hi) = image_timestamp((30 * 365 + 7) * 24 * 60 * 60);
        let t = ((hi as u64) << 32) | lo as u64;
        assert_eq!(t, (730_497u64 * 24 * 3600 + 3600) * 1_000_000);
    }

    #[test]
    fn uncompressed_file_size_per_format() {
        let mut hdr = E32ImageHeader {
            flags: IMAGE_HDR_FMT_V,
            compression_type: UID_COMPRESSION_DEFLATE,
            uncompressed_size: 1000,
            ..Default::default()
        };
        assert_eq!(hdr.uncompressed_file_size(), Some(1000 + hdr.total_size()));
        hdr.flags = IMAGE_OLD_J_FLAG;
        assert_eq!(hdr.uncompressed_file_size(), Some(1000 + BASE_HEADER_SIZE));
        hdr.compression_type = 0;
        assert_eq!(hdr.uncompressed_file_size(), None);
    }
}
