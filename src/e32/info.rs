//! The `--dump` mode: pretty-print a finished E32 image.
//!
//! Dump flags select the parts: h = header, s = security info, c = code
//! section, d = data section, e = export directory, i = import table,
//! t = symbol info.

use crate::common::error::Diagnostics;
use crate::common::{read_cstr, read_u32};

use super::reader::E32Reader;
use super::*;

pub fn dump(reader: &E32Reader, flags: &str, diag: &mut Diagnostics) {
    for flag in flags.chars() {
        match flag {
            'h' => header_info(reader, diag),
            's' => security_info(reader),
            'c' => hex_section("Code", reader.code()),
            'd' => hex_section("Data", reader.data()),
            'e' => export_table(reader),
            'i' => import_table(reader),
            't' => symbol_info(reader),
            _ => diag.warning(format!("Unknown dump flag '{}'", flag)),
        }
    }
}

fn format_name(fmt: u32) -> &'static str {
    match fmt {
        IMAGE_HDR_FMT_J => "J",
        IMAGE_HDR_FMT_V => "V",
        _ => "Original",
    }
}

fn header_info(reader: &E32Reader, diag: &mut Diagnostics) {
    let hdr = &reader.hdr;
    println!("E32ImageFile '{}'", reader.file);
    println!("V{}.{:02}({:03})\tTime Stamp: {:08x},{:08x}",
        hdr.tools_version >> 24,
        (hdr.tools_version >> 16) & 0xff,
        hdr.tools_version & 0xffff,
        hdr.time_hi,
        hdr.time_lo
    );
    let kind = if hdr.flags & IMAGE_DLL != 0 { "DLL" } else { "EXE" };
    println!("Flags:\t{:08x} ({})", hdr.flags, kind);
    println!("Header format: {}", format_name(hdr.header_format()));
    let abi = if abi_from_flags(hdr.flags) == IMAGE_ABI_EABI { "EABI" } else { "GCC98r2" };
    println!("ABI: {}", abi);
    let ept = if ept_from_flags(hdr.flags) == IMAGE_EPT_EKA2 { "EKA2" } else { "EKA1" };
    println!("Entry points are for {}", ept);
    let imp = match imp_fmt_from_flags(hdr.flags) {
        IMAGE_IMP_FMT_ELF => "ELF",
        IMAGE_IMP_FMT_PE2 => "PE2",
        _ => "PE",
    };
    println!("Import format: {}", imp);
    println!(
        "Uids:\t\t{:08x} {:08x} {:08x} ({:08x})",
        hdr.uid1, hdr.uid2, hdr.uid3, hdr.uid_checksum
    );
    println!("Header CRC:\t{:08x}", hdr.header_crc);
    println!("Module Version:\t{}.{}", hdr.module_version >> 16, hdr.module_version & 0xffff);
    match hdr.compression_type {
        0 => println!("Uncompressed"),
        UID_COMPRESSION_DEFLATE => println!("Compressed using the deflate algorithm"),
        other => println!("Compression type {:08x}", other),
    }
    println!("Priority:\t{}", hdr.process_priority);
    let cpu = reader.cpu_identifier(diag);
    let cpu_name = match cpu {
        CPU_X86 => "X86",
        CPU_ARM_V4 => "ARMv4",
        CPU_ARM_V5 => "ARMv5",
        CPU_ARM_V6 => "ARMv6",
        _ => "Unknown",
    };
    println!("CPU:\t{:04x} ({})", cpu, cpu_name);
    println!("Code size:\t{:08x}", hdr.code_size);
    println!("Text size:\t{:08x}", hdr.text_size);
    println!("Data size:\t{:08x}", hdr.data_size);
    println!("Bss size:\t{:08x}", hdr.bss_size);
    println!("Heap min/max:\t{:08x} {:08x}", hdr.heap_size_min, hdr.heap_size_max);
    println!("Stack size:\t{:08x}", hdr.stack_size);
    println!("Entry point:\t{:08x}", hdr.entry_point);
    println!("Code base:\t{:08x}", hdr.code_base);
    println!("Data base:\t{:08x}", hdr.data_base);
    println!("DLL refs:\t{}", hdr.dll_ref_table_count);
    println!(
        "Export dir:\t{:08x} ({} entries, description type {:02x})",
        hdr.export_dir_offset, hdr.export_dir_count, hdr.export_desc_type
    );
    println!(
        "Offsets:\tcode {:08x} data {:08x} imports {:08x} code relocs {:08x} data relocs {:08x}",
        hdr.code_offset,
        hdr.data_offset,
        hdr.import_offset,
        hdr.code_reloc_offset,
        hdr.data_reloc_offset
    );
    if let Some(size) = hdr.uncompressed_file_size() {
        println!("Uncompressed size: {:08x}", size);
    }
}

fn security_info(reader: &E32Reader) {
    let hdr = &reader.hdr;
    println!("Secure ID: {:08x}", hdr.secure_id);
    println!("Vendor ID: {:08x}", hdr.vendor_id);
    print!("Capabilities: {:08x} {:08x} (", hdr.capabilities[1], hdr.capabilities[0]);
    let mut first = true;
    for (bit, name) in CAPABILITY_NAMES.iter().enumerate() {
        if hdr.capabilities[0] & (1 << bit) != 0 {
            if !first {
                print!(" ");
            }
            print!("{}", name);
            first = false;
        }
    }
    println!(")");
}

fn hex_section(title: &str, bytes: &[u8]) {
    println!("\n{} ({} bytes)", title, bytes.len());
    for (i, row) in bytes.chunks(16).enumerate() {
        print!("{:06x}:", i * 16);
        for b in row {
            print!(" {:02x}", b);
        }
        let text: String = row
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        println!("  {}", text);
    }
}

fn export_table(reader: &E32Reader) {
    let entries = reader.export_dir();
    println!("\nExport directory ({} entries)", entries.len());
    for (i, entry) in entries.iter().enumerate() {
        println!("\tOrdinal {}:\t{:08x}", i + 1, entry);
    }
}

fn import_table(reader: &E32Reader) {
    let hdr = &reader.hdr;
    let base = hdr.import_offset as usize;
    if base == 0 || base + 4 > reader.image.len() {
        println!("\nNo import section");
        return;
    }
    let section_size = read_u32(&reader.image, base);
    println!("\nImport section ({} bytes, {} DLLs)", section_size, hdr.dll_ref_table_count);
    // PE2-format blocks carry no entry list; the ordinals live in the code
    // section itself
    let has_entries = imp_fmt_from_flags(hdr.flags) != IMAGE_IMP_FMT_PE2;
    let mut off = base + 4;
    for _ in 0..hdr.dll_ref_table_count {
        if off + 8 > reader.image.len() {
            break;
        }
        let name_off = read_u32(&reader.image, off) as usize;
        let count = read_u32(&reader.image, off + 4) as usize;
        let name = read_cstr(&reader.image, base + name_off);
        println!("{} ({} imports)", name, count);
        off += 8;
        if !has_entries {
            continue;
        }
        for i in 0..count {
            let pos = off + 4 * i;
            if pos + 4 > reader.image.len() {
                break;
            }
            println!("\t{:08x}", read_u32(&reader.image, pos));
        }
        off += 4 * count;
    }
}

fn symbol_info(reader: &E32Reader) {
    // named symbol lookup sections are not generated by this tool
    println!("\nNo symbol info present in {}", reader.file);
}
