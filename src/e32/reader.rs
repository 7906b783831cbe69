//! Reading finished E32 images back: header location, integrity checks,
//! and decompression of the payload.

use crate::codec::deflate;
use crate::common::crc::{crc32, uid_checksum, IMAGE_CRC_INITIALISER};
use crate::common::error::{Diagnostics, Elf2e32Error};
use crate::common::{read_u32, write_u32};

use super::*;

#[derive(Debug)]
pub struct E32Reader {
    pub file: String,
    pub hdr: E32ImageHeader,
    /// Header plus decompressed payload.
    pub image: Vec<u8>,
}

impl E32Reader {
    pub fn read(path: &str, diag: &mut Diagnostics) -> Result<E32Reader, Elf2e32Error> {
        let raw = std::fs::read(path).map_err(|_| Elf2e32Error::FileOpen(path.to_string()))?;
        E32Reader::parse(raw, path, diag)
    }

    pub fn parse(
        raw: Vec<u8>,
        path: &str,
        diag: &mut Diagnostics,
    ) -> Result<E32Reader, Elf2e32Error> {
        let file = path.to_string();
        let hdr = E32ImageHeader::read_from(&raw)
            .ok_or_else(|| Elf2e32Error::UnreachableHeaderFormat(file.clone()))?;
        if hdr.signature != SIGNATURE {
            return Err(Elf2e32Error::E32Signature(file));
        }
        let fmt = hdr.header_format();
        if fmt != IMAGE_HDR_FMT_ORIGINAL && fmt != IMAGE_HDR_FMT_J && fmt != IMAGE_HDR_FMT_V {
            return Err(Elf2e32Error::UnreachableHeaderFormat(file));
        }

        // integrity first: UID checksum for every format, the header CRC
        // only where the field exists (pre-V images alias it with the CPU
        // identifier)
        if hdr.uid_checksum != uid_checksum(hdr.uid1, hdr.uid2, hdr.uid3) {
            return Err(Elf2e32Error::E32UidChecksum(file));
        }
        if fmt == IMAGE_HDR_FMT_V {
            let header_size = hdr.total_size().min(raw.len());
            let mut header_bytes = raw[..header_size].to_vec();
            write_u32(&mut header_bytes, E32ImageHeader::CRC_OFFSET, 0);
            if crc32(IMAGE_CRC_INITIALISER, &header_bytes) != hdr.header_crc {
                return Err(Elf2e32Error::E32HeaderCrc(file));
            }
        } else {
            diag.warning(format!(
                "{}: legacy header format, integrity not fully checkable",
                file
            ));
        }

        let image = if hdr.compression_type == UID_COMPRESSION_DEFLATE {
            // the compressed stream starts where the uncompressed payload
            // would; the J format's quirk of counting from the base header
            // is folded into uncompressed_file_size()
            let header_end = if fmt == IMAGE_HDR_FMT_J {
                BASE_HEADER_SIZE + 4
            } else {
                hdr.total_size()
            };
            let expected = hdr
                .uncompressed_file_size()
                .unwrap_or(header_end)
                .saturating_sub(if fmt == IMAGE_HDR_FMT_J {
                    BASE_HEADER_SIZE
                } else {
                    hdr.total_size()
                });
            if header_end > raw.len() {
                return Err(Elf2e32Error::UnreachableHeaderFormat(file));
            }
            let payload = deflate::inflate(&raw[header_end..], expected)?;
            let mut image = raw[..header_end].to_vec();
            image.extend_from_slice(&payload);
            image
        } else if hdr.compression_type != 0 {
            return Err(Elf2e32Error::UnreachableHeaderFormat(file));
        } else {
            raw
        };

        Ok(E32Reader { file, hdr, image })
    }

    pub fn code(&self) -> &[u8] {
        let start = self.hdr.code_offset as usize;
        let end = (start + self.hdr.code_size as usize).min(self.image.len());
        self.image.get(start..end).unwrap_or(&[])
    }

    pub fn data(&self) -> &[u8] {
        if self.hdr.data_offset == 0 {
            return &[];
        }
        let start = self.hdr.data_offset as usize;
        let end = (start + self.hdr.data_size as usize).min(self.image.len());
        self.image.get(start..end).unwrap_or(&[])
    }

    /// Export directory entries.
    pub fn export_dir(&self) -> Vec<u32> {
        let off = self.hdr.export_dir_offset as usize;
        let count = self.hdr.export_dir_count as usize;
        (0..count)
            .filter_map(|i| {
                let pos = off + 4 * i;
                if pos + 4 <= self.image.len() {
                    Some(read_u32(&self.image, pos))
                } else {
                    None
                }
            })
            .collect()
    }

    /// The CPU identifier; best-effort on legacy images, where the field
    /// aliases the header CRC.
    pub fn cpu_identifier(&self, diag: &mut Diagnostics) -> u16 {
        if self.hdr.header_format() == IMAGE_HDR_FMT_V {
            self.hdr.cpu_identifier
        } else {
            diag.warning(format!(
                "{}: legacy image, CPU identifier read from the CRC field is best-effort",
                self.file
            ));
            self.hdr.header_crc as u16
        }
    }
}
