//! Structured error and diagnostic infrastructure for the post-linker.
//!
//! Every failure the tool can report is a variant of [`Elf2e32Error`],
//! grouped by domain (parameter, file, ELF structure, symbol, DEF, E32,
//! compression, capability). Each variant carries a stable numeric message
//! code; the rendered diagnostic is a single line of the form
//! `elf2e32 : Error: E<code>: <message>`.
//!
//! Warnings go through the [`Diagnostics`] sink, which is passed explicitly
//! down the pipeline; there is no process-global message handler.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elf2e32Error {
    // ── Parameter errors ────────────────────────────────────────────────
    /// A required option was not supplied (e.g. `--output` for an image target).
    NoRequiredOption(String),
    /// An option was supplied without its mandatory argument.
    NoArgument(String),
    /// An option argument failed to parse.
    InvalidArgument { option: String, value: String },
    /// No use case can be selected from the supplied options.
    InvalidInvocation,
    /// An option that is not recognized at all.
    UnrecognizedOption(String),

    // ── File errors ─────────────────────────────────────────────────────
    FileOpen(String),
    FileRead(String),
    FileWrite(String),

    // ── ELF structure errors ────────────────────────────────────────────
    ElfMagic(String),
    ElfClass(String),
    ElfEndianness(String),
    ElfExecutable(String),
    ElfShStrIndex(String),
    ElfTruncated(String),
    SectionMissing { section: String, file: String },
    NoStaticSymbols(String),
    EntryPointNotSet(String),

    // ── Symbol and relocation errors ────────────────────────────────────
    UndefinedSymbol { file: String, symbol: String },
    UnknownRelocation { file: String, rel_type: u32 },
    SymbolCountMismatch(String),
    /// Frozen exports present in the DEF file are missing from the ELF and
    /// `--unfrozen` was not given.
    SymbolMissingFromElf { file: String, symbols: String },
    SysDefMismatch { file: String, symbols: String },
    SymbolNotInDso { dso: String, symbol: String },

    // ── DEF file errors ─────────────────────────────────────────────────
    DefSyntax { file: String, line: u32 },
    DefOrdinal { file: String, line: u32 },

    // ── E32 image errors ────────────────────────────────────────────────
    E32Signature(String),
    E32UidChecksum(String),
    E32HeaderCrc(String),
    UnreachableHeaderFormat(String),
    EntryPointCorrupt(String),

    // ── Compression errors ──────────────────────────────────────────────
    HuffmanTooManyCodes,
    HuffmanInvalidCoding,
    HuffmanBufferOverflow,

    // ── Capability errors ───────────────────────────────────────────────
    InvalidCapability(String),
    CapabilityConflict(String),
}

impl Elf2e32Error {
    /// Stable numeric message code, used in the rendered diagnostic and by
    /// `--dumpmessagefile`.
    pub fn code(&self) -> u32 {
        use Elf2e32Error::*;
        match self {
            NoRequiredOption(..) => 1001,
            NoArgument(..) => 1002,
            InvalidArgument { .. } => 1003,
            InvalidInvocation => 1004,
            UnrecognizedOption(..) => 1005,
            FileOpen(..) => 1101,
            FileRead(..) => 1102,
            FileWrite(..) => 1103,
            ElfMagic(..) => 1201,
            ElfClass(..) => 1202,
            ElfEndianness(..) => 1203,
            ElfExecutable(..) => 1204,
            ElfShStrIndex(..) => 1205,
            ElfTruncated(..) => 1206,
            SectionMissing { .. } => 1207,
            NoStaticSymbols(..) => 1208,
            EntryPointNotSet(..) => 1209,
            UndefinedSymbol { .. } => 1301,
            UnknownRelocation { .. } => 1302,
            SymbolCountMismatch(..) => 1303,
            SymbolMissingFromElf { .. } => 1304,
            SysDefMismatch { .. } => 1305,
            SymbolNotInDso { .. } => 1306,
            DefSyntax { .. } => 1401,
            DefOrdinal { .. } => 1402,
            E32Signature(..) => 1501,
            E32UidChecksum(..) => 1502,
            E32HeaderCrc(..) => 1503,
            UnreachableHeaderFormat(..) => 1504,
            EntryPointCorrupt(..) => 1505,
            HuffmanTooManyCodes => 1601,
            HuffmanInvalidCoding => 1602,
            HuffmanBufferOverflow => 1603,
            InvalidCapability(..) => 1701,
            CapabilityConflict(..) => 1702,
        }
    }

    /// Parameter errors additionally get a usage reminder at the top level.
    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            Elf2e32Error::NoRequiredOption(..)
                | Elf2e32Error::NoArgument(..)
                | Elf2e32Error::InvalidArgument { .. }
                | Elf2e32Error::InvalidInvocation
                | Elf2e32Error::UnrecognizedOption(..)
        )
    }
}

impl fmt::Display for Elf2e32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Elf2e32Error::*;
        match self {
            NoRequiredOption(opt) => write!(f, "Option {} is mandatory for this target", opt),
            NoArgument(opt) => write!(f, "Option {} requires an argument", opt),
            InvalidArgument { option, value } => {
                write!(f, "Argument '{}' is invalid for option {}", value, option)
            }
            InvalidInvocation => write!(f, "Invalid combination of input options"),
            UnrecognizedOption(opt) => write!(f, "Option {} is not recognized", opt),
            FileOpen(file) => write!(f, "Could not open file: {}", file),
            FileRead(file) => write!(f, "Could not read file: {}", file),
            FileWrite(file) => write!(f, "Could not write file: {}", file),
            ElfMagic(file) => write!(f, "ELF file {} contains an invalid ELF magic", file),
            ElfClass(file) => write!(f, "ELF file {} is not in 32 bit format", file),
            ElfEndianness(file) => write!(f, "ELF file {} is not in little-endian format", file),
            ElfExecutable(file) => {
                write!(f, "ELF file {} is neither an executable nor a shared object", file)
            }
            ElfShStrIndex(file) => {
                write!(f, "ELF file {} has an invalid section header string table index", file)
            }
            ElfTruncated(file) => write!(f, "ELF file {} is truncated", file),
            SectionMissing { section, file } => {
                write!(f, "Section {} is missing from ELF file {}", section, file)
            }
            NoStaticSymbols(file) => {
                write!(f, "ELF file {} carries no static symbol table", file)
            }
            EntryPointNotSet(file) => write!(f, "Entry point is not set in ELF file {}", file),
            UndefinedSymbol { file, symbol } => {
                write!(f, "Undefined symbol {} referenced by ELF file {}", symbol, file)
            }
            UnknownRelocation { file, rel_type } => {
                write!(f, "Unsupported relocation type {} in ELF file {}", rel_type, file)
            }
            SymbolCountMismatch(file) => write!(
                f,
                "Symbol count does not agree with the hash table in ELF file {}",
                file
            ),
            SymbolMissingFromElf { file, symbols } => write!(
                f,
                "Frozen export(s) {} missing from ELF file {}",
                symbols, file
            ),
            SysDefMismatch { file, symbols } => write!(
                f,
                "Symbol(s) {} passed through --sysdef do not match the DEF file {}",
                symbols, file
            ),
            SymbolNotInDso { dso, symbol } => {
                write!(f, "Symbol {} could not be found in import library {}", symbol, dso)
            }
            DefSyntax { file, line } => write!(f, "Syntax error in DEF file {}({})", file, line),
            DefOrdinal { file, line } => {
                write!(f, "Invalid ordinal number in DEF file {}({})", file, line)
            }
            E32Signature(file) => write!(f, "E32 image {} has an invalid signature", file),
            E32UidChecksum(file) => write!(f, "E32 image {} fails its UID checksum", file),
            E32HeaderCrc(file) => write!(f, "E32 image {} fails its header CRC check", file),
            UnreachableHeaderFormat(file) => {
                write!(f, "E32 image {} has an unrecognized header format", file)
            }
            EntryPointCorrupt(file) => write!(f, "Entry point is corrupt in {}", file),
            HuffmanTooManyCodes => write!(f, "Huffman alphabet exceeds the supported symbol count"),
            HuffmanInvalidCoding => write!(f, "Huffman code lengths do not form a valid coding"),
            HuffmanBufferOverflow => write!(f, "Bit stream ended prematurely"),
            InvalidCapability(name) => write!(f, "Capability '{}' is not recognized", name),
            CapabilityConflict(name) => {
                write!(f, "Capability '{}' is both granted and withheld", name)
            }
        }
    }
}

/// Warning sink threaded through the pipeline. Warnings render immediately
/// to stderr in the same single-line shape as errors.
#[derive(Default)]
pub struct Diagnostics {
    warning_count: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        eprintln!("elf2e32 : Warning: {}", message.as_ref());
        self.warning_count += 1;
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }
}

/// All message codes with a representative text, for `--dumpmessagefile`.
pub fn message_table() -> Vec<(u32, &'static str)> {
    vec![
        (1001, "Option %s is mandatory for this target"),
        (1002, "Option %s requires an argument"),
        (1003, "Argument '%s' is invalid for option %s"),
        (1004, "Invalid combination of input options"),
        (1005, "Option %s is not recognized"),
        (1101, "Could not open file: %s"),
        (1102, "Could not read file: %s"),
        (1103, "Could not write file: %s"),
        (1201, "ELF file %s contains an invalid ELF magic"),
        (1202, "ELF file %s is not in 32 bit format"),
        (1203, "ELF file %s is not in little-endian format"),
        (1204, "ELF file %s is neither an executable nor a shared object"),
        (1205, "ELF file %s has an invalid section header string table index"),
        (1206, "ELF file %s is truncated"),
        (1207, "Section %s is missing from ELF file %s"),
        (1208, "ELF file %s carries no static symbol table"),
        (1209, "Entry point is not set in ELF file %s"),
        (1301, "Undefined symbol %s referenced by ELF file %s"),
        (1302, "Unsupported relocation type %d in ELF file %s"),
        (1303, "Symbol count does not agree with the hash table in ELF file %s"),
        (1304, "Frozen export(s) %s missing from ELF file %s"),
        (1305, "Symbol(s) %s passed through --sysdef do not match the DEF file %s"),
        (1306, "Symbol %s could not be found in import library %s"),
        (1401, "Syntax error in DEF file %s(%d)"),
        (1402, "Invalid ordinal number in DEF file %s(%d)"),
        (1501, "E32 image %s has an invalid signature"),
        (1502, "E32 image %s fails its UID checksum"),
        (1503, "E32 image %s fails its header CRC check"),
        (1504, "E32 image %s has an unrecognized header format"),
        (1505, "Entry point is corrupt in %s"),
        (1601, "Huffman alphabet exceeds the supported symbol count"),
        (1602, "Huffman code lengths do not form a valid coding"),
        (1603, "Bit stream ended prematurely"),
        (1701, "Capability '%s' is not recognized"),
        (1702, "Capability '%s' is both granted and withheld"),
    ]
}

/// Serialize the message table for `--dumpmessagefile`.
pub fn dump_message_file(path: &str) -> Result<(), Elf2e32Error> {
    use std::fmt::Write as _;
    let mut text = String::new();
    for (code, msg) in message_table() {
        let _ = writeln!(text, "{}: {}", code, msg);
    }
    std::fs::write(path, text).map_err(|_| Elf2e32Error::FileWrite(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let mut codes: Vec<u32> = message_table().iter().map(|(c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), message_table().len());
    }

    #[test]
    fn parameter_errors_are_classified() {
        assert!(Elf2e32Error::NoRequiredOption("--output".into()).is_parameter_error());
        assert!(!Elf2e32Error::ElfMagic("a.elf".into()).is_parameter_error());
    }

    #[test]
    fn renders_single_line() {
        let e = Elf2e32Error::UndefinedSymbol {
            file: "libfoo.elf".into(),
            symbol: "Bar".into(),
        };
        let line = format!("elf2e32 : Error: E{}: {}", e.code(), e);
        assert_eq!(
            line,
            "elf2e32 : Error: E1301: Undefined symbol Bar referenced by ELF file libfoo.elf"
        );
        assert!(!line.contains('\n'));
    }
}
