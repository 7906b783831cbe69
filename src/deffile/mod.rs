//! Module-definition (DEF) files.
//!
//! Line-oriented text listing a module's exports and their ordinals:
//!
//! ```text
//! EXPORTS
//!     NewL @ 1 NONAME
//!     DataTable @ 2 NONAME DATA 12
//!     Reserved @ 3 NONAME ABSENT
//! ; comment
//! ```
//!
//! Qualifiers: `NONAME`, `DATA` (with an optional byte size), `R3UNUSED`,
//! `ABSENT`. The writer emits ordinals in ascending order.

use crate::common::error::Elf2e32Error;
use crate::elf::exports::{Symbol, SymbolKind};

/// Parse DEF text into its export list, in file order.
pub fn parse_def(text: &str, file: &str) -> Result<Vec<Symbol>, Elf2e32Error> {
    let mut symbols: Vec<Symbol> = Vec::new();
    let mut seen_exports_keyword = false;

    for (line_idx, raw_line) in text.lines().enumerate() {
        let line_no = line_idx as u32 + 1;
        let line = match raw_line.find(';') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("EXPORTS") {
            seen_exports_keyword = true;
            continue;
        }
        if !seen_exports_keyword {
            return Err(Elf2e32Error::DefSyntax { file: file.to_string(), line: line_no });
        }

        let mut tokens = line.split_whitespace().peekable();
        let name = match tokens.next() {
            Some(n) => n,
            None => continue,
        };

        // the ordinal may be glued to the '@' or separated by whitespace
        let ordinal_token = match tokens.next() {
            Some("@") => match tokens.next() {
                Some(t) => t.to_string(),
                None => {
                    return Err(Elf2e32Error::DefOrdinal {
                        file: file.to_string(),
                        line: line_no,
                    })
                }
            },
            Some(t) if t.starts_with('@') => t[1..].to_string(),
            _ => {
                return Err(Elf2e32Error::DefSyntax { file: file.to_string(), line: line_no });
            }
        };
        let ordinal: u32 = ordinal_token.parse().map_err(|_| Elf2e32Error::DefOrdinal {
            file: file.to_string(),
            line: line_no,
        })?;
        if ordinal == 0 {
            return Err(Elf2e32Error::DefOrdinal { file: file.to_string(), line: line_no });
        }

        let mut symbol = Symbol::new(name, SymbolKind::Code);
        symbol.ordinal = Some(ordinal);
        while let Some(tok) = tokens.next() {
            match tok {
                "NONAME" => {}
                "DATA" => {
                    symbol.kind = SymbolKind::Data;
                    // optional byte size after the qualifier
                    if let Some(next) = tokens.peek() {
                        if let Ok(size) = next.parse::<u32>() {
                            symbol.size = size;
                            tokens.next();
                        }
                    }
                }
                "R3UNUSED" => symbol.r3unused = true,
                "ABSENT" => symbol.absent = true,
                _ => {
                    return Err(Elf2e32Error::DefSyntax {
                        file: file.to_string(),
                        line: line_no,
                    })
                }
            }
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

/// Read and parse a DEF file from disk.
pub fn read_def_file(path: &str) -> Result<Vec<Symbol>, Elf2e32Error> {
    let text =
        std::fs::read_to_string(path).map_err(|_| Elf2e32Error::FileOpen(path.to_string()))?;
    parse_def(&text, path)
}

/// Render an export list as DEF text, ordinals ascending.
pub fn render_def(symbols: &[Symbol]) -> String {
    let mut ordered: Vec<&Symbol> = symbols.iter().collect();
    ordered.sort_by_key(|s| s.ordinal.unwrap_or(u32::MAX));

    let mut out = String::from("EXPORTS\n");
    for (i, sym) in ordered.iter().enumerate() {
        out.push('\t');
        out.push_str(&sym.name);
        out.push_str(&format!(" @ {} NONAME", sym.ordinal.unwrap_or(i as u32 + 1)));
        if sym.kind == SymbolKind::Data {
            out.push_str(" DATA");
            if sym.size > 0 {
                out.push_str(&format!(" {}", sym.size));
            }
        }
        if sym.r3unused {
            out.push_str(" R3UNUSED");
        }
        if sym.absent {
            out.push_str(" ABSENT");
        }
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Write an export list to a DEF file.
pub fn write_def_file(path: &str, symbols: &[Symbol]) -> Result<(), Elf2e32Error> {
    std::fs::write(path, render_def(symbols))
        .map_err(|_| Elf2e32Error::FileWrite(path.to_string()))
}
