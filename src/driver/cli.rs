//! Command-line parsing.
//!
//! A flat loop over the arguments with a match per option; both
//! `--option=value` and `--option value` spellings are accepted. No parser
//! library. Unknown options are errors, since a silently dropped option
//! could change the produced image.

use crate::common::error::Elf2e32Error;
use crate::e32::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetType {
    Dll,
    Lib,
    Exe,
    PolyDll,
    ExExp,
    StdExe,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub elf_input: Option<String>,
    pub def_input: Option<String>,
    pub e32_input: Option<String>,
    pub output: Option<String>,
    pub def_output: Option<String>,
    pub dso_output: Option<String>,
    pub link_as: Option<String>,
    pub target_type: Option<TargetType>,
    pub uid1: Option<u32>,
    pub uid2: Option<u32>,
    pub uid3: Option<u32>,
    pub secure_id: Option<u32>,
    pub vendor_id: Option<u32>,
    pub capabilities: [u32; 2],
    pub heap_min: u32,
    pub heap_max: u32,
    pub stack_size: u32,
    pub priority: u16,
    pub module_version: u32,
    pub compression: u32,
    pub fpu: u32,
    pub paged: Option<bool>,
    pub debuggable: bool,
    pub smp_safe: bool,
    pub fixed_address: bool,
    pub unfrozen: bool,
    pub lib_paths: Vec<String>,
    pub sysdefs: Vec<(String, u32)>,
    pub dump_flags: Option<String>,
    pub dump_message_file: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            elf_input: None,
            def_input: None,
            e32_input: None,
            output: None,
            def_output: None,
            dso_output: None,
            link_as: None,
            target_type: None,
            uid1: None,
            uid2: None,
            uid3: None,
            secure_id: None,
            vendor_id: None,
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
            fixed_address: false,
            unfrozen: false,
            lib_paths: Vec::new(),
            sysdefs: Vec::new(),
            dump_flags: None,
            dump_message_file: None,
        }
    }
}

/// Parse the process arguments (including argv[0]) into an option record.
pub fn parse_args(args: &[String]) -> Result<Options, Elf2e32Error> {
    let mut opts = Options::default();
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        if !arg.starts_with("--") {
            return Err(Elf2e32Error::UnrecognizedOption(arg.clone()));
        }
        let (name, mut value) = match arg.find('=') {
            Some(pos) => (&arg[..pos], Some(arg[pos + 1..].to_string())),
            None => (arg.as_str(), None),
        };

        // options that never take a value
        match name {
            "--unfrozen" => {
                opts.unfrozen = true;
                i += 1;
                continue;
            }
            "--debuggable" => {
                opts.debuggable = true;
                i += 1;
                continue;
            }
            "--smpsafe" => {
                opts.smp_safe = true;
                i += 1;
                continue;
            }
            "--fixedaddress" => {
                opts.fixed_address = true;
                i += 1;
                continue;
            }
            "--paged" => {
                opts.paged = Some(true);
                i += 1;
                continue;
            }
            "--unpaged" => {
                opts.paged = Some(false);
                i += 1;
                continue;
            }
            "--uncompressed" => {
                opts.compression = COMPRESSION_NONE;
                i += 1;
                continue;
            }
            _ => {}
        }

        // everything else requires a value, either glued or following
        if value.is_none() {
            if i + 1 < args.len() && !args[i + 1].starts_with("--") {
                value = Some(args[i + 1].clone());
                i += 1;
            } else {
                return Err(Elf2e32Error::NoArgument(name.to_string()));
            }
        }
        let value = value.unwrap();
        if value.is_empty() {
            return Err(Elf2e32Error::NoArgument(name.to_string()));
        }

        match name {
            "--elfinput" => opts.elf_input = Some(value),
            "--definput" => opts.def_input = Some(value),
            "--e32input" => opts.e32_input = Some(value),
            "--output" => opts.output = Some(value),
            "--defoutput" => opts.def_output = Some(value),
            "--dso" => opts.dso_output = Some(value),
            "--linkas" => opts.link_as = Some(value),
            "--targettype" => opts.target_type = Some(parse_target_type(name, &value)?),
            "--uid1" => opts.uid1 = Some(parse_u32(name, &value)?),
            "--uid2" => opts.uid2 = Some(parse_u32(name, &value)?),
            "--uid3" => opts.uid3 = Some(parse_u32(name, &value)?),
            "--sid" => opts.secure_id = Some(parse_u32(name, &value)?),
            "--vid" => opts.vendor_id = Some(parse_u32(name, &value)?),
            "--capability" => opts.capabilities = parse_capabilities(&value)?,
            "--heap" => {
                let (min, max) = parse_pair(name, &value)?;
                opts.heap_min = min;
                opts.heap_max = max;
            }
            "--stack" => opts.stack_size = parse_u32(name, &value)?,
            "--priority" => opts.priority = parse_priority(name, &value)?,
            "--version" => opts.module_version = parse_version(name, &value)?,
            "--compressionmethod" => {
                opts.compression = match value.to_ascii_lowercase().as_str() {
                    "none" => COMPRESSION_NONE,
                    "deflate" => UID_COMPRESSION_DEFLATE,
                    _ => {
                        return Err(Elf2e32Error::InvalidArgument {
                            option: name.to_string(),
                            value,
                        })
                    }
                };
            }
            "--fpu" => {
                opts.fpu = match value.to_ascii_lowercase().as_str() {
                    "softvfp" => FP_TYPE_NONE,
                    "vfpv2" => FP_TYPE_VFPV2,
                    _ => {
                        return Err(Elf2e32Error::InvalidArgument {
                            option: name.to_string(),
                            value,
                        })
                    }
                };
            }
            "--libpath" => {
                opts.lib_paths.extend(value.split(';').map(|s| s.to_string()));
            }
            "--sysdef" => opts.sysdefs = parse_sysdefs(name, &value)?,
            "--dump" => opts.dump_flags = Some(value),
            "--dumpmessagefile" => opts.dump_message_file = Some(value),
            _ => return Err(Elf2e32Error::UnrecognizedOption(name.to_string())),
        }
        i += 1;
    }
    Ok(opts)
}

fn parse_target_type(option: &str, value: &str) -> Result<TargetType, Elf2e32Error> {
    match value.to_ascii_lowercase().as_str() {
        "dll" => Ok(TargetType::Dll),
        "lib" => Ok(TargetType::Lib),
        "exe" => Ok(TargetType::Exe),
        "polydll" => Ok(TargetType::PolyDll),
        "exexp" => Ok(TargetType::ExExp),
        "stdexe" => Ok(TargetType::StdExe),
        _ => Err(Elf2e32Error::InvalidArgument {
            option: option.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_u32(option: &str, value: &str) -> Result<u32, Elf2e32Error> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse::<u32>()
    };
    parsed.map_err(|_| Elf2e32Error::InvalidArgument {
        option: option.to_string(),
        value: value.to_string(),
    })
}

fn parse_pair(option: &str, value: &str) -> Result<(u32, u32), Elf2e32Error> {
    let mut parts = value.split(',');
    let a = parts.next().unwrap_or("");
    let b = parts.next().ok_or_else(|| Elf2e32Error::InvalidArgument {
        option: option.to_string(),
        value: value.to_string(),
    })?;
    Ok((parse_u32(option, a)?, parse_u32(option, b)?))
}

fn parse_version(option: &str, value: &str) -> Result<u32, Elf2e32Error> {
    let invalid = || Elf2e32Error::InvalidArgument {
        option: option.to_string(),
        value: value.to_string(),
    };
    let mut parts = value.split('.');
    let major: u32 = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
    let minor: u32 = parts.next().unwrap_or("0").parse().map_err(|_| invalid())?;
    if parts.next().is_some() || major > 0xffff || minor > 0xffff {
        return Err(invalid());
    }
    Ok((major << 16) | minor)
}

fn parse_priority(option: &str, value: &str) -> Result<u16, Elf2e32Error> {
    let named = match value.to_ascii_lowercase().as_str() {
        "low" => Some(PRIORITY_LOW),
        "background" => Some(PRIORITY_BACKGROUND),
        "foreground" => Some(PRIORITY_FOREGROUND),
        "high" => Some(PRIORITY_HIGH),
        "windowserver" => Some(PRIORITY_WINDOW_SERVER),
        "fileserver" => Some(PRIORITY_FILE_SERVER),
        "realtimeserver" => Some(PRIORITY_REAL_TIME_SERVER),
        "supervisor" => Some(PRIORITY_SUPERVISOR),
        _ => None,
    };
    match named {
        Some(p) => Ok(p),
        None => parse_u32(option, value).map(|v| v as u16),
    }
}

/// Capability lists read like `All-TCB` or `ReadUserData+WriteUserData`.
/// A leading name has an implicit `+`. Granting and withholding the same
/// capability is a conflict.
fn parse_capabilities(value: &str) -> Result<[u32; 2], Elf2e32Error> {
    let mut caps: u32 = 0;
    let mut granted: Vec<usize> = Vec::new();
    let mut withheld: Vec<usize> = Vec::new();

    let mut rest = value;
    let mut grant = true;
    while !rest.is_empty() {
        let split = rest.find(|c| c == '+' || c == '-').unwrap_or(rest.len());
        let (token, tail) = rest.split_at(split);
        if !token.is_empty() {
            apply_capability_token(token, grant, &mut caps, &mut granted, &mut withheld)?;
        }
        if tail.is_empty() {
            break;
        }
        grant = tail.starts_with('+');
        rest = &tail[1..];
    }

    for bit in &granted {
        if withheld.contains(bit) {
            return Err(Elf2e32Error::CapabilityConflict(CAPABILITY_NAMES[*bit].to_string()));
        }
    }
    Ok([caps, 0])
}

fn apply_capability_token(
    token: &str,
    grant: bool,
    caps: &mut u32,
    granted: &mut Vec<usize>,
    withheld: &mut Vec<usize>,
) -> Result<(), Elf2e32Error> {
    if token.eq_ignore_ascii_case("none") {
        if grant {
            *caps = 0;
        }
        return Ok(());
    }
    if token.eq_ignore_ascii_case("all") {
        let all = (1u32 << CAPABILITY_NAMES.len()) - 1;
        if grant {
            *caps |= all;
        } else {
            *caps = 0;
        }
        return Ok(());
    }
    let bit = CAPABILITY_NAMES
        .iter()
        .position(|n| n.eq_ignore_ascii_case(token))
        .ok_or_else(|| Elf2e32Error::InvalidCapability(token.to_string()))?;
    if grant {
        *caps |= 1 << bit;
        granted.push(bit);
    } else {
        *caps &= !(1 << bit);
        withheld.push(bit);
    }
    Ok(())
}

/// `--sysdef` lists pre-assigned exports: `name,ordinal;name,ordinal`.
fn parse_sysdefs(option: &str, value: &str) -> Result<Vec<(String, u32)>, Elf2e32Error> {
    let mut out = Vec::new();
    for entry in value.split(';') {
        if entry.is_empty() {
            continue;
        }
        let (name, ord) = entry.split_once(',').ok_or_else(|| Elf2e32Error::InvalidArgument {
            option: option.to_string(),
            value: value.to_string(),
        })?;
        out.push((name.to_string(), parse_u32(option, ord)?));
    }
    Ok(out)
}

pub fn print_usage() {
    eprintln!("Usage: elf2e32 [options]");
    eprintln!("  --elfinput=<file>          post-link an ELF dynamic object");
    eprintln!("  --definput=<file>          frozen exports (DEF file)");
    eprintln!("  --e32input=<file>          read back an E32 image (with --dump)");
    eprintln!("  --output=<file>            E32 image to produce");
    eprintln!("  --defoutput=<file>         DEF file to produce");
    eprintln!("  --dso=<file>               import library (DSO) to produce");
    eprintln!("  --linkas=<name>            name the module resolves as at load time");
    eprintln!("  --targettype=<type>        dll|lib|exe|polydll|exexp|stdexe");
    eprintln!("  --uid1=<n> --uid2=<n> --uid3=<n>");
    eprintln!("  --sid=<n> --vid=<n>        secure / vendor id");
    eprintln!("  --capability=<list>        e.g. All-TCB or ReadUserData+WriteUserData");
    eprintln!("  --heap=<min>,<max> --stack=<n>");
    eprintln!("  --priority=<name|n>        process priority");
    eprintln!("  --version=<major>.<minor>  module version");
    eprintln!("  --compressionmethod=<none|deflate>");
    eprintln!("  --uncompressed             same as --compressionmethod=none");
    eprintln!("  --fpu=<softvfp|vfpv2>");
    eprintln!("  --paged | --unpaged | --debuggable | --smpsafe | --fixedaddress");
    eprintln!("  --libpath=<dir;dir...>     DSO search path");
    eprintln!("  --sysdef=<name,ord;...>    predefined exports (polydll)");
    eprintln!("  --unfrozen                 allow the export surface to drift from the DEF");
    eprintln!("  --dump=<hscdeit>           dump an E32 image");
    eprintln!("  --dumpmessagefile=<file>   write the message table");
}
