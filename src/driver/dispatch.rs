//! Use-case selection and the post-link pipeline.
//!
//! The target kinds of the tool (library, DLL, EXE, polymorphic DLL,
//! exported EXE, std EXE — each first-build or rebuilt from a DEF file)
//! are a tagged variant dispatched with a match; shared behavior lives in
//! free functions. The image pipeline itself is linear: load the ELF,
//! resolve imports, build exports, lay out, fill, optionally compress,
//! CRC-stamp, emit.

use std::path::Path;

use crate::common::error::{dump_message_file, Diagnostics, Elf2e32Error};
use crate::deffile;
use crate::dso;
use crate::e32::exports::{assign_ordinals, reconcile_with_def};
use crate::e32::image::{build_e32_image, write_image_file, E32Settings};
use crate::e32::info;
use crate::e32::reader::E32Reader;
use crate::e32::{UID1_DLL, UID1_EXE, UID2_STDEXE};
use crate::elf::exports::{Symbol, SymbolKind};
use crate::elf::image::ElfImage;

use super::cli::{parse_args, Options, TargetType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TargetKind {
    Library,
    Dll { rebuild: bool },
    Exe,
    PolyDll { rebuild: bool },
    ExExp { rebuild: bool },
    StdExe,
}

/// Top-level entry: parse options, pick the use case, run it.
pub fn run(args: &[String], diag: &mut Diagnostics) -> Result<(), Elf2e32Error> {
    let opts = parse_args(args)?;

    if let Some(path) = &opts.dump_message_file {
        dump_message_file(path)?;
        if opts.elf_input.is_none() && opts.e32_input.is_none() && opts.def_input.is_none() {
            return Ok(());
        }
    }

    // dump mode competes with nothing else
    if opts.dump_flags.is_some() || opts.e32_input.is_some() {
        let e32_path = opts
            .e32_input
            .as_ref()
            .ok_or_else(|| Elf2e32Error::NoRequiredOption("--e32input".to_string()))?;
        let reader = E32Reader::read(e32_path, diag)?;
        info::dump(&reader, opts.dump_flags.as_deref().unwrap_or("h"), diag);
        return Ok(());
    }

    let kind = select_target(&opts)?;
    validate_options(kind, &opts, diag)?;

    match kind {
        TargetKind::Library => build_library(&opts),
        TargetKind::Dll { rebuild } => build_image_target(kind, rebuild, &opts, diag),
        TargetKind::Exe | TargetKind::StdExe => build_image_target(kind, false, &opts, diag),
        TargetKind::PolyDll { rebuild } => build_image_target(kind, rebuild, &opts, diag),
        TargetKind::ExExp { rebuild } => build_image_target(kind, rebuild, &opts, diag),
    }
}

fn select_target(opts: &Options) -> Result<TargetKind, Elf2e32Error> {
    let rebuild = opts.def_input.is_some();
    match opts.target_type {
        Some(TargetType::Lib) => Ok(TargetKind::Library),
        Some(TargetType::Dll) => Ok(TargetKind::Dll { rebuild }),
        Some(TargetType::Exe) => Ok(TargetKind::Exe),
        Some(TargetType::PolyDll) => Ok(TargetKind::PolyDll { rebuild }),
        Some(TargetType::ExExp) => Ok(TargetKind::ExExp { rebuild }),
        Some(TargetType::StdExe) => Ok(TargetKind::StdExe),
        None => {
            // infer from the supplied inputs
            if opts.elf_input.is_some() {
                if rebuild {
                    Ok(TargetKind::Dll { rebuild: true })
                } else {
                    Ok(TargetKind::Exe)
                }
            } else if rebuild {
                Ok(TargetKind::Library)
            } else {
                Err(Elf2e32Error::InvalidInvocation)
            }
        }
    }
}

fn validate_options(
    kind: TargetKind,
    opts: &Options,
    diag: &mut Diagnostics,
) -> Result<(), Elf2e32Error> {
    let require = |present: bool, name: &str| -> Result<(), Elf2e32Error> {
        if present {
            Ok(())
        } else {
            Err(Elf2e32Error::NoRequiredOption(name.to_string()))
        }
    };

    if kind == TargetKind::Library {
        require(opts.def_input.is_some(), "--definput")?;
        require(opts.dso_output.is_some(), "--dso")?;
        require(opts.link_as.is_some(), "--linkas")?;
        return Ok(());
    }

    require(opts.elf_input.is_some(), "--elfinput")?;
    require(opts.output.is_some(), "--output")?;
    let uid1 = opts.uid1.ok_or_else(|| Elf2e32Error::NoRequiredOption("--uid1".to_string()))?;

    // a DSO cannot be produced without a link-as name
    if opts.dso_output.is_some() && opts.link_as.is_none() {
        return Err(Elf2e32Error::NoRequiredOption("--linkas".to_string()));
    }
    if matches!(kind, TargetKind::Dll { rebuild: true }) {
        require(opts.def_input.is_some(), "--definput")?;
    }

    // UID1 mismatches warn but do not fail
    match kind {
        TargetKind::Dll { .. } | TargetKind::PolyDll { .. } => {
            if uid1 != UID1_DLL {
                diag.warning(format!(
                    "UID1 should be 0x{:08x} for a DLL target (got 0x{:08x})",
                    UID1_DLL, uid1
                ));
            }
        }
        TargetKind::Exe | TargetKind::ExExp { .. } | TargetKind::StdExe => {
            if uid1 != UID1_EXE {
                diag.warning(format!(
                    "UID1 should be 0x{:08x} for an EXE target (got 0x{:08x})",
                    UID1_EXE, uid1
                ));
            }
        }
        TargetKind::Library => {}
    }
    Ok(())
}

// ── Library target: DEF in, DSO out ─────────────────────────────────────

fn build_library(opts: &Options) -> Result<(), Elf2e32Error> {
    let def_in = opts.def_input.as_ref().unwrap();
    let dso_out = opts.dso_output.as_ref().unwrap();
    let link_as = opts.link_as.as_ref().unwrap();

    let symbols = deffile::read_def_file(def_in)?;
    dso::write_dso(dso_out, &dso_file_name(dso_out), link_as, &symbols)?;

    if let Some(def_out) = &opts.def_output {
        deffile::write_def_file(def_out, &symbols)?;
    }
    Ok(())
}

fn dso_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

// ── Image targets ───────────────────────────────────────────────────────

fn build_image_target(
    kind: TargetKind,
    rebuild: bool,
    opts: &Options,
    diag: &mut Diagnostics,
) -> Result<(), Elf2e32Error> {
    let elf_in = opts.elf_input.as_ref().unwrap();
    let output = opts.output.as_ref().unwrap();

    // LoadElf
    let elf = ElfImage::read(elf_in, diag)?;

    // ResolveImports
    let import_blocks = dso::resolve_imports(&elf.imports, &opts.lib_paths, diag)?;

    // BuildExports
    let exports = build_exports(kind, rebuild, &elf, opts, diag)?;

    // Layout → Fill → Compress? → CRC
    let is_dll = matches!(kind, TargetKind::Dll { .. } | TargetKind::PolyDll { .. });
    let settings = image_settings(kind, is_dll, opts);
    let image = build_e32_image(&elf, &exports, &import_blocks, &settings, diag)?;

    // Emit
    write_image_file(output, &image)?;
    if let Some(def_out) = &opts.def_output {
        deffile::write_def_file(def_out, &exports)?;
    }
    if let (Some(dso_out), Some(link_as)) = (&opts.dso_output, &opts.link_as) {
        dso::write_dso(dso_out, &dso_file_name(dso_out), link_as, &exports)?;
    }
    Ok(())
}

fn build_exports(
    kind: TargetKind,
    rebuild: bool,
    elf: &ElfImage,
    opts: &Options,
    diag: &mut Diagnostics,
) -> Result<Vec<Symbol>, Elf2e32Error> {
    match kind {
        TargetKind::Exe | TargetKind::StdExe => Ok(Vec::new()),
        TargetKind::PolyDll { .. } => {
            let mut symbols = if rebuild {
                let def = deffile::read_def_file(opts.def_input.as_ref().unwrap())?;
                check_sysdefs(&def, &opts.sysdefs, opts.def_input.as_ref().unwrap())?;
                reconcile_with_def(
                    &elf.exports.symbols,
                    &def,
                    &elf.name,
                    true, // a polymorphic DLL's surface is sysdef-driven
                    diag,
                )?
            } else {
                sysdef_exports(&opts.sysdefs, elf)
            };
            if symbols.iter().all(|s| s.ordinal.is_none()) {
                assign_ordinals(&mut symbols);
            }
            Ok(symbols)
        }
        TargetKind::Dll { .. } | TargetKind::ExExp { .. } => {
            if rebuild {
                let def = deffile::read_def_file(opts.def_input.as_ref().unwrap())?;
                reconcile_with_def(&elf.exports.symbols, &def, &elf.name, opts.unfrozen, diag)
            } else {
                let mut symbols = elf.exports.symbols.clone();
                assign_ordinals(&mut symbols);
                Ok(symbols)
            }
        }
        TargetKind::Library => unreachable!("library targets take no ELF input"),
    }
}

/// Pre-assigned exports for a first-build polymorphic DLL. Symbols the ELF
/// does not define stay in the table as absent slots.
fn sysdef_exports(sysdefs: &[(String, u32)], elf: &ElfImage) -> Vec<Symbol> {
    sysdefs
        .iter()
        .map(|(name, ordinal)| {
            let mut sym = Symbol::new(name.clone(), SymbolKind::Code);
            sym.ordinal = Some(*ordinal);
            match elf.exports.symbols.iter().find(|s| &s.name == name) {
                Some(found) => {
                    sym.value = found.value;
                    sym.size = found.size;
                    sym.kind = found.kind;
                }
                None => sym.absent = true,
            }
            sym
        })
        .collect()
}

/// The sysdef list and the DEF file must agree positionally on the leading
/// export names.
fn check_sysdefs(
    def: &[Symbol],
    sysdefs: &[(String, u32)],
    def_file: &str,
) -> Result<(), Elf2e32Error> {
    let mut mismatched: Vec<String> = Vec::new();
    for ((name, _), def_sym) in sysdefs.iter().zip(def.iter()) {
        if *name != def_sym.name {
            mismatched.push(name.clone());
        }
    }
    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(Elf2e32Error::SysDefMismatch {
            file: def_file.to_string(),
            symbols: mismatched.join(", "),
        })
    }
}

fn image_settings(kind: TargetKind, is_dll: bool, opts: &Options) -> E32Settings {
    let uid2 = match kind {
        TargetKind::StdExe => opts.uid2.unwrap_or(UID2_STDEXE),
        _ => opts.uid2.unwrap_or(0),
    };
    let uid3 = opts.uid3.unwrap_or(0);
    E32Settings {
        is_dll,
        fixed_address: opts.fixed_address,
        uid1: opts.uid1.unwrap_or(0),
        uid2,
        uid3,
        // the secure id defaults to UID3, the vendor id to zero
        secure_id: opts.secure_id.unwrap_or(uid3),
        vendor_id: opts.vendor_id.unwrap_or(0),
        capabilities: opts.capabilities,
        heap_min: opts.heap_min,
        heap_max: opts.heap_max,
        stack_size: opts.stack_size,
        priority: opts.priority,
        module_version: opts.module_version,
        compression: opts.compression,
        fpu: opts.fpu,
        paged: opts.paged,
        debuggable: opts.debuggable,
        smp_safe: opts.smp_safe,
        cpu: crate::e32::CPU_ARM_V5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e32::reader::E32Reader;
    use crate::e32::{COMPRESSION_NONE, IMAGE_DLL, UID_COMPRESSION_DEFLATE};
    use crate::elf::test_elf::ElfBuilder;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("elf2e32-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run_words(words: &[String]) -> Result<(), Elf2e32Error> {
        let mut args = vec!["elf2e32".to_string()];
        args.extend_from_slice(words);
        let mut diag = Diagnostics::new();
        run(&args, &mut diag)
    }

    #[test]
    fn library_target_builds_a_dso_from_a_def() {
        let dir = temp_dir("lib");
        let def = dir.join("lib.def");
        std::fs::write(&def, "EXPORTS\n\tf @ 1 NONAME\n\tg @ 2 NONAME DATA 4\n").unwrap();
        let dso = dir.join("lib{000a0000}.dso");

        run_words(&[
            format!("--definput={}", def.display()),
            format!("--dso={}", dso.display()),
            "--linkas=lib{000a0000}.dll".to_string(),
            "--targettype=lib".to_string(),
        ])
        .unwrap();

        let mut diag = Diagnostics::new();
        let image = ElfImage::read(dso.to_str().unwrap(), &mut diag).unwrap();
        let f = image.find_symbol("f").unwrap();
        assert_eq!(image.symbol_ordinal(f), Some(1));
        let g = image.find_symbol("g").unwrap();
        assert_eq!(image.symbol_ordinal(g), Some(2));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn library_without_linkas_is_rejected() {
        let dir = temp_dir("lib2");
        let def = dir.join("lib.def");
        std::fs::write(&def, "EXPORTS\n\tf @ 1 NONAME\n").unwrap();
        let err = run_words(&[
            format!("--definput={}", def.display()),
            "--dso=out.dso".to_string(),
            "--targettype=lib".to_string(),
        ])
        .unwrap_err();
        assert_eq!(err, Elf2e32Error::NoRequiredOption("--linkas".to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dll_first_build_end_to_end() {
        let dir = temp_dir("dll");
        let elf_path = dir.join("t.elf");
        let bytes = ElfBuilder::new()
            .export("First", 0x20, crate::elf::exports::SymbolKind::Code)
            .export("Second", 0x40, crate::elf::exports::SymbolKind::Code)
            .build();
        std::fs::write(&elf_path, bytes).unwrap();
        let out = dir.join("t.dll");
        let def_out = dir.join("t.def");

        run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--output={}", out.display()),
            format!("--defoutput={}", def_out.display()),
            "--targettype=dll".to_string(),
            "--uid1=0x10000079".to_string(),
            "--compressionmethod=none".to_string(),
        ])
        .unwrap();

        let mut diag = Diagnostics::new();
        let reader = E32Reader::read(out.to_str().unwrap(), &mut diag).unwrap();
        assert_ne!(reader.hdr.flags & IMAGE_DLL, 0);
        assert_eq!(reader.hdr.export_dir_count, 2);
        assert_eq!(reader.export_dir(), vec![0x20, 0x40]);
        assert_eq!(reader.hdr.compression_type, COMPRESSION_NONE);

        let def_text = std::fs::read_to_string(&def_out).unwrap();
        assert!(def_text.contains("First @ 1 NONAME"));
        assert!(def_text.contains("Second @ 2 NONAME"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dll_rebuild_honors_def_ordinals() {
        let dir = temp_dir("rebuild");
        let elf_path = dir.join("t.elf");
        let bytes = ElfBuilder::new()
            .export("First", 0x20, crate::elf::exports::SymbolKind::Code)
            .export("Second", 0x40, crate::elf::exports::SymbolKind::Code)
            .build();
        std::fs::write(&elf_path, bytes).unwrap();
        // the DEF swaps the ordinals relative to ELF order
        let def_in = dir.join("frozen.def");
        std::fs::write(&def_in, "EXPORTS\n\tSecond @ 1 NONAME\n\tFirst @ 2 NONAME\n").unwrap();
        let out = dir.join("t.dll");

        run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--definput={}", def_in.display()),
            format!("--output={}", out.display()),
            "--targettype=dll".to_string(),
            "--uid1=0x10000079".to_string(),
            "--compressionmethod=none".to_string(),
        ])
        .unwrap();

        let mut diag = Diagnostics::new();
        let reader = E32Reader::read(out.to_str().unwrap(), &mut diag).unwrap();
        assert_eq!(reader.export_dir(), vec![0x40, 0x20]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn polydll_sysdef_mismatch_aborts() {
        let dir = temp_dir("poly");
        let elf_path = dir.join("t.elf");
        let bytes = ElfBuilder::new()
            .export("sym1", 0x20, crate::elf::exports::SymbolKind::Code)
            .export("sym2", 0x40, crate::elf::exports::SymbolKind::Code)
            .build();
        std::fs::write(&elf_path, bytes).unwrap();
        let def_in = dir.join("poly.def");
        std::fs::write(&def_in, "EXPORTS\n\tsym1 @ 1 NONAME\n\tsym2 @ 2 NONAME\n").unwrap();
        let out = dir.join("t.dll");

        // matching sysdef: fine
        run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--definput={}", def_in.display()),
            format!("--output={}", out.display()),
            "--targettype=polydll".to_string(),
            "--uid1=0x10000079".to_string(),
            "--sysdef=sym1,1".to_string(),
            "--compressionmethod=none".to_string(),
        ])
        .unwrap();

        // mismatching sysdef: abort
        let err = run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--definput={}", def_in.display()),
            format!("--output={}", out.display()),
            "--targettype=polydll".to_string(),
            "--uid1=0x10000079".to_string(),
            "--sysdef=other,1".to_string(),
            "--compressionmethod=none".to_string(),
        ])
        .unwrap_err();
        assert!(matches!(err, Elf2e32Error::SysDefMismatch { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn polydll_first_build_takes_exports_from_sysdef() {
        let dir = temp_dir("polyfb");
        let elf_path = dir.join("t.elf");
        let bytes = ElfBuilder::new()
            .export("Entry1", 0x20, crate::elf::exports::SymbolKind::Code)
            .build();
        std::fs::write(&elf_path, bytes).unwrap();
        let out = dir.join("t.dll");

        run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--output={}", out.display()),
            "--targettype=polydll".to_string(),
            "--uid1=0x10000079".to_string(),
            "--sysdef=Entry1,1;Entry2,2".to_string(),
            "--compressionmethod=none".to_string(),
        ])
        .unwrap();

        let mut diag = Diagnostics::new();
        let reader = E32Reader::read(out.to_str().unwrap(), &mut diag).unwrap();
        assert_eq!(reader.hdr.export_dir_count, 2);
        let entries = reader.export_dir();
        assert_eq!(entries[0], 0x20);
        // the second sysdef symbol is not in the ELF: its slot traps at the
        // entry point and the description records the hole
        assert_eq!(entries[1], reader.hdr.entry_point);
        assert_ne!(reader.hdr.export_desc_type, crate::e32::EXPORT_DESC_NO_HOLES);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn imports_resolve_against_a_generated_dso() {
        let dir = temp_dir("chain");
        // first make the dependency's import library
        let dep_def = dir.join("dep.def");
        std::fs::write(&dep_def, "EXPORTS\n\tDepFn @ 4 NONAME\n").unwrap();
        let dep_dso = dir.join("dep{000a0000}.dso");
        run_words(&[
            format!("--definput={}", dep_def.display()),
            format!("--dso={}", dep_dso.display()),
            "--linkas=dep{000a0000}.dll".to_string(),
            "--targettype=lib".to_string(),
        ])
        .unwrap();

        // then post-link a DLL importing from it
        let elf_path = dir.join("user.elf");
        let bytes = ElfBuilder::new()
            .import("DepFn", "dep{000a0000}.dll", "dep{000a0000}.dso", 0x30)
            .build();
        std::fs::write(&elf_path, bytes).unwrap();
        let out = dir.join("user.dll");
        run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--output={}", out.display()),
            format!("--libpath={}", dir.display()),
            "--targettype=dll".to_string(),
            "--uid1=0x10000079".to_string(),
            "--compressionmethod=none".to_string(),
        ])
        .unwrap();

        let mut diag = Diagnostics::new();
        let reader = E32Reader::read(out.to_str().unwrap(), &mut diag).unwrap();
        assert_eq!(reader.hdr.dll_ref_table_count, 1);
        // the fixed-up code word holds the DSO's ordinal
        assert_eq!(
            crate::common::read_u32(&reader.image, reader.hdr.code_offset as usize + 0x30),
            4
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn compressed_exe_round_trips_through_the_reader() {
        let dir = temp_dir("exe");
        let elf_path = dir.join("t.elf");
        std::fs::write(&elf_path, ElfBuilder::new().build()).unwrap();
        let out = dir.join("t.exe");

        run_words(&[
            format!("--elfinput={}", elf_path.display()),
            format!("--output={}", out.display()),
            "--targettype=exe".to_string(),
            "--uid1=0x1000007a".to_string(),
            "--compressionmethod=deflate".to_string(),
        ])
        .unwrap();

        let mut diag = Diagnostics::new();
        let reader = E32Reader::read(out.to_str().unwrap(), &mut diag).unwrap();
        assert_eq!(reader.hdr.compression_type, UID_COMPRESSION_DEFLATE);
        assert_eq!(reader.hdr.flags & IMAGE_DLL, 0);
        // reader already verified CRC and checksum and inflated the payload
        assert_eq!(
            reader.image.len(),
            reader.hdr.uncompressed_size as usize + reader.hdr.total_size()
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn image_targets_demand_their_options() {
        assert_eq!(
            run_words(&["--targettype=dll".to_string(), "--elfinput=a.elf".to_string()])
                .unwrap_err(),
            Elf2e32Error::NoRequiredOption("--output".to_string())
        );
        assert_eq!(
            run_words(&[
                "--targettype=dll".to_string(),
                "--elfinput=a.elf".to_string(),
                "--output=a.dll".to_string()
            ])
            .unwrap_err(),
            Elf2e32Error::NoRequiredOption("--uid1".to_string())
        );
        assert_eq!(run_words(&[]).unwrap_err(), Elf2e32Error::InvalidInvocation);
    }
}
