//! elf2e32: post-linker translating ARM ELF32 dynamic objects into E32
//! loadable images, plus the companion artifacts other modules link
//! against (DSO import libraries and DEF files).

pub mod codec;
pub mod common;
pub mod deffile;
pub mod driver;
pub mod dso;
pub mod e32;
pub mod elf;

use common::error::Diagnostics;

/// Run the tool over an argument vector. Returns the process exit code:
/// zero on success, one on any failure. The dispatcher is the only place
/// errors become exit codes; parameter errors also get a usage reminder.
pub fn run(args: &[String]) -> i32 {
    let mut diag = Diagnostics::new();
    match driver::dispatch::run(args, &mut diag) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("elf2e32 : Error: E{}: {}", e.code(), e);
            if e.is_parameter_error() {
                driver::cli::print_usage();
            }
            1
        }
    }
}

/// Shared entry point for the binary.
pub fn tool_main() {
    let args: Vec<String> = std::env::args().collect();
    std::process::exit(run(&args));
}
