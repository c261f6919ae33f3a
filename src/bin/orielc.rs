//! Command-line entry point for the Oriel compiler.

use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    ExitCode::from(oriel::driver::run(&args) as u8)
}
