//! Binary entrypoint for the corral container supervisor.

use std::process::ExitCode;

fn main() -> ExitCode {
    corral::run(std::env::args_os())
}
