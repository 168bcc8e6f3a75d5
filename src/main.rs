//! repogate binary entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    match repogate::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
