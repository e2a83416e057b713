use std::process::ExitCode;

fn main() -> ExitCode {
    reclaim_cli::run()
}
