use std::process::ExitCode;

fn main() -> ExitCode {
    winback_cli::run()
}
