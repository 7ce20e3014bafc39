use std::process::ExitCode;

fn main() -> ExitCode {
    nearbux_cli::run()
}
