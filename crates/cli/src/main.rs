use std::process::ExitCode;

fn main() -> ExitCode {
    voxstay_cli::run()
}
