use std::process::ExitCode;

fn main() -> ExitCode {
    match weekboard_core::run(std::env::args_os().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("weekboard: {err:#}");
            ExitCode::FAILURE
        }
    }
}
