//! Main entry point for the archpack CLI app

fn main() -> std::process::ExitCode {
    if let Err(e) = archpack::cli_runner::run_cli_app() {
        if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
            // Usage errors exit with 2, help and version with 0.
            clap_err.exit();
        }
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
