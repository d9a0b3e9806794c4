use std::process::ExitCode;
use suite_scheduler::cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = cli::parse_args();
    cli::init_tracing(cli_args.verbose);

    match cli::process_command(cli_args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
