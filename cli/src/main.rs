use clap::Parser;
use std::process::ExitCode;
use teamctl_cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = teamctl_cli::init_tracing(cli.verbose, cli.log_format) {
        eprintln!("{err}");
    }
    let code = teamctl_cli::run(&cli, &mut std::io::stdout(), &mut std::io::stderr());
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
