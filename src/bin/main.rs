use std::process::ExitCode;

use clap::Parser;
use embedhttpd::config::Cli;
use embedhttpd::Server;
use percent_encoding::percent_decode_str;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Utility modes exit immediately without starting the server, mirroring
    // the reference daemon's `-d`/`-m` one-shot flags.
    if let Some(s) = &cli.urldecode {
        match percent_decode_str(s).decode_utf8() {
            Ok(decoded) => {
                println!("{decoded}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("invalid percent-encoding: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    if cli.hash.is_some() {
        // The crypt(3)-equivalent comparison is behind the pluggable
        // `CredentialChecker` trait and this build carries no such
        // implementation, so `-m` cannot produce a real password entry.
        // Fail loudly instead of printing something that looks like a
        // hash but isn't.
        eprintln!(
            "-m is not supported by this build: no CredentialChecker with a hashing \
             half is linked in. Supply one for your deployment and hash offline."
        );
        return ExitCode::FAILURE;
    }

    init_logging();

    let config = match cli.build_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("startup error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
