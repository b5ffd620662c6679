use std::process;

use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod logging;

fn main() {
    let cli = cli::Cli::parse();

    let exit_code = match cli.command {
        cli::Command::Load(args) => {
            logging::init_tracing(args.verbose);
            commands::load::run(args)
        }
        cli::Command::Eeprom(args) => {
            logging::init_tracing(args.verbose);
            commands::eeprom::run(args)
        }
        cli::Command::Erase(args) => {
            logging::init_tracing(args.verbose);
            commands::erase::run(args)
        }
    };

    process::exit(exit_code);
}
