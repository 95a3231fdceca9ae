use clap::{App, Arg, SubCommand};
use log::LevelFilter;

mod command_keygen;
mod command_simulate;

use command_keygen::command_keygen;
use command_simulate::command_simulate;

#[derive(PartialEq, Copy, Clone, Debug)]
enum Verbosity {
    Warn,
    Info,
    Debug,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

fn main() {
    let matches = App::new("Confidential Ballot CLI")
        .version("0.1")
        .about("Runs confidential ballots against an in-process gateway")
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(SubCommand::with_name("keygen").about("Generate an ed25519 keypair"))
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Create a ballot, cast votes, close it and decrypt the tally")
                .arg(
                    Arg::with_name("options")
                        .long("options")
                        .takes_value(true)
                        .required(true)
                        .help("Comma separated option labels, eg A,B"),
                )
                .arg(
                    Arg::with_name("votes")
                        .long("votes")
                        .takes_value(true)
                        .required(true)
                        .help("Comma separated option indexes, one per voter, eg 0,1,0"),
                )
                .arg(
                    Arg::with_name("days")
                        .long("days")
                        .takes_value(true)
                        .default_value("7")
                        .help("How many days the ballot stays open"),
                )
                .arg(
                    Arg::with_name("expected")
                        .long("expected")
                        .takes_value(true)
                        .help("Expected number of voters, for the participation rate"),
                ),
        )
        .get_matches();

    let verbosity = match matches.occurrences_of("v") {
        0 => Verbosity::Warn,
        1 => Verbosity::Info,
        _ => Verbosity::Debug,
    };
    env_logger::Builder::new()
        .filter_level(verbosity.into())
        .parse_default_env()
        .init();

    // Subcommands
    if matches.subcommand_matches("keygen").is_some() {
        command_keygen();
    }
    if let Some(matches) = matches.subcommand_matches("simulate") {
        command_simulate(matches);
    }
}
