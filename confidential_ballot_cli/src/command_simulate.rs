use confidential_ballot::*;
use log::warn;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

fn fail<E: Display>(e: E) -> ! {
    eprintln!("confidential-ballot simulate: {}", e);
    std::process::exit(1);
}

fn parse_list<T: FromStr>(list: &str) -> Result<Vec<T>, String>
where
    T::Err: Display,
{
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|e| format!("invalid value '{}': {}", item, e))
        })
        .collect()
}

fn parse_arg<T: FromStr>(matches: &clap::ArgMatches, name: &str) -> Option<T>
where
    T::Err: Display,
{
    matches.value_of(name).map(|value| {
        value
            .parse()
            .unwrap_or_else(|e| fail(format!("invalid --{} '{}': {}", name, value, e)))
    })
}

pub fn command_simulate(matches: &clap::ArgMatches) {
    let options: Vec<String> =
        parse_list(matches.value_of("options").unwrap_or_default()).unwrap_or_else(|e| fail(e));
    let votes: Vec<u32> =
        parse_list(matches.value_of("votes").unwrap_or_default()).unwrap_or_else(|e| fail(e));
    let days: u64 = parse_arg(matches, "days").unwrap_or(7);
    let expected: u64 = parse_arg(matches, "expected").unwrap_or(votes.len() as u64);

    let config = LedgerConfig::from_env().unwrap_or_else(|e| fail(e));

    // Everything runs on one manual clock starting at the current time
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let gateway = Arc::new(LocalGateway::with_clock(clock.clone()));
    let ledger = Arc::new(BallotLedger::with_clock(
        gateway.clone(),
        clock.clone(),
        config.clone(),
    ));

    let (creator_secret, creator_public) = generate_keypair();
    let creator = Principal::from_public_key(&creator_public);

    let def = BallotDef::new(
        "Simulated ballot",
        "A ballot run in process by the simulator",
        &options,
        days,
    );
    let ballot_id = ledger
        .create_ballot(&creator, def)
        .unwrap_or_else(|e| fail(e));
    println!("> Ballot {} created", ballot_id);

    let mut csprng = rand::rngs::OsRng {};
    for (i, choice) in votes.iter().enumerate() {
        if !ledger.validate_option(ballot_id, *choice) {
            warn!("vote {} names option {}, which the ballot does not have", i + 1, choice);
        }

        let (voter_secret, voter_public) = generate_keypair();
        let voter = Principal::from_public_key(&voter_public);

        let input = EncryptedInput::encrypt(&gateway.public_key(), *choice, &mut csprng)
            .unwrap_or_else(|e| fail(e));
        let proof = InputProof::attest(&voter_secret, &input, ledger.ledger_id(), ballot_id)
            .unwrap_or_else(|e| fail(e));

        let handle = ledger
            .cast_vote(&voter, ballot_id, &input, &proof)
            .unwrap_or_else(|e| fail(e));
        println!("> Voter {} cast {}", voter, handle);
    }

    // Voting is over
    // ----------------
    let ballot = ledger.get_ballot(ballot_id).unwrap_or_else(|e| fail(e));
    clock.set(ballot.end_time + 1);
    ledger
        .close_ballot(&creator, ballot_id)
        .unwrap_or_else(|e| fail(e));
    println!("> Ballot {} closed", ballot_id);

    let coordinator =
        DecryptionCoordinator::with_clock(ledger.clone(), gateway, clock, creator_secret, &config);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap_or_else(|e| fail(e));
    let tally = runtime
        .block_on(coordinator.request_tally(ballot_id))
        .unwrap_or_else(|e| fail(e));

    let ballot = ledger.get_ballot(ballot_id).unwrap_or_else(|e| fail(e));
    let ballot_json = serde_json::to_string_pretty(&ballot).unwrap_or_else(|e| fail(e));
    println!("Ballot:");
    println!("{}", ballot_json);

    println!("Tally:");
    for (label, count) in tally.labelled(&ballot) {
        println!("  {} got {} votes", label, count);
    }
    if tally.invalid > 0 {
        println!("  {} votes named no option", tally.invalid);
    }

    let (rate, cast) = ledger
        .participation_rate(ballot_id, expected)
        .unwrap_or_else(|e| fail(e));
    println!("Participation: {}% ({} of {} expected)", rate, cast, expected);
}
