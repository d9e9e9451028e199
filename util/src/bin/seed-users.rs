use clap::{App, Arg};
use rand::distributions::Uniform;
use rand::prelude::*;
use std::fs;
use store::memory::{SeedContact, SeedFile};
use store::{ListTag, User};
use wire::Identity;

const ALLOWED_CHARS: [char; 35] = [
    '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l',
    'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

const RANGE: usize = ALLOWED_CHARS.len();
const CREDENTIAL_LEN: usize = 16;

fn make_credential(rng: &mut ThreadRng) -> String {
    rng.sample_iter(&Uniform::new(0, RANGE))
        .take(CREDENTIAL_LEN)
        .map(|sample| ALLOWED_CHARS[sample])
        .collect()
}

fn main() {
    let matches = App::new("Seed User Generator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Generates a seed file of users and contacts for the in-memory store")
        .arg(
            Arg::with_name("SEED_FILE")
                .help("Path the seed file will be written to")
                .required(true),
        )
        .arg(
            Arg::with_name("IDENTITIES")
                .help("Identities to seed, e.g. alice@example.com bob@example.com")
                .required(true)
                .multiple(true),
        )
        .arg(
            Arg::with_name("MUTUAL")
                .long("mutual")
                .help("Adds every seeded identity to every other's forward/reverse list"),
        )
        .get_matches();

    let seed_file_path = matches.value_of("SEED_FILE").unwrap();
    let identities: Vec<&str> = matches.values_of("IDENTITIES").unwrap().collect();
    let mutual = matches.is_present("MUTUAL");

    let mut rng = thread_rng();
    let mut seed = SeedFile::default();

    for raw in &identities {
        let credential = make_credential(&mut rng);
        println!("{} -> {}", raw, credential);
        seed.users.push(User::new(Identity::new(*raw), credential, raw.to_string()));
    }

    if mutual {
        for owner in &identities {
            for peer in &identities {
                if owner == peer {
                    continue;
                }
                seed.contacts.push(SeedContact {
                    owner: owner.to_string(),
                    peer: peer.to_string(),
                    nickname: peer.to_string(),
                    list: ListTag::Fl.wire_name().to_string(),
                });
                seed.contacts.push(SeedContact {
                    owner: peer.to_string(),
                    peer: owner.to_string(),
                    nickname: owner.to_string(),
                    list: ListTag::Rl.wire_name().to_string(),
                });
            }
        }
    }

    let rendered = toml::to_string_pretty(&seed).expect("seed file serialization failed");
    fs::write(seed_file_path, rendered).expect("failed writing seed file");
}
