use clap::{App, Arg};
use notify::{Listener, Registry};
use std::process;
use std::sync::Arc;
use store::memory::MemoryStore;
use store::Store;
use wire::config::ServerConfig;
use wire::logging::{info, warn};

fn main() {
    let matches = App::new("notifyd")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("MSNP-compatible notification server")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to the server configuration file; built-in defaults are used if omitted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("SEED_FILE")
                .short("s")
                .long("seed")
                .value_name("FILE")
                .help("Path to a seed file of users and contacts for the in-memory store")
                .takes_value(true),
        )
        .arg(Arg::with_name("VERBOSE").short("v").long("verbose").help("Enables debug-level logging"))
        .get_matches();

    let log = wire::logging::init(matches.is_present("VERBOSE"));

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => ServerConfig::load(path),
        None => ServerConfig::default(),
    };
    let config = Arc::new(config);

    let store: Arc<dyn Store> = match matches.value_of("SEED_FILE") {
        Some(path) => match MemoryStore::load(path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                warn!(log, "failed to load seed file"; "path" => path, "error" => err.to_string());
                process::exit(1);
            }
        },
        None => {
            warn!(log, "starting with an empty store; no users can authenticate"; "hint" => "pass --seed");
            Arc::new(MemoryStore::new())
        }
    };

    let registry = Arc::new(Registry::new());
    let listener = Listener::new(config, registry, store, log.clone());

    let shutdown = listener.shutdown_handle();
    if let Err(err) = ctrlc::set_handler(move || {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    }) {
        warn!(log, "failed to install signal handler"; "error" => err.to_string());
    }

    info!(log, "starting notifyd");

    if let Err(err) = listener.run() {
        warn!(log, "listener exited with an error"; "error" => err.to_string());
        process::exit(1);
    }
}
