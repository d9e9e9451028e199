use notify::{Listener, Registry};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use store::memory::MemoryStore;
use store::{ListTag, Store, User};
use wire::config::ServerConfig;
use wire::digest;
use wire::Identity;

fn spawn_server(store: Arc<dyn Store>) -> TcpStream {
    let raw = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = raw.local_addr().unwrap();

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Error);
    builder.destination(Destination::Stderr);
    let log = builder.build().unwrap();

    let config = Arc::new(ServerConfig::default());
    let registry = Arc::new(Registry::new());
    let listener = Listener::new(config, registry, store, log);

    thread::spawn(move || {
        let _ = listener.run_on(raw);
    });

    // Give the accept loop a moment to start polling before the first connect attempt.
    thread::sleep(Duration::from_millis(50));
    TcpStream::connect(addr).unwrap()
}

fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).unwrap();
    stream.write_all(b"\r\n").unwrap();
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end().to_string()
}

fn seeded_store() -> Arc<dyn Store> {
    let store = MemoryStore::new();
    store.insert_user(User::new(Identity::new("a@x"), "p".to_string(), "a@x".to_string()));
    store.insert_user(User::new(Identity::new("b@x"), "p".to_string(), "b@x".to_string()));
    store.insert_user(User::new(Identity::new("c@x"), "p".to_string(), "c@x".to_string()));
    Arc::new(store)
}

/// S1: a client offering a dialect the server doesn't support alongside one it does gets
/// the highest mutually-supported dialect.
#[test]
fn version_downgrade() {
    let stream = spawn_server(seeded_store());
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    send(&mut writer, "VER 1 MSNP21 MSNP8");
    assert_eq!(read_line(&mut reader), "VER 1 MSNP8");
}

/// S2: no overlap between offered and supported dialects closes the connection.
#[test]
fn no_overlap_closes_connection() {
    let stream = spawn_server(seeded_store());
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    send(&mut writer, "VER 1 MSNP99");
    assert_eq!(read_line(&mut reader), "VER 1 0");

    let mut probe = String::new();
    let read = reader.read_line(&mut probe).unwrap();
    assert_eq!(read, 0, "connection should be closed after a failed negotiation");
}

/// S3: the full auth handshake, verifying the MD5 challenge/response digest.
#[test]
fn auth_happy_path() {
    let stream = spawn_server(seeded_store());
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    send(&mut writer, "VER 1 MSNP8");
    assert_eq!(read_line(&mut reader), "VER 1 MSNP8");

    send(&mut writer, "CVR 2 0x0409 winnt 10.0 i386 MSNMSGR 8.5.1302 msmsgs a@x");
    read_line(&mut reader);

    send(&mut writer, "USR 3 AUTH I a@x");
    let challenge = read_line(&mut reader);
    let nonce = challenge.rsplit(' ').next().unwrap().to_string();

    let digest = digest::expected_response("p", &nonce);
    send(&mut writer, &format!("USR 4 AUTH S a@x {}", digest));

    assert_eq!(read_line(&mut reader), "USR 4 OK a@x a@x");
    assert_eq!(read_line(&mut reader), "NLN NLN a@x a@x 0");
}

fn authenticate(identity: &str, store: &Arc<dyn Store>, server_stream: TcpStream) -> (TcpStream, BufReader<TcpStream>) {
    let mut writer = server_stream.try_clone().unwrap();
    let mut reader = BufReader::new(server_stream);

    send(&mut writer, "VER 1 MSNP8");
    read_line(&mut reader);
    send(&mut writer, "CVR 2 0x0409 winnt 10.0 i386 MSNMSGR 8.5.1302 msmsgs identity");
    read_line(&mut reader);
    send(&mut writer, &format!("USR 3 AUTH I {}", identity));
    let challenge = read_line(&mut reader);
    let nonce = challenge.rsplit(' ').next().unwrap().to_string();

    let user = store.get_user(&Identity::new(identity)).unwrap();
    let digest = digest::expected_response(&user.credential, &nonce);
    send(&mut writer, &format!("USR 4 AUTH S {} {}", identity, digest));
    read_line(&mut reader);
    read_line(&mut reader);

    (writer, reader)
}

/// S4: a second authentication for the same identity displaces the first connection.
#[test]
fn displacement_on_reauth() {
    let store = seeded_store();
    let raw = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = raw.local_addr().unwrap();

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Error);
    let log = builder.build().unwrap();
    let config = Arc::new(ServerConfig::default());
    let registry = Arc::new(Registry::new());
    let listener = Listener::new(config, registry, store.clone(), log);
    thread::spawn(move || {
        let _ = listener.run_on(raw);
    });
    thread::sleep(Duration::from_millis(50));

    let (_w1, mut r1) = authenticate("a@x", &store, TcpStream::connect(addr).unwrap());
    let (_w2, _r2) = authenticate("a@x", &store, TcpStream::connect(addr).unwrap());

    assert_eq!(read_line(&mut r1), "OUT OTH");
}

/// S5: SYN lists contacts ordered by peer then list bitmask, with the bitmask OR'd across
/// FL/AL membership for the same peer.
#[test]
fn syn_ordering() {
    let store = seeded_store();
    let owner = Identity::new("a@x");
    let b = Identity::new("b@x");
    let c = Identity::new("c@x");
    store.add_contact(&owner, &b, "b@x", ListTag::Fl);
    store.add_contact(&owner, &b, "b@x", ListTag::Al);
    store.add_contact(&owner, &c, "c@x", ListTag::Fl);

    let stream = spawn_server(store);
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    send(&mut writer, "VER 1 MSNP8");
    read_line(&mut reader);
    send(&mut writer, "CVR 2 0x0409 winnt 10.0 i386 MSNMSGR 8.5.1302 msmsgs a@x");
    read_line(&mut reader);
    send(&mut writer, "USR 3 AUTH I a@x");
    let challenge = read_line(&mut reader);
    let nonce = challenge.rsplit(' ').next().unwrap().to_string();
    let digest = digest::expected_response("p", &nonce);
    send(&mut writer, &format!("USR 4 AUTH S a@x {}", digest));
    read_line(&mut reader);
    read_line(&mut reader);

    send(&mut writer, "SYN 9 0 0");
    assert_eq!(read_line(&mut reader), "SYN 9 2 0");
    assert_eq!(read_line(&mut reader), "LST b@x b@x 3 0");
    assert_eq!(read_line(&mut reader), "LST c@x c@x 1 0");
}

/// S6: a presence change fans out only to an online, permitted peer.
#[test]
fn presence_fan_out() {
    let store = seeded_store();
    let a = Identity::new("a@x");
    let b = Identity::new("b@x");
    store.add_contact(&a, &b, "b@x", ListTag::Fl);
    store.add_contact(&b, &a, "a@x", ListTag::Al);
    store.add_contact(&b, &a, "a@x", ListTag::Rl);

    let raw = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = raw.local_addr().unwrap();
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Error);
    let log = builder.build().unwrap();
    let config = Arc::new(ServerConfig::default());
    let registry = Arc::new(Registry::new());
    let listener = Listener::new(config, registry, store.clone(), log);
    thread::spawn(move || {
        let _ = listener.run_on(raw);
    });
    thread::sleep(Duration::from_millis(50));

    let (mut aw, _ar) = authenticate("a@x", &store, TcpStream::connect(addr).unwrap());
    let (_bw, mut br) = authenticate("b@x", &store, TcpStream::connect(addr).unwrap());

    send(&mut aw, "CHG 7 BSY 0");
    assert_eq!(read_line(&mut br), "BSY NLN a@x a@x 0");
}
