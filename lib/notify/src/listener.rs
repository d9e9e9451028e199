use crate::dispatch;
use crate::framer::Framer;
use crate::registry::Registry;
use crate::session::{self, Outbox, SessionCtx, SessionState};
use crossbeam_channel::bounded;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use store::Store;
use wire::config::ServerConfig;
use wire::error::ServerError;
use wire::logging::{debug, info, o, warn, Logger};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Accepts connections and spawns one reader/writer thread pair per connection. Runs on a
/// nonblocking listener socket so the accept loop can notice a shutdown request without
/// depending on OS-level interruption of a blocking `accept()`.
pub struct Listener {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    log: Logger,
    shutdown: Arc<AtomicBool>,
}

impl Listener {
    pub fn new(config: Arc<ServerConfig>, registry: Arc<Registry>, store: Arc<dyn Store>, log: Logger) -> Listener {
        Listener { config, registry, store, log, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// A handle callers can flip to request a graceful shutdown: the accept loop stops
    /// admitting new connections and every live session is given `SHUTDOWN_DRAIN` to close
    /// after receiving `OUT SSD`.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn run(&self) -> std::io::Result<()> {
        let bind_addr = format!("{}:{}", self.config.listen.host, self.config.listen.port);
        let listener = TcpListener::bind(&bind_addr)?;
        self.run_on(listener)
    }

    /// Runs the accept loop on an already-bound listener. Exposed so tests and embedders
    /// that need to know the bound port up front (e.g. binding to port 0) can do so.
    pub fn run_on(&self, listener: TcpListener) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;

        info!(self.log, "listening"; "address" => listener.local_addr().map(|a| a.to_string()).unwrap_or_default());

        let mut live_threads = Vec::new();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match listener.accept() {
                Ok((stream, addr)) => {
                    if self.at_capacity(live_threads.len()) {
                        warn!(self.log, "rejecting connection, at capacity"; "peer" => addr.to_string());
                        drop(stream);
                        continue;
                    }

                    let registry = self.registry.clone();
                    let store = self.store.clone();
                    let config = self.config.clone();
                    let log = self.log.new(o!("peer" => addr.to_string()));
                    let shutdown = self.shutdown.clone();

                    live_threads.retain(|h: &thread::JoinHandle<()>| !h.is_finished());
                    live_threads.push(thread::spawn(move || {
                        serve_connection(stream, addr, registry, store, config, log, shutdown)
                    }));
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    warn!(self.log, "accept failed"; "error" => err.to_string());
                }
            }
        }

        info!(self.log, "shutdown requested, draining connections");
        for handle in live_threads {
            let _ = handle.join();
        }

        Ok(())
    }

    fn at_capacity(&self, live: usize) -> bool {
        live >= self.config.limits.max_connections
    }
}

fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    config: Arc<ServerConfig>,
    log: Logger,
    shutdown: Arc<AtomicBool>,
) {
    if stream.set_read_timeout(Some(POLL_INTERVAL)).is_err() {
        return;
    }

    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };

    let (tx, rx) = bounded(Outbox::CAPACITY);
    let outbox = Outbox::new(tx);

    let writer_log = log.clone();
    let writer = thread::spawn(move || write_loop(write_stream, rx, writer_log));

    let epoch = registry.next_epoch();
    let mut ctx = SessionCtx::new(outbox, epoch);
    let mut framer = Framer::with_max_payload(stream, config.limits.max_message_length);
    let idle_timeout = session::idle_timeout(config.protocol.session_timeout_secs);
    let mut shutdown_deadline: Option<Instant> = None;

    loop {
        if shutdown_deadline.is_none() && shutdown.load(Ordering::Relaxed) {
            ctx.send_line("OUT SSD".to_string());
            shutdown_deadline = Some(Instant::now() + SHUTDOWN_DRAIN);
        }

        if let Some(deadline) = shutdown_deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        match framer.next_command() {
            Ok(Some(cmd)) => {
                ctx.note_transaction();
                dispatch::handle(cmd, &mut ctx, &registry, &store, &config);
                if ctx.state == SessionState::Closing {
                    break;
                }
            }
            Ok(None) => break,
            Err(ServerError::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::WouldBlock
                    || io_err.kind() == std::io::ErrorKind::TimedOut =>
            {
                if !session::is_handshake_complete(&ctx.state)
                    && session::handshake_elapsed(ctx.connected_at) > session::HANDSHAKE_TIMEOUT
                {
                    debug!(log, "handshake timed out"; "peer" => addr.to_string());
                    break;
                }
                if ctx.last_activity.elapsed() > idle_timeout {
                    debug!(log, "idle timeout"; "peer" => addr.to_string());
                    break;
                }
            }
            Err(err) => {
                debug!(log, "framing error"; "peer" => addr.to_string(), "error" => err.to_string());
                ctx.send_error(0, err.code());
                if err.is_fatal() {
                    break;
                }
            }
        }
    }

    if let Some(identity) = ctx.identity.clone() {
        registry.remove(&identity, epoch);
        info!(log, "session closed"; "identity" => identity.to_string());
    }

    drop(ctx);
    let _ = writer.join();
}

fn write_loop(mut stream: TcpStream, rx: crossbeam_channel::Receiver<String>, log: Logger) {
    for line in rx.iter() {
        if stream.write_all(line.as_bytes()).is_err() || stream.write_all(b"\r\n").is_err() {
            debug!(log, "write failed, closing connection");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}
