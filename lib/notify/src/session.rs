use crossbeam_channel::Sender;
use std::time::{Duration, Instant};
use wire::Identity;

/// Outbound line queue for a single session. Exactly one writer thread drains this; every
/// other thread (the session's own reader loop, the router during fan-out) only enqueues.
#[derive(Clone)]
pub struct Outbox {
    tx: Sender<String>,
}

impl Outbox {
    pub const CAPACITY: usize = 256;
    const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(tx: Sender<String>) -> Outbox {
        Outbox { tx }
    }

    /// Enqueues a line (without the trailing `\r\n`, which the writer thread appends).
    /// Returns `false` if the queue stayed full for the whole enqueue timeout, meaning the
    /// session is stalled and should be torn down.
    pub fn enqueue(&self, line: String) -> bool {
        self.tx.send_timeout(line, Self::ENQUEUE_TIMEOUT).is_ok()
    }
}

/// Presence states a session can advertise. `Fln` is never set explicitly on a connected
/// session; it only appears in notifications describing someone who has disconnected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Presence {
    Nln,
    Bsy,
    Idl,
    Brb,
    Awy,
    Phn,
    Lun,
    Hdn,
    Fln,
}

impl Presence {
    pub fn wire_name(self) -> &'static str {
        match self {
            Presence::Nln => "NLN",
            Presence::Bsy => "BSY",
            Presence::Idl => "IDL",
            Presence::Brb => "BRB",
            Presence::Awy => "AWY",
            Presence::Phn => "PHN",
            Presence::Lun => "LUN",
            Presence::Hdn => "HDN",
            Presence::Fln => "FLN",
        }
    }

    pub fn parse(raw: &str) -> Option<Presence> {
        match raw {
            "NLN" => Some(Presence::Nln),
            "BSY" => Some(Presence::Bsy),
            "IDL" => Some(Presence::Idl),
            "BRB" => Some(Presence::Brb),
            "AWY" => Some(Presence::Awy),
            "PHN" => Some(Presence::Phn),
            "LUN" => Some(Presence::Lun),
            "HDN" => Some(Presence::Hdn),
            "FLN" => Some(Presence::Fln),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Presence::Nln => 0,
            Presence::Bsy => 1,
            Presence::Idl => 2,
            Presence::Brb => 3,
            Presence::Awy => 4,
            Presence::Phn => 5,
            Presence::Lun => 6,
            Presence::Hdn => 7,
            Presence::Fln => 8,
        }
    }

    pub fn from_u8(raw: u8) -> Presence {
        match raw {
            0 => Presence::Nln,
            1 => Presence::Bsy,
            2 => Presence::Idl,
            3 => Presence::Brb,
            4 => Presence::Awy,
            5 => Presence::Phn,
            6 => Presence::Lun,
            7 => Presence::Hdn,
            _ => Presence::Fln,
        }
    }

    pub fn is_hidden(self) -> bool {
        self == Presence::Hdn
    }
}

/// Where a connection currently sits in the handshake/auth progression. Transitions are
/// one-way; there is no path back to an earlier state short of closing the connection.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionState {
    Greeted,
    Versioned,
    ClientIdentified,
    Challenged { nonce: String, attempts: u8 },
    Authenticated,
    Closing,
}

impl SessionState {
    pub const MAX_AUTH_ATTEMPTS: u8 = 3;
}

/// Per-connection state threaded through the dispatcher. Owned exclusively by the
/// session's reader thread; fan-out from other sessions only ever touches the
/// [`crate::registry::SessionHandle`] counterpart, never this struct.
pub struct SessionCtx {
    pub state: SessionState,
    pub version: Option<String>,
    pub identity: Option<Identity>,
    pub presence: Presence,
    pub client_caps: Option<String>,
    pub msn_obj: Option<String>,
    pub outbox: Outbox,
    pub transactions_seen: u64,
    pub last_activity: Instant,
    pub connected_at: Instant,
    pub epoch: u64,
}

impl SessionCtx {
    pub fn new(outbox: Outbox, epoch: u64) -> SessionCtx {
        let now = Instant::now();
        SessionCtx {
            state: SessionState::Greeted,
            version: None,
            identity: None,
            presence: Presence::Nln,
            client_caps: None,
            msn_obj: None,
            outbox,
            transactions_seen: 0,
            last_activity: now,
            connected_at: now,
            epoch,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn note_transaction(&mut self) {
        self.transactions_seen = self.transactions_seen.wrapping_add(1);
    }

    pub fn send_line(&self, line: String) -> bool {
        self.outbox.enqueue(line)
    }

    pub fn send_error(&self, tid: u32, code: u32) -> bool {
        self.send_line(format!("{} {}", code, tid))
    }

    pub fn identity_ref(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

pub fn handshake_elapsed(connected_at: Instant) -> Duration {
    Instant::now().duration_since(connected_at)
}

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// The configured idle timeout is never allowed to go below this, so a misconfigured
/// `session_timeout_secs` can't make every ping interval look like a stall.
const IDLE_TIMEOUT_FLOOR_SECS: u64 = 90;

pub fn is_handshake_complete(state: &SessionState) -> bool {
    matches!(state, SessionState::Authenticated | SessionState::Closing)
}

/// Resolves the configured session idle timeout, clamped to `IDLE_TIMEOUT_FLOOR_SECS`.
pub fn idle_timeout(configured_secs: u64) -> Duration {
    Duration::from_secs(configured_secs.max(IDLE_TIMEOUT_FLOOR_SECS))
}
