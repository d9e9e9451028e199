use crate::framer::Command;
use crate::registry::{Registry, SessionHandle};
use crate::router;
use crate::session::{Presence, SessionCtx, SessionState};
use std::sync::Arc;
use store::{ListTag, Store};
use wire::config::ServerConfig;
use wire::{digest, Identity, ServerError};

/// Build information returned in the `CVR` reply. The historical client only ever checks
/// that the numbers are non-decreasing; we hand back the same build for all three slots.
const CLIENT_BUILD: &str = "8.5.1302";
const CLIENT_UPGRADE_URL: &str = "http://messenger.msn.com";
const CLIENT_STORE_URL: &str = "http://messenger.msn.com";

fn parse_dialect(tag: &str) -> Option<u32> {
    tag.strip_prefix("MSNP")?.parse().ok()
}

fn negotiate(offered: &[String], supported: &[String]) -> Option<u32> {
    let supported_nums: Vec<u32> = supported.iter().filter_map(|s| parse_dialect(s)).collect();
    offered
        .iter()
        .filter_map(|s| parse_dialect(s))
        .filter(|n| supported_nums.contains(n))
        .max()
}

/// Processes one parsed command against the session's current state, mutating `ctx` and
/// talking to the registry/store/router as needed. Reply lines are enqueued onto the
/// session's own outbox; this function never writes to the socket directly.
pub fn handle(
    cmd: Command,
    ctx: &mut SessionCtx,
    registry: &Arc<Registry>,
    store: &Arc<dyn Store>,
    config: &ServerConfig,
) {
    ctx.touch();

    match cmd {
        Command::Ver { tid, versions } => handle_ver(tid, versions, ctx, config),
        Command::Cvr { tid, .. } => handle_cvr(tid, ctx),
        Command::UsrAuthI { tid, identity } => handle_usr_auth_i(tid, identity, ctx, store),
        Command::UsrAuthS { tid, identity, digest } => {
            handle_usr_auth_s(tid, identity, digest, ctx, registry, store)
        }
        Command::Syn { tid, .. } => handle_syn(tid, ctx, store),
        Command::Chg { tid, state, client_id, msn_obj } => {
            handle_chg(tid, state, client_id, msn_obj, ctx, registry, store)
        }
        Command::Add { tid, list, identity, nickname } => {
            handle_add(tid, list, identity, nickname, ctx, registry, store)
        }
        Command::Rem { tid, list, identity } => handle_rem(tid, list, identity, ctx, registry, store),
        Command::Msg { tid, ack, .. } => handle_msg(tid, ack, ctx),
        Command::Out => {
            ctx.send_line("OUT".to_string());
            ctx.state = SessionState::Closing;
        }
        Command::Png => {
            let interval = config.protocol.ping_interval_secs;
            ctx.send_line(format!("QNG {}", interval));
        }
        Command::Xfr { tid } | Command::Cal { tid, .. } | Command::Ans { tid } => {
            ctx.send_error(tid, ServerError::NotAllowed.code());
        }
        Command::Unknown { tid, .. } => {
            if let Some(tid) = tid {
                ctx.send_error(tid, ServerError::UnexpectedState.code());
            }
        }
    }
}

fn require_state(ctx: &SessionCtx, expected: impl Fn(&SessionState) -> bool, tid: u32) -> bool {
    if expected(&ctx.state) {
        true
    } else {
        ctx.send_error(tid, ServerError::UnexpectedState.code());
        false
    }
}

fn handle_ver(tid: u32, offered: Vec<String>, ctx: &mut SessionCtx, config: &ServerConfig) {
    if !require_state(ctx, |s| *s == SessionState::Greeted, tid) {
        return;
    }

    match negotiate(&offered, &config.protocol.supported_versions) {
        Some(dialect) => {
            let tag = format!("MSNP{}", dialect);
            ctx.send_line(format!("VER {} {}", tid, tag));
            ctx.version = Some(tag);
            ctx.state = SessionState::Versioned;
        }
        None => {
            ctx.send_line(format!("VER {} 0", tid));
            ctx.state = SessionState::Closing;
        }
    }
}

fn handle_cvr(tid: u32, ctx: &mut SessionCtx) {
    if !require_state(ctx, |s| *s == SessionState::Versioned, tid) {
        return;
    }

    ctx.send_line(format!(
        "CVR {} {} {} {} {} {}",
        tid, CLIENT_BUILD, CLIENT_BUILD, CLIENT_BUILD, CLIENT_UPGRADE_URL, CLIENT_STORE_URL
    ));
    ctx.state = SessionState::ClientIdentified;
}

fn handle_usr_auth_i(tid: u32, identity: String, ctx: &mut SessionCtx, store: &Arc<dyn Store>) {
    if !require_state(ctx, |s| *s == SessionState::ClientIdentified, tid) {
        return;
    }

    let identity = Identity::new(identity);

    if store.get_user(&identity).is_none() {
        ctx.send_error(tid, ServerError::UnknownIdentity.code());
        return;
    }

    let nonce = digest::challenge_nonce();
    ctx.send_line(format!("USR {} AUTH S {}", tid, nonce));
    ctx.identity = Some(identity);
    ctx.state = SessionState::Challenged { nonce, attempts: 0 };
}

fn handle_usr_auth_s(
    tid: u32,
    identity: String,
    supplied_digest: String,
    ctx: &mut SessionCtx,
    registry: &Arc<Registry>,
    store: &Arc<dyn Store>,
) {
    let (nonce, attempts) = match &ctx.state {
        SessionState::Challenged { nonce, attempts } => (nonce.clone(), *attempts),
        _ => {
            ctx.send_error(tid, ServerError::UnexpectedState.code());
            return;
        }
    };

    if !digest::looks_like_digest(&supplied_digest) {
        ctx.send_error(tid, ServerError::BadDigestFormat.code());
        ctx.state = SessionState::Closing;
        return;
    }

    let identity = Identity::new(identity);
    let user = match store.get_user(&identity) {
        Some(user) => user,
        None => {
            ctx.send_error(tid, ServerError::UnknownIdentity.code());
            ctx.state = SessionState::Closing;
            return;
        }
    };

    if !digest::verify(&user.credential, &nonce, &supplied_digest) {
        let attempts = attempts + 1;
        if attempts >= SessionState::MAX_AUTH_ATTEMPTS {
            ctx.send_error(tid, ServerError::AuthFailed.code());
            ctx.state = SessionState::Closing;
        } else {
            ctx.send_error(tid, ServerError::AuthFailed.code());
            ctx.state = SessionState::Challenged { nonce, attempts };
        }
        return;
    }

    ctx.identity = Some(identity.clone());
    ctx.presence = Presence::Nln;
    ctx.state = SessionState::Authenticated;

    let handle = Arc::new(SessionHandle::new(
        identity.clone(),
        user.display_name.clone(),
        ctx.outbox.clone(),
        ctx.epoch,
    ));

    if let Some(displaced) = registry.admit(handle) {
        displaced.outbox.enqueue("OUT OTH".to_string());
    }

    ctx.send_line(format!("USR {} OK {} {}", tid, identity, user.display_name));
    ctx.send_line(format!("NLN NLN {} {} 0", identity, user.display_name));
}

fn handle_syn(tid: u32, ctx: &mut SessionCtx, store: &Arc<dyn Store>) {
    if !require_state(ctx, |s| *s == SessionState::Authenticated, tid) {
        return;
    }

    let identity = match ctx.identity_ref() {
        Some(identity) => identity.clone(),
        None => {
            ctx.send_error(tid, ServerError::UnexpectedState.code());
            return;
        }
    };

    let mut contacts = store.list_contacts(&identity);
    contacts.sort_by(|a, b| a.peer.key().cmp(&b.peer.key()).then(a.list.bit().cmp(&b.list.bit())));

    // Group by peer so each peer emits a single LST line with the OR'd membership bitmask.
    let mut grouped: Vec<(Identity, String, u8)> = Vec::new();
    for contact in &contacts {
        if contact.list == ListTag::Rl {
            continue;
        }
        match grouped.iter_mut().find(|(peer, _, _)| *peer == contact.peer) {
            Some((_, _, mask)) => *mask |= contact.list.bit(),
            None => grouped.push((contact.peer.clone(), contact.nickname.clone(), contact.list.bit())),
        }
    }
    grouped.sort_by(|a, b| a.0.key().cmp(&b.0.key()).then(a.2.cmp(&b.2)));

    ctx.send_line(format!("SYN {} {} 0", tid, grouped.len()));
    for (peer, nickname, mask) in grouped {
        ctx.send_line(format!("LST {} {} {} 0", peer, nickname, mask));
    }
}

fn handle_chg(
    tid: u32,
    state: String,
    client_id: Option<String>,
    msn_obj: Option<String>,
    ctx: &mut SessionCtx,
    registry: &Arc<Registry>,
    store: &Arc<dyn Store>,
) {
    if !require_state(ctx, |s| *s == SessionState::Authenticated, tid) {
        return;
    }

    let new_presence = match Presence::parse(&state) {
        Some(presence) => presence,
        None => {
            ctx.send_error(tid, ServerError::InvalidParameter.code());
            return;
        }
    };

    let capabilities = client_id.clone().unwrap_or_else(|| "0".to_string());
    let previous = ctx.presence;
    ctx.presence = new_presence;
    ctx.client_caps = client_id;
    ctx.msn_obj = msn_obj;

    ctx.send_line(format!("CHG {} {} {}", tid, state, capabilities));

    if let Some(identity) = ctx.identity_ref().cloned() {
        if let Some(handle) = registry.lookup(&identity) {
            handle.set_presence(new_presence);
        }

        // Transitions into or out of HDN fan out as FLN/NLN rather than being suppressed.
        let fanned_state = if new_presence.is_hidden() {
            Presence::Fln
        } else if previous.is_hidden() {
            Presence::Nln
        } else {
            new_presence
        };

        if new_presence.is_hidden() == previous.is_hidden() && new_presence.is_hidden() {
            return;
        }

        let display_name = registry
            .lookup(&identity)
            .map(|h| h.display_name())
            .unwrap_or_else(|| identity.to_string());

        router::fan_out_presence(store.as_ref(), registry, &identity, &display_name, fanned_state, &capabilities);
    }
}

fn handle_add(
    tid: u32,
    list: String,
    identity: String,
    nickname: String,
    ctx: &mut SessionCtx,
    registry: &Arc<Registry>,
    store: &Arc<dyn Store>,
) {
    if !require_state(ctx, |s| *s == SessionState::Authenticated, tid) {
        return;
    }

    let list_tag = match ListTag::parse(&list) {
        Some(tag) if tag != ListTag::Rl => tag,
        _ => {
            ctx.send_error(tid, ServerError::InvalidParameter.code());
            return;
        }
    };

    let owner = match ctx.identity_ref() {
        Some(identity) => identity.clone(),
        None => return,
    };
    let peer = Identity::new(identity);

    store.add_contact(&owner, &peer, &nickname, list_tag);

    let version = ctx.transactions_seen;
    ctx.send_line(format!("ADD {} {} {} {} {}", tid, list, version, peer, nickname));

    if list_tag == ListTag::Fl {
        store.add_contact(&peer, &owner, owner.as_str(), ListTag::Rl);

        if registry.lookup(&peer).is_some() {
            let line = format!("ADD 0 RL {} {} {}", version, owner, owner);
            router::notify_list_change(registry, &peer, line);
        }
    }
}

fn handle_rem(
    tid: u32,
    list: String,
    identity: String,
    ctx: &mut SessionCtx,
    registry: &Arc<Registry>,
    store: &Arc<dyn Store>,
) {
    if !require_state(ctx, |s| *s == SessionState::Authenticated, tid) {
        return;
    }

    let list_tag = match ListTag::parse(&list) {
        Some(tag) if tag != ListTag::Rl => tag,
        _ => {
            ctx.send_error(tid, ServerError::InvalidParameter.code());
            return;
        }
    };

    let owner = match ctx.identity_ref() {
        Some(identity) => identity.clone(),
        None => return,
    };
    let peer = Identity::new(identity);

    store.remove_contact(&owner, &peer, list_tag);

    let version = ctx.transactions_seen;
    ctx.send_line(format!("REM {} {} {}", tid, list, peer));

    if list_tag == ListTag::Fl {
        store.remove_contact(&peer, &owner, ListTag::Rl);

        if registry.lookup(&peer).is_some() {
            let line = format!("REM 0 RL {} {}", version, owner);
            router::notify_list_change(registry, &peer, line);
        }
    }
}

fn handle_msg(tid: u32, ack: String, ctx: &mut SessionCtx) {
    if !require_state(ctx, |s| *s == SessionState::Authenticated, tid) {
        return;
    }

    if ack == "A" || ack == "U" {
        ctx.send_line(format!("ACK {}", tid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_picks_highest_common_dialect() {
        let offered = vec!["MSNP21".to_string(), "MSNP8".to_string()];
        let supported = vec!["MSNP8".to_string()];
        assert_eq!(negotiate(&offered, &supported), Some(8));
    }

    #[test]
    fn negotiate_returns_none_without_overlap() {
        let offered = vec!["MSNP99".to_string()];
        let supported = vec!["MSNP8".to_string()];
        assert_eq!(negotiate(&offered, &supported), None);
    }
}
