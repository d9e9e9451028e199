use rand::Rng;

const NONCE_LEN: usize = 32;
const NONCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a printable challenge nonce handed out in the `USR ... AUTH S` reply.
pub fn challenge_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0, NONCE_ALPHABET.len());
            NONCE_ALPHABET[idx] as char
        })
        .collect()
}

/// Computes `MD5(MD5(credential) || nonce)` as a lowercase hex string, the digest the
/// client is expected to answer a challenge with.
pub fn expected_response(credential: &str, nonce: &str) -> String {
    let inner = format!("{:x}", md5::compute(credential.as_bytes()));
    let outer = format!("{}{}", inner, nonce);
    format!("{:x}", md5::compute(outer.as_bytes()))
}

/// Verifies a client-supplied digest against the expected one, case-insensitively (some
/// dialects uppercase the hex digits).
pub fn verify(credential: &str, nonce: &str, supplied: &str) -> bool {
    expected_response(credential, nonce).eq_ignore_ascii_case(supplied)
}

/// Whether `supplied` has the shape of an MD5 hex digest, independent of whether it's the
/// correct one. Callers use this to reject garbage input with `928` before running a
/// comparison against it.
pub fn looks_like_digest(supplied: &str) -> bool {
    supplied.len() == 32 && supplied.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_matching_credential() {
        let nonce = "abc123";
        let digest = expected_response("hunter2", nonce);
        assert!(verify("hunter2", nonce, &digest));
    }

    #[test]
    fn rejects_wrong_credential() {
        let nonce = "abc123";
        let digest = expected_response("hunter2", nonce);
        assert!(!verify("wrong", nonce, &digest));
    }

    #[test]
    fn nonce_has_expected_length() {
        assert_eq!(challenge_nonce().len(), NONCE_LEN);
    }

    #[test]
    fn rejects_malformed_digest_shapes() {
        assert!(!looks_like_digest("too-short"));
        assert!(!looks_like_digest("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
        assert!(looks_like_digest(&expected_response("hunter2", "abc123")));
    }
}
