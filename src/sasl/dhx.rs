//! DHX Mechanism
//!
//! Two-step exchange: the client sends its identity and Diffie-Hellman
//! public value; the server answers with its own public value plus a nonce
//! encrypted under the agreed CAST key; the client proves liveness by
//! returning nonce+1 together with the plaintext password, encrypted the
//! same way. On success a CAST5-CBC decode layer is installed for
//! subsequent client payloads.
//!
//! The group is fixed: g = 7 over a well-known 1024-bit prime. The two CBC
//! IVs are protocol constants, one per direction.

use cast5::Cast5;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use num_bigint::BigUint;
use rand::RngCore;

use super::{MechEnv, Mechanism, SaslCode, SecurityLayer, Step, StepResult};

const GENERATOR: u8 = 7;

/// 1024-bit DH modulus, big-endian.
const PRIME: [u8; 128] = [
    0xd9, 0xc8, 0xff, 0xb9, 0x1d, 0xff, 0x2f, 0x94, 0xbf, 0xd2, 0xbe, 0x97, 0x42, 0xde, 0xea,
    0xbb, 0x8b, 0x71, 0xc0, 0x51, 0xe3, 0x1e, 0x39, 0x76, 0xb9, 0x72, 0xb4, 0x14, 0x90, 0x5b,
    0x1e, 0x76, 0x88, 0xd3, 0x71, 0x3d, 0x5f, 0x8f, 0xb3, 0xbd, 0x37, 0x32, 0x3f, 0xa1, 0x68,
    0xa5, 0xea, 0x54, 0xe4, 0xcd, 0xb7, 0x30, 0x8b, 0x3f, 0x2e, 0xff, 0x43, 0x7c, 0x66, 0xcb,
    0xac, 0x0a, 0xb8, 0x1c, 0xcc, 0x49, 0xf3, 0xb2, 0x97, 0x1c, 0x2c, 0x1d, 0x06, 0x00, 0xdb,
    0x47, 0x9f, 0xb9, 0x7e, 0xcf, 0x4e, 0x71, 0x07, 0xe2, 0x52, 0xc3, 0x43, 0xb4, 0xef, 0x21,
    0xf1, 0x5f, 0xf7, 0x13, 0x87, 0x69, 0x29, 0x28, 0xa1, 0xec, 0x38, 0xc1, 0xe3, 0xf9, 0x20,
    0x0b, 0x9d, 0x2b, 0xea, 0xfb, 0xff, 0x07, 0xc6, 0x23, 0x99, 0x48, 0xdb, 0xc2, 0xc4, 0x03,
    0xbf, 0x98, 0x65, 0xf9, 0x77, 0xef, 0x35, 0x87,
];

const MODULUS_BYTES: usize = 128;
const KEY_BYTES: usize = 16;
const NONCE_BYTES: usize = 16;
/// Server→client IV.
const ENCRYPT_IV: [u8; 8] = *b"CJalbert";
/// Client→server IV.
const DECRYPT_IV: [u8; 8] = *b"LWallace";
/// Residue after the two NUL-terminated identity fields: 4 pad bytes plus
/// the client's 128-byte public value.
const KEY_EXCHANGE_BYTES: usize = 4 + MODULUS_BYTES;
const MAX_USERNAME_BYTES: usize = 128;
const MAX_PROOF_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    KeyExchange,
    Proof,
    Finished,
}

pub struct Dhx {
    phase: Phase,
    private: [u8; MODULUS_BYTES],
    nonce: [u8; NONCE_BYTES],
    shared_key: [u8; KEY_BYTES],
    username: Vec<u8>,
}

impl Dhx {
    /// Both the nonce and the DH private exponent must come from a
    /// cryptographic RNG; tests inject a deterministic one.
    pub fn new(rng: &mut dyn RngCore) -> Self {
        let mut nonce = [0u8; NONCE_BYTES];
        rng.fill_bytes(&mut nonce);
        let mut private = [0u8; MODULUS_BYTES];
        rng.fill_bytes(&mut private);

        Self {
            phase: Phase::KeyExchange,
            private,
            nonce,
            shared_key: [0u8; KEY_BYTES],
            username: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_secrets(private: [u8; MODULUS_BYTES], nonce: [u8; NONCE_BYTES]) -> Self {
        Self {
            phase: Phase::KeyExchange,
            private,
            nonce,
            shared_key: [0u8; KEY_BYTES],
            username: Vec::new(),
        }
    }

    fn key_exchange(&mut self, client_in: &[u8]) -> StepResult {
        // authid, NUL, authzid, NUL, then exactly the key-exchange residue.
        let authid_end = client_in
            .iter()
            .position(|&b| b == 0)
            .ok_or(SaslCode::BadParam)?;
        if authid_end > MAX_USERNAME_BYTES {
            return Err(SaslCode::BadParam);
        }

        // The second field's content is ignored; any bytes are accepted.
        let rest = &client_in[authid_end + 1..];
        let authzid_end = rest.iter().position(|&b| b == 0).ok_or(SaslCode::BadParam)?;
        let residue = &rest[authzid_end + 1..];
        if residue.len() != KEY_EXCHANGE_BYTES {
            return Err(SaslCode::BadParam);
        }

        self.username = client_in[..authid_end].to_vec();

        let p = BigUint::from_bytes_be(&PRIME);
        let g = BigUint::from(GENERATOR);
        let private = BigUint::from_bytes_be(&self.private);
        let client_public = BigUint::from_bytes_be(&residue[4..]);

        // Shared CAST key: high 16 bytes of the agreed secret.
        let shared = client_public.modpow(&private, &p);
        let shared_bytes = encode_be(&shared, MODULUS_BYTES);
        self.shared_key.copy_from_slice(&shared_bytes[..KEY_BYTES]);

        let server_public = g.modpow(&private, &p);

        // server_pub(128) || E(nonce(16) || zero-pad(16))
        let mut ciphertext = [0u8; 2 * NONCE_BYTES];
        ciphertext[..NONCE_BYTES].copy_from_slice(&encode_be(
            &BigUint::from_bytes_be(&self.nonce),
            NONCE_BYTES,
        ));
        let mut iv = ENCRYPT_IV;
        cast_cbc_encrypt(&self.shared_key, &mut iv, &mut ciphertext);

        let mut out = encode_be(&server_public, MODULUS_BYTES);
        out.extend_from_slice(&ciphertext);

        self.phase = Phase::Proof;
        Ok(Step::Continue(out))
    }

    fn proof(&mut self, env: &mut MechEnv<'_>, client_in: &[u8]) -> StepResult {
        if client_in.is_empty() || client_in.len() > MAX_PROOF_BYTES {
            return Err(SaslCode::BadParam);
        }

        let mut plaintext = client_in.to_vec();
        plaintext.truncate(plaintext.len() - plaintext.len() % 8);
        let mut iv = DECRYPT_IV;
        cast_cbc_decrypt(&self.shared_key, &mut iv, &mut plaintext);
        if plaintext.len() < NONCE_BYTES {
            return Err(SaslCode::BadParam);
        }

        // Liveness: the client must return our nonce plus one.
        let client_nonce = BigUint::from_bytes_be(&plaintext[..NONCE_BYTES]);
        let expected = BigUint::from_bytes_be(&self.nonce) + 1u32;
        if client_nonce != expected {
            return Err(SaslCode::BadMac);
        }

        // The remainder is the NUL-terminated plaintext password.
        let password_field = &plaintext[NONCE_BYTES..];
        let password_end = password_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(password_field.len());
        let password = &password_field[..password_end];

        let username = String::from_utf8_lossy(&self.username).into_owned();
        env.check_password(&username, password)?;

        env.set_authid(&username);
        env.install_decode(Box::new(DhxLayer {
            key: self.shared_key,
            decrypt_iv: DECRYPT_IV,
            encrypt_iv: ENCRYPT_IV,
        }));

        self.phase = Phase::Finished;
        Ok(Step::Done(Vec::new()))
    }
}

impl Mechanism for Dhx {
    fn start(&mut self, _env: &mut MechEnv<'_>, client_in: &[u8]) -> StepResult {
        if self.phase != Phase::KeyExchange {
            return Err(SaslCode::BadProt);
        }
        self.key_exchange(client_in)
    }

    fn step(&mut self, env: &mut MechEnv<'_>, client_in: &[u8]) -> StepResult {
        if self.phase != Phase::Proof {
            return Err(SaslCode::BadProt);
        }
        self.proof(env, client_in)
    }
}

impl Drop for Dhx {
    fn drop(&mut self) {
        self.private.fill(0);
        self.nonce.fill(0);
        self.shared_key.fill(0);
        self.username.fill(0);
    }
}

// ─── Post-auth decode layer ─────────────────────────────────────────────────

/// CAST5-CBC decryption of post-auth client payloads. The IVs chain across
/// calls, so the layer is stateful per connection.
struct DhxLayer {
    key: [u8; KEY_BYTES],
    decrypt_iv: [u8; 8],
    #[allow(dead_code)]
    encrypt_iv: [u8; 8],
}

impl SecurityLayer for DhxLayer {
    fn decode(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = input[..input.len() - input.len() % 8].to_vec();
        cast_cbc_decrypt(&self.key, &mut self.decrypt_iv, &mut out);
        out
    }
}

impl Drop for DhxLayer {
    fn drop(&mut self) {
        self.key.fill(0);
    }
}

// ─── CAST5-CBC ──────────────────────────────────────────────────────────────

// Explicit CBC over the CAST5 block cipher with a caller-owned IV: the
// decode layer needs the IV threaded across calls, which packaged CBC
// wrappers do not expose. Whole 8-byte blocks only.

pub(crate) fn cast_cbc_encrypt(key: &[u8; KEY_BYTES], iv: &mut [u8; 8], data: &mut [u8]) {
    let cipher = Cast5::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        iv.copy_from_slice(block);
    }
}

pub(crate) fn cast_cbc_decrypt(key: &[u8; KEY_BYTES], iv: &mut [u8; 8], data: &mut [u8]) {
    let cipher = Cast5::new(GenericArray::from_slice(key));
    let mut prev = [0u8; 8];
    for block in data.chunks_exact_mut(8) {
        prev.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        iv.copy_from_slice(&prev);
    }
}

#[cfg(test)]
pub(crate) fn prime_bytes() -> &'static [u8; 128] {
    &PRIME
}

/// Big-endian encoding in exactly `len` bytes: left-padded with zeros, or
/// truncated to the low-order bytes when the value is larger.
pub(crate) fn encode_be(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= len {
        bytes[bytes.len() - len..].to_vec()
    } else {
        let mut out = vec![0u8; len - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::{MechanismRegistry, SaslSession};
    use crate::store::{CredentialStore, MemoryStore};
    use std::sync::Arc;

    // Fixed secrets used across the tests.
    fn server_private() -> [u8; 128] {
        let mut private = [0u8; 128];
        for (i, b) in private.iter_mut().enumerate() {
            *b = (i + 1) as u8;
        }
        private
    }

    fn server_nonce() -> [u8; 16] {
        *b"\x10\x11\x12\x13\x14\x15\x16\x17\x18\x19\x1a\x1b\x1c\x1d\x1e\x1f"
    }

    fn client_private() -> BigUint {
        BigUint::from_bytes_be(&[0xAB; 128])
    }

    fn prime() -> BigUint {
        BigUint::from_bytes_be(&PRIME)
    }

    fn initial_token(authid: &[u8], client_public: &BigUint) -> Vec<u8> {
        let mut token = authid.to_vec();
        token.push(0);
        token.push(0); // empty authzid
        token.extend_from_slice(&[0u8; 4]);
        token.extend_from_slice(&encode_be(client_public, 128));
        token
    }

    fn proof_token(shared_key: &[u8; 16], nonce_plus_one: &BigUint, password: &[u8]) -> Vec<u8> {
        let mut plaintext = encode_be(nonce_plus_one, 16);
        plaintext.extend_from_slice(password);
        plaintext.push(0);
        while plaintext.len() % 8 != 0 {
            plaintext.push(0);
        }
        let mut iv = DECRYPT_IV;
        cast_cbc_encrypt(shared_key, &mut iv, &mut plaintext);
        plaintext
    }

    fn run_key_exchange(dhx: &mut Dhx, store: &dyn CredentialStore) -> (Vec<u8>, [u8; 16]) {
        let client_public = BigUint::from(GENERATOR).modpow(&client_private(), &prime());
        let token = initial_token(b"alice", &client_public);
        let mut env = MechEnv::new(store);
        let Ok(Step::Continue(out)) = dhx.start(&mut env, &token) else {
            panic!("key exchange failed");
        };
        assert_eq!(out.len(), 160);

        // Client-side agreement.
        let server_public = BigUint::from_bytes_be(&out[..128]);
        let shared = server_public.modpow(&client_private(), &prime());
        let mut shared_key = [0u8; 16];
        shared_key.copy_from_slice(&encode_be(&shared, 128)[..16]);
        (out, shared_key)
    }

    #[test]
    fn cbc_round_trip_with_chained_iv() {
        let key = [0x42u8; 16];
        let mut data = *b"exactly sixteen!";
        let original = data;

        let mut iv = ENCRYPT_IV;
        cast_cbc_encrypt(&key, &mut iv, &mut data);
        assert_ne!(data, original);
        assert_eq!(&iv, &data[8..16], "iv must carry the last ciphertext block");

        let mut iv = ENCRYPT_IV;
        cast_cbc_decrypt(&key, &mut iv, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn encode_be_pads_and_truncates() {
        let n = BigUint::from(0x1234u32);
        assert_eq!(encode_be(&n, 4), vec![0, 0, 0x12, 0x34]);
        assert_eq!(encode_be(&n, 1), vec![0x34]);
    }

    #[test]
    fn shared_secret_matches_reference() {
        // Independently derived: shared = g^(s*c) mod p, high 16 bytes.
        let store = MemoryStore::new();
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (out, shared_key) = run_key_exchange(&mut dhx, &store);

        assert_eq!(
            crate::codec::binary_to_hex(&out[..8]),
            "6AF0F77754A0F959",
            "server public value"
        );
        assert_eq!(
            crate::codec::binary_to_hex(&shared_key),
            "87B8FA148C5C45FAEB988B6CC0467950",
            "agreed CAST key"
        );
        assert_eq!(dhx.shared_key, shared_key);
    }

    #[test]
    fn key_exchange_encrypts_nonce_for_client() {
        let store = MemoryStore::new();
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (out, shared_key) = run_key_exchange(&mut dhx, &store);

        let mut ciphertext = out[128..160].to_vec();
        let mut iv = ENCRYPT_IV;
        cast_cbc_decrypt(&shared_key, &mut iv, &mut ciphertext);
        assert_eq!(&ciphertext[..16], &server_nonce());
        assert_eq!(&ciphertext[16..], &[0u8; 16]);
    }

    #[test]
    fn full_exchange_authenticates() {
        let store = MemoryStore::new().with_user("alice", "wonderland");
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (_, shared_key) = run_key_exchange(&mut dhx, &store);

        let nonce_plus_one = BigUint::from_bytes_be(&server_nonce()) + 1u32;
        let token = proof_token(&shared_key, &nonce_plus_one, b"wonderland");

        let mut env = MechEnv::new(&store);
        assert_eq!(dhx.step(&mut env, &token), Ok(Step::Done(Vec::new())));
        assert_eq!(env.authid.as_deref(), Some("alice"));
        assert!(env.decode.is_some());
    }

    #[test]
    fn decode_layer_chains_iv_across_messages() {
        let store = MemoryStore::new().with_user("alice", "wonderland");
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (_, shared_key) = run_key_exchange(&mut dhx, &store);

        let nonce_plus_one = BigUint::from_bytes_be(&server_nonce()) + 1u32;
        let token = proof_token(&shared_key, &nonce_plus_one, b"wonderland");
        let mut env = MechEnv::new(&store);
        dhx.step(&mut env, &token).unwrap();
        let mut layer = env.decode.take().unwrap();

        // Client encrypts two messages with one continuing CBC stream.
        let mut iv = DECRYPT_IV;
        let mut first = *b"message1";
        cast_cbc_encrypt(&shared_key, &mut iv, &mut first);
        let mut second = *b"message2";
        cast_cbc_encrypt(&shared_key, &mut iv, &mut second);

        assert_eq!(layer.decode(&first), b"message1");
        assert_eq!(layer.decode(&second), b"message2");
    }

    #[test]
    fn wrong_nonce_is_badmac() {
        let store = MemoryStore::new().with_user("alice", "wonderland");
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (_, shared_key) = run_key_exchange(&mut dhx, &store);

        // nonce + 2 is not a valid liveness proof
        let bad = BigUint::from_bytes_be(&server_nonce()) + 2u32;
        let token = proof_token(&shared_key, &bad, b"wonderland");
        let mut env = MechEnv::new(&store);
        assert_eq!(dhx.step(&mut env, &token), Err(SaslCode::BadMac));
    }

    #[test]
    fn wrong_password_is_badauth() {
        let store = MemoryStore::new().with_user("alice", "wonderland");
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (_, shared_key) = run_key_exchange(&mut dhx, &store);

        let nonce_plus_one = BigUint::from_bytes_be(&server_nonce()) + 1u32;
        let token = proof_token(&shared_key, &nonce_plus_one, b"guess");
        let mut env = MechEnv::new(&store);
        assert_eq!(dhx.step(&mut env, &token), Err(SaslCode::BadAuth));
    }

    #[test]
    fn unknown_user_is_nouser() {
        let store = MemoryStore::new();
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let (_, shared_key) = run_key_exchange(&mut dhx, &store);

        let nonce_plus_one = BigUint::from_bytes_be(&server_nonce()) + 1u32;
        let token = proof_token(&shared_key, &nonce_plus_one, b"wonderland");
        let mut env = MechEnv::new(&store);
        assert_eq!(dhx.step(&mut env, &token), Err(SaslCode::NoUser));
    }

    #[test]
    fn malformed_initial_tokens_are_badparam() {
        let store = MemoryStore::new();
        let client_public = BigUint::from(2u8);
        let mut env = MechEnv::new(&store);

        // empty
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        assert_eq!(dhx.start(&mut env, b""), Err(SaslCode::BadParam));

        // no NUL at all
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        assert_eq!(dhx.start(&mut env, b"alice"), Err(SaslCode::BadParam));

        // residue of the wrong size
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let mut short = initial_token(b"alice", &client_public);
        short.pop();
        assert_eq!(dhx.start(&mut env, &short), Err(SaslCode::BadParam));

        // username over 128 bytes
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        let long = initial_token(&[b'a'; 129], &client_public);
        assert_eq!(dhx.start(&mut env, &long), Err(SaslCode::BadParam));
    }

    #[test]
    fn oversized_proof_is_badparam() {
        let store = MemoryStore::new();
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        run_key_exchange(&mut dhx, &store);
        let mut env = MechEnv::new(&store);
        assert_eq!(dhx.step(&mut env, &[0u8; 257]), Err(SaslCode::BadParam));
    }

    #[test]
    fn step_out_of_phase_is_badprot() {
        let store = MemoryStore::new();
        let mut env = MechEnv::new(&store);
        let mut dhx = Dhx::with_secrets(server_private(), server_nonce());
        assert_eq!(dhx.step(&mut env, b"data"), Err(SaslCode::BadProt));
    }

    #[test]
    fn session_drives_full_dhx_exchange() {
        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::new().with_user("alice", "wonderland"));
        let mut registry = MechanismRegistry::empty();
        registry.register("DHX", || {
            Box::new(Dhx::with_secrets(
                {
                    let mut p = [0u8; 128];
                    for (i, b) in p.iter_mut().enumerate() {
                        *b = (i + 1) as u8;
                    }
                    p
                },
                *b"\x10\x11\x12\x13\x14\x15\x16\x17\x18\x19\x1a\x1b\x1c\x1d\x1e\x1f",
            ))
        });

        let mut session = SaslSession::new(store);
        let client_public = BigUint::from(GENERATOR).modpow(&client_private(), &prime());
        let token = initial_token(b"alice", &client_public);
        let Ok(Step::Continue(out)) = session.start(&registry, "DHX", &token) else {
            panic!("start failed");
        };

        let server_public = BigUint::from_bytes_be(&out[..128]);
        let shared = server_public.modpow(&client_private(), &prime());
        let mut shared_key = [0u8; 16];
        shared_key.copy_from_slice(&encode_be(&shared, 128)[..16]);

        let nonce_plus_one = BigUint::from_bytes_be(&server_nonce()) + 1u32;
        let token = proof_token(&shared_key, &nonce_plus_one, b"wonderland");
        assert_eq!(session.step(&token), Ok(Step::Done(Vec::new())));
        assert!(session.is_authenticated());
        assert_eq!(session.authid(), Some("alice"));
    }
}
