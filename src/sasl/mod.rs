//! SASL Mechanism Framework
//!
//! The server drives authentication through small mechanism state machines:
//! `start` consumes the client's initial token, `step` continues a
//! multi-round exchange. A registry maps mechanism names to factories; a
//! per-connection session enforces the start-before-step ordering and owns
//! whatever the mechanism leaves behind (authenticated identity, post-auth
//! decode layer).

pub mod dhx;
pub mod mschap;

use std::sync::Arc;

use rand::rngs::OsRng;

use crate::store::{BLACKLISTED_PASSWORD, CredentialStore};

/// Mechanism list advertised by LIST and USER, verbatim.
pub const SUPPORTED_MECHS: &str = "(SASL \"SMB-NTLMv2\" \"SMB-NT\" \"SMB-LAN-MANAGER\" \
     \"MS-CHAPv2\" \"PPS\" \"OTP\" \"GSSAPI\" \"DIGEST-MD5\" \"CRAM-MD5\" \
     \"WEBDAV-DIGEST\" \"DHX\" \"APOP\" )";

// ─── Result codes ───────────────────────────────────────────────────────────

/// Failure codes surfaced on the wire as `-ERR SASL <n>`. The numeric
/// values are the SASL library codes clients already interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslCode {
    Fail,
    NoMech,
    BadProt,
    BadParam,
    BadMac,
    BadAuth,
    NoUser,
    BadVers,
}

impl SaslCode {
    pub fn wire_code(self) -> i32 {
        match self {
            Self::Fail => -1,
            Self::NoMech => -4,
            Self::BadProt => -5,
            Self::BadParam => -7,
            Self::BadMac => -9,
            Self::BadAuth => -13,
            Self::NoUser => -20,
            Self::BadVers => -23,
        }
    }
}

/// A successful round: either the exchange continues with a server token,
/// or it is complete (the final token may be empty).
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue(Vec<u8>),
    Done(Vec<u8>),
}

pub type StepResult = Result<Step, SaslCode>;

// ─── Mechanism surface ──────────────────────────────────────────────────────

/// Post-authentication transform a mechanism may install (DHX decrypts
/// subsequent client payloads under the negotiated key).
pub trait SecurityLayer: Send {
    fn decode(&mut self, input: &[u8]) -> Vec<u8>;
}

/// What a mechanism gets from the framework: credential lookups and a
/// place to record the outcome.
pub struct MechEnv<'a> {
    store: &'a dyn CredentialStore,
    authid: Option<String>,
    decode: Option<Box<dyn SecurityLayer>>,
}

impl<'a> MechEnv<'a> {
    fn new(store: &'a dyn CredentialStore) -> Self {
        Self {
            store,
            authid: None,
            decode: None,
        }
    }

    /// Look up the user's plaintext. The blacklist sentinel reads as "no
    /// password on file".
    pub fn password(&self, username: &str) -> Option<String> {
        match self.store.lookup_password(username) {
            Some(pw) if pw != BLACKLISTED_PASSWORD => Some(pw),
            _ => None,
        }
    }

    /// Verify an offered plaintext against the store.
    pub fn check_password(&self, username: &str, offered: &[u8]) -> Result<(), SaslCode> {
        let stored = self.password(username).ok_or(SaslCode::NoUser)?;
        if stored.as_bytes() == offered {
            Ok(())
        } else {
            Err(SaslCode::BadAuth)
        }
    }

    /// Record the authenticated identity.
    pub fn set_authid(&mut self, authid: &str) {
        self.authid = Some(authid.to_string());
    }

    /// Install a post-auth decode layer.
    pub fn install_decode(&mut self, layer: Box<dyn SecurityLayer>) {
        self.decode = Some(layer);
    }
}

pub trait Mechanism: Send {
    fn start(&mut self, env: &mut MechEnv<'_>, client_in: &[u8]) -> StepResult;
    fn step(&mut self, env: &mut MechEnv<'_>, client_in: &[u8]) -> StepResult;
}

// ─── Registry ───────────────────────────────────────────────────────────────

type MechFactory = Box<dyn Fn() -> Box<dyn Mechanism> + Send + Sync>;

/// Case-sensitive mechanism name → factory table.
pub struct MechanismRegistry {
    entries: Vec<(String, MechFactory)>,
}

impl MechanismRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Mechanism> + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), Box::new(factory)));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Mechanism>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    /// The production mechanism set. `mschap_rfc_unicode` selects RFC 2759
    /// UTF-16-LE password hashing for MS-CHAPv2 instead of the deployed
    /// raw-byte behavior.
    pub fn standard(mschap_rfc_unicode: bool) -> Self {
        let mut registry = Self::empty();
        registry.register("DHX", || Box::new(dhx::Dhx::new(&mut OsRng)));
        if mschap_rfc_unicode {
            registry.register("MS-CHAPv2", || Box::new(mschap::MsChapV2::with_rfc_unicode()));
        } else {
            registry.register("MS-CHAPv2", || Box::new(mschap::MsChapV2::new()));
        }
        registry
    }
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        Self::standard(false)
    }
}

// ─── Per-connection session ─────────────────────────────────────────────────

/// Owns the active mechanism for one connection. Created fresh by USER,
/// driven by AUTH/AUTH2, dropped with the connection.
pub struct SaslSession {
    store: Arc<dyn CredentialStore>,
    active: Option<Box<dyn Mechanism>>,
    done: bool,
    authid: Option<String>,
    decode: Option<Box<dyn SecurityLayer>>,
}

impl SaslSession {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            active: None,
            done: false,
            authid: None,
            decode: None,
        }
    }

    /// Begin an exchange. Any earlier mechanism state is discarded, so a
    /// client may retry with a different mechanism after a failure.
    pub fn start(&mut self, registry: &MechanismRegistry, mech: &str, client_in: &[u8]) -> StepResult {
        self.active = None;
        self.done = false;
        self.authid = None;
        self.decode = None;

        let mut mechanism = registry.create(mech).ok_or(SaslCode::NoMech)?;
        let mut env = MechEnv::new(&*self.store);
        let result = mechanism.start(&mut env, client_in);

        match &result {
            Ok(Step::Continue(_)) => self.active = Some(mechanism),
            Ok(Step::Done(_)) => {
                self.done = true;
                self.authid = env.authid.take();
                self.decode = env.decode.take();
            }
            Err(_) => {}
        }

        result
    }

    /// Continue a multi-round exchange. Illegal before `start` or after
    /// the exchange has concluded.
    pub fn step(&mut self, client_in: &[u8]) -> StepResult {
        if self.done {
            return Err(SaslCode::BadProt);
        }
        let mut mechanism = self.active.take().ok_or(SaslCode::BadProt)?;
        let mut env = MechEnv::new(&*self.store);
        let result = mechanism.step(&mut env, client_in);

        match &result {
            Ok(Step::Continue(_)) => self.active = Some(mechanism),
            Ok(Step::Done(_)) => {
                self.done = true;
                self.authid = env.authid.take();
                self.decode = env.decode.take();
            }
            // Failed mechanism state is dropped; the client must restart.
            Err(_) => {}
        }

        result
    }

    pub fn is_authenticated(&self) -> bool {
        self.done
    }

    pub fn authid(&self) -> Option<&str> {
        self.authid.as_deref()
    }

    /// Run the post-auth decode layer, if the mechanism installed one.
    pub fn decode(&mut self, input: &[u8]) -> Option<Vec<u8>> {
        self.decode.as_mut().map(|layer| layer.decode(input))
    }
}
