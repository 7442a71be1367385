use rand::Rng;
use serde::Serialize;
use std::fmt;

/// Symbols a mnemonic is drawn from, each with equal probability.
pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const DEFAULT_MNEMONIC_LEN: usize = 10;

/// Public handle of a stored secret, doubling as its backend key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Mnemonic(String);

impl Mnemonic {
    /// Accept `candidate` only if it could have been issued under `len`.
    ///
    /// Anything else cannot name a live secret, and must not be used as a
    /// backend key either since it could address counters or foreign data.
    pub fn parse(candidate: &str, len: usize) -> Option<Self> {
        let well_formed =
            candidate.len() == len && candidate.bytes().all(|b| ALPHABET.contains(&b));
        well_formed.then(|| Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Prefix that is safe to write to logs
    pub fn redacted(&self) -> &str {
        redact(&self.0)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First few characters of a caller-supplied handle, for log lines.
pub fn redact(handle: &str) -> &str {
    let end = handle
        .char_indices()
        .nth(4)
        .map(|(i, _)| i)
        .unwrap_or(handle.len());
    &handle[..end]
}

/// Draw a mnemonic of `len` symbols from `rng`.
pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Mnemonic {
    let value = (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    Mnemonic(value)
}

/// Supplies candidate mnemonics to the allocator.
pub trait MnemonicSource: Send + Sync {
    fn next_mnemonic(&self) -> Mnemonic;
}

/// Mnemonics from the thread-local CSPRNG
#[derive(Debug, Clone, Copy)]
pub struct RandomMnemonics {
    len: usize,
}

impl RandomMnemonics {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for RandomMnemonics {
    fn default() -> Self {
        Self::new(DEFAULT_MNEMONIC_LEN)
    }
}

impl MnemonicSource for RandomMnemonics {
    fn next_mnemonic(&self) -> Mnemonic {
        generate_with(&mut rand::thread_rng(), self.len)
    }
}
