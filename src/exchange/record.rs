use serde::{Deserialize, Serialize};

/// Browser-encrypted envelope. None of the fields are interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Sender's ephemeral public key
    #[serde(rename = "pubkey")]
    pub public_key: String,
    pub nonce: String,
    /// Encrypted payload
    #[serde(rename = "secret")]
    pub ciphertext: String,
}

impl SecretRecord {
    pub fn new(
        public_key: impl Into<String>,
        nonce: impl Into<String>,
        ciphertext: impl Into<String>,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            nonce: nonce.into(),
            ciphertext: ciphertext.into(),
        }
    }

    /// All three parts present and non-empty
    pub fn is_complete(&self) -> bool {
        !self.public_key.is_empty() && !self.nonce.is_empty() && !self.ciphertext.is_empty()
    }
}
