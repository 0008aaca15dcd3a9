use std::fmt;

use russh_keys::key::{KeyPair, SignatureHash};
use russh_keys::PublicKeyBase64;
use serde::Deserialize;
use serde::de::{self, Deserializer};

use crate::error::{Error, Result};

const RSA_KEY_BITS: usize = 4096;

/// An SSH public key plus the optional comment from its authorized-keys
/// form. The comment is carried for display and for writing keys back into
/// config files; it is never part of the key's identity.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key: russh_keys::key::PublicKey,
    comment: Option<String>,
}

impl PublicKey {
    /// Parse a single authorized-keys line (`<algo> <base64> [comment]`).
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();

        let algo = parts.next().ok_or(Error::MalformedKey)?;
        let encoded = parts.next().ok_or(Error::MalformedKey)?;
        let comment = parts.next().map(str::to_string);

        let key =
            russh_keys::parse_public_key_base64(encoded).map_err(|_| Error::MalformedKey)?;

        if key.name() != algo {
            return Err(Error::MalformedKey);
        }

        Ok(Self { key, comment })
    }

    /// Wrap a key handed to us by the SSH layer during authentication.
    pub fn from_session_key(key: &russh_keys::key::PublicKey) -> Self {
        Self {
            key: key.clone(),
            comment: None,
        }
    }

    /// The canonical authorized-keys form without the comment. This is the
    /// identity used for fingerprint-map lookups.
    pub fn canonical(&self) -> String {
        format!("{} {}", self.key.name(), self.key.public_key_base64())
    }

    /// The full authorized-keys form, comment included. Used for display and
    /// for the text written back into config files.
    pub fn authorized(&self) -> String {
        match &self.comment {
            Some(comment) => format!("{} {comment}", self.canonical()),
            None => self.canonical(),
        }
    }

    /// SHA256 fingerprint, for log output only.
    pub fn fingerprint(&self) -> String {
        format!("SHA256:{}", self.key.fingerprint())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authorized())
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for PublicKey {}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        PublicKey::parse(&raw).map_err(de::Error::custom)
    }
}

/// A server host key. Two of these (one Ed25519, one RSA) live in the admin
/// repo and are loaded or generated on startup.
#[derive(Clone)]
pub struct HostKey {
    pair: KeyPair,
}

impl HostKey {
    pub fn parse_pem(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::MalformedPrivateKey(e.to_string()))?;

        let pair = russh_keys::decode_secret_key(text, None)
            .map_err(|e| Error::MalformedPrivateKey(e.to_string()))?;

        Ok(Self { pair })
    }

    pub fn generate_ed25519() -> Result<Self> {
        let pair = KeyPair::generate_ed25519();

        Ok(Self { pair })
    }

    pub fn generate_rsa() -> Result<Self> {
        let pair = KeyPair::generate_rsa(RSA_KEY_BITS, SignatureHash::SHA2_512)
            .ok_or_else(|| Error::MalformedPrivateKey("rsa generation failed".into()))?;

        Ok(Self { pair })
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        russh_keys::encode_pkcs8_pem(&self.pair, &mut out)
            .map_err(|e| Error::MalformedPrivateKey(e.to_string()))?;
        Ok(out)
    }

    /// Hand the underlying key pair to the SSH server configuration.
    pub fn keypair(&self) -> KeyPair {
        self.pair.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_LINE: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILQGpcX2owFW6hdTWHa/CzbTwhUJlmI8gKAgnp/c0NK2 an-admin";

    #[test]
    fn test_parse_authorized_line() {
        let pk = PublicKey::parse(KEY_LINE).unwrap();
        assert_eq!(pk.authorized(), KEY_LINE);
        assert_eq!(
            pk.canonical(),
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILQGpcX2owFW6hdTWHa/CzbTwhUJlmI8gKAgnp/c0NK2"
        );
    }

    #[test]
    fn test_parse_without_comment() {
        let raw = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILQGpcX2owFW6hdTWHa/CzbTwhUJlmI8gKAgnp/c0NK2";
        let pk = PublicKey::parse(raw).unwrap();
        assert_eq!(pk.authorized(), raw);
        assert_eq!(pk.canonical(), raw);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PublicKey::parse("").is_err());
        assert!(PublicKey::parse("ssh-ed25519").is_err());
        assert!(PublicKey::parse("ssh-ed25519 not-base64!!!").is_err());
        assert!(PublicKey::parse("ssh-rsa AAAAC3NzaC1lZDI1NTE5AAAAILQGpcX2owFW6hdTWHa/CzbTwhUJlmI8gKAgnp/c0NK2").is_err());
    }

    #[test]
    fn test_identity_ignores_comment() {
        let a = PublicKey::parse(KEY_LINE).unwrap();
        let b = PublicKey::parse(&format!("{} other-comment", a.canonical())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_host_key_pem_round_trip() {
        let key = HostKey::generate_ed25519().unwrap();
        let pem = key.to_pem().unwrap();
        assert!(pem.starts_with(b"-----BEGIN"));

        HostKey::parse_pem(&pem).unwrap();
    }
}
