//! Signed pointer-URL issuer and verifier.
//!
//! A signed token is five colon-separated fields:
//! `b64(account-id) : exp-unix : hex(hmac) : b64(identity) : b64(salt)`
//! where the MAC covers `"<account-id>:<exp>:<identity>:<b64-salt>"`.
//! Textual fields use URL-safe base64 without padding; the salt is 8 random
//! bytes; tokens expire 24 hours after issue.

use crate::error::SignError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signed tokens are honored for this long after issue.
pub const SIGNED_URL_TTL_SECS: i64 = 24 * 60 * 60;

const SALT_LEN: usize = 8;

/// The `(account, identity)` pair a verified token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTarget {
    pub account_id: i64,
    /// Canonical remote handle: decimal file id (opendrive) or absolute
    /// remote path (fslist).
    pub identity: String,
}

pub struct UrlSigner {
    key: Vec<u8>,
}

impl UrlSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// Mint a signed token for the given account and remote identity.
    pub fn sign(&self, account_id: i64, identity: &str) -> String {
        self.sign_at(account_id, identity, chrono::Utc::now().timestamp())
    }

    fn sign_at(&self, account_id: i64, identity: &str, now_unix: i64) -> String {
        let exp = now_unix + SIGNED_URL_TTL_SECS;

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt_b64 = URL_SAFE_NO_PAD.encode(salt);

        let mac_hex = self.compute_mac(account_id, exp, identity, &salt_b64);

        format!(
            "{}:{}:{}:{}:{}",
            URL_SAFE_NO_PAD.encode(account_id.to_string()),
            exp,
            mac_hex,
            URL_SAFE_NO_PAD.encode(identity),
            salt_b64,
        )
    }

    /// Verify a signed token and return the target it binds.
    pub fn verify(&self, token: &str) -> Result<SignedTarget, SignError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now_unix: i64) -> Result<SignedTarget, SignError> {
        let fields: Vec<&str> = token.split(':').collect();
        if fields.len() != 5 {
            return Err(SignError::Malformed);
        }

        let account_id: i64 = decode_text(fields[0])?
            .parse()
            .map_err(|_| SignError::Malformed)?;
        let exp: i64 = fields[1].parse().map_err(|_| SignError::Malformed)?;
        let provided_mac = hex::decode(fields[2]).map_err(|_| SignError::Malformed)?;
        let identity = decode_text(fields[3])?;
        let salt = URL_SAFE_NO_PAD
            .decode(fields[4])
            .map_err(|_| SignError::Malformed)?;
        if salt.len() != SALT_LEN {
            return Err(SignError::Malformed);
        }

        if now_unix > exp {
            return Err(SignError::Expired);
        }

        let message = format!("{}:{}:{}:{}", account_id, exp, identity, fields[4]);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        mac.verify_slice(&provided_mac)
            .map_err(|_| SignError::Mismatch)?;

        Ok(SignedTarget { account_id, identity })
    }

    fn compute_mac(&self, account_id: i64, exp: i64, identity: &str, salt_b64: &str) -> String {
        let message = format!("{}:{}:{}:{}", account_id, exp, identity, salt_b64);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn decode_text(field: &str) -> Result<String, SignError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(field)
        .map_err(|_| SignError::Malformed)?;
    String::from_utf8(bytes).map_err(|_| SignError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new(vec![7u8; 32])
    }

    #[test]
    fn test_round_trip() {
        let s = signer();
        let token = s.sign(3, "/show/ep01.mkv");
        let target = s.verify(&token).unwrap();
        assert_eq!(target.account_id, 3);
        assert_eq!(target.identity, "/show/ep01.mkv");
    }

    #[test]
    fn test_round_trip_numeric_identity() {
        let s = signer();
        let token = s.sign(12, "9876543210");
        let target = s.verify(&token).unwrap();
        assert_eq!(target.account_id, 12);
        assert_eq!(target.identity, "9876543210");
    }

    #[test]
    fn test_token_shape() {
        let s = signer();
        let token = s.sign_at(3, "/show/ep01.mkv", 1_700_000_000);
        let fields: Vec<&str> = token.split(':').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], (1_700_000_000 + SIGNED_URL_TTL_SECS).to_string());
        assert_eq!(fields[2].len(), 64);
        assert_eq!(fields[3], "L3Nob3cvZXAwMS5ta3Y");
    }

    #[test]
    fn test_expiry_boundary() {
        let s = signer();
        let issued = 1_700_000_000;
        let token = s.sign_at(1, "/a.mkv", issued);
        let exp = issued + SIGNED_URL_TTL_SECS;
        assert!(s.verify_at(&token, exp).is_ok());
        assert_eq!(s.verify_at(&token, exp + 1), Err(SignError::Expired));
    }

    #[test]
    fn test_tampering_each_field_rejected() {
        let s = signer();
        let token = s.sign(5, "/media/film.mkv");
        let fields: Vec<String> = token.split(':').map(String::from).collect();

        for i in 0..5 {
            let mut mutated = fields.clone();
            // '0' and '1' are valid in every field's alphabet, so the flip
            // always yields a decodable-but-different value.
            let mut chars: Vec<char> = mutated[i].chars().collect();
            chars[0] = if chars[0] == '0' { '1' } else { '0' };
            mutated[i] = chars.into_iter().collect();
            let forged = mutated.join(":");
            assert!(s.verify(&forged).is_err(), "field {} accepted", i);
        }
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        let s = signer();
        let token = s.sign(1, "/x");
        assert_eq!(
            s.verify(&format!("{}:extra", token)),
            Err(SignError::Malformed)
        );
        let truncated: Vec<&str> = token.split(':').take(4).collect();
        assert_eq!(s.verify(&truncated.join(":")), Err(SignError::Malformed));
    }

    #[test]
    fn test_wrong_salt_length_rejected() {
        let s = signer();
        let token = s.sign(1, "/x");
        let mut fields: Vec<String> = token.split(':').map(String::from).collect();
        fields[4] = URL_SAFE_NO_PAD.encode(b"toolongsalt!");
        assert_eq!(s.verify(&fields.join(":")), Err(SignError::Malformed));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = signer().sign(1, "/x");
        let other = UrlSigner::new(vec![9u8; 32]);
        assert_eq!(other.verify(&token), Err(SignError::Mismatch));
    }
}
