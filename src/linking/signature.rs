//! EOSIO K1 key and signature handling.
//!
//! Keys are compressed secp256k1 points, base58 encoded with a 4-byte
//! RIPEMD-160 checksum. Two textual forms are accepted:
//!
//! - legacy `EOS…`: checksum over the key bytes alone
//! - `PUB_K1_…`: checksum over the key bytes followed by `"K1"`
//!
//! Signatures are `SIG_K1_…`: a recovery byte, `r`, `s`, and a checksum over
//! the 65 signature bytes followed by `"K1"`. The signed digest is
//! `SHA-256(message)`.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

const LEGACY_KEY_PREFIX: &str = "EOS";
const K1_KEY_PREFIX: &str = "PUB_K1_";
const K1_SIG_PREFIX: &str = "SIG_K1_";
const K1_SUFFIX: &[u8] = b"K1";
const COMPRESSED_KEY_LEN: usize = 33;
const SIGNATURE_LEN: usize = 65;
const CHECKSUM_LEN: usize = 4;
// 27 + 4 (compressed) is added to the recovery id.
const RECOVERY_OFFSET: u8 = 31;

/// Checks a signature over a challenge string against a public identity.
pub trait SignatureVerifier: Send + Sync {
    /// `true` only when `signature` is a valid signature of `message` by the
    /// key `public_key`. Malformed input is "not verified", never an error.
    fn verify(&self, signature: &str, message: &str, public_key: &str) -> bool;
}

/// Verifier for EOSIO-style secp256k1 (`K1`) keys and signatures.
#[derive(Debug, Default, Clone, Copy)]
pub struct EosioK1Verifier;

impl SignatureVerifier for EosioK1Verifier {
    fn verify(&self, signature: &str, message: &str, public_key: &str) -> bool {
        match verify_k1(signature, message, public_key) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Signature rejected");
                false
            }
        }
    }
}

fn verify_k1(signature: &str, message: &str, public_key: &str) -> Result<(), String> {
    let expected = parse_public_key(public_key)?;
    let (sig, recovery_id) = parse_signature(signature)?;
    let prehash = message_digest(message);
    let recovered = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| format!("failed recovering signer from signature: {e}"))?;
    if recovered != expected {
        return Err("signature does not match public key".to_string());
    }
    Ok(())
}

/// SHA-256 of the message bytes.
pub fn message_digest(message: &str) -> [u8; 32] {
    Sha256::digest(message.as_bytes()).into()
}

fn checksum(data: &[u8], suffix: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(suffix);
    let digest = hasher.finalize();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn decode_checked(body: &str, payload_len: usize, suffix: &[u8]) -> Result<Vec<u8>, String> {
    let raw = bs58::decode(body)
        .into_vec()
        .map_err(|e| format!("invalid base58: {e}"))?;
    if raw.len() != payload_len + CHECKSUM_LEN {
        return Err(format!(
            "expected {} bytes, got {}",
            payload_len + CHECKSUM_LEN,
            raw.len()
        ));
    }
    let (payload, check) = raw.split_at(payload_len);
    if checksum(payload, suffix) != check {
        return Err("checksum mismatch".to_string());
    }
    Ok(payload.to_vec())
}

fn encode_checked(payload: &[u8], suffix: &[u8]) -> String {
    let mut raw = payload.to_vec();
    raw.extend_from_slice(&checksum(payload, suffix));
    bs58::encode(raw).into_string()
}

/// Parse a public key in `PUB_K1_…` or legacy `EOS…` form.
pub fn parse_public_key(value: &str) -> Result<VerifyingKey, String> {
    let value = value.trim();
    let bytes = if let Some(body) = value.strip_prefix(K1_KEY_PREFIX) {
        decode_checked(body, COMPRESSED_KEY_LEN, K1_SUFFIX)?
    } else if let Some(body) = value.strip_prefix(LEGACY_KEY_PREFIX) {
        decode_checked(body, COMPRESSED_KEY_LEN, &[])?
    } else {
        return Err("unsupported public key format".to_string());
    };
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| format!("invalid secp256k1 point: {e}"))
}

/// Encode a key as `PUB_K1_…`.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(true);
    format!("{K1_KEY_PREFIX}{}", encode_checked(point.as_bytes(), K1_SUFFIX))
}

/// Encode a key in the legacy `EOS…` form.
pub fn encode_legacy_public_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(true);
    format!("{LEGACY_KEY_PREFIX}{}", encode_checked(point.as_bytes(), &[]))
}

/// Parse a `SIG_K1_…` signature into its ECDSA parts.
pub fn parse_signature(value: &str) -> Result<(Signature, RecoveryId), String> {
    let body = value
        .trim()
        .strip_prefix(K1_SIG_PREFIX)
        .ok_or_else(|| "unsupported signature format".to_string())?;
    let bytes = decode_checked(body, SIGNATURE_LEN, K1_SUFFIX)?;

    let recovery_byte = bytes[0]
        .checked_sub(RECOVERY_OFFSET)
        .or_else(|| bytes[0].checked_sub(27))
        .filter(|id| *id < 4)
        .ok_or_else(|| format!("invalid recovery byte {}", bytes[0]))?;
    let mut recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| "signature recovery id is invalid".to_string())?;

    let mut sig = Signature::from_slice(&bytes[1..])
        .map_err(|e| format!("invalid ECDSA signature bytes: {e}"))?;
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }
    Ok((sig, recovery_id))
}

/// Encode a signature as `SIG_K1_…`.
pub fn encode_signature(sig: &Signature, recovery_id: RecoveryId) -> String {
    let mut bytes = Vec::with_capacity(SIGNATURE_LEN);
    bytes.push(recovery_id.to_byte() + RECOVERY_OFFSET);
    bytes.extend_from_slice(&sig.to_bytes());
    format!("{K1_SIG_PREFIX}{}", encode_checked(&bytes, K1_SUFFIX))
}

/// Sign `message` the way a wallet answers a linking challenge.
pub fn sign_message(key: &SigningKey, message: &str) -> Result<String, String> {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&message_digest(message))
        .map_err(|e| format!("signing failed: {e}"))?;
    Ok(encode_signature(&sig, recovery_id))
}
