//! Crypto primitives for the Steam mobile flow: RSA password wrapping,
//! HMAC-SHA1 for code derivation, and device-identifier generation.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// RSA PKCS#1 v1.5 encrypt `plaintext` under the public key Steam hands out
/// as big-endian hex `(modulus, exponent)`.
///
/// # Errors
/// Returns `Error::Crypto` if either hex string is malformed, the key is
/// rejected, or the plaintext does not fit the modulus.
pub fn rsa_encrypt_pkcs1(modulus_hex: &str, exponent_hex: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let modulus = BigUint::parse_bytes(modulus_hex.trim().as_bytes(), 16)
        .ok_or_else(|| Error::Crypto("malformed RSA modulus hex".into()))?;
    let exponent = BigUint::parse_bytes(exponent_hex.trim().as_bytes(), 16)
        .ok_or_else(|| Error::Crypto("malformed RSA exponent hex".into()))?;
    let key = RsaPublicKey::new(modulus, exponent)
        .map_err(|e| Error::Crypto(format!("invalid RSA public key: {e}")))?;
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| Error::Crypto(format!("RSA encryption failed: {e}")))
}

/// # Errors
/// Returns `Error::Crypto` if the key is rejected by the MAC.
pub fn hmac_sha1(key: &[u8], msg: &[u8]) -> Result<[u8; 20]> {
    let mut mac =
        HmacSha1::new_from_slice(key).map_err(|e| Error::Crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().into())
}

#[must_use]
pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// # Errors
/// Returns `Error::Crypto` if the OS RNG is unavailable.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::Crypto(format!("rng unavailable: {e}")))?;
    Ok(buf)
}

/// Build the per-install device identifier registered with Steam:
/// `"android:" + lowercase_hex(sha1(4 random bytes))`.
///
/// # Errors
/// Returns `Error::Crypto` if the OS RNG is unavailable.
pub fn build_device_id() -> Result<String> {
    let seed = random_bytes::<4>()?;
    Ok(format!("android:{}", hex::encode(sha1(&seed))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::traits::PublicKeyParts;
    use std::collections::HashSet;

    #[test]
    fn sha1_known_answer() {
        assert_eq!(
            hex::encode(sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn hmac_sha1_rfc2202_case_1() {
        let key = [0x0b_u8; 20];
        let mac = hmac_sha1(&key, b"Hi There").unwrap();
        assert_eq!(
            hex::encode(mac),
            "b617318655057264e28bc0b6fb378c8ef146be00"
        );
    }

    #[test]
    fn rsa_encrypt_round_trips_against_private_key() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public_key = private_key.to_public_key();
        let modulus_hex = public_key.n().to_str_radix(16);
        let exponent_hex = public_key.e().to_str_radix(16);

        let ciphertext = rsa_encrypt_pkcs1(&modulus_hex, &exponent_hex, b"hunter2").unwrap();
        let plaintext = private_key.decrypt(Pkcs1v15Encrypt, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn rsa_encrypt_rejects_malformed_hex() {
        let err = rsa_encrypt_pkcs1("not-hex", "010001", b"x").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn device_id_shape() {
        let id = build_device_id().unwrap();
        let hex_part = id.strip_prefix("android:").expect("android: prefix");
        assert_eq!(hex_part.len(), 40);
        assert!(
            hex_part
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
    }

    #[test]
    fn device_ids_are_distinct() {
        // The identifier only carries 4 bytes of entropy, so keep the sample
        // count well below the birthday bound.
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            assert!(seen.insert(build_device_id().unwrap()));
        }
    }
}
