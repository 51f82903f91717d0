//! Steam Guard code derivation.
//!
//! Steam's variant of TOTP: a 30-second window over server time, HMAC-SHA1
//! dynamic truncation, and the truncated value emitted as five base-26
//! symbols (low digit first) over an alphabet with ambiguous glyphs removed.

use crate::crypto;
use crate::error::{Error, Result};

/// The 26 symbols Steam uses for login codes. `0 1 A E I L O S U Z` are
/// omitted to avoid glyph confusion.
pub const STEAM_ALPHABET: &[u8; 26] = b"23456789BCDFGHJKMNPQRTVWXY";

const CODE_DIGITS: usize = 5;
const CODE_PERIOD_MS: i64 = 30_000;

/// Derive the 5-character login code for `server_time_ms`.
///
/// # Errors
/// Returns `Error::Crypto` if the MAC rejects the key or the timestamp is
/// before the epoch.
pub fn generate_code(secret: &[u8], server_time_ms: i64) -> Result<String> {
    let interval = u64::try_from(server_time_ms / CODE_PERIOD_MS)
        .map_err(|_| Error::Crypto("code interval before epoch".into()))?;
    code_for_interval(secret, interval)
}

/// Derive the code for an explicit 30-second interval counter.
///
/// # Errors
/// Returns `Error::Crypto` if the MAC rejects the key.
pub fn code_for_interval(secret: &[u8], interval: u64) -> Result<String> {
    let mac = crypto::hmac_sha1(secret, &interval.to_be_bytes())?;
    Ok(encode(truncate(&mac)))
}

fn truncate(mac: &[u8; 20]) -> u32 {
    let offset = (mac[19] & 0x0f) as usize;
    u32::from_be_bytes([mac[offset], mac[offset + 1], mac[offset + 2], mac[offset + 3]])
        & 0x7fff_ffff
}

fn encode(mut value: u32) -> String {
    let radix = STEAM_ALPHABET.len() as u32;
    let mut code = String::with_capacity(CODE_DIGITS);
    for _ in 0..CODE_DIGITS {
        code.push(char::from(STEAM_ALPHABET[(value % radix) as usize]));
        value /= radix;
    }
    code
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use hmac::{Hmac, Mac};
    use rand::RngCore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use sha1::Sha1;

    const BANNED: &[u8] = b"01AEILOSUZ";

    fn fixture_secret() -> Vec<u8> {
        STANDARD.decode("cnNyY3NyY3NyY3NyY3NyY3NyY3M=").unwrap()
    }

    #[test]
    fn encoder_known_answers() {
        assert_eq!(encode(0), "22222");
        assert_eq!(encode(1), "32222");
        assert_eq!(encode(25), "Y2222");
        assert_eq!(encode(26), "23222");
        assert_eq!(encode(0x7fff_ffff), "WXPBQ");
    }

    #[test]
    fn reference_vector_matches_primitive_composition() {
        let secret = fixture_secret();
        assert_eq!(secret.len(), 20);

        let t_ms: i64 = 1_234_567_890_000;
        let interval = 41_152_263_u64;
        assert_eq!(t_ms / 30_000, 41_152_263);

        // Independent derivation straight from the MAC primitive.
        let mut mac = Hmac::<Sha1>::new_from_slice(&secret).unwrap();
        mac.update(&interval.to_be_bytes());
        let digest: [u8; 20] = mac.finalize().into_bytes().into();
        let offset = (digest[19] & 0x0f) as usize;
        let expected_truncated = u32::from_be_bytes([
            digest[offset],
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]) & 0x7fff_ffff;

        assert_eq!(truncate(&digest), expected_truncated);
        assert_eq!(generate_code(&secret, t_ms).unwrap(), encode(expected_truncated));
        assert_eq!(
            code_for_interval(&secret, interval).unwrap(),
            generate_code(&secret, t_ms).unwrap()
        );
    }

    #[test]
    fn code_is_stable_within_a_window() {
        let secret = fixture_secret();
        let t_ms: i64 = 1_234_567_890_000;
        let code = generate_code(&secret, t_ms).unwrap();
        assert_eq!(generate_code(&secret, t_ms + 29_999).unwrap(), code);
        assert_eq!(generate_code(&secret, t_ms + 30_000 - 1).unwrap(), code);
    }

    #[test]
    fn codes_are_little_endian_base26_of_truncation() {
        let secret = fixture_secret();
        for interval in [0_u64, 1, 41_152_263, u64::from(u32::MAX)] {
            let mac = crate::crypto::hmac_sha1(&secret, &interval.to_be_bytes()).unwrap();
            let mut value = truncate(&mac);
            let code = code_for_interval(&secret, interval).unwrap();
            for ch in code.chars() {
                assert_eq!(ch, char::from(STEAM_ALPHABET[(value % 26) as usize]));
                value /= 26;
            }
        }
    }

    #[test]
    fn alphabet_is_exhaustively_respected() {
        let mut rng = StdRng::seed_from_u64(0x5745_414d);
        let mut key = [0_u8; 20];
        rng.fill_bytes(&mut key);

        for _ in 0..10_000 {
            let interval = rng.next_u64() >> 1;
            let code = code_for_interval(&key, interval).unwrap();
            assert_eq!(code.len(), 5);
            for byte in code.bytes() {
                assert!(STEAM_ALPHABET.contains(&byte), "unexpected symbol {byte:#x}");
                assert!(!BANNED.contains(&byte));
            }
        }
    }
}
