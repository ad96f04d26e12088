//! RFC 6238 time-based one-time passwords (SHA-1, 30 s step, 6 digits).

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::CloudError;

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// Code for the given Unix time.
pub fn generate(secret: &str, unix_secs: u64) -> Result<String, CloudError> {
    let key = decode_base32(secret).ok_or(CloudError::InvalidTotpKey)?;
    let counter = unix_secs / STEP_SECS;
    Ok(format!("{:0width$}", hotp(&key, counter)?, width = DIGITS as usize))
}

/// Code for the current time.
pub fn generate_now(secret: &str) -> Result<String, CloudError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    generate(secret, now)
}

fn hotp(key: &[u8], counter: u64) -> Result<u32, CloudError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| CloudError::InvalidTotpKey)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(binary % 10u32.pow(DIGITS))
}

/// RFC 4648 base32; case-insensitive, ignores spaces, dashes and padding.
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for c in input.chars() {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u32 - 'A' as u32,
            c @ '2'..='7' => c as u32 - '2' as u32 + 26,
            ' ' | '-' | '=' => continue,
            _ => return None,
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    (!out.is_empty()).then_some(out)
}
