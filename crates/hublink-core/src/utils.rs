//! Small helpers shared by the protocol and the front ends.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use rand::Rng;
use rand::distributions::Alphanumeric;

const SIZE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Random id of `length` characters from `[0-9A-Za-z]`.
pub fn random_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Standard base64 of the UTF-8 bytes of `data`.
pub fn encode_base64(data: &str) -> String {
    BASE64_STANDARD.encode(data.as_bytes())
}

/// Base64 of raw bytes.
pub fn encode_base64_bytes(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

/// Decode standard base64 into text. Invalid UTF-8 is replaced, not rejected.
pub fn decode_base64(data: &str) -> Result<String, base64::DecodeError> {
    let bytes = BASE64_STANDARD.decode(data.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Most decimal places `format_filesize` honours; f64 has no more to give.
const MAX_SIZE_DECIMALS: u32 = 20;

/// Human readable size using 1024 steps, e.g. `1.5 KB`.
///
/// The value is rounded to `decimals` places and trailing zeros dropped.
pub fn format_filesize(bytes: u128, decimals: u32) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut unit = 0;
    let mut scale: u128 = 1;
    while unit + 1 < SIZE_UNITS.len() && bytes >= scale * 1024 {
        scale *= 1024;
        unit += 1;
    }

    let factor = 10f64.powi(decimals.min(MAX_SIZE_DECIMALS) as i32);
    let value = ((bytes as f64 / scale as f64) * factor).round() / factor;
    format!("{} {}", value, SIZE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_empty() {
        assert_eq!(random_id(0), "");
    }

    #[test]
    fn test_random_id_charset_and_length() {
        for length in 1..10 {
            let id = random_id(length);
            assert_eq!(id.len(), length);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("").unwrap(), "");
        assert_eq!(decode_base64("VGhpcyBpcyBhIHRlc3Q=").unwrap(), "This is a test");
        assert_eq!(
            decode_base64("VDNzdCB3MXRoIG51bThlcjUgJiBjaDZyYWN0M3JzISE=").unwrap(),
            "T3st w1th num8er5 & ch6ract3rs!!"
        );
        assert!(decode_base64("not base64!").is_err());
    }

    #[test]
    fn test_encode_base64() {
        assert_eq!(encode_base64(""), "");
        assert_eq!(encode_base64("A simple test :)"), "QSBzaW1wbGUgdGVzdCA6KQ==");
        assert_eq!(encode_base64("Program 3"), "UHJvZ3JhbSAz");
    }

    #[test]
    fn test_base64_roundtrip_multibyte() {
        for text in ["", "ascii", "héllo wörld", "日本語のテキスト", "🤖 robot"] {
            assert_eq!(decode_base64(&encode_base64(text)).unwrap(), text);
        }
        let encoded = "w6kgw6A=";
        assert_eq!(encode_base64(&decode_base64(encoded).unwrap()), encoded);
    }

    #[test]
    fn test_format_filesize() {
        assert_eq!(format_filesize(0, 2), "0 B");
        assert_eq!(format_filesize(54, 2), "54 B");
        assert_eq!(format_filesize(1024, 2), "1 KB");
        assert_eq!(format_filesize(1536, 2), "1.5 KB");
        let expected = ["1 KB", "1 MB", "1 GB", "1 TB", "1 PB", "1 EB", "1 ZB", "1 YB"];
        for (power, want) in (1..=8u32).zip(expected) {
            assert_eq!(format_filesize(1024u128.pow(power), 2), want);
        }
    }

    #[test]
    fn test_format_filesize_decimals() {
        assert_eq!(format_filesize(1500, 0), "1 KB");
        assert_eq!(format_filesize(1100, 1), "1.1 KB");
    }

    #[test]
    fn test_format_filesize_huge_decimals() {
        assert_eq!(format_filesize(1536, u32::MAX), "1.5 KB");
        assert_eq!(format_filesize(1536, 1000), "1.5 KB");
    }
}
