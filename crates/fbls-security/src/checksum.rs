use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

pub fn sha256_reader_hex<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed reading payload for sha256")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Returns the actual digest when it differs from `expected_hex`.
pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<Option<String>> {
    let file = File::open(path)
        .with_context(|| format!("failed opening {} for sha256", path.display()))?;
    let actual = sha256_reader_hex(BufReader::new(file))
        .with_context(|| format!("failed hashing {}", path.display()))?;
    if actual.eq_ignore_ascii_case(expected_hex.trim()) {
        return Ok(None);
    }
    Ok(Some(actual))
}

/// Reads a `sha256sum`-style file: the first token of the first non-empty line.
pub fn parse_checksum_file(content: &str) -> Option<String> {
    let token = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .split_whitespace()
        .next()?;
    if token.len() != 64 || !token.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sha256_of_empty_payload_matches_known_digest() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
        assert_eq!(
            sha256_reader_hex(&b""[..]).expect("hashing must succeed"),
            EMPTY_SHA256
        );
    }

    #[test]
    fn reader_digest_matches_slice_digest() {
        let payload = vec![7_u8; 200_000];
        assert_eq!(
            sha256_reader_hex(payload.as_slice()).expect("hashing must succeed"),
            sha256_hex(&payload)
        );
    }

    #[test]
    fn parse_checksum_file_accepts_sha256sum_output() {
        let content = format!("\n{}  server.tar.gz\n", EMPTY_SHA256.to_ascii_uppercase());
        assert_eq!(
            parse_checksum_file(&content).as_deref(),
            Some(EMPTY_SHA256)
        );
    }

    #[test]
    fn parse_checksum_file_rejects_garbage() {
        assert_eq!(parse_checksum_file(""), None);
        assert_eq!(parse_checksum_file("not-a-digest server.tar.gz"), None);
        assert_eq!(parse_checksum_file("abc123"), None);
    }

    #[test]
    fn verify_sha256_file_reports_actual_digest_on_mismatch() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("fbls-security-test-{nanos}.bin"));
        std::fs::write(&path, b"").expect("must write fixture");

        assert_eq!(
            verify_sha256_file(&path, EMPTY_SHA256).expect("verification must complete"),
            None
        );
        let mismatch = verify_sha256_file(&path, &"0".repeat(64))
            .expect("verification must complete");
        assert_eq!(mismatch.as_deref(), Some(EMPTY_SHA256));

        let _ = std::fs::remove_file(&path);
    }
}
