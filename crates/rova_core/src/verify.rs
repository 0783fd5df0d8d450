//! Integrity verification: streaming file MD5 and manifest HMAC.

use crate::error::OtaError;
use crate::manifest;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex MD5 of a file, hashed in `chunk_size` reads.
pub fn file_md5(path: &Path, chunk_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lowercase hex HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Sign a manifest value: HMAC-SHA256 over its canonical bytes with the
/// signature field removed.
pub fn manifest_signature(
    value: &serde_json::Value,
    signature_field: &str,
    key: &str,
) -> Result<String, OtaError> {
    let canonical = manifest::canonical_bytes(value, signature_field)?;
    Ok(hmac_sha256_hex(key.as_bytes(), &canonical))
}

/// Check the manifest's signature field against the shared key.
pub fn verify_manifest_signature(
    value: &serde_json::Value,
    signature_field: &str,
    key: &str,
) -> Result<(), OtaError> {
    let presented = manifest::extract_signature(value, signature_field).ok_or_else(|| {
        OtaError::ManifestSignature(format!("missing signature field {:?}", signature_field))
    })?;
    let expected = manifest_signature(value, signature_field, key)?;
    if !presented.eq_ignore_ascii_case(&expected) {
        return Err(OtaError::ManifestSignature("signature mismatch".to_string()));
    }
    debug!("manifest signature verified");
    Ok(())
}
