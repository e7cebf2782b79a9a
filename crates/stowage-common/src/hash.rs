use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use md5::{Digest, Md5};
use sha2::Sha256;

/// CRC32C (Castagnoli) of `bytes`.
pub fn crc32c(bytes: &[u8]) -> u32 {
    ::crc32c::crc32c(bytes)
}

/// Base64 of the big-endian checksum, the form cloud clients compare against.
pub fn crc32c_to_base64(crc: u32) -> String {
    BASE64_STANDARD.encode(crc.to_be_bytes())
}

pub fn md5_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(bytes))
}

pub fn etag(generation: i64, metageneration: i64) -> String {
    let digest = Sha256::digest(format!("{generation}/{metageneration}").as_bytes());
    let encoded = BASE64_STANDARD.encode(digest);
    encoded.trim_end_matches('=').to_string()
}
