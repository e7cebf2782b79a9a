use bytes::Bytes;
use stowage_common::{Result, StorageError};

/// The two parts of a `multipart/related` object upload body.
#[derive(Debug, Clone)]
pub struct ObjectUploadMultipart {
    pub metadata_raw: String,
    pub data_raw: Bytes,
}

/// Splits a `multipart/related` upload into its JSON metadata part and its
/// data part. Part headers are discarded.
pub fn parse_object_upload_multipart_request(
    content_type: &str,
    body: &[u8],
) -> Result<ObjectUploadMultipart> {
    let boundary = boundary_from_content_type(content_type)?;
    let parts = split_parts(body, &boundary)?;
    let [metadata, data] = parts.as_slice() else {
        return Err(StorageError::InvalidArgument(format!(
            "Unexpected number of parts in request body: expected 2, got {}",
            parts.len()
        )));
    };

    let metadata_raw = String::from_utf8(part_body(metadata).to_vec()).map_err(|_| {
        StorageError::InvalidArgument("Metadata part is not valid UTF-8".to_string())
    })?;
    Ok(ObjectUploadMultipart {
        metadata_raw,
        data_raw: Bytes::copy_from_slice(part_body(data)),
    })
}

fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case("multipart/related") {
        return Err(StorageError::InvalidArgument(format!(
            "Bad content type. Expected multipart/related, got {mime}"
        )));
    }

    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|boundary| !boundary.is_empty())
        .ok_or_else(|| {
            StorageError::InvalidArgument("Bad content type. Missing boundary".to_string())
        })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let Some(mut start) = find(body, &delimiter, 0) else {
        return Err(StorageError::InvalidArgument(
            "Request body does not contain the boundary".to_string(),
        ));
    };

    let mut parts = Vec::new();
    loop {
        let after = start + delimiter.len();
        if body[after..].starts_with(b"--") {
            return Ok(parts);
        }
        let Some(next) = find(body, &delimiter, after) else {
            return Err(StorageError::InvalidArgument(
                "Request body is missing its closing boundary".to_string(),
            ));
        };
        parts.push(&body[after..next]);
        start = next;
    }
}

fn strip_line_break_prefix(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_prefix(b"\r\n")
        .or_else(|| bytes.strip_prefix(b"\n"))
        .unwrap_or(bytes)
}

fn strip_line_break_suffix(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes)
}

/// Drops the part headers and the line break owned by the next delimiter.
fn part_body(part: &[u8]) -> &[u8] {
    let part = strip_line_break_suffix(strip_line_break_prefix(part));
    if part.starts_with(b"\r\n") || part.starts_with(b"\n") {
        return strip_line_break_prefix(part);
    }
    if let Some(pos) = find(part, b"\r\n\r\n", 0) {
        return &part[pos + 4..];
    }
    if let Some(pos) = find(part, b"\n\n", 0) {
        return &part[pos + 2..];
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_TYPE: &str = "multipart/related; boundary=b1";

    fn body(data: &[u8]) -> Vec<u8> {
        let mut body = b"--b1\r\nContent-Type: application/json\r\n\r\n{\"contentType\":\"text/plain\"}\r\n--b1\r\nContent-Type: text/plain\r\n\r\n".to_vec();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n--b1--\r\n");
        body
    }

    #[test]
    fn splits_metadata_and_data() {
        let parsed = parse_object_upload_multipart_request(CONTENT_TYPE, &body(b"hello")).unwrap();
        assert_eq!(parsed.metadata_raw, r#"{"contentType":"text/plain"}"#);
        assert_eq!(parsed.data_raw, Bytes::from_static(b"hello"));
    }

    #[test]
    fn data_keeps_inner_line_breaks() {
        let parsed =
            parse_object_upload_multipart_request(CONTENT_TYPE, &body(b"a\r\n\r\nb\n")).unwrap();
        assert_eq!(parsed.data_raw, Bytes::from_static(b"a\r\n\r\nb\n"));
    }

    #[test]
    fn quoted_boundary_is_accepted() {
        let parsed = parse_object_upload_multipart_request(
            "Multipart/Related; charset=utf-8; boundary=\"b1\"",
            &body(b"x"),
        )
        .unwrap();
        assert_eq!(parsed.data_raw, Bytes::from_static(b"x"));
    }

    #[test]
    fn rejects_wrong_content_type_and_part_count() {
        let err = parse_object_upload_multipart_request("application/json", b"{}").unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));

        let err = parse_object_upload_multipart_request("multipart/related", b"").unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));

        let single = b"--b1\r\nContent-Type: text/plain\r\n\r\nonly\r\n--b1--";
        let err = parse_object_upload_multipart_request(CONTENT_TYPE, single).unwrap_err();
        assert_eq!(err.http_status(), 400);

        let unterminated = b"--b1\r\n\r\n{}\r\n--b1\r\n\r\ndata";
        assert!(parse_object_upload_multipart_request(CONTENT_TYPE, unterminated).is_err());
    }
}
