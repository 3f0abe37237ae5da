//! Download response construction: HTTP ranges, conditional requests, and
//! the XSS-safe header set.

use crate::errors::{Error, Result};
use crate::models::FileInstance;
use crate::storage::{ByteRange, StorageBackend};
use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;

/// MIME types a browser may interpret actively; served as attachments when
/// the content is not trusted.
const RISKY_MIMETYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "image/svg+xml",
    "application/javascript",
    "text/javascript",
    "text/xml",
    "application/xml",
];

/// How to present the blob to the client.
#[derive(Debug)]
pub struct SendFileOptions<'a> {
    pub filename: &'a str,
    pub mimetype: Option<&'a str>,
    /// Restricted responses are not publicly cacheable.
    pub restricted: bool,
    pub as_attachment: bool,
    /// Untrusted content of a risky MIME type is forced into an attachment.
    pub trusted: bool,
    /// Build headers only (HEAD requests).
    pub head_only: bool,
}

/// A parsed single byte range, already clamped against the blob size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    Full,
    Partial { offset: u64, length: u64 },
    Unsatisfiable,
}

/// Parse a `Range: bytes=…` header against a blob of `size` bytes. Only
/// single ranges are supported; multi-range requests fall back to the full
/// body.
pub fn parse_range(header: &str, size: u64) -> RangeOutcome {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };

    match (start.trim(), end.trim()) {
        // Suffix range: last N bytes.
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => RangeOutcome::Unsatisfiable,
            Ok(n) => {
                let length = n.min(size);
                RangeOutcome::Partial {
                    offset: size - length,
                    length,
                }
            }
            Err(_) => RangeOutcome::Full,
        },
        (start, end) => {
            let Ok(start) = start.parse::<u64>() else {
                return RangeOutcome::Full;
            };
            if start >= size {
                return RangeOutcome::Unsatisfiable;
            }
            let end = match end {
                "" => size - 1,
                raw => match raw.parse::<u64>() {
                    Ok(e) => e.min(size - 1),
                    Err(_) => return RangeOutcome::Full,
                },
            };
            if end < start {
                return RangeOutcome::Unsatisfiable;
            }
            RangeOutcome::Partial {
                offset: start,
                length: end - start + 1,
            }
        }
    }
}

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Content-Disposition with an ASCII fallback plus RFC 5987 `filename*`.
fn content_disposition(kind: &str, filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if ascii == filename {
        format!("{kind}; filename=\"{ascii}\"")
    } else {
        format!(
            "{kind}; filename=\"{ascii}\"; filename*=UTF-8''{}",
            urlencoding::encode(filename)
        )
    }
}

/// Build the download (or HEAD) response for a readable file instance.
///
/// Headers follow the hardened profile: ETag from the stored checksum,
/// Content-MD5 when the digest algorithm is md5, restrictive CSP and
/// sniffing protections, and a Content-Disposition that never lets risky
/// untrusted content render inline.
pub async fn send_file(
    backend: &dyn StorageBackend,
    file: &FileInstance,
    opts: SendFileOptions<'_>,
    request_headers: &HeaderMap,
) -> Result<Response> {
    let size = file.size;
    let checksum = file
        .checksum
        .as_ref()
        .ok_or_else(|| Error::InvalidOperation("File has no checksum yet.".to_string()))?;
    let etag = format!("\"{}\"", checksum.as_str());

    // Conditional GET: short-circuit when the client already holds this
    // exact content.
    if let Some(if_none_match) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match
            .split(',')
            .any(|candidate| candidate.trim() == etag || candidate.trim() == "*")
        {
            let mut response = Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .map_err(|e| Error::Storage(crate::storage::StorageError::Other(e.to_string())))?;
            response.headers_mut().insert(header::ETAG, hval(&etag));
            return Ok(response);
        }
    }

    // Range handling; If-Range with a different validator disables it.
    let mut range = request_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|raw| parse_range(raw, size))
        .unwrap_or(RangeOutcome::Full);
    if let Some(if_range) = request_headers
        .get(header::IF_RANGE)
        .and_then(|v| v.to_str().ok())
    {
        if if_range.trim() != etag {
            range = RangeOutcome::Full;
        }
    }

    if let RangeOutcome::Unsatisfiable = range {
        let mut response = Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .body(Body::empty())
            .map_err(|e| Error::Storage(crate::storage::StorageError::Other(e.to_string())))?;
        response
            .headers_mut()
            .insert(header::CONTENT_RANGE, hval(&format!("bytes */{size}")));
        return Ok(response);
    }

    let mimetype = opts
        .mimetype
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(opts.filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
    let risky = RISKY_MIMETYPES.contains(&mimetype.as_str());
    let as_attachment = opts.as_attachment || (!opts.trusted && risky);

    let (status, offset, length) = match range {
        RangeOutcome::Full => (StatusCode::OK, 0, size),
        RangeOutcome::Partial { offset, length } => (StatusCode::PARTIAL_CONTENT, offset, length),
        RangeOutcome::Unsatisfiable => unreachable!(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, hval(&length.to_string()));
    headers.insert(header::CONTENT_TYPE, hval(&mimetype));
    headers.insert(header::ETAG, hval(&etag));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if checksum.algo() == "md5" {
        headers.insert("content-md5", hval(checksum.hex_digest()));
    }
    headers.insert(
        header::LAST_MODIFIED,
        hval(&file.updated.format("%a, %d %b %Y %H:%M:%S GMT").to_string()),
    );
    if status == StatusCode::PARTIAL_CONTENT {
        headers.insert(
            header::CONTENT_RANGE,
            hval(&format!("bytes {}-{}/{}", offset, offset + length - 1, size)),
        );
    }
    if !opts.restricted {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600"),
        );
    }

    // Hardening headers for user-supplied content.
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-download-options", HeaderValue::from_static("noopen"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        hval(&content_disposition(
            if as_attachment { "attachment" } else { "inline" },
            opts.filename,
        )),
    );

    let body = if opts.head_only {
        Body::empty()
    } else {
        let stream = backend
            .open(match range {
                RangeOutcome::Partial { offset, length } => Some(ByteRange { offset, length }),
                _ => None,
            })
            .await
            .map_err(Error::from)?;
        Body::from_stream(stream)
    };

    let mut response = Response::builder()
        .status(status)
        .body(body)
        .map_err(|e| Error::Storage(crate::storage::StorageError::Other(e.to_string())))?;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_basic() {
        assert_eq!(
            parse_range("bytes=0-4", 10),
            RangeOutcome::Partial {
                offset: 0,
                length: 5
            }
        );
        assert_eq!(
            parse_range("bytes=5-", 10),
            RangeOutcome::Partial {
                offset: 5,
                length: 5
            }
        );
        assert_eq!(
            parse_range("bytes=-3", 10),
            RangeOutcome::Partial {
                offset: 7,
                length: 3
            }
        );
    }

    #[test]
    fn test_parse_range_clamps_end() {
        assert_eq!(
            parse_range("bytes=4-999", 10),
            RangeOutcome::Partial {
                offset: 4,
                length: 6
            }
        );
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert_eq!(parse_range("bytes=10-", 10), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=7-3", 10), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 10), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_ignores_exotic_forms() {
        assert_eq!(parse_range("bytes=0-1,3-4", 10), RangeOutcome::Full);
        assert_eq!(parse_range("items=0-4", 10), RangeOutcome::Full);
        assert_eq!(parse_range("bytes=abc-def", 10), RangeOutcome::Full);
    }

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("inline", "report.pdf"),
            "inline; filename=\"report.pdf\""
        );
    }

    #[test]
    fn test_content_disposition_unicode_gets_rfc5987() {
        let value = content_disposition("attachment", "r\u{e9}sum\u{e9}.pdf");
        assert!(value.starts_with("attachment; filename=\"r_sum_.pdf\""));
        assert!(value.contains("filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"));
    }

    #[test]
    fn test_content_disposition_escapes_quotes() {
        let value = content_disposition("inline", "a\"b.txt");
        assert!(!value.contains("a\"b"));
    }
}
