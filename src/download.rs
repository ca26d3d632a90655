//! Image probing, filtering and verification.

use std::fmt;

use image::ImageFormat;
use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Response;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::request::HttpClient;
use crate::Result;

/// 1 MiB.
pub const MAX_IMAGE_BYTES: u64 = 1024 * 1024;

/// What the HEAD probe told us about a url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub content_type: String,
    pub declared_len: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotJpeg(String),
    TooLarge(u64),
    BadStatus(u16),
    Undecodable(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotJpeg(ct) => write!(f, "not a jpeg (content type {ct:?})"),
            Rejection::TooLarge(len) => write!(
                f,
                "larger than 1MB ({:.2}MB)",
                *len as f64 / MAX_IMAGE_BYTES as f64
            ),
            Rejection::BadStatus(status) => write!(f, "status {status}"),
            Rejection::Undecodable(e) => write!(f, "payload is not a jpeg: {e}"),
        }
    }
}

#[derive(Debug)]
pub enum Download {
    Accepted(Vec<u8>),
    Rejected(Rejection),
}

/// Type and declared size checks. Anything over the ceiling is rejected whatever its type.
pub fn check_candidate(candidate: &ImageCandidate) -> std::result::Result<(), Rejection> {
    if let Some(len) = candidate.declared_len {
        if len > MAX_IMAGE_BYTES {
            return Err(Rejection::TooLarge(len));
        }
    }
    let content_type = candidate.content_type.to_lowercase();
    if !content_type.contains("jpeg") && !content_type.contains("jpg") {
        return Err(Rejection::NotJpeg(candidate.content_type.clone()));
    }
    Ok(())
}

/// Actual size and format checks on the fetched payload.
pub fn verify_payload(bytes: &[u8]) -> std::result::Result<(), Rejection> {
    let len = bytes.len() as u64;
    if len > MAX_IMAGE_BYTES {
        return Err(Rejection::TooLarge(len));
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => {}
        Ok(other) => return Err(Rejection::NotJpeg(format!("{other:?}"))),
        Err(e) => return Err(Rejection::Undecodable(e.to_string())),
    }
    image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map(|_| ())
        .map_err(|e| Rejection::Undecodable(e.to_string()))
}

/// HEAD the url and record content type and declared length.
pub async fn probe(http: &HttpClient, url: &str) -> Result<ImageCandidate> {
    let res = http.head(url).await?;
    let header = |name: HeaderName| {
        res.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    // HEAD bodies are empty, so read the declared length from the header itself.
    Ok(ImageCandidate {
        url: url.to_string(),
        content_type: header(CONTENT_TYPE).unwrap_or_default(),
        declared_len: header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
    })
}

/// Reads the body chunk by chunk and gives up as soon as it passes the ceiling.
async fn read_capped(mut res: Response) -> Result<std::result::Result<Vec<u8>, Rejection>> {
    let declared = res.content_length();
    if let Some(len) = declared.filter(|len| *len > MAX_IMAGE_BYTES) {
        return Ok(Err(Rejection::TooLarge(len)));
    }
    let mut body = Vec::with_capacity(declared.unwrap_or(0) as usize);
    while let Some(chunk) = res.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() as u64 > MAX_IMAGE_BYTES {
            return Ok(Err(Rejection::TooLarge(body.len() as u64)));
        }
    }
    Ok(Ok(body))
}

fn reject(url: &str, rejection: Rejection) -> Download {
    info!(url, %rejection, "skipping image");
    Download::Rejected(rejection)
}

/// Probe, filter, fetch and verify one image. Rejections are values, only transport failures are errors.
pub async fn fetch_jpeg(http: &HttpClient, url: &str) -> Result<Download> {
    let candidate = probe(http, url).await?;
    debug!(?candidate, "probed image");
    if let Err(rejection) = check_candidate(&candidate) {
        return Ok(reject(url, rejection));
    }

    let res = match http.get(url).await {
        Ok(res) => res,
        Err(crate::Error::HttpStatus { status, .. }) => {
            return Ok(reject(url, Rejection::BadStatus(status.as_u16())));
        }
        Err(e) => return Err(e),
    };
    let bytes = match read_capped(res).await? {
        Ok(bytes) => bytes,
        Err(rejection) => return Ok(reject(url, rejection)),
    };

    let (bytes, verdict) = spawn_blocking(move || {
        let verdict = verify_payload(&bytes);
        (bytes, verdict)
    })
    .await?;

    Ok(match verdict {
        Ok(()) => Download::Accepted(bytes),
        Err(rejection) => reject(url, rejection),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tiny_jpeg, Body, Reply, TestServer};

    fn candidate(content_type: &str, len: Option<u64>) -> ImageCandidate {
        ImageCandidate {
            url: "https://a.com/x.jpg".into(),
            content_type: content_type.into(),
            declared_len: len,
        }
    }

    #[test]
    fn accepts_small_jpeg_candidates() {
        assert_eq!(check_candidate(&candidate("image/jpeg", Some(2048))), Ok(()));
        assert_eq!(check_candidate(&candidate("IMAGE/JPG", None)), Ok(()));
        assert_eq!(
            check_candidate(&candidate("image/jpeg", Some(MAX_IMAGE_BYTES))),
            Ok(())
        );
    }

    #[test]
    fn oversize_always_rejected() {
        for ct in ["image/jpeg", "image/png", ""] {
            assert_eq!(
                check_candidate(&candidate(ct, Some(MAX_IMAGE_BYTES + 1))),
                Err(Rejection::TooLarge(MAX_IMAGE_BYTES + 1))
            );
        }
        let big = vec![0xFF; MAX_IMAGE_BYTES as usize + 1];
        assert_eq!(
            verify_payload(&big),
            Err(Rejection::TooLarge(MAX_IMAGE_BYTES + 1))
        );
    }

    #[test]
    fn non_jpeg_types_rejected() {
        for ct in ["image/png", "image/gif", "text/html", ""] {
            assert!(matches!(
                check_candidate(&candidate(ct, Some(10))),
                Err(Rejection::NotJpeg(_))
            ));
        }
    }

    #[test]
    fn verifies_real_jpeg_payload() {
        assert_eq!(verify_payload(&tiny_jpeg()), Ok(()));
    }

    #[test]
    fn mislabeled_payload_rejected() {
        let png_magic = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert!(matches!(verify_payload(png_magic), Err(Rejection::NotJpeg(_))));
        assert!(matches!(
            verify_payload(b"<html>nope</html>"),
            Err(Rejection::Undecodable(_))
        ));
        // Right magic, truncated body.
        let truncated = &tiny_jpeg()[..12];
        assert!(matches!(verify_payload(truncated), Err(Rejection::Undecodable(_))));
    }

    fn client() -> HttpClient {
        HttpClient::new("https://jandan.net/").unwrap()
    }

    #[tokio::test]
    async fn accepts_a_real_jpeg() {
        let server = TestServer::start(vec![Reply::jpeg("/ok.jpg", tiny_jpeg())]).await;

        let download = fetch_jpeg(&client(), &server.url("/ok.jpg")).await.unwrap();

        assert!(matches!(download, Download::Accepted(bytes) if bytes == tiny_jpeg()));
        assert_eq!(server.requests(), ["HEAD /ok.jpg", "GET /ok.jpg"]);
    }

    #[tokio::test]
    async fn head_rejection_skips_the_download() {
        let server = TestServer::start(vec![
            Reply::jpeg("/a.png", tiny_jpeg()).content_type("image/png"),
            Reply::jpeg("/big.jpg", tiny_jpeg()).declared(MAX_IMAGE_BYTES + 1),
        ])
        .await;
        let http = client();

        let png = fetch_jpeg(&http, &server.url("/a.png")).await.unwrap();
        let big = fetch_jpeg(&http, &server.url("/big.jpg")).await.unwrap();

        assert!(matches!(png, Download::Rejected(Rejection::NotJpeg(_))));
        assert!(matches!(
            big,
            Download::Rejected(Rejection::TooLarge(len)) if len == MAX_IMAGE_BYTES + 1
        ));
        assert_eq!(server.requests(), ["HEAD /a.png", "HEAD /big.jpg"]);
    }

    #[tokio::test]
    async fn failed_get_is_a_bad_status() {
        let server = TestServer::start(vec![Reply::jpeg("/gone.jpg", tiny_jpeg()).get_status(404)]).await;

        let download = fetch_jpeg(&client(), &server.url("/gone.jpg")).await.unwrap();

        assert!(matches!(download, Download::Rejected(Rejection::BadStatus(404))));
    }

    #[tokio::test]
    async fn mislabeled_payload_rejected_after_download() {
        let page = b"<html>not an image</html>".to_vec();
        let server = TestServer::start(vec![Reply::jpeg("/fake.jpg", page)]).await;

        let download = fetch_jpeg(&client(), &server.url("/fake.jpg")).await.unwrap();

        assert!(matches!(download, Download::Rejected(Rejection::Undecodable(_))));
        assert_eq!(server.requests(), ["HEAD /fake.jpg", "GET /fake.jpg"]);
    }

    #[tokio::test]
    async fn undeclared_endless_body_is_cut_off() {
        let server = TestServer::start(vec![Reply::jpeg("/endless.jpg", Vec::new()).body(Body::Endless)]).await;

        let download = fetch_jpeg(&client(), &server.url("/endless.jpg")).await.unwrap();

        match download {
            Download::Rejected(Rejection::TooLarge(read)) => {
                assert!(read > MAX_IMAGE_BYTES);
                assert!(read < 2 * MAX_IMAGE_BYTES, "read {read} bytes");
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_get_length_rejected_before_reading() {
        let server = TestServer::start(vec![
            Reply::jpeg("/liar.jpg", vec![0xFF; MAX_IMAGE_BYTES as usize + 10]).undeclared_on_head(),
        ])
        .await;

        let download = fetch_jpeg(&client(), &server.url("/liar.jpg")).await.unwrap();

        assert!(matches!(
            download,
            Download::Rejected(Rejection::TooLarge(len)) if len == MAX_IMAGE_BYTES + 10
        ));
    }
}
