//! A one-request-per-connection HTTP server for exercising the download path.

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Upper bound on what an endless body writes before the server gives up.
const ENDLESS_LIMIT: usize = 64 * 1024 * 1024;

pub(crate) fn tiny_jpeg() -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Bytes(Vec<u8>),
    /// No length, keeps streaming until the client hangs up.
    Endless,
}

/// How one path answers HEAD and GET.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    path: &'static str,
    content_type: &'static str,
    head_length: Option<u64>,
    get_status: u16,
    body: Body,
}

impl Reply {
    pub(crate) fn jpeg(path: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            path,
            content_type: "image/jpeg",
            head_length: Some(bytes.len() as u64),
            get_status: 200,
            body: Body::Bytes(bytes),
        }
    }

    pub(crate) fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub(crate) fn declared(mut self, len: u64) -> Self {
        self.head_length = Some(len);
        self
    }

    pub(crate) fn undeclared_on_head(mut self) -> Self {
        self.head_length = None;
        self
    }

    pub(crate) fn get_status(mut self, status: u16) -> Self {
        self.get_status = status;
        self
    }

    pub(crate) fn body(mut self, body: Body) -> Self {
        if matches!(body, Body::Endless) {
            self.head_length = None;
        }
        self.body = body;
        self
    }
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<&'static str, Reply>> =
            Arc::new(replies.into_iter().map(|r| (r.path, r)).collect());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer(socket, routes.clone(), log.clone()));
            }
        });

        Self { addr, seen, task }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// `"<METHOD> <path>"` for every request so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    mut socket: TcpStream,
    routes: Arc<HashMap<&'static str, Reply>>,
    seen: Arc<Mutex<Vec<String>>>,
) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let mut line = request.lines().next().unwrap_or_default().split(' ');
    let method = line.next().unwrap_or_default().to_string();
    let path = line.next().unwrap_or_default().to_string();
    seen.lock().unwrap().push(format!("{method} {path}"));

    let Some(reply) = routes.get(path.as_str()) else {
        let _ = socket
            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await;
        return;
    };

    let (status, length) = match (method.as_str(), &reply.body) {
        ("HEAD", _) => (200, reply.head_length),
        (_, _) if reply.get_status != 200 => (reply.get_status, Some(0)),
        (_, Body::Bytes(bytes)) => (200, Some(bytes.len() as u64)),
        (_, Body::Endless) => (200, None),
    };
    let mut head = format!(
        "HTTP/1.1 {status} {}\r\ncontent-type: {}\r\nconnection: close\r\n",
        if status == 200 { "OK" } else { "Error" },
        reply.content_type
    );
    if let Some(len) = length {
        head.push_str(&format!("content-length: {len}\r\n"));
    }
    head.push_str("\r\n");
    if socket.write_all(head.as_bytes()).await.is_err() || method == "HEAD" || status != 200 {
        return;
    }

    match &reply.body {
        Body::Bytes(bytes) => {
            let _ = socket.write_all(bytes).await;
        }
        Body::Endless => {
            let chunk = vec![0xFF; 64 * 1024];
            let mut written = 0;
            while written < ENDLESS_LIMIT && socket.write_all(&chunk).await.is_ok() {
                written += chunk.len();
            }
        }
    }
    let _ = socket.shutdown().await;
}
