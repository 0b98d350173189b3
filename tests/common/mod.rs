//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use embedmail::config::{EmbedOptions, TranscodeOptions};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Options for a test run: media under `dir/media`, no GIF conversion, no bar.
pub fn options(dir: &Path) -> EmbedOptions {
    EmbedOptions {
        media_dir: dir.join("media"),
        concurrency: 3,
        fetch_timeout: Duration::from_secs(10),
        transcode: TranscodeOptions {
            enabled: false,
            ffmpeg: PathBuf::from("ffmpeg"),
            gif_threshold: 300 * 1024,
            timeout: Duration::from_secs(10),
        },
        progress_bar: false,
        ..EmbedOptions::default()
    }
}

/// Single-part HTML message with optional extra headers.
pub fn html_message(html: &str, extra_headers: &[(&str, &str)]) -> String {
    let extra: String = extra_headers
        .iter()
        .map(|(k, v)| format!("{k}: {v}\r\n"))
        .collect();
    format!(
        "From: Alice <alice@example.com>\r\n\
         To: bob@example.com\r\n\
         Subject: Newsletter\r\n\
         Date: Wed, 21 Oct 2015 07:28:00 +0000\r\n\
         Message-ID: <n1@example.com>\r\n\
         {extra}\
         MIME-Version: 1.0\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         \r\n\
         {html}\r\n"
    )
}

/// Exactly `len` bytes that classify as PNG.
pub fn png_bytes(len: usize) -> Vec<u8> {
    padded(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR", len)
}

/// Exactly `len` bytes that classify as GIF.
pub fn gif_bytes(len: usize) -> Vec<u8> {
    padded(b"GIF89a\x01\0\x01\0", len)
}

fn padded(magic: &[u8], len: usize) -> Vec<u8> {
    assert!(len >= magic.len(), "{len} bytes cannot hold the {}-byte header", magic.len());
    let mut data = magic.to_vec();
    data.resize(len, 0);
    data
}

/// Every `cid:` value in `src` attributes, in document order.
pub fn cids_in(html: &str) -> Vec<String> {
    html.match_indices("src=\"cid:")
        .map(|(i, m)| {
            let rest = &html[i + m.len()..];
            rest[..rest.find('"').unwrap_or(rest.len())].to_string()
        })
        .collect()
}

/// Write an executable fake `ffmpeg` that writes a few bytes to its last argument.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    script(
        &dir.join("ffmpeg"),
        "#!/bin/sh\nfor last; do :; done\nprintf 'fakevideo' > \"$last\"\n",
    )
}

/// Fake `ffmpeg` that starts writing its output and then hangs.
#[cfg(unix)]
pub fn hanging_ffmpeg(dir: &Path) -> PathBuf {
    script(
        &dir.join("ffmpeg-hang"),
        "#!/bin/sh\nfor last; do :; done\nprintf 'half' > \"$last\"\nexec sleep 30\n",
    )
}

#[cfg(unix)]
fn script(path: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, body).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
    path.to_path_buf()
}

/// Build a raw HTTP/1.1 response that closes the connection.
pub fn http_response(status: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

type Responder = dyn Fn(&str, &str) -> Vec<u8> + Send + Sync;

/// Minimal HTTP server answering every request with canned bytes.
///
/// Unlike a real server it can lie about `Content-Length`.
pub struct CannedServer {
    base: String,
    requests: Arc<Mutex<Vec<String>>>,
    peak: Arc<AtomicUsize>,
}

impl CannedServer {
    /// Start serving; `respond(method, path)` produces the raw response.
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::start_delayed(Duration::ZERO, respond).await
    }

    /// Like [`CannedServer::start`], holding every request for `delay` before answering.
    pub async fn start_delayed<F>(delay: Duration, respond: F) -> Self
    where
        F: Fn(&str, &str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let respond: Arc<Responder> = Arc::new(respond);

        let log = requests.clone();
        let max = peak.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let respond = respond.clone();
                let log = log.clone();
                let max = max.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let text = String::from_utf8_lossy(&head).into_owned();
                    let mut words = text.split_whitespace();
                    let method = words.next().unwrap_or_default().to_string();
                    let path = words.next().unwrap_or_default().to_string();
                    log.lock().unwrap().push(format!("{method} {path}"));

                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    // Released before answering: the client cannot start its
                    // next request until it has this response.
                    in_flight.fetch_sub(1, Ordering::SeqCst);

                    let response = respond(&method, &path);
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base: format!("http://{addr}"),
            requests,
            peak,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// `"METHOD /path"` for every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Most requests that were being handled at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A server that accepts connections and never answers.
pub async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}
