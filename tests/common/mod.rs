//! Shared backends for integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read until the end of the request head; returns everything read.
///
/// The PROXY v2 signature itself contains a blank line, so the head only
/// ends after the request line.
async fn read_head<S: AsyncRead + Unpin>(socket: &mut S) -> Vec<u8> {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return seen,
            Ok(n) => {
                seen.extend_from_slice(&buf[..n]);
                if let Some(line) = find(&seen, b" HTTP/1.1\r\n") {
                    if find(&seen[line..], b"\r\n\r\n").is_some() {
                        return seen;
                    }
                }
            }
        }
    }
}

async fn respond<S: AsyncWrite + Unpin>(socket: &mut S, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Start a backend that answers every request with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    let (addr, _requests) = start_recording_backend(body).await;
    addr
}

/// Start a backend that reports the raw bytes of each request head,
/// PROXY preamble included.
pub async fn start_recording_backend(
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let _ = tx.send(head);
                respond(&mut socket, body).await;
            });
        }
    });

    (addr, rx)
}

/// A keep-alive backend: connections stay open across requests.
pub struct KeepAliveBackend {
    pub addr: SocketAddr,
    /// Raw request heads, PROXY preamble included.
    pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
    accepted: Arc<AtomicUsize>,
}

impl KeepAliveBackend {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start a keep-alive backend answering with `body` after `extra_headers`
/// (each line ending in CRLF).
pub async fn start_keep_alive_backend(body: &'static str, extra_headers: String) -> KeepAliveBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let response = Arc::new(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n{}",
        body.len(),
        extra_headers,
        body
    ));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let tx = tx.clone();
            let response = response.clone();
            tokio::spawn(async move {
                loop {
                    let head = read_head(&mut socket).await;
                    if head.is_empty() {
                        break;
                    }
                    let _ = tx.send(head);
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    KeepAliveBackend {
        addr,
        requests,
        accepted,
    }
}

/// Start a backend that reads the request and then closes without replying.
pub async fn start_hangup_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_head(&mut socket).await;
                drop(socket);
            });
        }
    });
    addr
}

/// Start a backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Start an HTTP/2 prior-knowledge (h2c) backend.
pub async fn start_h2c_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(move |_req: hyper::Request<hyper::body::Incoming>| async move {
                    Ok::<_, Infallible>(hyper::Response::new(Full::new(Bytes::from(body))))
                });
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(socket), service)
                    .await;
            });
        }
    });
    addr
}

/// Start an HTTP/1.1 backend on a unix socket.
#[cfg(unix)]
pub async fn start_unix_backend(path: &Path, body: &'static str) {
    let listener = tokio::net::UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_head(&mut socket).await;
                respond(&mut socket, body).await;
            });
        }
    });
}

/// Self-signed certificate for `names`, as a PEM file in `dir`.
pub struct TestCert {
    pub cert_pem_path: std::path::PathBuf,
    pub cert_der: rustls::pki_types::CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

pub fn self_signed(dir: &Path, names: &[&str]) -> TestCert {
    let generated =
        rcgen::generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .unwrap();
    let cert_pem_path = dir.join("upstream.pem");
    std::fs::write(&cert_pem_path, generated.cert.pem()).unwrap();
    TestCert {
        cert_pem_path,
        cert_der: generated.cert.der().clone(),
        key_der: generated.key_pair.serialize_der(),
    }
}

/// Start a TLS backend that reports the SNI of every handshake.
pub async fn start_tls_backend(
    cert: &TestCert,
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<Option<String>>) {
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_der.clone().into());
    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.cert_der.clone()], key)
    .unwrap();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(socket).await else {
                    return;
                };
                let _ = tx.send(tls.get_ref().1.server_name().map(str::to_string));
                let _ = read_head(&mut tls).await;
                respond(&mut tls, body).await;
            });
        }
    });

    (addr, rx)
}
