// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The Icecast source client.
//!
//! Wraps an MP3 encoder and forwards its bytes over an authenticated
//! streaming PUT. The handshake sends Basic auth for the `source` user with
//! `Expect: 100-continue`; the stream is accepted iff the first status line
//! contains ` 100 `. Once connected, each MP3 block is written to the socket
//! best-effort: write failures are logged and the block skipped, the stream
//! is never torn down automatically.
//!
//! Icecast does not honour chunked transfer encoding for source streams, so
//! the chunked flag defaults to off and bytes go out raw; the framing path
//! stays available through [`IcecastClient::set_chunked`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock, PoisonError, Weak};

use aircast_core::{AircastError, EncodedProducer, NodeId, PcmProducer, Result, StudioConfig};
use bytes::Bytes;
use url::Url;

use crate::codecs::mp3::Mp3Encoder;

enum Transport {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

struct IcecastShared {
    socket: Mutex<Option<Transport>>,
    chunked: AtomicBool,
}

impl IcecastShared {
    fn lock_socket(&self) -> MutexGuard<'_, Option<Transport>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward one encoded block to the server, best-effort.
    fn enqueue(&self, bytes: &Bytes) {
        let mut socket = self.lock_socket();
        let Some(transport) = socket.as_mut() else {
            return;
        };
        if bytes.is_empty() {
            return;
        }
        let result = if self.chunked.load(Ordering::Relaxed) {
            transport.write_all(&chunk_frame(bytes))
        } else {
            transport.write_all(bytes)
        };
        if let Err(e) = result {
            tracing::warn!("icecast write failed, skipping block: {e}");
        }
    }
}

/// An authenticated streaming-PUT client for an Icecast mount.
pub struct IcecastClient {
    encoder: Arc<Mp3Encoder>,
    shared: Arc<IcecastShared>,
    enqueue: aircast_core::SubscriberId,
    source: Mutex<Option<Arc<dyn PcmProducer>>>,
    endpoint: Mutex<Option<(String, String)>>,
}

impl IcecastClient {
    /// Create a disconnected client with the given MP3 settings.
    pub fn new(quality: u8, bit_rate: u32, config: &StudioConfig) -> Result<Self> {
        let encoder = Arc::new(Mp3Encoder::new(quality, bit_rate, config.sample_rate)?);
        let shared = Arc::new(IcecastShared {
            socket: Mutex::new(None),
            chunked: AtomicBool::new(false),
        });
        let weak: Weak<IcecastShared> = Arc::downgrade(&shared);
        let enqueue = encoder.encoded().subscribe(Box::new(move |bytes: &Bytes| {
            if let Some(shared) = weak.upgrade() {
                shared.enqueue(bytes);
            }
        }));
        Ok(Self {
            encoder,
            shared,
            enqueue,
            source: Mutex::new(None),
            endpoint: Mutex::new(None),
        })
    }

    /// The node identity of the wrapped encoder.
    pub fn node_id(&self) -> NodeId {
        self.encoder.node_id()
    }

    /// The endpoint of the last successful connect.
    pub fn endpoint(&self) -> Option<String> {
        self.lock_endpoint().as_ref().map(|(endpoint, _)| endpoint.clone())
    }

    /// The password of the last successful connect.
    pub fn password(&self) -> Option<String> {
        self.lock_endpoint().as_ref().map(|(_, password)| password.clone())
    }

    /// Whether a stream socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.lock_socket().is_some()
    }

    /// Enable or disable chunked framing of the body.
    pub fn set_chunked(&self, chunked: bool) {
        self.shared.chunked.store(chunked, Ordering::Relaxed);
    }

    fn lock_endpoint(&self) -> MutexGuard<'_, Option<(String, String)>> {
        self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_source(&self) -> MutexGuard<'_, Option<Arc<dyn PcmProducer>>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The producer currently streamed, if any.
    pub fn input_id(&self) -> Option<NodeId> {
        self.lock_source().as_ref().map(|source| source.node_id())
    }

    /// Connect and authenticate against an Icecast endpoint.
    ///
    /// Returns `Ok(false)` when the endpoint refuses the connection or does
    /// not grant the stream with a 100 response.
    pub fn connect(&self, endpoint: &str, password: &str) -> Result<bool> {
        let url = Url::parse(endpoint)
            .map_err(|e| AircastError::ConnectFailed(format!("{endpoint}: {e}")))?;
        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(AircastError::ConnectFailed(format!(
                    "{endpoint}: unsupported scheme {other}"
                )))
            },
        };
        let host = url
            .host_str()
            .ok_or_else(|| AircastError::ConnectFailed(format!("{endpoint}: no host")))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });
        let netloc = url.port().map_or_else(|| host.clone(), |p| format!("{host}:{p}"));

        let tcp = match TcpStream::connect((host.as_str(), port)) {
            Ok(stream) => stream,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::warn!("icecast endpoint {endpoint} refused the connection");
                return Ok(false);
            },
            Err(e) => return Err(AircastError::ConnectFailed(format!("{endpoint}: {e}"))),
        };

        let mut transport =
            if tls { tls_connect(&host, tcp)? } else { Transport::Plain(tcp) };

        let path = if url.path().is_empty() { "/" } else { url.path() };
        let request = put_request(path, &netloc, password);
        transport
            .write_all(request.as_bytes())
            .map_err(|e| AircastError::ConnectFailed(format!("{endpoint}: {e}")))?;

        if !expect_100(&mut transport) {
            tracing::warn!("icecast endpoint {endpoint} did not grant the stream");
            return Ok(false);
        }

        *self.shared.lock_socket() = Some(transport);
        *self.lock_endpoint() = Some((endpoint.to_string(), password.to_string()));
        tracing::info!(endpoint, "icecast stream accepted");

        // Now that the server accepts bytes, start encoding the pending source.
        let source = self.lock_source().clone();
        if let Some(source) = source {
            self.encoder.set_input(Some(source))?;
        }
        Ok(true)
    }

    /// Select the audio source to upload (or clear with `None`).
    ///
    /// Encoding only starts once the server has accepted the stream.
    pub fn set_input(&self, source: Option<Arc<dyn PcmProducer>>) -> Result<()> {
        {
            let mut stored = self.lock_source();
            if stored.as_ref().map(|s| s.node_id()) == source.as_ref().map(|s| s.node_id()) {
                return Ok(());
            }
            stored.clone_from(&source);
        }
        if self.is_connected() {
            self.encoder.set_input(source)?;
        }
        Ok(())
    }

    /// Stop streaming: detach the encoder, send the chunked terminator when
    /// enabled, and close the socket.
    pub fn close(&self) {
        self.encoder.encoded().unsubscribe(self.enqueue);
        if self.lock_source().take().is_some() {
            if let Err(e) = self.encoder.set_input(None) {
                tracing::warn!("failed to detach encoder on close: {e}");
            }
        }
        let mut socket = self.shared.lock_socket();
        if let Some(mut transport) = socket.take() {
            if self.shared.chunked.load(Ordering::Relaxed) {
                let _ = transport.write_all(b"0\r\n\r\n");
            }
        }
        tracing::info!("icecast stream closed");
    }
}

/// Frame a payload for chunked transfer encoding.
fn chunk_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = format!("{:x}\r\n", payload.len()).into_bytes();
    framed.extend_from_slice(payload);
    framed.extend_from_slice(b"\r\n");
    framed
}

/// The streaming PUT request, terminated by the double CRLF.
fn put_request(path: &str, netloc: &str, password: &str) -> String {
    use base64::Engine as _;
    let token =
        base64::engine::general_purpose::STANDARD.encode(format!("source:{password}"));
    format!(
        "PUT {path} HTTP/1.1\r\n\
         Host: {netloc}\r\n\
         Authorization: Basic {token}\r\n\
         User-Agent: aircast\r\n\
         Accept: */*\r\n\
         Transfer-Encoding: chunked\r\n\
         Content-Type: audio/mpeg\r\n\
         Ice-Public: 1\r\n\
         Ice-Name: Radio stream\r\n\
         Ice-Description: Stream from the radio studio\r\n\
         Expect: 100-continue\r\n\
         \r\n"
    )
}

/// Read response headers until the double CRLF; grant iff the status line
/// contains ` 100 `. Read failures count as refusal.
fn expect_100(transport: &mut Transport) -> bool {
    let mut headers: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    while !contains_double_crlf(&headers) {
        match transport.read(&mut buf) {
            Ok(0) => return false,
            Ok(n) => headers.extend_from_slice(&buf[..n]),
            Err(_) => return false,
        }
    }
    headers
        .split(|&b| b == b'\n')
        .next()
        .is_some_and(|status| windows_contain(status, b" 100 "))
}

fn contains_double_crlf(data: &[u8]) -> bool {
    windows_contain(data, b"\r\n\r\n")
}

fn windows_contain(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn tls_config() -> Result<Arc<rustls::ClientConfig>> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    if let Some(config) = CONFIG.get() {
        return Ok(Arc::clone(config));
    }

    ensure_crypto_provider();
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!("skipping unreadable system certificate: {error}");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            tracing::warn!("skipping invalid system certificate: {e}");
        }
    }
    if roots.is_empty() {
        return Err(AircastError::ConnectFailed(
            "no usable certificates in the system trust store".to_string(),
        ));
    }
    let config = Arc::new(
        rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth(),
    );
    Ok(Arc::clone(CONFIG.get_or_init(|| config)))
}

/// Install the process-level rustls CryptoProvider exactly once.
fn ensure_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(
            rustls::crypto::aws_lc_rs::default_provider(),
        );
    });
}

fn tls_connect(host: &str, tcp: TcpStream) -> Result<Transport> {
    let config = tls_config()?;
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| AircastError::ConnectFailed(format!("{host}: {e}")))?;
    let connection = rustls::ClientConnection::new(config, server_name)
        .map_err(|e| AircastError::ConnectFailed(format!("{host}: {e}")))?;
    Ok(Transport::Tls(Box::new(rustls::StreamOwned::new(connection, tcp))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_frame() {
        assert_eq!(chunk_frame(b"abc"), b"3\r\nabc\r\n".to_vec());
        let framed = chunk_frame(&[0u8; 255]);
        assert!(framed.starts_with(b"ff\r\n"));
        assert!(framed.ends_with(b"\r\n"));
    }

    #[test]
    fn test_put_request_shape() {
        let request = put_request("/stream", "host:8000", "secret");
        let mut lines = request.split("\r\n");
        assert_eq!(lines.next(), Some("PUT /stream HTTP/1.1"));
        assert!(request.contains("Host: host:8000"));
        assert!(request.contains("Expect: 100-continue"));
        assert!(request.ends_with("\r\n\r\n"));

        use base64::Engine as _;
        let auth_line = request
            .split("\r\n")
            .find(|line| line.starts_with("Authorization: Basic "))
            .unwrap();
        let token = auth_line.trim_start_matches("Authorization: Basic ");
        let decoded = base64::engine::general_purpose::STANDARD.decode(token).unwrap();
        assert_eq!(decoded, b"source:secret");
    }
}
