//! HTTP client adapter.
//!
//! Implements [`HttpPort`] for the polling and push transports.  Each
//! request opens its own connection, so the adapter itself is just a
//! pair of timeouts and clones freely into the timer and stream threads.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspHttpConnection` with the ESP-IDF
//!   certificate bundle attached, so `https://` endpoints work out of the box.
//! - **all other targets**: a plaintext HTTP/1.1 client over
//!   `std::net::TcpStream` for host-side testing against a local listener.
//!   Only `http://` URLs and identity-encoded bodies are supported.

use core::time::Duration;

use log::debug;

use crate::app::ports::{HttpPort, HttpResponse};
use crate::error::TransportError;

/// Largest body kept from a one-shot request.  The light endpoint returns
/// a single quoted word.
const MAX_BODY: usize = 4096;

/// Read granularity for both one-shot and streamed responses.
const CHUNK: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpClient {
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(60))
    }
}

impl HttpClient {
    /// `stream_timeout` bounds the silence tolerated on a push stream
    /// before the read fails and the transport reconnects.
    pub fn new(request_timeout: Duration, stream_timeout: Duration) -> Self {
        Self {
            request_timeout,
            stream_timeout,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use core::time::Duration;

    use esp_idf_svc::http::Method;
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

    use crate::error::TransportError;

    pub(super) fn open(
        timeout: Duration,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<EspHttpConnection, TransportError> {
        let mut conn = EspHttpConnection::new(&Configuration {
            timeout: Some(timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|_| TransportError::ConnectFailed)?;

        conn.initiate_request(method, url, headers)
            .map_err(|_| TransportError::ConnectFailed)?;
        conn.initiate_response()
            .map_err(|_| TransportError::ConnectFailed)?;
        Ok(conn)
    }

    pub(super) fn read(conn: &mut EspHttpConnection, buf: &mut [u8]) -> Result<usize, TransportError> {
        conn.read(buf).map_err(|_| TransportError::Io)
    }
}

#[cfg(target_os = "espidf")]
impl HttpPort for HttpClient {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        use esp_idf_svc::http::Method;

        let mut conn = esp::open(
            self.request_timeout,
            Method::Get,
            url,
            &[("accept", "application/json")],
        )?;
        let status = conn.status();

        let mut body = Vec::new();
        let mut buf = [0u8; CHUNK];
        loop {
            let n = esp::read(&mut conn, &mut buf)?;
            if n == 0 {
                break;
            }
            if body.len() + n > MAX_BODY {
                return Err(TransportError::Malformed);
            }
            body.extend_from_slice(&buf[..n]);
        }
        debug!("HTTP GET {} -> {} ({} bytes)", url, status, body.len());

        let body = String::from_utf8(body).map_err(|_| TransportError::Malformed)?;
        Ok(HttpResponse { status, body })
    }

    fn put(&mut self, url: &str) -> Result<u16, TransportError> {
        use esp_idf_svc::http::Method;

        let conn = esp::open(
            self.request_timeout,
            Method::Put,
            url,
            &[("content-length", "0")],
        )?;
        let status = conn.status();
        debug!("HTTP PUT {} -> {}", url, status);
        Ok(status)
    }

    fn stream(
        &mut self,
        url: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<(), TransportError> {
        use esp_idf_svc::http::Method;

        let mut conn = esp::open(
            self.stream_timeout,
            Method::Get,
            url,
            &[("accept", "text/event-stream"), ("cache-control", "no-cache")],
        )?;
        let status = conn.status();
        if !(200..300).contains(&status) {
            return Err(TransportError::Status(status));
        }

        let mut buf = [0u8; CHUNK];
        loop {
            let n = esp::read(&mut conn, &mut buf)?;
            if n == 0 || !on_chunk(&buf[..n]) {
                return Ok(());
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend (plaintext std::net)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    use crate::error::TransportError;

    pub(super) struct Target<'a> {
        pub host: &'a str,
        pub port: u16,
        pub path: &'a str,
    }

    /// Split `http://host[:port]/path`.  Anything else is unsupported here.
    pub(super) fn split_url(url: &str) -> Result<Target<'_>, TransportError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or(TransportError::Unavailable)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, p.parse().map_err(|_| TransportError::ConnectFailed)?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(TransportError::ConnectFailed);
        }
        Ok(Target { host, port, path })
    }

    pub(super) fn send(
        method: &str,
        url: &str,
        accept: &str,
        timeout: Duration,
    ) -> Result<TcpStream, TransportError> {
        let t = split_url(url)?;
        let mut stream =
            TcpStream::connect((t.host, t.port)).map_err(|_| TransportError::ConnectFailed)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|_| TransportError::Io)?;
        let request = format!(
            "{method} {} HTTP/1.1\r\nHost: {}\r\nAccept: {accept}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            t.path, t.host
        );
        stream
            .write_all(request.as_bytes())
            .map_err(|_| TransportError::ConnectFailed)?;
        Ok(stream)
    }

    /// Read up to the end of the header block.  Returns the status code and
    /// whatever body bytes arrived with it.
    pub(super) fn read_head(stream: &mut TcpStream) -> Result<(u16, Vec<u8>), TransportError> {
        let mut head = Vec::new();
        let mut buf = [0u8; super::CHUNK];
        loop {
            if let Some(end) = find_blank_line(&head) {
                let status = parse_status(&head[..end])?;
                return Ok((status, head[end + 4..].to_vec()));
            }
            if head.len() > super::MAX_BODY {
                return Err(TransportError::Malformed);
            }
            let n = stream
                .read(&mut buf)
                .map_err(|_| TransportError::ConnectFailed)?;
            if n == 0 {
                return Err(TransportError::ConnectFailed);
            }
            head.extend_from_slice(&buf[..n]);
        }
    }

    fn find_blank_line(bytes: &[u8]) -> Option<usize> {
        bytes.windows(4).position(|w| w == b"\r\n\r\n")
    }

    fn parse_status(head: &[u8]) -> Result<u16, TransportError> {
        let text = core::str::from_utf8(head).map_err(|_| TransportError::Malformed)?;
        let line = text.lines().next().ok_or(TransportError::Malformed)?;
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(v), Some(code)) if v.starts_with("HTTP/") => {
                code.parse().map_err(|_| TransportError::Malformed)
            }
            _ => Err(TransportError::Malformed),
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl HttpPort for HttpClient {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        use std::io::Read;

        let mut stream = sim::send("GET", url, "application/json", self.request_timeout)?;
        let (status, mut body) = sim::read_head(&mut stream)?;
        let mut buf = [0u8; CHUNK];
        loop {
            let n = stream.read(&mut buf).map_err(|_| TransportError::Io)?;
            if n == 0 {
                break;
            }
            if body.len() + n > MAX_BODY {
                return Err(TransportError::Malformed);
            }
            body.extend_from_slice(&buf[..n]);
        }
        debug!("HTTP(sim) GET {} -> {} ({} bytes)", url, status, body.len());

        let body = String::from_utf8(body).map_err(|_| TransportError::Malformed)?;
        Ok(HttpResponse { status, body })
    }

    fn put(&mut self, url: &str) -> Result<u16, TransportError> {
        let mut stream = sim::send("PUT", url, "*/*", self.request_timeout)?;
        let (status, _) = sim::read_head(&mut stream)?;
        debug!("HTTP(sim) PUT {} -> {}", url, status);
        Ok(status)
    }

    fn stream(
        &mut self,
        url: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<(), TransportError> {
        use std::io::Read;

        let mut stream = sim::send("GET", url, "text/event-stream", self.stream_timeout)?;
        let (status, initial) = sim::read_head(&mut stream)?;
        if !(200..300).contains(&status) {
            return Err(TransportError::Status(status));
        }
        if !initial.is_empty() && !on_chunk(&initial) {
            return Ok(());
        }

        let mut buf = [0u8; CHUNK];
        loop {
            let n = stream.read(&mut buf).map_err(|_| TransportError::Io)?;
            if n == 0 || !on_chunk(&buf[..n]) {
                return Ok(());
            }
        }
    }
}
