//! One-request-per-connection HTTP/1.1 server for integration tests.
//!
//! Serves a single static body at any path. HEAD reports Content-Length and,
//! unless disabled, `Accept-Ranges: bytes`; GET with a Range header answers
//! 206 with the slice. Requests are counted so tests can assert exactly what
//! was fetched.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, ranges are ignored and neither HEAD nor GET advertise them.
    pub support_ranges: bool,
    /// Sleep before sending each GET response body.
    pub get_delay: Option<Duration>,
    /// Answer every GET with this status and no body.
    pub fail_status: Option<u16>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            get_delay: None,
            fail_status: None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    heads: AtomicUsize,
    gets: AtomicUsize,
    range_gets: AtomicUsize,
}

/// Handle to a running server. The server lives until the process exits.
#[derive(Debug, Clone)]
pub struct RangeServer {
    base: String,
    counters: Arc<Counters>,
}

impl RangeServer {
    /// URL of `name` on this server, e.g. `http://127.0.0.1:PORT/name`.
    pub fn url(&self, name: &str) -> String {
        format!("{}{}", self.base, name)
    }

    pub fn heads(&self) -> usize {
        self.counters.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    /// GETs that carried a Range header.
    pub fn range_gets(&self) -> usize {
        self.counters.range_gets.load(Ordering::SeqCst)
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let counters = Arc::new(Counters::default());
    let served = Arc::clone(&counters);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let counters = Arc::clone(&served);
            thread::spawn(move || handle(stream, &body, opts, &counters));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{port}/"),
        counters,
    }
}

fn handle(mut stream: TcpStream, body: &[u8], opts: RangeServerOptions, counters: &Counters) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(30)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;
    let accept_ranges = if opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        counters.heads.fetch_add(1, Ordering::SeqCst);
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}Connection: close\r\n\r\n"
        );
        let _ = stream.write_all(head.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    counters.gets.fetch_add(1, Ordering::SeqCst);
    if range.is_some() {
        counters.range_gets.fetch_add(1, Ordering::SeqCst);
    }
    if let Some(code) = opts.fail_status {
        let head = format!(
            "HTTP/1.1 {code} Injected Failure\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        let _ = stream.write_all(head.as_bytes());
        return;
    }

    let (status, extra, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl || start >= total {
                let head = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(head.as_bytes());
                return;
            }
            (
                "206 Partial Content",
                format!("Content-Range: bytes {start}-{end_incl}/{total}\r\n"),
                &body[start as usize..=end_incl as usize],
            )
        }
        None => ("200 OK", String::new(), body),
    };

    if let Some(delay) = opts.get_delay {
        thread::sleep(delay);
    }
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{extra}{accept_ranges}Connection: close\r\n\r\n",
        slice.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(slice);
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let range = lines
        .take_while(|l| !l.trim().is_empty())
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| {
            let ranges = value.trim().strip_prefix("bytes=")?;
            let (a, b) = ranges.split_once('-')?;
            let start = a.trim().parse().ok()?;
            let end = match b.trim() {
                "" => u64::MAX,
                e => e.parse().ok()?,
            };
            Some((start, end))
        });
    (method, range)
}
