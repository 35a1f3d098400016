//! Minimal in-process HTTP stub for transport/download tests.
//! Serves fixed bodies, optionally honoring or rejecting Range requests,
//! and records every request it sees.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone)]
pub(crate) struct RequestRecord {
    pub method: String,
    pub path: String,
    pub range: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    Plain,
    Ranged,
    RangeRejected,
    Status(u16),
}

#[derive(Debug, Clone)]
pub(crate) struct Route {
    path: String,
    body: Vec<u8>,
    kind: RouteKind,
}

impl Route {
    /// 200 with the full body; Range headers are ignored.
    pub fn ok(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            body,
            kind: RouteKind::Plain,
        }
    }

    /// Honors `Range: bytes=k-` with a 206 partial response.
    pub fn ranged(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            body,
            kind: RouteKind::Ranged,
        }
    }

    /// Rejects any ranged GET with 416; serves the full body otherwise.
    pub fn range_rejected(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            body,
            kind: RouteKind::RangeRejected,
        }
    }

    /// Always responds with the given status and an empty body.
    pub fn status(path: &str, code: u16) -> Self {
        Self {
            path: path.to_string(),
            body: Vec::new(),
            kind: RouteKind::Status(code),
        }
    }
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RequestRecord>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let requests: Arc<Mutex<Vec<RequestRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|route| (route.path.clone(), route))
            .collect();

        let handle = {
            let requests = Arc::clone(&requests);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    let _ = handle_connection(stream, &routes, &requests);
                }
            })
        };

        Self {
            addr,
            requests,
            stop,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // wake the accept loop
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(
    stream: TcpStream,
    routes: &HashMap<String, Route>,
    requests: &Arc<Mutex<Vec<RequestRecord>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Ok(());
    };
    let method = method.to_string();
    let path = path.to_string();

    let mut range: Option<String> = None;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("range")
        {
            range = Some(value.trim().to_string());
        }
    }

    requests.lock().expect("requests lock").push(RequestRecord {
        method: method.clone(),
        path: path.clone(),
        range: range.clone(),
    });

    let Some(route) = routes.get(&path) else {
        return write_response(&mut stream, 404, &[], None);
    };
    let head_only = method == "HEAD";

    match route.kind {
        RouteKind::Status(code) => write_response(&mut stream, code, &[], None),
        RouteKind::Plain => write_response(
            &mut stream,
            200,
            &[("Content-Length".into(), route.body.len().to_string())],
            (!head_only).then_some(&route.body[..]),
        ),
        RouteKind::RangeRejected => {
            if range.is_some() && !head_only {
                write_response(&mut stream, 416, &[], None)
            } else {
                write_response(
                    &mut stream,
                    200,
                    &[("Content-Length".into(), route.body.len().to_string())],
                    (!head_only).then_some(&route.body[..]),
                )
            }
        }
        RouteKind::Ranged => {
            let offset = range
                .as_deref()
                .and_then(|value| value.strip_prefix("bytes="))
                .and_then(|value| value.strip_suffix('-'))
                .and_then(|value| value.parse::<usize>().ok());
            match offset {
                Some(offset) if !head_only && offset <= route.body.len() => {
                    let rest = &route.body[offset..];
                    write_response(
                        &mut stream,
                        206,
                        &[
                            ("Content-Length".into(), rest.len().to_string()),
                            (
                                "Content-Range".into(),
                                format!("bytes {}-{}/{}", offset, route.body.len().saturating_sub(1), route.body.len()),
                            ),
                        ],
                        Some(rest),
                    )
                }
                _ => write_response(
                    &mut stream,
                    200,
                    &[("Content-Length".into(), route.body.len().to_string())],
                    (!head_only).then_some(&route.body[..]),
                ),
            }
        }
    }
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        _ => "Error",
    };
    write!(stream, "HTTP/1.1 {status} {reason}\r\n")?;
    let mut has_length = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") {
            has_length = true;
        }
        write!(stream, "{name}: {value}\r\n")?;
    }
    if !has_length {
        write!(stream, "Content-Length: {}\r\n", body.map_or(0, <[u8]>::len))?;
    }
    write!(stream, "Connection: close\r\n\r\n")?;
    if let Some(body) = body {
        stream.write_all(body)?;
    }
    stream.flush()
}
