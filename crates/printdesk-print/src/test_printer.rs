// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted in-process IPP printer for tests.
//
// Speaks just enough IPP over HTTP/1.1 for `IppClient`: Print-Job (0x0002)
// accepts the document as printer job 5, and Get-Job-Attributes (0x0009)
// reports the next state from a script, repeating the last one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const PRINTER_JOB_ID: i32 = 5;

const OP_PRINT_JOB: u16 = 0x0002;
const OP_GET_JOB_ATTRIBUTES: u16 = 0x0009;

const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
const TAG_JOB_ATTRIBUTES: u8 = 0x02;
const TAG_END_OF_ATTRIBUTES: u8 = 0x03;

const VALUE_TAG_INTEGER: u8 = 0x21;
const VALUE_TAG_ENUM: u8 = 0x23;
const VALUE_TAG_KEYWORD: u8 = 0x44;
const VALUE_TAG_CHARSET: u8 = 0x47;
const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;

pub const PENDING: i32 = 3;
pub const PROCESSING: i32 = 5;
pub const CANCELED: i32 = 7;
pub const ABORTED: i32 = 8;
pub const COMPLETED: i32 = 9;

#[derive(Default)]
struct Script {
    states: VecDeque<i32>,
    last: Option<i32>,
}

impl Script {
    fn next_state(&mut self) -> i32 {
        if let Some(state) = self.states.pop_front() {
            self.last = Some(state);
        }
        self.last.unwrap_or(PROCESSING)
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    prints: AtomicUsize,
}

pub struct TestPrinter {
    port: u16,
    shared: Arc<Shared>,
}

impl TestPrinter {
    /// Listen on an ephemeral port. Get-Job-Attributes walks `states`.
    pub async fn start(states: Vec<i32>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared::default());
        shared.script.lock().unwrap().states = states.into();

        let serving = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&serving);
                tokio::spawn(async move {
                    let _ = serve(stream, &shared).await;
                });
            }
        });
        Self { port, shared }
    }

    pub fn uri(&self) -> String {
        format!("ipp://127.0.0.1:{}/ipp/print", self.port)
    }

    /// Print-Job requests received so far.
    pub fn prints(&self) -> usize {
        self.shared.prints.load(Ordering::SeqCst)
    }

    /// Replace the remaining script.
    pub fn set_states(&self, states: Vec<i32>) {
        let mut script = self.shared.script.lock().unwrap();
        script.states = states.into();
    }
}

async fn serve(mut stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let body = read_request(&mut stream).await?;
    if body.len() < 8 {
        return Ok(());
    }
    let operation = u16::from_be_bytes([body[2], body[3]]);
    let request_id = [body[4], body[5], body[6], body[7]];

    let state = match operation {
        OP_PRINT_JOB => {
            shared.prints.fetch_add(1, Ordering::SeqCst);
            PENDING
        }
        OP_GET_JOB_ATTRIBUTES => shared.script.lock().unwrap().next_state(),
        _ => return Ok(()),
    };

    let ipp = job_response(request_id, state);
    let head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/ipp\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        ipp.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&ipp).await?;
    stream.shutdown().await
}

/// Read one HTTP request and return its body, de-chunked if needed.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        if let Some(body) = complete_body(&data) {
            return Ok(body);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

fn complete_body(data: &[u8]) -> Option<Vec<u8>> {
    let header_end = find_subsequence(data, b"\r\n\r\n")?;
    let headers = String::from_utf8_lossy(&data[..header_end]).to_ascii_lowercase();
    let body = &data[header_end + 4..];

    let content_length = headers
        .lines()
        .find(|line| line.starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|value| value.trim().parse::<usize>().ok());
    if let Some(len) = content_length {
        return (body.len() >= len).then(|| body[..len].to_vec());
    }
    if headers.contains("transfer-encoding: chunked") {
        return dechunk(body);
    }
    Some(body.to_vec())
}

/// Decode a chunked body, or `None` until the terminating chunk has arrived.
fn dechunk(mut body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = find_subsequence(body, b"\r\n")?;
        let size_field = String::from_utf8_lossy(&body[..line_end]);
        let size_hex = size_field.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        body = &body[line_end + 2..];
        if size == 0 {
            return find_subsequence(body, b"\r\n").map(|_| out);
        }
        if body.len() < size + 2 {
            return None;
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn job_response(request_id: [u8; 4], state: i32) -> Vec<u8> {
    let reason = match state {
        ABORTED => "aborted-by-system",
        CANCELED => "canceled-by-user",
        _ => "none",
    };

    // version 1.1, status successful-ok
    let mut buf = vec![0x01, 0x01, 0x00, 0x00];
    buf.extend_from_slice(&request_id);

    buf.push(TAG_OPERATION_ATTRIBUTES);
    write_attr(&mut buf, VALUE_TAG_CHARSET, "attributes-charset", b"utf-8");
    write_attr(&mut buf, VALUE_TAG_NATURAL_LANGUAGE, "attributes-natural-language", b"en");

    buf.push(TAG_JOB_ATTRIBUTES);
    write_attr(&mut buf, VALUE_TAG_INTEGER, "job-id", &PRINTER_JOB_ID.to_be_bytes());
    write_attr(&mut buf, VALUE_TAG_ENUM, "job-state", &state.to_be_bytes());
    write_attr(&mut buf, VALUE_TAG_KEYWORD, "job-state-reasons", reason.as_bytes());

    buf.push(TAG_END_OF_ATTRIBUTES);
    buf
}

fn write_attr(buf: &mut Vec<u8>, value_tag: u8, name: &str, value: &[u8]) {
    buf.push(value_tag);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}
