//! Canned HTTP/1.1 responses on a loopback port.
//!
//! Each response is served on its own connection (`Connection: close`), in
//! order, and the raw request text (head plus body) is handed back for
//! assertions.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

/// Build a complete response with a `Content-Length` header.
pub fn http_response(status: &str, headers: &[(&str, &str)], body: impl AsRef<[u8]>) -> Vec<u8> {
    let body = body.as_ref();
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Serve one response. Returns the base URL and a handle yielding the request.
pub fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let (base, handle) = serve_sequence(vec![response]);
    let handle = thread::spawn(move || {
        handle
            .join()
            .expect("server thread")
            .pop()
            .expect("one request")
    });
    (base, handle)
}

/// Serve `responses` to consecutive connections.
pub fn serve_sequence(responses: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = thread::spawn(move || {
        responses
            .into_iter()
            .map(|response| {
                let (stream, _) = listener.accept().expect("accept");
                answer(stream, &response)
            })
            .collect()
    });
    (format!("http://{addr}"), handle)
}

fn answer(stream: TcpStream, response: &[u8]) -> String {
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut request = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        let end = line == "\r\n" || line.is_empty();
        request.push_str(&line);
        if end {
            break;
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("read body");
    request.push_str(&String::from_utf8_lossy(&body));

    let mut stream = stream;
    stream.write_all(response).expect("write");
    stream.flush().expect("flush");
    request
}

/// The body of a captured request.
pub fn request_body(request: &str) -> &str {
    request
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}
