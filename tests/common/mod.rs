//! Scripted HTTP/1.1 server for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Request line and headers, lowercased.
    pub head: String,
    pub body: Vec<u8>,
    /// Which accepted connection carried the request.
    pub conn_id: usize,
}

impl Recorded {
    pub fn path(&self) -> &str {
        self.head.split_whitespace().nth(1).unwrap_or("")
    }

    pub fn method(&self) -> &str {
        self.head.split_whitespace().next().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find(|line| line.starts_with(&prefix))
            .map(|line| line[prefix.len()..].trim())
    }
}

pub enum Reply {
    /// Write the bytes and wait for the next request on the connection.
    Send(Vec<u8>),
    /// Write the bytes and close the connection.
    SendAndClose(Vec<u8>),
    /// Write the bytes and keep the connection open without reading.
    SendAndHang(Vec<u8>),
}

pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(handler);
        let conn_ids = Arc::new(AtomicUsize::new(0));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let conn_id = conn_ids.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(serve_connection(sock, conn_id, handler, recorded));
            }
        });

        Self { base_url, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_connection<F>(
    sock: TcpStream,
    conn_id: usize,
    handler: Arc<F>,
    recorded: Arc<Mutex<Vec<Recorded>>>,
) where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let mut reader = BufReader::new(sock);
    while let Some(request) = read_request(&mut reader, conn_id).await {
        recorded.lock().unwrap().push(request.clone());
        match handler(&request) {
            Reply::Send(bytes) => {
                if reader.get_mut().write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::SendAndClose(bytes) => {
                let _ = reader.get_mut().write_all(&bytes).await;
                return;
            }
            Reply::SendAndHang(bytes) => {
                let _ = reader.get_mut().write_all(&bytes).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                return;
            }
        }
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>, conn_id: usize) -> Option<Recorded> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        if line == "\r\n" {
            break;
        }
        head.push_str(&line.to_ascii_lowercase());
    }

    let mut request = Recorded { head, body: Vec::new(), conn_id };
    if let Some(len) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.ok()?;
        request.body = body;
    } else if request.header("transfer-encoding") == Some("chunked") {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await.ok()?;
            let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await.ok()?;
            if size == 0 {
                break;
            }
            request.body.extend_from_slice(&chunk[..size]);
        }
    }
    Some(request)
}

/// A JSON response. `extra` holds additional header lines, each ending in CRLF.
pub fn json_response(status: &str, body: &str, extra: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}\r\n{}",
        status,
        body.len(),
        extra,
        body
    )
    .into_bytes()
}
