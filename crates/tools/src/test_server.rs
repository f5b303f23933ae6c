//! HTTP responders for tool tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Serve a single request, answering with `status`, `content_type` and `body`.
///
/// Returns the base URL and a handle resolving to the raw request
/// (head and body) so tests can inspect headers.
pub(crate) async fn serve_once(status: u16, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
    let (base, requests) = serve_sequence(vec![(status, content_type, body)]).await;
    let handle = tokio::spawn(async move { requests.await.unwrap().remove(0) });
    (base, handle)
}

/// Serve one connection per entry of `responses`, in order.
///
/// The handle resolves to every raw request received once the last
/// response has been written.
pub(crate) async fn serve_sequence(responses: Vec<(u16, &str, &str)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let responses: Vec<(u16, String, String)> = responses
        .into_iter()
        .map(|(status, content_type, body)| (status, content_type.to_string(), body.to_string()))
        .collect();

    let handle = tokio::spawn(async move {
        let mut requests = Vec::with_capacity(responses.len());
        for (status, content_type, body) in responses {
            let (socket, _) = listener.accept().await.unwrap();
            requests.push(respond(socket, status, &content_type, &body).await);
        }
        requests
    });

    (format!("http://{addr}"), handle)
}

async fn respond(mut socket: TcpStream, status: u16, content_type: &str, body: &str) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(split) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..split]).to_ascii_lowercase();
        let len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
            .unwrap_or(0);
        if buf.len() >= split + 4 + len {
            break;
        }
    }

    let response = format!(
        "HTTP/1.1 {status} Test\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    let _ = socket.shutdown().await;
    String::from_utf8_lossy(&buf).to_string()
}
