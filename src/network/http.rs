//! Minimal HTTP/1.1
//!
//! Just enough of HTTP to serve the pull endpoint, the camera endpoint and
//! the WebSocket upgrade on one listener. One request per connection.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest accepted request (head plus body).
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// HTTP parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    /// Malformed request.
    #[error("Invalid HTTP: {0}")]
    Invalid(String),

    /// Request exceeds [`MAX_REQUEST_BYTES`].
    #[error("Request too large")]
    TooLarge,

    /// Peer closed before the request was complete.
    #[error("Connection closed mid-request")]
    Truncated,

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Parsed request.
#[derive(Debug)]
pub struct HttpRequest {
    /// Method, as sent
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Parse a complete request from bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, HttpError> {
        let headers_end = find_headers_end(buf)
            .ok_or_else(|| HttpError::Invalid("Incomplete HTTP request".to_string()))?;

        let head = std::str::from_utf8(&buf[..headers_end])
            .map_err(|_| HttpError::Invalid("Invalid UTF-8 in headers".to_string()))?;
        let body_start = headers_end + 4;

        let mut lines = head.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| HttpError::Invalid("Empty request".to_string()))?;
        let (method, path) = parse_request_line(request_line)?;

        let mut headers = Vec::new();
        let mut content_length = 0;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = parse_header_line(line)?;
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value
                    .parse()
                    .map_err(|_| HttpError::Invalid("Invalid Content-Length".to_string()))?;
            }
            headers.push((name, value));
        }

        let available = buf.len().saturating_sub(body_start);
        if available < content_length {
            return Err(HttpError::Invalid(format!(
                "Incomplete body: expected {}, got {}",
                content_length, available
            )));
        }
        let body = buf[body_start..body_start + content_length].to_vec();

        Ok(HttpRequest { method, path, headers, body })
    }

    /// Header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Sec-WebSocket-Key` of an upgrade request, if this is one.
    pub fn websocket_key(&self) -> Option<&str> {
        let upgrade = self.header("upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return None;
        }
        self.header("sec-websocket-key")
    }

    /// Whether the buffer holds a full request.
    pub fn is_complete(buf: &[u8]) -> bool {
        match find_headers_end(buf) {
            Some(end) => {
                let wanted = find_content_length(&buf[..end]).unwrap_or(0);
                buf.len().saturating_sub(end + 4) >= wanted
            }
            None => false,
        }
    }
}

/// Read one complete request from a stream.
pub async fn read_request<R>(reader: &mut R) -> Result<HttpRequest, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = reader.read(&mut chunk).await.map_err(|e| HttpError::Io(e.to_string()))?;
        if n == 0 {
            return Err(HttpError::Truncated);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(HttpError::TooLarge);
        }
        if HttpRequest::is_complete(&buf) {
            return HttpRequest::parse(&buf);
        }
    }
}

/// Response builder.
#[derive(Debug)]
pub struct HttpResponse {
    status: u16,
    status_text: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn status(status: u16, status_text: &'static str) -> Self {
        Self { status, status_text, headers: Vec::new(), body: Vec::new() }
    }

    /// 200
    pub fn ok() -> Self {
        Self::status(200, "OK")
    }

    /// 400
    pub fn bad_request() -> Self {
        Self::status(400, "Bad Request")
    }

    /// 404
    pub fn not_found() -> Self {
        Self::status(404, "Not Found")
    }

    /// 500
    pub fn internal_error() -> Self {
        Self::status(500, "Internal Server Error")
    }

    /// 101 answer to a WebSocket upgrade.
    pub fn switching_protocols(accept_key: String) -> Self {
        Self::status(101, "Switching Protocols")
            .with_header("Upgrade", "websocket".to_string())
            .with_header("Connection", "Upgrade".to_string())
            .with_header("Sec-WebSocket-Accept", accept_key)
    }

    /// Status code.
    pub fn code(&self) -> u16 {
        self.status
    }

    /// JSON body.
    pub fn with_json(mut self, json: &str) -> Self {
        self.body = json.as_bytes().to_vec();
        self.headers.push(("Content-Type", "application/json".to_string()));
        self
    }

    /// Extra header.
    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Serialize to wire bytes.
    pub fn build(self) -> Vec<u8> {
        let upgrade = self.status == 101;
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);
        if !upgrade {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
            out.push_str(&format!(
                "Date: {}\r\n",
                chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
            ));
            out.push_str("Access-Control-Allow-Origin: *\r\n");
        }
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        if !upgrade {
            out.push_str("Connection: close\r\n");
        }
        out.push_str("\r\n");

        let mut buf = out.into_bytes();
        buf.extend_from_slice(&self.body);
        buf
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_content_length(head: &[u8]) -> Option<usize> {
    let head = std::str::from_utf8(head).ok()?;
    head.lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn parse_request_line(line: &str) -> Result<(String, String), HttpError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(_version)) => {
            let path = target.split('?').next().unwrap_or(target);
            Ok((method.to_string(), path.to_string()))
        }
        _ => Err(HttpError::Invalid(format!("Invalid request line: {}", line))),
    }
}

fn parse_header_line(line: &str) -> Result<(String, String), HttpError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HttpError::Invalid(format!("Invalid header: {}", line)))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camera_post() {
        let raw = b"POST /camera?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\n{\"plid\":3}";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/camera");
        assert_eq!(req.header("host"), Some("a"));
        assert_eq!(req.body, b"{\"plid\":3}");
        assert!(req.websocket_key().is_none());
    }

    #[test]
    fn test_upgrade_detection() {
        let raw = b"GET / HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let req = HttpRequest::parse(raw).unwrap();
        assert_eq!(req.websocket_key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
    }

    #[test]
    fn test_is_complete() {
        assert!(HttpRequest::is_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(HttpRequest::is_complete(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nHello"));
        assert!(!HttpRequest::is_complete(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nHello"));
        assert!(!HttpRequest::is_complete(b"POST / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_malformed_requests() {
        assert!(matches!(HttpRequest::parse(b"GET\r\n\r\n"), Err(HttpError::Invalid(_))));
        assert!(matches!(
            HttpRequest::parse(b"GET / HTTP/1.1\r\nbroken\r\n\r\n"),
            Err(HttpError::Invalid(_))
        ));
        assert!(matches!(
            HttpRequest::parse(b"GET / HTTP/1.1\r\nContent-Length: x\r\n\r\n"),
            Err(HttpError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_read_request_across_chunks() {
        let (mut client, mut server) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client
                .write_all(b"GET /api/leaderboard HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            client
        });
        let req = read_request(&mut server).await.unwrap();
        assert_eq!(req.path, "/api/leaderboard");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_request_truncated() {
        let (mut client, mut server) = tokio::io::duplex(64);
        {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        }
        drop(client);
        assert_eq!(read_request(&mut server).await.unwrap_err(), HttpError::Truncated);
    }

    #[test]
    fn test_response_build() {
        let text = String::from_utf8(HttpResponse::ok().with_json(r#"{"ok":true}"#).build()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"ok\":true}"));

        let upgrade = String::from_utf8(HttpResponse::switching_protocols("abc".into()).build()).unwrap();
        assert!(upgrade.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(upgrade.contains("Sec-WebSocket-Accept: abc\r\n"));
        assert!(!upgrade.contains("Content-Length"));
    }
}
