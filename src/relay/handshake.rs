use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::room::JoinError;
use crate::config::MAX_HANDSHAKE_LEN;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Viewer,
}

/// First message on every relay connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Handshake {
    /// Room code as typed by a human: surrounding whitespace and case don't matter
    pub fn room_code(&self) -> Option<String> {
        self.room_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_ascii_uppercase)
    }

    /// Empty passwords count as no password
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Try to parse a handshake from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the document is still incomplete, otherwise
    /// the handshake and the offset just past it.
    pub fn parse(buf: &[u8]) -> Result<Option<(Handshake, usize)>> {
        let mut documents = serde_json::Deserializer::from_slice(buf).into_iter::<Handshake>();

        match documents.next() {
            None => Ok(None),
            Some(Ok(handshake)) => Ok(Some((handshake, documents.byte_offset()))),
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(RelayError::handshake(e.to_string())),
        }
    }
}

/// Reply sent once per connection after the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok { room_code: String },
    Error { message: String },
}

impl Response {
    pub fn ok(room_code: impl Into<String>) -> Self {
        Response::Ok {
            room_code: room_code.into(),
        }
    }

    pub fn rejected(err: &JoinError) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }
}

/// Read the handshake document within `limit`.
///
/// Bytes that arrived behind the document are returned so the relay can
/// forward them; one line terminator directly after the document belongs to
/// the handshake and is dropped.
pub async fn read_handshake<R>(reader: &mut R, limit: Duration) -> Result<(Handshake, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(limit, read_document(reader)).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::HandshakeTimeout(limit.as_secs())),
    }
}

async fn read_document<R>(reader: &mut R) -> Result<(Handshake, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(RelayError::handshake("connection closed before handshake"));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((handshake, offset)) = Handshake::parse(&buf)? {
            let rest = strip_line_terminator(&buf[offset..]);
            return Ok((handshake, rest.to_vec()));
        }

        if buf.len() > MAX_HANDSHAKE_LEN {
            return Err(RelayError::HandshakeTooLarge(MAX_HANDSHAKE_LEN));
        }
    }
}

/// A single `\n` or `\r\n` right after the document ends the handshake line.
/// Everything past it is payload and is kept byte for byte.
fn strip_line_terminator(rest: &[u8]) -> &[u8] {
    rest.strip_prefix(b"\r\n")
        .or_else(|| rest.strip_prefix(b"\n"))
        .unwrap_or(rest)
}

/// Write a response as one compact JSON document
pub async fn send_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(response)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host() {
        let (handshake, offset) = Handshake::parse(br#"{"role":"host"}"#).unwrap().unwrap();

        assert_eq!(handshake.role, Role::Host);
        assert_eq!(handshake.room_code(), None);
        assert_eq!(handshake.password(), None);
        assert_eq!(offset, 15);
    }

    #[test]
    fn test_parse_viewer_with_password() {
        let raw = br#"{"role":"viewer","room_code":" ab12cd34 ","password":"secret","client":"x"}"#;
        let (handshake, _) = Handshake::parse(raw).unwrap().unwrap();

        assert_eq!(handshake.role, Role::Viewer);
        assert_eq!(handshake.room_code().as_deref(), Some("AB12CD34"));
        assert_eq!(handshake.password(), Some("secret"));
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let raw = br#"{"role":"viewer","room_code":"","password":""}"#;
        let (handshake, _) = Handshake::parse(raw).unwrap().unwrap();

        assert_eq!(handshake.room_code(), None);
        assert_eq!(handshake.password(), None);
    }

    #[test]
    fn test_partial_document_needs_more() {
        assert!(Handshake::parse(br#"{"role":"ho"#).unwrap().is_none());
        assert!(Handshake::parse(b"  ").unwrap().is_none());
    }

    #[test]
    fn test_malformed_documents() {
        assert!(Handshake::parse(b"hello").is_err());
        assert!(Handshake::parse(br#"{"role":"admin"}"#).is_err());
        assert!(Handshake::parse(br#"{"room_code":"AB12CD34"}"#).is_err());
        assert!(Handshake::parse(br#""host""#).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let ok = serde_json::to_string(&Response::ok("AB12CD34")).unwrap();
        assert_eq!(ok, r#"{"status":"ok","room_code":"AB12CD34"}"#);

        let not_found = serde_json::to_string(&Response::rejected(&JoinError::RoomNotFound)).unwrap();
        assert_eq!(not_found, r#"{"status":"error","message":"Room not found"}"#);

        let wrong = serde_json::to_string(&Response::rejected(&JoinError::WrongPassword)).unwrap();
        assert_eq!(wrong, r#"{"status":"error","message":"Wrong password"}"#);
    }

    #[tokio::test]
    async fn test_read_handshake_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            client.write_all(br#"{"role":"#).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(b"\"host\"}\nhello").await.unwrap();
            client
        });

        let (handshake, rest) = read_handshake(&mut server, Duration::from_secs(5))
            .await
            .unwrap();
        let _client = writer.await.unwrap();

        assert_eq!(handshake.role, Role::Host);
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn test_payload_whitespace_survives() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client
            .write_all(b"{\"role\":\"viewer\",\"room_code\":\"AB12CD34\"}\r\n\t \x0bbinary")
            .await
            .unwrap();

        let (_, rest) = read_handshake(&mut server, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rest, b"\t \x0bbinary");
    }

    #[tokio::test]
    async fn test_only_one_line_terminator_is_dropped() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(b"{\"role\":\"host\"}\n\nsecond line").await.unwrap();

        let (_, rest) = read_handshake(&mut server, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rest, b"\nsecond line");
    }

    #[tokio::test]
    async fn test_read_handshake_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let result = read_handshake(&mut server, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RelayError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_read_handshake_timeout() {
        let (_client, mut server) = tokio::io::duplex(64);

        let result = read_handshake(&mut server, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(RelayError::HandshakeTimeout(_))));
    }

    #[tokio::test]
    async fn test_read_handshake_too_large() {
        let (mut client, mut server) = tokio::io::duplex(16 * 1024);
        let mut oversized = br#"{"role":"host","password":""#.to_vec();
        oversized.extend(std::iter::repeat(b'x').take(MAX_HANDSHAKE_LEN + 10));
        client.write_all(&oversized).await.unwrap();

        let result = read_handshake(&mut server, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RelayError::HandshakeTooLarge(_))));
    }

    #[tokio::test]
    async fn test_send_response() {
        let (mut client, mut server) = tokio::io::duplex(256);

        send_response(&mut server, &Response::ok("AB12CD34")).await.unwrap();
        drop(server);

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, r#"{"status":"ok","room_code":"AB12CD34"}"#);
    }
}
