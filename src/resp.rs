//! RESP (REdis Serialization Protocol) framing: decoding requests off the
//! wire into argument vectors, and encoding replies back onto it.
//!
//! The protocol itself is fixed by the wire format (simple strings, errors,
//! integers, bulk strings, arrays, plus the inline-command escape hatch) —
//! this module is the one place that knows the CRLF framing rules; nothing
//! above it touches raw bytes.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// A reply the dispatcher hands to the connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Reply>),
    NullArray,
    /// Raw, pre-encoded bytes — used for pass-through command families that
    /// build their own nested reply shapes ad hoc.
    Raw(Bytes),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    pub fn from_bulk_opt(v: Option<Bytes>) -> Reply {
        match v {
            Some(b) => Reply::Bulk(b),
            None => Reply::NullBulk,
        }
    }

    pub fn bulk_str(s: impl Into<String>) -> Reply {
        Reply::Bulk(Bytes::from(s.into().into_bytes()))
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Simple(s) => {
                out.extend_from_slice(b"+");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.extend_from_slice(b"-");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.extend_from_slice(b":");
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(b) => {
                out.extend_from_slice(b"$");
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Array(items) => {
                out.extend_from_slice(b"*");
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
            Reply::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }
}

impl From<crate::error::RedisError> for Reply {
    fn from(e: crate::error::RedisError) -> Self {
        Reply::Error(e.wire_message())
    }
}

/// Writes a reply to an async sink and flushes it.
pub async fn write_reply<W: AsyncWrite + Unpin>(w: &mut W, reply: &Reply) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(64);
    reply.encode(&mut buf);
    w.write_all(&buf).await?;
    w.flush().await
}

#[derive(Debug)]
pub enum DecodeError {
    Protocol(String),
}

impl From<DecodeError> for crate::error::RedisError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Protocol(msg) => crate::error::RedisError::Protocol(msg),
        }
    }
}

/// Reads one framed command off the wire: either a RESP array of bulk
/// strings, or an inline (space-separated) command terminated by CRLF/LF.
///
/// Returns `Ok(None)` on clean EOF (no bytes read before the stream closed).
pub async fn read_command<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> io::Result<Result<Option<Vec<Bytes>>, DecodeError>> {
    let mut first_line = Vec::new();
    let n = read_line(reader, &mut first_line).await?;
    if n == 0 {
        return Ok(Ok(None));
    }

    if first_line.first() == Some(&b'*') {
        match parse_multibulk(reader, &first_line).await? {
            Ok(args) => Ok(Ok(Some(args))),
            Err(e) => Ok(Err(e)),
        }
    } else {
        Ok(Ok(Some(parse_inline(&first_line))))
    }
}

async fn parse_multibulk<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    header: &[u8],
) -> io::Result<Result<Vec<Bytes>, DecodeError>> {
    let count_str = match std::str::from_utf8(&header[1..]) {
        Ok(s) => s,
        Err(_) => return Ok(Err(DecodeError::Protocol("invalid multibulk length".into()))),
    };
    let count: i64 = match count_str.trim().parse() {
        Ok(n) => n,
        Err(_) => return Ok(Err(DecodeError::Protocol("invalid multibulk length".into()))),
    };
    if count <= 0 {
        return Ok(Ok(Vec::new()));
    }
    if count > 1024 * 1024 {
        return Ok(Err(DecodeError::Protocol("invalid multibulk length".into())));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut line = Vec::new();
        let n = read_line(reader, &mut line).await?;
        if n == 0 {
            return Ok(Err(DecodeError::Protocol("unexpected end of stream".into())));
        }
        if line.first() != Some(&b'$') {
            return Ok(Err(DecodeError::Protocol(format!(
                "expected '$', got '{}'",
                line.first().copied().unwrap_or(b' ') as char
            ))));
        }
        let len_str = match std::str::from_utf8(&line[1..]) {
            Ok(s) => s,
            Err(_) => return Ok(Err(DecodeError::Protocol("invalid bulk length".into()))),
        };
        let len: i64 = match len_str.trim().parse() {
            Ok(n) => n,
            Err(_) => return Ok(Err(DecodeError::Protocol("invalid bulk length".into()))),
        };
        if len < 0 || len > 512 * 1024 * 1024 {
            return Ok(Err(DecodeError::Protocol("invalid bulk length".into())));
        }
        let mut buf = vec![0u8; len as usize + 2];
        read_exact(reader, &mut buf).await?;
        buf.truncate(len as usize);
        args.push(Bytes::from(buf));
    }
    Ok(Ok(args))
}

fn parse_inline(line: &[u8]) -> Vec<Bytes> {
    line.split(|b| *b == b' ')
        .filter(|tok| !tok.is_empty())
        .map(|tok| Bytes::copy_from_slice(tok))
        .collect()
}

/// Reads a line up to (and consuming) the trailing CRLF or LF, writing the
/// line contents (without the terminator) into `out`. Returns the number of
/// bytes read from the stream (0 means EOF with nothing consumed).
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, out: &mut Vec<u8>) -> io::Result<usize> {
    let n = reader.read_until(b'\n', out).await?;
    if n == 0 {
        return Ok(0);
    }
    if out.last() == Some(&b'\n') {
        out.pop();
        if out.last() == Some(&b'\r') {
            out.pop();
        }
    }
    Ok(n)
}

async fn read_exact<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    use tokio::io::AsyncReadExt;
    reader.read_exact(buf).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn decodes_multibulk() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec();
        let mut cursor = Cursor::new(input);
        let res = read_command(&mut cursor).await.unwrap().unwrap().unwrap();
        assert_eq!(res, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]);
    }

    #[tokio::test]
    async fn decodes_inline() {
        let input = b"PING\r\n".to_vec();
        let mut cursor = Cursor::new(input);
        let res = read_command(&mut cursor).await.unwrap().unwrap().unwrap();
        assert_eq!(res, vec![Bytes::from_static(b"PING")]);
    }

    #[tokio::test]
    async fn eof_returns_none() {
        let input: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(input);
        let res = read_command(&mut cursor).await.unwrap().unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn encodes_array_of_mixed_replies() {
        let reply = Reply::Array(vec![
            Reply::Integer(1),
            Reply::Bulk(Bytes::from_static(b"hi")),
            Reply::NullBulk,
        ]);
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        assert_eq!(&buf[..], b"*3\r\n:1\r\n$2\r\nhi\r\n$-1\r\n");
    }
}
