use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest `Content-Length` body accepted from a peer.
pub(crate) const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// How a message was framed on the wire. Replies reuse the request's framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// One JSON document per line
    Line,
    /// `Content-Length` headers, blank line, then the body
    ContentLength,
}

#[derive(Debug)]
pub(crate) struct Incoming {
    pub framing: Framing,
    /// `Err` carries the JSON parse error for a well-framed message.
    pub payload: Result<Value, String>,
}

/// Read the next message. `Ok(None)` means clean EOF between messages.
pub(crate) async fn read_message<R>(reader: &mut R) -> Result<Option<Incoming>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Ok(Some(Incoming {
                framing: Framing::Line,
                payload: serde_json::from_str(trimmed).map_err(|e| e.to_string()),
            }));
        }
        let first_header = trimmed.to_string();
        return read_framed_body(reader, first_header).await.map(Some);
    }
}

async fn read_framed_body<R>(reader: &mut R, first_header: String) -> Result<Incoming, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = parse_content_length(&first_header)?;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(parsed) = parse_content_length(line)? {
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    if content_length > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Content-Length {content_length} exceeds limit of {MAX_FRAME_BYTES} bytes"),
        ));
    }
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    Ok(Incoming {
        framing: Framing::ContentLength,
        payload: serde_json::from_slice(&payload).map_err(|e| e.to_string()),
    })
}

fn parse_content_length(header: &str) -> Result<Option<usize>, std::io::Error> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Malformed MCP header line: {header}"),
        ));
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    value.trim().parse::<usize>().map(Some).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Invalid Content-Length header",
        )
    })
}

pub(crate) async fn write_message<W>(
    writer: &mut W,
    value: &Value,
    framing: Framing,
) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
