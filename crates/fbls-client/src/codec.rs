//! `Content-Length` framing for JSON-RPC messages on stdio.

use std::io::{BufRead, Read, Write};

use anyhow::{bail, Context, Result};
use serde::Serialize;

/// Upper bound on a single frame body.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Reads JSON-RPC frames from a buffered reader.
pub struct FrameReader<R> {
    reader: R,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Returns `Ok(None)` on a clean end of input between frames.
    pub fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(content_length) = self.read_headers()? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_BYTES {
            bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut saw_header_bytes = false;
        let mut line = String::new();

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .context("reading header line")?;
            if read == 0 {
                if !saw_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected end of input while reading headers");
            }
            saw_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("Content-Length") {
                    let length = value
                        .trim()
                        .parse::<usize>()
                        .context("invalid Content-Length value")?;
                    content_length = Some(length);
                }
            }
        }

        match content_length {
            Some(length) => Ok(Some(length)),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes JSON-RPC messages with `Content-Length` framing.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_notification<P: Serialize>(&mut self, method: &str, params: &P) -> Result<()> {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_frame(&message)
    }

    pub fn write_frame(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(message).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .context("writing frame header")?;
        self.writer
            .write_all(body.as_bytes())
            .context("writing frame body")?;
        self.writer.flush().context("flushing frame")
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
