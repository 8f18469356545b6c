//! JSON framing codec for the analysis server's stdio streams.
//!
//! The server speaks one JSON object per line by default. Servers that use the
//! `Content-Length: N\r\n\r\n{json}` header framing are supported through
//! [`Framing::ContentLength`]. This module provides [`FrameReader`] and
//! [`FrameWriter`] for async reading and writing of framed messages and knows
//! nothing about requests or responses.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub(crate) const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// How messages are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON object per `\n`-terminated line.
    #[default]
    Lines,
    /// `Content-Length` header block followed by the JSON body.
    ContentLength,
}

/// One complete inbound unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(serde_json::Value),
    /// The frame boundary was intact but the body was not usable JSON.
    /// The frame is dropped; the stream stays usable.
    Malformed { error: String },
}

/// Reads framed JSON messages from an async reader.
///
/// Partial frames are buffered until complete.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    framing: Framing,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, framing: Framing) -> Self {
        Self {
            reader: BufReader::new(reader),
            framing,
            buf: Vec::new(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` only when the stream itself is broken and framing cannot
    /// be recovered (I/O failure, EOF mid-frame, bad header block).
    pub async fn read_frame(&mut self) -> Result<Option<Inbound>> {
        match self.framing {
            Framing::Lines => self.read_line_frame().await,
            Framing::ContentLength => self.read_header_frame().await,
        }
    }

    async fn read_line_frame(&mut self) -> Result<Option<Inbound>> {
        // Room for a full-size body plus "\r\n"; never buffer more than that.
        let limit = MAX_FRAME_BYTES as u64 + 2;
        loop {
            self.buf.clear();
            let bytes_read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await
                .context("reading frame line")?;

            if bytes_read == 0 {
                return Ok(None);
            }
            if self.buf.last() != Some(&b'\n') {
                if bytes_read as u64 == limit {
                    self.skip_rest_of_line().await?;
                    self.buf.clear();
                    return Ok(Some(Inbound::Malformed {
                        error: format!("line frame exceeds maximum {MAX_FRAME_BYTES} bytes"),
                    }));
                }
                bail!("unexpected EOF inside a frame ({bytes_read} bytes buffered)");
            }

            let body = trim_line_ending(&self.buf);
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if body.len() > MAX_FRAME_BYTES {
                return Ok(Some(Inbound::Malformed {
                    error: format!("frame of {} bytes exceeds maximum {MAX_FRAME_BYTES}", body.len()),
                }));
            }
            return Ok(Some(parse_body(body)));
        }
    }

    /// Drop bytes up to and including the next `\n` without buffering them.
    async fn skip_rest_of_line(&mut self) -> Result<()> {
        loop {
            let available = self
                .reader
                .fill_buf()
                .await
                .context("skipping oversized line")?;
            if available.is_empty() {
                bail!("unexpected EOF while skipping oversized line");
            }
            if let Some(pos) = available.iter().position(|b| *b == b'\n') {
                self.reader.consume(pos + 1);
                return Ok(());
            }
            let len = available.len();
            self.reader.consume(len);
        }
    }

    async fn read_header_frame(&mut self) -> Result<Option<Inbound>> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None), // EOF
        };

        if content_length > MAX_FRAME_BYTES {
            // Skip the body so the next header block lines up.
            let skipped = tokio::io::copy(
                &mut (&mut self.reader).take(content_length as u64),
                &mut tokio::io::sink(),
            )
            .await
            .context("skipping oversized frame body")?;
            if skipped < content_length as u64 {
                bail!("unexpected EOF while skipping oversized frame");
            }
            return Ok(Some(Inbound::Malformed {
                error: format!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"),
            }));
        }

        self.buf.clear();
        self.buf.resize(content_length, 0);
        self.reader
            .read_exact(&mut self.buf)
            .await
            .context("reading frame body")?;

        Ok(Some(parse_body(&self.buf)))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.eq_ignore_ascii_case("Content-Length")
            {
                let len: usize = value
                    .trim()
                    .parse()
                    .context("invalid Content-Length value")?;
                content_length = Some(len);
            }
            // Ignore other headers (e.g. Content-Type)
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("missing Content-Length header"),
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_body(body: &[u8]) -> Inbound {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) if value.is_object() => Inbound::Message(value),
        Ok(other) => Inbound::Malformed {
            error: format!("expected a JSON object, got {other}"),
        },
        Err(e) => Inbound::Malformed {
            error: format!("invalid JSON: {e}"),
        },
    }
}

/// Writes framed JSON messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
    framing: Framing,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, framing: Framing) -> Self {
        Self { writer, framing }
    }

    /// Write one complete frame and flush.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(msg).context("serializing frame")?;

        match self.framing {
            Framing::Lines => {
                // serde_json never emits raw newlines, so a line is always one frame.
                self.writer
                    .write_all(body.as_bytes())
                    .await
                    .context("writing frame body")?;
                self.writer
                    .write_all(b"\n")
                    .await
                    .context("writing frame delimiter")?;
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                self.writer
                    .write_all(header.as_bytes())
                    .await
                    .context("writing frame header")?;
                self.writer
                    .write_all(body.as_bytes())
                    .await
                    .context("writing frame body")?;
            }
        }
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }
}
