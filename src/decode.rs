//! Streaming response decoding with decoded-size accounting.
//!
//! The pipeline is a push transform: compressed chunks go in as they arrive
//! off the wire, decoded bytes come out. Because the caller drives `push`,
//! pausing the consumer pauses the input too; nothing force-drains the
//! socket. The size limit counts *decoded* bytes, so a small compressed
//! payload that inflates past `max_size` fails even though few wire bytes
//! were read.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flate2::write::GzDecoder;

use crate::error::{Error, Result};

/// Content-Encoding values the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Brotli,
}

impl ContentEncoding {
    /// Map a `Content-Encoding` header value. Unknown encodings pass through
    /// as identity: the caller receives the raw bytes.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => Self::Gzip,
            Some("br") => Self::Brotli,
            _ => Self::Identity,
        }
    }
}

/// Character handling for the final body bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// Decode the body as UTF-8 text (lossy).
    #[default]
    Utf8,
    /// Hex-encode the body.
    Hex,
    /// Leave the body as raw bytes; `text()` is unavailable.
    Binary,
}

/// Marker error smuggled through the `io::Write` boundary when the decoded
/// size limit trips inside a decompressor.
#[derive(Debug)]
struct SizeLimitHit {
    limit: u64,
}

impl std::fmt::Display for SizeLimitHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decoded size limit of {} bytes exceeded", self.limit)
    }
}

impl std::error::Error for SizeLimitHit {}

#[derive(Debug, Default)]
struct SinkBuf {
    buf: Vec<u8>,
    written: u64,
    limit: Option<u64>,
}

/// Shared size-enforcing sink the decompressors write into.
///
/// Cloned handles observe the same buffer, letting the pipeline drain
/// decoded output without needing accessors on the decoder types.
#[derive(Debug, Clone, Default)]
struct SizeSink {
    inner: Arc<Mutex<SinkBuf>>,
}

impl SizeSink {
    fn with_limit(limit: Option<u64>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkBuf {
                limit,
                ..SinkBuf::default()
            })),
        }
    }

    fn drain(&self) -> Bytes {
        let mut inner = self.inner.lock().expect("decode sink mutex poisoned");
        Bytes::from(std::mem::take(&mut inner.buf))
    }

    fn written(&self) -> u64 {
        self.inner.lock().expect("decode sink mutex poisoned").written
    }
}

impl Write for SizeSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("decode sink mutex poisoned");
        if let Some(limit) = inner.limit {
            if inner.written + data.len() as u64 > limit {
                return Err(io::Error::other(SizeLimitHit { limit }));
            }
        }
        inner.buf.extend_from_slice(data);
        inner.written += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Decoder {
    Identity,
    Gzip(GzDecoder<SizeSink>),
    Brotli(Box<brotli::DecompressorWriter<SizeSink>>),
}

/// Push-based decoding pipeline for one response body.
pub struct DecodePipeline {
    decoder: Decoder,
    sink: SizeSink,
    label: &'static str,
}

impl DecodePipeline {
    pub fn new(encoding: ContentEncoding, max_size: Option<u64>) -> Self {
        let sink = SizeSink::with_limit(max_size);
        let (decoder, label) = match encoding {
            ContentEncoding::Identity => (Decoder::Identity, "identity"),
            ContentEncoding::Gzip => (Decoder::Gzip(GzDecoder::new(sink.clone())), "gzip"),
            ContentEncoding::Brotli => (
                Decoder::Brotli(Box::new(brotli::DecompressorWriter::new(sink.clone(), 4096))),
                "brotli",
            ),
        };
        Self {
            decoder,
            sink,
            label,
        }
    }

    /// Feed one wire chunk; returns whatever decoded bytes it produced.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Bytes> {
        match &mut self.decoder {
            Decoder::Identity => {
                let mut sink = self.sink.clone();
                sink.write_all(chunk).map_err(|e| self.map_io(e))?;
            }
            Decoder::Gzip(dec) => {
                dec.write_all(chunk).map_err(|e| self.map_io(e))?;
            }
            Decoder::Brotli(dec) => {
                dec.write_all(chunk).map_err(|e| self.map_io(e))?;
            }
        }
        Ok(self.sink.drain())
    }

    /// Finish the stream, validating that the compressed data was complete,
    /// and return any remaining decoded bytes.
    pub fn finish(self) -> Result<Bytes> {
        let label = self.label;
        let sink = self.sink;
        match self.decoder {
            Decoder::Identity => {}
            Decoder::Gzip(dec) => {
                dec.finish()
                    .map_err(|e| map_io_err(e, label))?;
            }
            Decoder::Brotli(dec) => {
                let mut dec = *dec;
                dec.flush().map_err(|e| map_io_err(e, label))?;
                // into_inner reports whether the stream reached a valid end;
                // a truncated stream flushes fine but is not finished.
                if dec.into_inner().is_err() {
                    return Err(Error::decode(format!(
                        "{label}: incomplete compressed stream"
                    )));
                }
            }
        }
        Ok(sink.drain())
    }

    /// Total decoded bytes produced so far.
    pub fn decoded_len(&self) -> u64 {
        self.sink.written()
    }

    fn map_io(&self, err: io::Error) -> Error {
        map_io_err(err, self.label)
    }
}

fn map_io_err(err: io::Error, label: &str) -> Error {
    if let Some(hit) = err.get_ref().and_then(|e| e.downcast_ref::<SizeLimitHit>()) {
        return Error::MaxResponseSize { limit: hit.limit };
    }
    Error::decode(format!("{label}: {err}"))
}

/// Statuses that never carry a body (RFC 9110 §6.4.1); HEAD responses are
/// handled separately by the caller.
pub fn bodyless_status(status: u16) -> bool {
    matches!(status, 100..=199 | 204 | 304)
}

/// Render final body bytes per the configured text encoding.
pub fn encode_text(body: &Bytes, encoding: TextEncoding) -> Option<String> {
    match encoding {
        TextEncoding::Utf8 => Some(String::from_utf8_lossy(body).into_owned()),
        TextEncoding::Hex => Some(body.iter().map(|b| format!("{b:02x}")).collect()),
        TextEncoding::Binary => None,
    }
}
