use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::decoder::{Decoded, Decoder};

/// Async wrapper feeding a [`Decoder`] from any reader.
#[derive(Debug)]
pub struct InputReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: Decoder,
}

impl<R> InputReader<R> {
    pub fn new(inner: R, decoder: Decoder) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4 * 1024),
            decoder,
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut Decoder {
        &mut self.decoder
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> InputReader<R> {
    /// Read until the decoder has something to report.
    ///
    /// Returns:
    /// - `Ok(Some(decoded))` with at least one input or reply,
    /// - `Ok(None)` on EOF (an unfinished line is dropped).
    ///
    /// Cancel safe: nothing is lost if the future is dropped between reads.
    pub async fn read_decoded(&mut self) -> std::io::Result<Option<Decoded>> {
        loop {
            self.buf.clear();
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let decoded = self.decoder.decode(&self.buf);
            if !decoded.is_empty() {
                return Ok(Some(decoded));
            }
        }
    }
}
