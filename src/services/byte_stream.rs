//! Chunked payloads moving between the HTTP layer, the core and the backend.

use bytes::{Bytes, BytesMut};
use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use std::{
    fmt, io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

/// Owned stream of payload chunks.
pub struct ByteStream(BoxStream<'static, io::Result<Bytes>>);

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self(stream.boxed())
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// Drain into one buffer. Only for payloads known to be small.
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Count and hash chunks as they pass. Once more than `limit` bytes have
    /// gone through, the stream yields an error and the meter reports
    /// `too_large`.
    pub fn metered(self, limit: u64) -> (ByteStream, Meter) {
        let meter = Meter(Arc::new(Mutex::new(Tally::new())));
        let sink = meter.clone();
        let stream = self.map(move |chunk| {
            let chunk = chunk?;
            let mut tally = sink.lock();
            tally.size += chunk.len() as u64;
            if tally.size > limit {
                tally.too_large = true;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("payload exceeds {limit} bytes"),
                ));
            }
            tally.context.consume(&chunk);
            Ok(chunk)
        });
        (ByteStream::new(stream), meter)
    }
}

impl Stream for ByteStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }
}

impl From<Bytes> for ByteStream {
    fn from(data: Bytes) -> Self {
        Self::new(stream::once(async move { Ok(data) }))
    }
}

impl From<&'static [u8]> for ByteStream {
    fn from(data: &'static [u8]) -> Self {
        Bytes::from_static(data).into()
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByteStream")
    }
}

struct Tally {
    context: md5::Context,
    size: u64,
    too_large: bool,
}

impl Tally {
    fn new() -> Self {
        Self {
            context: md5::Context::new(),
            size: 0,
            too_large: false,
        }
    }
}

/// Running size and MD5 of a [`ByteStream::metered`] stream.
#[derive(Clone)]
pub struct Meter(Arc<Mutex<Tally>>);

/// What a meter saw once the stream was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measured {
    pub digest: md5::Digest,
    pub size: u64,
    pub too_large: bool,
}

impl Meter {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tally> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn finish(&self) -> Measured {
        let tally = self.lock();
        Measured {
            digest: tally.context.clone().compute(),
            size: tally.size,
            too_large: tally.too_large,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        ByteStream::new(stream::iter(items))
    }

    #[tokio::test]
    async fn meter_hashes_across_chunks() {
        let (stream, meter) = chunks(&[b"he", b"llo"]).metered(u64::MAX);
        assert_eq!(&stream.into_bytes().await.unwrap()[..], b"hello");

        let measured = meter.finish();
        assert_eq!(measured.digest, md5::compute(b"hello"));
        assert_eq!(measured.size, 5);
        assert!(!measured.too_large);
    }

    #[tokio::test]
    async fn meter_stops_past_limit() {
        let (stream, meter) = chunks(&[b"abcd", b"efgh"]).metered(6);
        assert!(stream.into_bytes().await.is_err());
        assert!(meter.finish().too_large);
    }
}
