//! Response body decorator that copies what it forwards

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

type OnComplete = Box<dyn FnOnce(&[u8], usize) + Send + 'static>;

/// Forwards every frame of `inner` unchanged while mirroring data bytes
///
/// At most `limit` bytes are kept. `on_complete(captured, total_len)` runs
/// exactly once: when the stream ends or errors, or when the body is dropped
/// early (client disconnect).
pub struct MirrorBody {
    inner: Body,
    captured: BytesMut,
    total_len: usize,
    limit: usize,
    on_complete: Option<OnComplete>,
}

impl MirrorBody {
    pub fn new<F>(inner: Body, limit: usize, on_complete: F) -> Self
    where
        F: FnOnce(&[u8], usize) + Send + 'static,
    {
        Self {
            inner,
            captured: BytesMut::new(),
            total_len: 0,
            limit,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn mirror(&mut self, data: &Bytes) {
        self.total_len = self.total_len.saturating_add(data.len());
        let room = self.limit.saturating_sub(self.captured.len());
        if room > 0 {
            let take = room.min(data.len());
            self.captured.extend_from_slice(&data[..take]);
        }
    }

    fn finish(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(&self.captured, self.total_len);
        }
    }
}

impl HttpBody for MirrorBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.mirror(data);
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => this.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for MirrorBody {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for MirrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorBody")
            .field("total_len", &self.total_len)
            .field("limit", &self.limit)
            .field("completed", &self.on_complete.is_none())
            .finish()
    }
}
