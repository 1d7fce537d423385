//! Line-delimited JSON streams from the master.
//!
//! Each line is a frame: `{"result": T}` for data, `{"error": {...}}` when
//! the master gives up. Lines may be split across transport chunks.

use std::collections::VecDeque;
use std::marker::PhantomData;

use futures_util::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ScopeError};

#[derive(Deserialize)]
struct Frame<T> {
    result: Option<T>,
    error: Option<FrameError>,
}

#[derive(Deserialize)]
struct FrameError {
    #[serde(default, alias = "grpcCode")]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Incremental decoder: feed it raw chunks, get back complete frames.
pub struct NdjsonDecoder<T> {
    buf: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for NdjsonDecoder<T> {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> NdjsonDecoder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete line in `chunk` plus whatever was buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<T>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = decode_line(&line)? {
                out.push(event);
            }
        }
        Ok(out)
    }

    /// Decode a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Option<T>> {
        let line = std::mem::take(&mut self.buf);
        decode_line(&line)
    }
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<Option<T>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let frame: Frame<T> = serde_json::from_slice(trimmed)?;
    if let Some(err) = frame.error {
        return Err(ScopeError::StreamFrame {
            code: err.code,
            message: err.message,
        });
    }
    Ok(frame.result)
}

/// Turn a byte stream into a stream of decoded frames. Decoding stops at the
/// first error, which is yielded as the last item.
pub fn decode_ndjson<T, S, B, E>(body: S) -> impl Stream<Item = Result<T>> + Send
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ScopeError> + Send + 'static,
{
    struct State<T, S> {
        body: S,
        decoder: NdjsonDecoder<T>,
        pending: VecDeque<T>,
        done: bool,
    }

    let state = State {
        body,
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => match st.decoder.push(chunk.as_ref()) {
                    Ok(events) => st.pending.extend(events),
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.done = true;
                    match st.decoder.finish() {
                        Ok(Some(event)) => return Some((Ok(event), st)),
                        Ok(None) => return None,
                        Err(e) => return Some((Err(e), st)),
                    }
                }
            }
        }
    })
}

/// Feed every event of `events` to `on_event` in arrival order.
///
/// Returns the number of events delivered once the stream ends. A fired
/// `cancel` token ends the read with [`ScopeError::Cancelled`], which callers
/// treat as a silent stop; transport and server failures come back as their
/// own errors and are never folded into an empty result.
pub async fn read_stream<T, S, F>(events: S, cancel: &CancellationToken, mut on_event: F) -> Result<usize>
where
    S: Stream<Item = Result<T>>,
    F: FnMut(T),
{
    futures_util::pin_mut!(events);
    let mut delivered = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(delivered, "stream read cancelled");
                return Err(ScopeError::Cancelled);
            }
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                on_event(event);
                delivered += 1;
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    debug!(delivered, "stream ended");
    Ok(delivered)
}
