//! Per-stream state and the user-facing stream handle.
//!
//! [`StreamState`] is the engine-facing half: the receiver pushes payload
//! buffers into it under the session's stream-table lock and wakes the
//! relevant waiter. [`Stream`] is the consumer-facing half: buffered reads,
//! window-respecting writes, and half-close.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::alloc::{BufferPool, default_pool};
use crate::error::Error;
use crate::frame::{Cmd, Frame, WindowUpdate};
use crate::session::{OPEN_CLOSE_TIMEOUT, SessionInner};
use crate::shaper::Class;

/// Receive queue: owned payload regions in arrival order, with a read
/// offset into the front region.
#[derive(Default)]
struct RecvQueue {
    buffers: VecDeque<Vec<u8>>,
    head: usize,
}

impl RecvQueue {
    fn buffered(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum::<usize>() - self.head
    }

    fn push(&mut self, buf: Vec<u8>) {
        self.buffers.push_back(buf);
    }

    /// Copy out up to `out.len()` bytes, releasing drained regions to the
    /// pool.
    fn pop_into(&mut self, out: &mut [u8], pool: &BufferPool) -> usize {
        let mut n = 0;
        while n < out.len() {
            let Some(front) = self.buffers.front() else {
                break;
            };
            let take = (front.len() - self.head).min(out.len() - n);
            out[n..n + take].copy_from_slice(&front[self.head..self.head + take]);
            n += take;
            self.head += take;
            if self.head == front.len() {
                if let Some(drained) = self.buffers.pop_front() {
                    pool.put(drained);
                }
                self.head = 0;
            }
        }
        n
    }

    /// Drop everything still queued, returning the byte count so the caller
    /// can credit the token bucket.
    fn recycle(&mut self, pool: &BufferPool) -> usize {
        let n = self.buffered();
        self.head = 0;
        for buf in self.buffers.drain(..) {
            pool.put(buf);
        }
        n
    }
}

/// Shared per-stream state, owned jointly by the stream table and the
/// consumer-facing handle.
pub(crate) struct StreamState {
    id: u32,
    queue: Mutex<RecvQueue>,
    read_ready: Notify,
    write_ready: Notify,
    /// Peer half-closed its sending side.
    fin: AtomicBool,
    /// The session died or was closed underneath this stream.
    session_gone: AtomicBool,
    /// Local half-close; set by `close` or drop, once.
    local_closed: AtomicBool,
    /// Cumulative bytes handed to the local consumer (wrapping).
    num_read: AtomicU32,
    /// Cumulative bytes submitted in `PSH` frames (wrapping).
    num_written: AtomicU32,
    /// Peer's reported cumulative consumed bytes.
    peer_consumed: AtomicU32,
    /// Peer's advertised free receive window.
    peer_window: AtomicU32,
}

impl StreamState {
    pub(crate) fn new(id: u32, initial_window: u32) -> Arc<StreamState> {
        Arc::new(StreamState {
            id,
            queue: Mutex::new(RecvQueue::default()),
            read_ready: Notify::new(),
            write_ready: Notify::new(),
            fin: AtomicBool::new(false),
            session_gone: AtomicBool::new(false),
            local_closed: AtomicBool::new(false),
            num_read: AtomicU32::new(0),
            num_written: AtomicU32::new(0),
            peer_consumed: AtomicU32::new(0),
            peer_window: AtomicU32::new(initial_window),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Append an owned payload buffer. Called by the receiver under the
    /// stream-table lock; must never block on consumer code.
    pub(crate) fn push_bytes(&self, buf: Vec<u8>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
    }

    pub(crate) fn fin(&self) {
        self.fin.store(true, Ordering::Release);
    }

    pub(crate) fn notify_read_event(&self) {
        self.read_ready.notify_one();
    }

    pub(crate) fn notify_write_event(&self) {
        self.write_ready.notify_one();
    }

    /// Mark the session as gone and wake both waiters.
    pub(crate) fn session_close(&self) {
        self.session_gone.store(true, Ordering::Release);
        self.read_ready.notify_one();
        self.write_ready.notify_one();
    }

    /// Drain the receive queue at teardown; the returned count goes back to
    /// the session's token bucket.
    pub(crate) fn recycle_tokens(&self, pool: &BufferPool) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recycle(pool)
    }

    pub(crate) fn update(&self, upd: WindowUpdate) {
        self.peer_consumed.store(upd.consumed, Ordering::Release);
        self.peer_window.store(upd.window, Ordering::Release);
    }

    pub(crate) fn num_written(&self) -> u32 {
        self.num_written.load(Ordering::Acquire)
    }

    /// Bytes the peer will currently accept:
    /// `window − (written − consumed)`, zero when in-flight data fills it.
    fn send_window(&self) -> usize {
        let inflight = self
            .num_written
            .load(Ordering::Acquire)
            .wrapping_sub(self.peer_consumed.load(Ordering::Acquire));
        self.peer_window.load(Ordering::Acquire).saturating_sub(inflight) as usize
    }
}

/// One logical, ordered, flow-controlled byte stream within a session.
///
/// Dropping the stream half-closes it: a best-effort `FIN` goes out and any
/// unread buffered bytes are credited back to the session.
pub struct Stream {
    state: Arc<StreamState>,
    session: Arc<SessionInner>,
}

impl Stream {
    pub(crate) fn new(state: Arc<StreamState>, session: Arc<SessionInner>) -> Stream {
        Stream { state, session }
    }

    /// The stream's wire identifier.
    pub fn id(&self) -> u32 {
        self.state.id
    }

    /// Pull buffered bytes without waiting, distinguishing "nothing yet"
    /// (`WouldBlock`) from EOF (`Ok(0)`) and terminal states.
    fn poll_buffered(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let n = {
            let mut queue = self
                .state
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            queue.pop_into(buf, default_pool())
        };
        if n > 0 {
            self.state.num_read.fetch_add(n as u32, Ordering::AcqRel);
            self.session.return_tokens(n);
            return Ok(n);
        }
        if self.state.local_closed.load(Ordering::Acquire)
            || self.state.session_gone.load(Ordering::Acquire)
            || self.session.die.is_fired()
        {
            return Err(Error::ClosedPipe);
        }
        if self.state.fin.load(Ordering::Acquire) {
            return Ok(0);
        }
        if self.session.read_fault.is_fired() {
            return Err(self.session.read_fault.error());
        }
        if self.session.proto_fault.is_fired() {
            return Err(self.session.proto_fault.error());
        }
        Err(Error::WouldBlock)
    }

    /// The window update announcing everything consumed so far.
    fn window_update(&self) -> Frame {
        let upd = WindowUpdate {
            consumed: self.state.num_read.load(Ordering::Acquire),
            window: self.session.config().max_receive_buffer as u32,
        };
        Frame::with_data(
            self.session.config().version,
            Cmd::Upd,
            self.state.id,
            upd.encode().to_vec(),
        )
    }

    /// Read buffered bytes, waiting until some arrive, the peer half-closes
    /// (`Ok(0)`), or the session reaches a terminal state.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let ready = self.state.read_ready.notified();
            match self.poll_buffered(buf) {
                Ok(n) if n > 0 => {
                    // The update is cumulative; a failed submission is healed
                    // by the next read's.
                    let _ = self
                        .session
                        .write_frame(self.window_update(), None, Class::Ctrl)
                        .await;
                    return Ok(n);
                }
                Err(Error::WouldBlock) => {}
                other => return other,
            }
            tokio::select! {
                _ = ready => {}
                _ = self.session.die.fired() => {}
                _ = self.session.read_fault.fired() => {}
                _ = self.session.proto_fault.fired() => {}
            }
        }
    }

    /// Non-blocking read: `WouldBlock` when nothing is buffered yet.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.poll_buffered(buf)?;
        if n > 0 && !self.session.try_send_frame(self.window_update(), Class::Ctrl) {
            warn!(stream = self.state.id, "window update dropped; write queue full");
        }
        Ok(n)
    }

    /// Write bytes, chunking by the peer's window and the session's frame
    /// size, waiting whenever the window is closed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let frame_size = self.session.config().max_frame_size;
        let version = self.session.config().version;
        let mut sent = 0;
        while sent < buf.len() {
            if self.state.local_closed.load(Ordering::Acquire)
                || self.state.session_gone.load(Ordering::Acquire)
            {
                return Err(Error::ClosedPipe);
            }
            let window = self.state.send_window();
            if window == 0 {
                let ready = self.state.write_ready.notified();
                if self.state.send_window() > 0 {
                    continue;
                }
                tokio::select! {
                    _ = ready => {}
                    _ = self.session.die.fired() => return Err(Error::ClosedPipe),
                    _ = self.session.write_fault.fired() => {
                        return Err(self.session.write_fault.error());
                    }
                }
                continue;
            }
            let take = window.min(frame_size).min(buf.len() - sent);
            let frame = Frame::with_data(
                version,
                Cmd::Psh,
                self.state.id,
                buf[sent..sent + take].to_vec(),
            );
            // Counted before submission so a racing window update from the
            // peer can never observe consumed > written.
            self.state.num_written.fetch_add(take as u32, Ordering::AcqRel);
            let n = self.session.write_frame(frame, None, Class::Data).await?;
            sent += n;
        }
        Ok(sent)
    }

    /// Half-close the stream: send `FIN` and release its receive buffers.
    /// A second close fails with `ClosedPipe`.
    pub async fn close(&self) -> Result<(), Error> {
        if self.state.local_closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ClosedPipe);
        }
        self.state.read_ready.notify_one();
        self.state.write_ready.notify_one();
        let frame = Frame::new(self.session.config().version, Cmd::Fin, self.state.id);
        let deadline = Instant::now() + OPEN_CLOSE_TIMEOUT;
        let result = self
            .session
            .write_frame(frame, Some(deadline), Class::Ctrl)
            .await;
        self.session.stream_closed(self.state.id);
        result.map(drop)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.state.local_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.session.is_closed() {
            let frame = Frame::new(self.session.config().version, Cmd::Fin, self.state.id);
            if !self.session.try_send_frame(frame, Class::Ctrl) {
                warn!(stream = self.state.id, "dropped without FIN; write queue full");
            }
        }
        self.session.stream_closed(self.state.id);
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.state.id)
            .field("fin", &self.state.fin.load(Ordering::Relaxed))
            .finish()
    }
}
