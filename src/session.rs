//! The multiplexed session: owns the transport and the engine tasks.
//!
//! A session splits its transport into halves and runs four tasks: the
//! receiver (admission-gated frame ingest), the shaper (priority ordering of
//! pending writes), the sender (single writer against the transport), and
//! the keepalive (liveness pings and dead-peer detection). The public
//! surface opens and accepts streams and races every blocking call against
//! the session's terminal latches.

use std::collections::HashMap;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace, warn};

use crate::alloc::default_pool;
use crate::config::Config;
use crate::error::Error;
use crate::frame::{Cmd, Frame, HEADER_SIZE, RawHeader, UPDATE_SIZE, WindowUpdate};
use crate::shaper::{Class, WriteRequest, WriteResult, shaper_loop};
use crate::stream::{Stream, StreamState};

/// Newly received streams queued for `accept_stream`.
const ACCEPT_BACKLOG: usize = 1024;

/// Deadline for submitting `SYN` and `FIN` frames.
pub(crate) const OPEN_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transports a session can run over: any reliable duplex byte stream.
///
/// The address accessors default to `None`; implementations over real
/// sockets override them so the session can echo its endpoints.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Transport for TcpStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {}

impl Transport for tokio::io::DuplexStream {}

/// One-shot failure latch. The error value is stored before the signal
/// flips, so an observer that saw the flip always reads the final error.
pub(crate) struct Latch {
    err: OnceLock<Error>,
    signal: watch::Sender<bool>,
}

impl Latch {
    fn new() -> Latch {
        let (signal, _) = watch::channel(false);
        Latch {
            err: OnceLock::new(),
            signal,
        }
    }

    /// Store the error and flip the signal. Only the first caller wins.
    pub(crate) fn fire(&self, err: Error) -> bool {
        let first = self.err.set(err).is_ok();
        if first {
            self.signal.send_replace(true);
        }
        first
    }

    pub(crate) fn is_fired(&self) -> bool {
        *self.signal.borrow()
    }

    /// The stored error; `ClosedPipe` if the latch has not fired.
    pub(crate) fn error(&self) -> Error {
        self.err.get().cloned().unwrap_or(Error::ClosedPipe)
    }

    /// Wait until the latch fires. Resolves immediately if it already has.
    pub(crate) async fn fired(&self) {
        let mut rx = self.signal.subscribe();
        let _ = rx.wait_for(|&fired| fired).await;
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}

/// Session state shared by the facade, the engine tasks, and every stream.
pub(crate) struct SessionInner {
    config: Config,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,

    /// Next locally issued stream id; parity is fixed at construction.
    next_stream_id: Mutex<u32>,
    go_away: AtomicBool,

    /// Credit for unread bytes buffered across all streams. The receiver
    /// parks while this is non-positive.
    bucket: AtomicI32,
    bucket_notify: mpsc::Sender<()>,

    streams: Mutex<HashMap<u32, Arc<StreamState>>>,
    accept_tx: mpsc::Sender<Arc<StreamState>>,

    pub(crate) die: Latch,
    pub(crate) read_fault: Latch,
    pub(crate) write_fault: Latch,
    pub(crate) proto_fault: Latch,

    /// Any frame arrived since the keepalive last looked.
    data_ready: AtomicBool,
    /// Deadline applied to `accept_stream`.
    deadline: Mutex<Option<Instant>>,

    /// Write-request sequence counter.
    seq: AtomicU32,
    shaper_tx: mpsc::Sender<WriteRequest>,
}

impl SessionInner {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.die.is_fired()
            || self.read_fault.is_fired()
            || self.write_fault.is_fired()
            || self.proto_fault.is_fired()
    }

    /// Credit the bucket after a consumer drained `n` bytes, waking the
    /// receiver when the credit turns positive.
    pub(crate) fn return_tokens(&self, n: usize) {
        if self.bucket.fetch_add(n as i32, Ordering::AcqRel) + n as i32 > 0 {
            self.notify_bucket();
        }
    }

    /// Coalesced receiver wake; never blocks.
    fn notify_bucket(&self) {
        let _ = self.bucket_notify.try_send(());
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Non-blocking frame submission for paths that cannot wait (drop
    /// handlers, opportunistic window updates). The completion is discarded.
    pub(crate) fn try_send_frame(&self, frame: Frame, class: Class) -> bool {
        let (result, _) = oneshot::channel();
        let req = WriteRequest {
            class,
            frame,
            seq: self.next_seq(),
            result,
        };
        self.shaper_tx.try_send(req).is_ok()
    }

    /// Submit a frame and wait for the transport write to complete.
    ///
    /// Both phases (admission into the shaper, then completion) race the
    /// session-die and write-fault latches and the optional deadline. A
    /// deadline hit during admission aborts cleanly; one during completion
    /// returns `Timeout` while the frame may still reach the wire.
    pub(crate) async fn write_frame(
        &self,
        frame: Frame,
        deadline: Option<Instant>,
        class: Class,
    ) -> Result<usize, Error> {
        let (result, completion) = oneshot::channel();
        let req = WriteRequest {
            class,
            frame,
            seq: self.next_seq(),
            result,
        };

        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        tokio::select! {
            sent = self.shaper_tx.send(req) => {
                if sent.is_err() {
                    return Err(Error::ClosedPipe);
                }
            }
            _ = self.die.fired() => return Err(Error::ClosedPipe),
            _ = self.write_fault.fired() => return Err(self.write_fault.error()),
            _ = &mut expired => return Err(Error::Timeout),
        }

        tokio::select! {
            done = completion => match done {
                Ok(WriteResult { err: Some(err), .. }) => Err(err),
                Ok(WriteResult { n, err: None }) => Ok(n),
                Err(_) => Err(Error::ClosedPipe),
            },
            _ = self.die.fired() => Err(Error::ClosedPipe),
            _ = self.write_fault.fired() => Err(self.write_fault.error()),
            _ = &mut expired => Err(Error::Timeout),
        }
    }

    /// Remove a stream from the table and credit its unread bytes back to
    /// the bucket.
    pub(crate) fn stream_closed(&self, sid: u32) {
        let recycled = {
            let mut streams = self
                .streams
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            streams
                .remove(&sid)
                .map(|state| state.recycle_tokens(default_pool()))
        };
        if let Some(n) = recycled {
            trace!(stream = sid, recycled = n, "stream closed");
            if n > 0 {
                self.return_tokens(n);
            }
        }
    }

    /// Terminate the session once: fire the die latch and tell every live
    /// stream. The engine tasks shut the transport down as they exit.
    pub(crate) fn close(&self) -> Result<(), Error> {
        if !self.die.fire(Error::ClosedPipe) {
            return Err(Error::ClosedPipe);
        }
        debug!("session closed");
        let streams = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for state in streams.values() {
            state.session_close();
        }
        Ok(())
    }
}

/// A multiplexed session over one reliable duplex transport.
///
/// Created with [`Session::client`] or [`Session::server`] around an
/// already-established connection; the two sides differ only in stream-id
/// parity. Must be created inside a tokio runtime; the engine tasks are
/// spawned immediately.
///
/// Dropping the session closes it.
pub struct Session {
    inner: Arc<SessionInner>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<Arc<StreamState>>>,
}

impl Session {
    /// Wrap the opening side of a connection. Issues odd stream ids
    /// starting at 1.
    pub fn client<T: Transport>(transport: T, config: Config) -> Result<Session, Error> {
        Session::new(transport, config, 1)
    }

    /// Wrap the accepting side of a connection. Issues even stream ids
    /// starting at 0.
    pub fn server<T: Transport>(transport: T, config: Config) -> Result<Session, Error> {
        Session::new(transport, config, 0)
    }

    fn new<T: Transport>(transport: T, config: Config, first_sid: u32) -> Result<Session, Error> {
        config.validate()?;

        let local_addr = transport.local_addr();
        let peer_addr = transport.peer_addr();
        let (read_half, write_half) = tokio::io::split(transport);

        let (bucket_notify, bucket_rx) = mpsc::channel(1);
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let (shaper_tx, shaper_rx) = mpsc::channel(1);
        let (writes_tx, writes_rx) = mpsc::channel(1);

        let inner = Arc::new(SessionInner {
            local_addr,
            peer_addr,
            next_stream_id: Mutex::new(first_sid),
            go_away: AtomicBool::new(false),
            bucket: AtomicI32::new(config.max_receive_buffer as i32),
            bucket_notify,
            streams: Mutex::new(HashMap::new()),
            accept_tx,
            die: Latch::new(),
            read_fault: Latch::new(),
            write_fault: Latch::new(),
            proto_fault: Latch::new(),
            data_ready: AtomicBool::new(false),
            deadline: Mutex::new(None),
            seq: AtomicU32::new(0),
            shaper_tx,
            config,
        });

        tokio::spawn(shaper_loop(inner.die.subscribe(), shaper_rx, writes_tx));
        tokio::spawn(recv_loop(inner.clone(), read_half, bucket_rx));
        tokio::spawn(send_loop(inner.clone(), write_half, writes_rx));
        if !inner.config.keep_alive_disabled {
            tokio::spawn(keepalive_loop(inner.clone()));
        }

        debug!(?local_addr, ?peer_addr, "session started");
        Ok(Session {
            inner,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
        })
    }

    /// Open a new stream towards the peer.
    ///
    /// Fails with `GoAway` once the local id space is exhausted, with the
    /// session's stored error after a fault, and with `Timeout` if the
    /// `SYN` cannot be submitted within the open deadline.
    pub async fn open_stream(&self) -> Result<Stream, Error> {
        if self.inner.is_closed() {
            return Err(Error::ClosedPipe);
        }

        let sid = {
            let mut next = self
                .inner
                .next_stream_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.go_away.load(Ordering::Acquire) {
                return Err(Error::GoAway);
            }
            let sid = *next;
            match sid.checked_add(2) {
                Some(n) => *next = n,
                None => {
                    self.inner.go_away.store(true, Ordering::Release);
                    return Err(Error::GoAway);
                }
            }
            sid
        };

        let frame = Frame::new(self.inner.config.version, Cmd::Syn, sid);
        self.inner
            .write_frame(frame, Some(Instant::now() + OPEN_CLOSE_TIMEOUT), Class::Ctrl)
            .await?;

        let state = StreamState::new(sid, self.inner.config.max_receive_buffer as u32);
        let mut streams = self
            .inner
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.read_fault.is_fired() {
            return Err(self.inner.read_fault.error());
        }
        if self.inner.write_fault.is_fired() {
            return Err(self.inner.write_fault.error());
        }
        if self.inner.die.is_fired() {
            return Err(Error::ClosedPipe);
        }
        streams.insert(sid, state.clone());
        trace!(stream = sid, "stream opened");
        Ok(Stream::new(state, self.inner.clone()))
    }

    /// Alias for [`open_stream`](Session::open_stream); the stream is
    /// itself the read/write/close capability.
    pub async fn open(&self) -> Result<Stream, Error> {
        self.open_stream().await
    }

    /// Wait for the next stream opened by the peer.
    ///
    /// Honors the session deadline (`Timeout`) and surfaces the stored
    /// error of whichever terminal latch fires first.
    pub async fn accept_stream(&self) -> Result<Stream, Error> {
        let deadline = *self
            .inner
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        let mut backlog = self.accept_rx.lock().await;
        tokio::select! {
            biased;

            _ = &mut expired => Err(Error::Timeout),
            _ = self.inner.read_fault.fired() => Err(self.inner.read_fault.error()),
            _ = self.inner.proto_fault.fired() => Err(self.inner.proto_fault.error()),
            _ = self.inner.die.fired() => Err(Error::ClosedPipe),
            state = backlog.recv() => match state {
                Some(state) => {
                    trace!(stream = state.id(), "stream accepted");
                    Ok(Stream::new(state, self.inner.clone()))
                }
                None => Err(Error::ClosedPipe),
            },
        }
    }

    /// Alias for [`accept_stream`](Session::accept_stream).
    pub async fn accept(&self) -> Result<Stream, Error> {
        self.accept_stream().await
    }

    /// Close the session and every stream on it. A second close fails with
    /// `ClosedPipe`.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.close()
    }

    /// Resolves once the session has been closed locally.
    pub async fn closed(&self) {
        self.inner.die.fired().await
    }

    /// Whether any terminal state has been reached.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of currently open streams; 0 once the session is closed.
    pub fn num_streams(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.inner
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Set the deadline applied to `accept_stream`. `None` disables it.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self
            .inner
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    /// Local address of the transport, when it exposes one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Peer address of the transport, when it exposes one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.inner.close();
    }
}

/// Read frames off the transport while receive credit lasts.
async fn recv_loop<T: Transport>(
    inner: Arc<SessionInner>,
    mut transport: ReadHalf<T>,
    mut bucket_rx: mpsc::Receiver<()>,
) {
    let pool = default_pool();
    let mut hdr = [0u8; HEADER_SIZE];

    loop {
        // Admission gate: the aggregate buffered bytes hit the budget, so
        // nothing more is read until a consumer frees credit.
        while inner.bucket.load(Ordering::Acquire) <= 0 && !inner.is_closed() {
            tokio::select! {
                _ = inner.die.fired() => return,
                _ = bucket_rx.recv() => {}
            }
        }

        let read = tokio::select! {
            read = transport.read_exact(&mut hdr) => read,
            _ = inner.die.fired() => return,
        };
        if let Err(e) = read {
            inner.read_fault.fire(e.into());
            return;
        }
        inner.data_ready.store(true, Ordering::Release);

        let hdr = RawHeader(hdr);
        if hdr.version() != inner.config.version {
            warn!(version = hdr.version(), "version mismatch");
            inner.proto_fault.fire(Error::InvalidProtocol);
            return;
        }
        let sid = hdr.stream_id();

        match Cmd::from_byte(hdr.cmd()) {
            Some(Cmd::Nop) => {}
            Some(Cmd::Syn) => {
                let fresh = {
                    let mut streams = inner
                        .streams
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if streams.contains_key(&sid) {
                        None
                    } else {
                        let state =
                            StreamState::new(sid, inner.config.max_receive_buffer as u32);
                        streams.insert(sid, state.clone());
                        Some(state)
                    }
                };
                // The accepter backpressures the receiver here; only session
                // death unblocks a full backlog.
                if let Some(state) = fresh {
                    trace!(stream = sid, "SYN");
                    tokio::select! {
                        _ = inner.accept_tx.send(state) => {}
                        _ = inner.die.fired() => {}
                    }
                }
            }
            Some(Cmd::Fin) => {
                trace!(stream = sid, "FIN");
                let streams = inner
                    .streams
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(state) = streams.get(&sid) {
                    state.fin();
                    state.notify_read_event();
                }
            }
            Some(Cmd::Psh) => {
                let len = hdr.length() as usize;
                if len > 0 {
                    let mut buf = pool.get(len);
                    let read = tokio::select! {
                        read = transport.read_exact(&mut buf) => read,
                        _ = inner.die.fired() => return,
                    };
                    if let Err(e) = read {
                        inner.read_fault.fire(e.into());
                        return;
                    }
                    let streams = inner
                        .streams
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if let Some(state) = streams.get(&sid) {
                        state.push_bytes(buf);
                        inner.bucket.fetch_sub(len as i32, Ordering::AcqRel);
                        state.notify_read_event();
                    } else {
                        // Data for a stream that just went away; the buffer
                        // goes straight back, no bucket debit.
                        trace!(stream = sid, len, "PSH for unknown stream");
                        pool.put(buf);
                    }
                }
            }
            Some(Cmd::Upd) => {
                let mut payload = [0u8; UPDATE_SIZE];
                let read = tokio::select! {
                    read = transport.read_exact(&mut payload) => read,
                    _ = inner.die.fired() => return,
                };
                if let Err(e) = read {
                    inner.read_fault.fire(e.into());
                    return;
                }
                let upd = WindowUpdate::decode(payload);
                let overrun = {
                    let streams = inner
                        .streams
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    match streams.get(&sid) {
                        Some(state) => {
                            if (state.num_written().wrapping_sub(upd.consumed) as i32) < 0 {
                                true
                            } else {
                                state.update(upd);
                                state.notify_write_event();
                                false
                            }
                        }
                        None => false,
                    }
                };
                if overrun {
                    warn!(stream = sid, consumed = upd.consumed, "consumed overrun");
                    inner.proto_fault.fire(Error::Consumed);
                    return;
                }
            }
            None => {
                warn!(cmd = hdr.cmd(), "unknown command");
                inner.proto_fault.fire(Error::InvalidProtocol);
                return;
            }
        }
    }
}

/// Serialize shaped requests onto the transport, one at a time.
async fn send_loop<T: Transport>(
    inner: Arc<SessionInner>,
    mut transport: WriteHalf<T>,
    mut writes: mpsc::Receiver<WriteRequest>,
) {
    let vectored = transport.is_write_vectored();
    let mut buf = if vectored {
        vec![0u8; HEADER_SIZE]
    } else {
        vec![0u8; HEADER_SIZE + (1 << 16)]
    };

    loop {
        let req = tokio::select! {
            _ = inner.die.fired() => break,
            req = writes.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };

        trace!(
            stream = req.frame.sid,
            cmd = ?req.frame.cmd,
            len = req.frame.data.len(),
            "send"
        );
        buf[..HEADER_SIZE].copy_from_slice(&req.frame.header_bytes());

        let wrote = tokio::select! {
            wrote = write_frame_out(&mut transport, &mut buf, &req.frame.data, vectored) => Some(wrote),
            _ = inner.die.fired() => None,
        };
        // A session death mid-write drops the request; the submitter sees
        // the completion channel close and reports `ClosedPipe`.
        let Some((written, err)) = wrote else {
            break;
        };
        let err = err.map(Error::from);

        let _ = req.result.send(WriteResult {
            n: written.saturating_sub(HEADER_SIZE),
            err: err.clone(),
        });

        if let Some(err) = err {
            inner.write_fault.fire(err);
            break;
        }
    }

    let _ = transport.shutdown().await;
}

/// Write one frame (header already staged in `buf`), returning the bytes
/// that reached the transport alongside any error.
async fn write_frame_out<W: AsyncWrite + Unpin>(
    transport: &mut W,
    buf: &mut [u8],
    payload: &[u8],
    vectored: bool,
) -> (usize, Option<io::Error>) {
    let (written, err) = if vectored {
        write_all_vectored(transport, &buf[..HEADER_SIZE], payload).await
    } else {
        let total = HEADER_SIZE + payload.len();
        buf[HEADER_SIZE..total].copy_from_slice(payload);
        write_all_counting(transport, &buf[..total]).await
    };
    if err.is_some() {
        return (written, err);
    }
    match transport.flush().await {
        Ok(()) => (written, None),
        Err(e) => (written, Some(e)),
    }
}

/// Scatter-gather variant: header and payload go out as a 2-vector, saving
/// the payload copy.
async fn write_all_vectored<W: AsyncWrite + Unpin>(
    transport: &mut W,
    mut head: &[u8],
    mut body: &[u8],
) -> (usize, Option<io::Error>) {
    let mut written = 0;
    while !head.is_empty() || !body.is_empty() {
        let wrote = if head.is_empty() {
            transport.write(body).await
        } else if body.is_empty() {
            transport.write(head).await
        } else {
            transport
                .write_vectored(&[IoSlice::new(head), IoSlice::new(body)])
                .await
        };
        match wrote {
            Ok(0) => return (written, Some(io::ErrorKind::WriteZero.into())),
            Ok(n) => {
                written += n;
                let from_head = n.min(head.len());
                head = &head[from_head..];
                body = &body[n - from_head..];
            }
            Err(e) => return (written, Some(e)),
        }
    }
    (written, None)
}

async fn write_all_counting<W: AsyncWrite + Unpin>(
    transport: &mut W,
    mut data: &[u8],
) -> (usize, Option<io::Error>) {
    let mut written = 0;
    while !data.is_empty() {
        match transport.write(data).await {
            Ok(0) => return (written, Some(io::ErrorKind::WriteZero.into())),
            Ok(n) => {
                written += n;
                data = &data[n..];
            }
            Err(e) => return (written, Some(e)),
        }
    }
    (written, None)
}

/// Ping the peer and close the session when it goes silent.
async fn keepalive_loop(inner: Arc<SessionInner>) {
    let interval = inner.config.keep_alive_interval;
    let mut ping = interval_at(Instant::now() + interval, interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let timeout = inner.config.keep_alive_timeout;
    let mut silence = interval_at(Instant::now() + timeout, timeout);
    silence.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = inner.die.fired() => return,
            _ = ping.tick() => {
                let frame = Frame::new(inner.config.version, Cmd::Nop, 0);
                // The deadline is the next ping tick; a blocked submission
                // gives up rather than stack pings behind it.
                let _ = inner
                    .write_frame(frame, Some(Instant::now() + interval), Class::Ctrl)
                    .await;
                // Nudge a receiver that lost a credit race.
                inner.notify_bucket();
            }
            _ = silence.tick() => {
                if !inner.data_ready.swap(false, Ordering::AcqRel) {
                    // Nothing arrived for a whole period. A non-positive
                    // bucket means the receiver is parked on admission
                    // control, which makes the silence inconclusive.
                    if inner.bucket.load(Ordering::Acquire) > 0 {
                        warn!("peer silent past keepalive timeout");
                        let _ = inner.close();
                        return;
                    }
                }
            }
        }
    }
}
