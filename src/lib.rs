#![deny(unsafe_code)]

//! Stream multiplexing over a single reliable duplex transport.
//!
//! A [`Session`] wraps an established connection (TCP, Unix socket, any
//! `AsyncRead + AsyncWrite` pair) and carries many logical, ordered,
//! flow-controlled byte [`Stream`]s over it. One side of the connection
//! opens streams, the other accepts them; both directions carry data.
//!
//! Flow control is two-layered: each stream advertises a receive window to
//! its peer through explicit window updates, and the session as a whole
//! stops reading from the transport once the configured receive budget is
//! buffered and unread. Control frames (stream opens, closes, keepalives,
//! window updates) jump ahead of queued data frames on the way out.
//!
//! # Example
//!
//! ```ignore
//! use braid::{Config, Session};
//!
//! // Caller side.
//! let conn = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
//! let session = Session::client(conn, Config::default())?;
//! let mut stream = session.open_stream().await?;
//! stream.write(b"hello").await?;
//!
//! // Callee side.
//! let (conn, _) = listener.accept().await?;
//! let session = Session::server(conn, Config::default())?;
//! let mut stream = session.accept_stream().await?;
//! let mut buf = [0u8; 5];
//! stream.read(&mut buf).await?;
//! ```

pub mod alloc;
pub mod config;
pub mod error;
pub mod frame;
mod session;
mod shaper;
mod stream;

pub use config::Config;
pub use error::Error;
pub use frame::{Cmd, Frame, HEADER_SIZE, RawHeader, UPDATE_SIZE, WindowUpdate};
pub use session::{Session, Transport};
pub use stream::Stream;
