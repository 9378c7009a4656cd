//! Wire codec: fixed 8-byte frame headers plus window-update payloads.
//!
//! Every frame starts with the same header; only `PSH` and `UPD` carry a
//! payload. All multi-byte integers are little-endian.
//!
//! ```text
//! offset  size  field
//! 0       1     version
//! 1       1     command   (0=SYN, 1=FIN, 2=PSH, 3=NOP, 4=UPD)
//! 2       2     length    (payload byte count)
//! 4       4     stream id
//! 8       len   payload
//! ```

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of a window-update payload in bytes.
pub const UPDATE_SIZE: usize = 8;

/// Frame commands. The numeric values are a wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Open a stream.
    Syn = 0,
    /// Half-close a stream from the sender's side.
    Fin = 1,
    /// Carry stream data.
    Psh = 2,
    /// Keepalive; never touches a stream.
    Nop = 3,
    /// Window update: cumulative consumed bytes plus the free receive window.
    Upd = 4,
}

impl Cmd {
    /// Decode a command byte. Unknown values are a protocol violation the
    /// caller must treat as fatal.
    pub fn from_byte(b: u8) -> Option<Cmd> {
        match b {
            0 => Some(Cmd::Syn),
            1 => Some(Cmd::Fin),
            2 => Some(Cmd::Psh),
            3 => Some(Cmd::Nop),
            4 => Some(Cmd::Upd),
            _ => None,
        }
    }
}

/// A single frame: header fields plus an owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ver: u8,
    pub cmd: Cmd,
    pub sid: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// A payload-less frame (`SYN`, `FIN`, `NOP`).
    pub fn new(ver: u8, cmd: Cmd, sid: u32) -> Frame {
        Frame {
            ver,
            cmd,
            sid,
            data: Vec::new(),
        }
    }

    /// A frame carrying a payload (`PSH`, `UPD`).
    ///
    /// The payload must fit the 16-bit length field; the session enforces
    /// this by never submitting more than `max_frame_size` bytes at a time.
    pub fn with_data(ver: u8, cmd: Cmd, sid: u32, data: Vec<u8>) -> Frame {
        debug_assert!(data.len() <= u16::MAX as usize);
        Frame { ver, cmd, sid, data }
    }

    /// Encode the 8-byte header for this frame.
    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut hdr = [0u8; HEADER_SIZE];
        hdr[0] = self.ver;
        hdr[1] = self.cmd as u8;
        hdr[2..4].copy_from_slice(&(self.data.len() as u16).to_le_bytes());
        hdr[4..8].copy_from_slice(&self.sid.to_le_bytes());
        hdr
    }

    /// Encode the whole frame, header plus payload, into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.data.len());
        out.extend_from_slice(&self.header_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// Accessor view over 8 raw header bytes, as read off the transport.
#[derive(Debug, Clone, Copy)]
pub struct RawHeader(pub [u8; HEADER_SIZE]);

impl RawHeader {
    pub fn version(&self) -> u8 {
        self.0[0]
    }

    pub fn cmd(&self) -> u8 {
        self.0[1]
    }

    pub fn length(&self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    pub fn stream_id(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }
}

/// A decoded `UPD` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    /// Cumulative bytes the sender has handed to its consumer on the stream.
    pub consumed: u32,
    /// Free receive window the sender currently advertises.
    pub window: u32,
}

impl WindowUpdate {
    pub fn encode(&self) -> [u8; UPDATE_SIZE] {
        let mut out = [0u8; UPDATE_SIZE];
        out[..4].copy_from_slice(&self.consumed.to_le_bytes());
        out[4..].copy_from_slice(&self.window.to_le_bytes());
        out
    }

    pub fn decode(raw: [u8; UPDATE_SIZE]) -> WindowUpdate {
        WindowUpdate {
            consumed: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            window: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }
}
