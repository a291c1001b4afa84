//! Memory packet value type shared by the CPU-side and memory-side ports.

use crate::layout::Addr;

/// Packet command for timing requests and their responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemCmd {
    /// Read request traveling toward the backing store.
    ReadReq,
    /// Write request traveling toward the backing store.
    WriteReq,
    /// Response carrying read data back up.
    ReadResp,
    /// Write acknowledgement traveling back up.
    WriteResp,
}

impl MemCmd {
    /// Returns `true` for read-flavored commands.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::ReadReq | Self::ReadResp)
    }

    /// Returns `true` for write-flavored commands.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::WriteReq | Self::WriteResp)
    }

    /// Returns `true` for response commands.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(self, Self::ReadResp | Self::WriteResp)
    }

    /// Response command matching this request command.
    #[must_use]
    pub const fn response(self) -> Self {
        match self {
            Self::ReadReq | Self::ReadResp => Self::ReadResp,
            Self::WriteReq | Self::WriteResp => Self::WriteResp,
        }
    }
}

/// One timing packet: address, size, command, requestor identity, and an
/// access-depth hint on responses (0 = satisfied by a cache above the
/// backing store).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Packet {
    /// Target backing-store address.
    pub addr: Addr,
    /// Access size in bytes.
    pub size: u32,
    /// Packet command.
    pub cmd: MemCmd,
    /// Request flags carried through verbatim.
    pub flags: u32,
    /// Identity of the original requestor.
    pub requestor_id: u16,
    /// Whether the requestor expects a response packet.
    pub needs_response: bool,
    /// Cache-depth hint populated on responses.
    pub access_depth: u8,
    /// Payload buffer; fabricated metadata packets carry zeroes.
    pub payload: Box<[u8]>,
}

impl Packet {
    /// Creates a request packet with a zero-initialized payload.
    #[must_use]
    pub fn request(cmd: MemCmd, addr: Addr, size: u32, flags: u32, requestor_id: u16) -> Self {
        Self {
            addr,
            size,
            cmd,
            flags,
            requestor_id,
            needs_response: true,
            access_depth: 0,
            payload: vec![0; size as usize].into_boxed_slice(),
        }
    }

    /// Converts a request into its response, stamping the access depth.
    #[must_use]
    pub fn into_response(mut self, access_depth: u8) -> Self {
        self.cmd = self.cmd.response();
        self.access_depth = access_depth;
        self
    }

    /// Returns `true` for read-flavored packets.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        self.cmd.is_read()
    }

    /// Returns `true` for write-flavored packets.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.cmd.is_write()
    }

    /// Returns `true` for response packets.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.cmd.is_response()
    }
}
