//! TCP rotation channel.
//!
//! A client streams images to a [`RotationServer`], which mirrors them and
//! streams the result back. Each request is a fixed 1024-byte header frame
//! followed by the raw payload; see [`packet`] for the frame layout.
//!
//! # Exchange
//!
//! ```text
//! Client -> Server:  ROTATE{flags=180|270, size=N}  + N bytes
//! Server -> Client:  ACK{size=M}                    + M bytes
//!                or  NAK{size=0}
//! Client -> Server:  EXIT{size=0}                   (end of session)
//! ```
//!
//! The server admits at most `pool_size` connections at a time; extra
//! clients wait in the listen backlog until a slot frees.

pub mod admission;
pub mod client;
pub mod error;
pub mod packet;
pub mod scratch;
pub mod server;
pub mod wire;

pub use admission::{Admission, SlotGuard, SlotPool};
pub use client::{ClientConfig, ClientReport, ClientSession, RotationClient};
pub use error::ChannelError;
pub use packet::{Flags, Operation, Packet};
pub use server::{RotationServer, ServerConfig};

use std::time::Duration;

/// Size of every header frame on the wire.
pub const FRAME_SIZE: usize = 1024;

/// Width of the reserved checksum field.
pub const CHECKSUM_LEN: usize = 32;

/// Chunk size used when streaming payloads.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8686;

/// Number of connections served concurrently by default.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Deadline for a single header read or payload transfer.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for establishing a client connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
