//! # parley-protocol
//!
//! Wire protocol definitions for the parley chat relay.
//!
//! This crate defines the binary protocol spoken between chat clients and
//! the relay server: frame types, the length-prefixed MessagePack codec,
//! and protocol versioning.
//!
//! ## Frame Types
//!
//! - `Join` / `Leave` - Announce arrival and departure
//! - `Send` / `PrivateSend` - Public broadcast and direct messages
//! - `Event` / `PresenceUpdate` - Server-side deliveries
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{Frame, codec};
//!
//! let frame = Frame::send("alice", "Hello, world!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{EventKind, Frame};
pub use version::{Version, PROTOCOL_VERSION};
