//! # parley-core
//!
//! Domain types, presence tracking, and event dispatch for the parley
//! chat relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ChatEvent** - Classified chat events (broadcast, private, join, leave)
//! - **PresenceRegistry** - The authoritative set of connected users
//! - **RelayDispatcher** - Classifies inbound events and routes them to
//!   persistence and delivery
//! - **DeliveryGateway** / **MessageStore** - Capability traits for fan-out
//!   and the durable message log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  Connection │────▶│ RelayDispatcher  │────▶│ DeliveryGateway  │
//! └─────────────┘     └──────────────────┘     └──────────────────┘
//!                        │            │
//!                        ▼            ▼
//!               ┌──────────────┐ ┌──────────────────┐
//!               │ MessageStore │ │ PresenceRegistry │
//!               └──────────────┘ └──────────────────┘
//! ```

pub mod dispatch;
pub mod event;
pub mod gateway;
pub mod presence;
pub mod session;
pub mod store;

pub use dispatch::{DispatchError, DispatcherConfig, RelayDispatcher};
pub use event::{ChatEvent, PersistedMessage};
pub use gateway::{BroadcastGateway, DeliveryGateway, GatewayError};
pub use parley_protocol::EventKind;
pub use presence::PresenceRegistry;
pub use session::SessionTable;
pub use store::{MessageStore, StoreError};
