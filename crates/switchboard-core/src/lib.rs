//! # switchboard-core
//!
//! Wire protocol and identifier types shared by the relay server and its
//! tests: device and connection identities, and the envelope tagged union
//! every inbound frame decodes into.

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;

pub use envelope::{Addressed, Envelope};
pub use ids::{ConnectionId, DeviceId};
