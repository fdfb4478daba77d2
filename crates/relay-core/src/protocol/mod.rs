//! Protocol module containing the wire message types and frame classification.

pub mod codec;
pub mod messages;

pub use codec::{classify, encode_notice, Inbound};
pub use messages::*;
