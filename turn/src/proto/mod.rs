// Wire-format attributes and messages specific to the TURN protocol (RFC 5766/8656),
// layered on top of the generic STUN attribute codec.

pub mod chandata;
pub mod channum;
pub mod data;
pub mod lifetime;
pub mod peeraddr;
pub mod relayaddr;
pub mod reqtrans;

pub use reqtrans::PROTO_UDP;
