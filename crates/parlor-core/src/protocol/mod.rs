//! Wire formats: session envelopes, LAN discovery lines, rendezvous JSON.

pub mod codec;
pub mod discovery;
pub mod messages;
pub mod rendezvous;

pub use codec::{decode_envelope, encode_envelope, ProtocolError};
pub use discovery::{Advertisement, DiscoveryMessage};
pub use messages::*;
pub use rendezvous::{decode_json_line, encode_json_line, MatchRequest, MatchResponse, ServerReply};
