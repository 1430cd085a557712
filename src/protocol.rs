//! Wire protocol: inbound event decoding and outbound command encoding

mod error;
mod inbound;
mod outbound;

pub use error::ProtocolError;
pub use inbound::{
    decode_frame, parse_frame, CompletePayload, ConnectedPayload, ErrorPayload,
    NodeCompletePayload, NodeEnterPayload, RagResultsPayload, ServerEvent, StartPayload,
    StateSyncPayload, TokenPayload,
};
pub use outbound::{MessagePayload, OutboundCommand};
