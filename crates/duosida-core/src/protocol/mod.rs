//! Wire protocol: the field-tree codec, the charger message set and request
//! sequencing.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_frame, encode_message, FieldNode, FieldValue, ProtocolError};
pub use messages::{
    build_handshake, build_set_config, build_set_current, build_status_request, find_telemetry,
    parse_status, RequestBuilder,
};
pub use sequence::SequenceCounter;
