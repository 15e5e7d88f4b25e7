//! Wire protocol: payload types and the `|`-delimited line codec

pub mod channel;
pub mod codec;
pub mod payload;

pub use channel::{
    ChannelAction, ChannelBuildError, ChannelPayload, ChannelPayloadBuilder, OptionalChannelArgs,
    Visibility,
};
pub use codec::{decode, encode, Codec, DecodeError, WireEncoding};
pub use payload::{status, MessageType, Payload, PayloadKind};
