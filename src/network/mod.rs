pub mod framing;
pub mod multiplexer;
pub mod protocol;
pub mod registry;

pub use multiplexer::{ChannelMultiplexer, SecondaryChannel};
pub use protocol::{
    ControlCommand, DataKind, DatabaseOperation, Envelope, Payload, RequestParameter,
    RequestResult, ResultObject, TransferHeader, User,
};
pub use registry::{Channel, PeerRegistry};
