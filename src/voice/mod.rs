pub mod loopback;
pub mod readiness;
pub mod transport;

pub use loopback::LoopbackTransport;
pub use readiness::{ReadyTransport, await_ready};
pub use transport::{
    ConnectionStatus, ListenerId, PlaybackStatus, Subscription, TransportError, TransportEvent,
    TransportListener, VoiceTransport,
};
