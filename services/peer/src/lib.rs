// peer: the PokéProtocol endpoint runtime.
//
// One endpoint = one UDP socket driven by a single task: receive, dispatch,
// reliability tick. Hosts additionally fan battle traffic out to spectators
// and reflect chat between participants.

pub mod chat;
pub mod config;
pub mod endpoint;
pub mod events;
pub mod fanout;
pub mod reliability;

pub use config::{PeerConfig, PeerRole};
pub use endpoint::{Endpoint, PeerError, PeerHandle};
pub use events::PeerEvent;
