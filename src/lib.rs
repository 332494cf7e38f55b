// Library exports for the transport core and its integration tests.

pub mod bus;
pub mod config;
pub mod disc;
pub mod library;
pub mod packet;
pub mod packetiser;
pub mod ripper;
pub mod sink;
pub mod source;
pub mod transport;

pub use config::Config;
pub use disc::{Disc, DiscError, DiscId, Track};
pub use packet::{AudioFormat, AudioPacket, PacketFlags, PacketInfo};
pub use packetiser::{Packetiser, PacketiserConfig};
pub use transport::{PlayerState, RipState, StateTag, Transport};
