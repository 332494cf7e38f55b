//! Inbound command delivery is an external collaborator (a message bus, a
//! REST endpoint, LIRC, a local socket...); this crate only defines the
//! narrow interface a real transport adapter drives the player through.

use crate::disc::DiscId;

/// Commands a `CommandSource` can deliver to the player loop. Mirrors the
/// transport's public command API one-to-one.
#[derive(Debug, Clone)]
pub enum Command {
    NewDisc(DiscId),
    Eject,
    Stop,
    Play,
    Pause,
    PlayPause,
    Next,
    Prev,
    SetRippingProgress { disc_id: Option<DiscId>, progress: Option<u8> },
}

/// Something that can deliver `Command`s to the player's main loop, e.g. a
/// ZeroMQ/REST/local-socket front end translating external requests.
pub trait CommandSource: Send {
    /// Block until a command is available, or return `None` if the source
    /// has been shut down.
    fn recv(&mut self) -> Option<Command>;
}

/// A `CommandSource` with nothing behind it, for running the transport
/// headless (e.g. in tests) with no external command channel.
pub struct NullCommandSource;

impl CommandSource for NullCommandSource {
    fn recv(&mut self) -> Option<Command> {
        None
    }
}
