//! The process that rips a disc into the library is an external
//! collaborator; this crate only needs to know when ripping starts and
//! finishes so `set_ripping_progress` can be driven and a `DiscSource`
//! reading a still-being-ripped file can be told when to stop retrying.

use crate::disc::DiscId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipStage {
    Audio,
    Toc,
}

/// Notified by a ripping process as it progresses. A deployment wires this
/// up to call back into `Transport::set_ripping_progress`.
pub trait RipObserver: Send + Sync {
    fn rip_started(&self, disc_id: DiscId, stage: RipStage);
    fn rip_progress(&self, disc_id: DiscId, percent: u8);
    fn rip_finished(&self, disc_id: DiscId);
    fn rip_failed(&self, disc_id: DiscId, error: String);
}
