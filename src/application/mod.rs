//! Application layer - Use cases coordinating the ports.
//!
//! - `admission` - Who may connect to a room, and as which participant
//! - `archiver` - Background drain of the hot store into the archive

pub mod admission;
pub mod archiver;

pub use admission::{Admission, AdmissionError, AdmitParticipantCommand, AdmitParticipantHandler};
pub use archiver::{ArchiveCycleError, ArchiveCycleReport, Archiver, ArchiverConfig};
