//! shotclock-core: countdown clock state machine, session registry, and the
//! snapshot types shared by every transport. No async, no I/O.

pub mod clock;
pub mod command;
pub mod error;
pub mod registry;
pub mod snapshot;

pub use clock::{Clock, ClockReading, DEFAULT_LENGTH_MS};
pub use command::Command;
pub use error::CommandError;
pub use registry::{SessionRegistry, SharedClock, validate_session_key};
pub use snapshot::{
    AggregateEntry, AggregateSnapshot, ClockListing, ClockStatus, ClockSummary, PushFrame,
    SessionSnapshot, format_display,
};
