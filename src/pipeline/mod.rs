//! Reservation reply pipeline.
//!
//! Every fetched message flows through:
//! 1. `SeenMessages`: drop ids already handled this run
//! 2. `ReservationClassifier`: keyword-density check (2+ keywords)
//! 3. `FieldExtractor`: regex extraction of booking fields
//! 4. `ResponseComposer`: text + HTML confirmation
//! 5. `MailTransport::send()`: one attempt, no retry
//!
//! `CycleOrchestrator` drives one pass over the mailbox; `spawn_poller`
//! repeats it on a timer.

pub mod classifier;
pub mod composer;
pub mod dedup;
pub mod extractor;
pub mod orchestrator;
pub mod types;

pub use orchestrator::{CycleOrchestrator, PollerHandle, spawn_poller};
