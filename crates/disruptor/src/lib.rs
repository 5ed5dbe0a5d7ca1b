//! Bounded in-order consumer dispatching.
//!
//! The [`ConsumerDispatcher`] is a fixed-capacity ring that pushes every
//! submitted [`ConsumerInput`] through an ordered chain of consumers and a
//! terminal inspector. Each consumer runs on its own worker thread and owns a
//! cursor that may never overtake the previous consumer's cursor, so distinct
//! consumers process distinct elements in parallel while any single element
//! only ever belongs to one consumer at a time.
//!
//! ```text
//!  submit ──► [slot ring] ──► consumer 0 ──► consumer 1 ──► ... ──► inspector
//!                ▲                                                      │
//!                └────────────── slot released ────────────────────────┘
//! ```
//!
//! [`BatchRangeDispatcher`] sits in front of the transaction dispatcher and
//! coalesces many small ranges into larger inputs before submission.

mod batch;
mod dispatcher;
mod input;
mod result;

pub use batch::BatchRangeDispatcher;
pub use dispatcher::{
    CompletionHandler, Consumer, ConsumerDispatcher, ConsumerDispatcherOptions, DispatcherError,
    Inspector,
};
pub use input::ConsumerInput;
pub use result::{
    AbortReason, CompletionResult, CompletionStatus, ConsumerOutcome, ElementId, Severity,
};
