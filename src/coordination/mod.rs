//! Swap coordination
//!
//! The coordinator:
//! 1. Receives escrow events polled from both chains
//! 2. Appends them to the event store
//! 3. Runs each touched swap through the state machine
//! 4. Submits reveals and refunds, retrying until they are confirmed on-chain

pub mod engine;
pub mod machine;
pub mod scheduler;

pub use engine::{Coordinator, CoordinatorHandle, Input};
pub use machine::{
    outstanding_actions, replay, step, ActionKey, ActionKind, LegState, Outcome, SwapAction,
    SwapState, Transition, Trigger,
};
pub use scheduler::{Backoff, DeadlineKind, Scheduler};

/// Current wall-clock time in UNIX seconds
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
