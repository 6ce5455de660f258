//! Item-stream protocol shared by all processing units.
//!
//! ## Stage contract
//!
//! ```text
//! ItemBuffer ──collect──► PU internal state ──process──► ItemBuffer
//!                │                                          │
//!             get_item                                   put_item
//! ```
//!
//! A processing unit never blocks: every suspension point is a return of
//! [`StepResult`] to the scheduler. `OutFull` means the downstream buffer
//! must drain before the unit is stepped again; `Atomic` asks for the next
//! time slot after yielding once (bounding per-turn latency).

pub mod buffer;
pub mod duration;
pub mod item;

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;

pub use buffer::ItemBuffer;
pub use item::{Item, ItemHead, ItemKind};

/// Shared handle to an inter-stage buffer (single-threaded pipeline).
pub type BufferHandle = Rc<RefCell<ItemBuffer>>;

/// Outcome of one cooperative `step()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// No input available; do not re-invoke until new input arrives.
    Idle,
    /// Made progress; re-invoke immediately.
    Busy,
    /// Made progress; re-invoke, but yield the time slot once first.
    Atomic,
    /// Output buffer full; drain the downstream buffer before re-invoking.
    OutFull,
    /// Unrecoverable; the unit has already logged the cause.
    Error,
}

/// Reset depth for `ProcessingUnit::initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Full re-acquisition of knowledge-base views.
    Full,
    /// Clear transient buffers only (after a FLUSH command).
    Soft,
}

/// One stage of the linguistic pipeline.
///
/// Units are driven externally by the scheduler and are never self-threaded.
pub trait ProcessingUnit {
    /// Stage name for logs and error reports.
    fn name(&self) -> &'static str;

    fn initialize(&mut self, mode: ResetMode) -> Result<()>;

    /// Perform one cooperative step: collect, process or feed.
    fn step(&mut self, stats: &mut PipelineStats) -> StepResult;

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pipeline counters for observability.
///
/// Warnings raised by the stages are logged via `tracing` *and* counted here
/// so hosts can surface degraded output without scraping logs.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub items_in: u64,
    pub items_out: u64,
    pub warnings: u64,
    pub fallbacks: u64,
    pub forced_terminations: u64,
    pub discarded_items: u64,
}

impl PipelineStats {
    pub fn reset(&mut self) {
        *self = PipelineStats::default();
    }

    pub fn snapshot(&self) -> PipelineStats {
        self.clone()
    }
}
