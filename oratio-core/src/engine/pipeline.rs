//! Cooperative pipeline scheduler.
//!
//! ## Scheduling rules
//!
//! ```text
//! step(current PU)
//!   produced output        → mark successor busy
//!   Busy                   → advance to a busy successor
//!   Idle                   → walk back up to the lowest non-idle stage
//!   OutFull                → hand the slot to the consumer side
//!   Atomic                 → return the slot to the caller immediately
//! ```
//!
//! Invariants: every stage above the current one is idle (except possibly
//! its direct successor, which may have been marked busy by fresh output);
//! a stage reports idle only when its input buffer is empty and it holds no
//! deferred output.

use tracing::{debug, error};

use crate::data::{BufferHandle, Item, PipelineStats, ProcessingUnit, ResetMode, StepResult};
use crate::error::{OratioError, Result};

pub struct Pipeline {
    pus: Vec<Box<dyn ProcessingUnit>>,
    /// `pus.len() + 1` buffers; `buffers[0]` is the pipeline input,
    /// `buffers.last()` the caller-facing output.
    buffers: Vec<BufferHandle>,
    status: Vec<StepResult>,
    cur: usize,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(pus: Vec<Box<dyn ProcessingUnit>>, buffers: Vec<BufferHandle>) -> Pipeline {
        let n = pus.len();
        Pipeline {
            pus,
            buffers,
            status: vec![StepResult::Idle; n],
            cur: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn input(&self) -> &BufferHandle {
        &self.buffers[0]
    }

    pub fn output(&self) -> &BufferHandle {
        &self.buffers[self.buffers.len() - 1]
    }

    pub fn reset(&mut self, mode: ResetMode) -> Result<()> {
        for pu in self.pus.iter_mut() {
            pu.initialize(mode)?;
        }
        for cb in &self.buffers {
            cb.borrow_mut().reset();
        }
        self.status = vec![StepResult::Idle; self.pus.len()];
        self.cur = 0;
        if mode == ResetMode::Full {
            self.stats.reset();
        }
        Ok(())
    }

    pub fn terminate(&mut self) -> Result<()> {
        for pu in self.pus.iter_mut() {
            pu.terminate()?;
        }
        Ok(())
    }

    /// One scheduling turn: step the current stage, reassign the slot.
    pub fn step(&mut self) -> Result<StepResult> {
        let out_before = self.buffers[self.cur + 1].borrow().len();
        let status = self.pus[self.cur].step(&mut self.stats);
        self.status[self.cur] = status;
        let produced = self.buffers[self.cur + 1].borrow().len() > out_before;

        if produced && self.cur + 1 < self.pus.len() {
            self.status[self.cur + 1] = StepResult::Busy;
        }

        match status {
            StepResult::Atomic => Ok(StepResult::Atomic),
            StepResult::Busy => {
                if self.cur + 1 < self.pus.len()
                    && self.status[self.cur + 1] == StepResult::Busy
                {
                    self.cur += 1;
                }
                Ok(StepResult::Busy)
            }
            StepResult::Idle => {
                if self.cur + 1 < self.pus.len()
                    && self.status[self.cur + 1] == StepResult::Busy
                {
                    // still data to process below
                    self.cur += 1;
                } else if self.cur == 0 {
                    // the whole chain is drained
                } else {
                    // find the lowest non-idle stage above
                    while self.cur > 0 && self.status[self.cur] == StepResult::Idle {
                        self.cur -= 1;
                    }
                    self.status[self.cur] = StepResult::Busy;
                }
                debug!(stage = self.pus[self.cur].name(), "scheduling");
                Ok(self.status[self.cur])
            }
            StepResult::OutFull => {
                if self.cur + 1 < self.pus.len() {
                    // let the consumer drain its input
                    self.cur += 1;
                    self.status[self.cur] = StepResult::Busy;
                }
                Ok(self.status[self.cur])
            }
            StepResult::Error => {
                error!(stage = self.pus[self.cur].name(), "stage failed");
                Err(OratioError::Other(anyhow::anyhow!(
                    "pipeline stage '{}' failed",
                    self.pus[self.cur].name()
                )))
            }
        }
    }

    /// Pop one item from the caller-facing output buffer.
    pub fn take_output(&mut self) -> Result<Option<Item>> {
        self.output().borrow_mut().get_item()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::item::{Item, ItemKind};
    use crate::data::ItemBuffer;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A stage that copies items through unmodified, one per step.
    struct CopyUnit {
        cb_in: BufferHandle,
        cb_out: BufferHandle,
        pending: Option<Item>,
    }

    impl ProcessingUnit for CopyUnit {
        fn name(&self) -> &'static str {
            "copy"
        }

        fn initialize(&mut self, _mode: ResetMode) -> Result<()> {
            self.pending = None;
            Ok(())
        }

        fn step(&mut self, stats: &mut PipelineStats) -> StepResult {
            if self.pending.is_none() {
                match self.cb_in.borrow_mut().get_item() {
                    Ok(Some(it)) => {
                        stats.items_in += 1;
                        self.pending = Some(it)
                    }
                    Ok(None) => return StepResult::Idle,
                    Err(_) => return StepResult::Error,
                }
            }
            let Some(it) = self.pending.take() else {
                return StepResult::Idle;
            };
            match self.cb_out.borrow_mut().put_item(&it) {
                Ok(()) => {
                    stats.items_out += 1;
                    StepResult::Busy
                }
                Err(_) => {
                    self.pending = Some(it);
                    StepResult::OutFull
                }
            }
        }
    }

    fn chain(n: usize, cap: usize) -> Pipeline {
        let buffers: Vec<BufferHandle> = (0..=n)
            .map(|_| Rc::new(RefCell::new(ItemBuffer::new(cap))))
            .collect();
        let pus: Vec<Box<dyn ProcessingUnit>> = (0..n)
            .map(|i| {
                Box::new(CopyUnit {
                    cb_in: Rc::clone(&buffers[i]),
                    cb_out: Rc::clone(&buffers[i + 1]),
                    pending: None,
                }) as Box<dyn ProcessingUnit>
            })
            .collect();
        Pipeline::new(pus, buffers)
    }

    #[test]
    fn items_copy_through_a_chain_byte_for_byte() {
        let mut p = chain(3, 256);
        let item = Item::new(ItemKind::WordGraph, 7, 9, b"payload").unwrap();
        p.input().borrow_mut().put_item(&item).unwrap();

        let mut out = Vec::new();
        for _ in 0..64 {
            match p.step().unwrap() {
                StepResult::Idle => break,
                _ => {
                    while let Some(it) = p.take_output().unwrap() {
                        out.push(it);
                    }
                }
            }
        }
        while let Some(it) = p.take_output().unwrap() {
            out.push(it);
        }
        assert_eq!(out, vec![item]);
    }

    #[test]
    fn out_full_hands_the_slot_downstream() {
        // middle buffer fits exactly one small item, forcing backpressure
        let mut p = chain(2, 8);
        for i in 0..4u8 {
            p.input()
                .borrow_mut()
                .put_item(&Item::new(ItemKind::Bound, i, 0, &[]).unwrap())
                .unwrap();
        }
        let mut out = Vec::new();
        for _ in 0..128 {
            match p.step().unwrap() {
                StepResult::Idle => break,
                _ => {
                    while let Some(it) = p.take_output().unwrap() {
                        out.push(it);
                    }
                }
            }
        }
        assert_eq!(out.len(), 4);
        let infos: Vec<u8> = out.iter().map(|it| it.head.info1).collect();
        assert_eq!(infos, vec![0, 1, 2, 3], "strict FIFO order");
    }

    #[test]
    fn reset_clears_buffers_and_state() {
        let mut p = chain(2, 64);
        p.input()
            .borrow_mut()
            .put_item(&Item::mark(ItemKind::Bound, 1, 1))
            .unwrap();
        p.step().unwrap();
        p.reset(ResetMode::Soft).unwrap();
        assert!(p.input().borrow().is_empty());
        assert!(p.output().borrow().is_empty());
        assert_eq!(p.step().unwrap(), StepResult::Idle);
    }
}
