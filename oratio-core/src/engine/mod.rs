//! `Engine` — a synthesis session bound to one voice.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new(voice, config)
//!     └─► put_item() … feed WORDGRAPH/PUNC items
//!         └─► step()/process_to_end() … cooperative scheduling
//!             └─► PHONE items drained from the output
//! ```
//!
//! The engine is single-threaded and never blocks: `step()` runs exactly one
//! scheduling turn and returns. `flush()` injects the only cancellation
//! primitive, a FLUSH command that soft-resets every stage it passes.

pub mod pipeline;

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::item::{self, Item, ItemKind, MAX_ITEM_SIZE};
use crate::data::{BufferHandle, ItemBuffer, PipelineStats, ResetMode, StepResult};
use crate::error::Result;
use crate::pu::{AccPhrUnit, PamUnit, SentAnaUnit, SyllabUnit, WordAnaUnit};
use crate::rsrc::Voice;

/// Configuration for [`Engine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the pipeline input buffer in bytes. Default: 2 items.
    pub input_buffer_size: usize,
    /// Capacity of the inter-stage buffers. Default: 2 items.
    pub stage_buffer_size: usize,
    /// Capacity of the caller-facing output buffer. Default: 16 items —
    /// PHONE items arrive in bursts of one per phone.
    pub output_buffer_size: usize,
    /// Upper bound on scheduling turns per `process_to_end` call; a stuck
    /// pipeline aborts instead of spinning. Default: 1 000 000.
    pub max_turns: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: 2 * MAX_ITEM_SIZE,
            stage_buffer_size: 2 * MAX_ITEM_SIZE,
            output_buffer_size: 16 * MAX_ITEM_SIZE,
            max_turns: 1_000_000,
        }
    }
}

/// A synthesis session: voice binding, stage chain, inter-stage buffers.
pub struct Engine {
    voice: Rc<Voice>,
    config: EngineConfig,
    pipeline: pipeline::Pipeline,
}

impl Engine {
    /// Build the stage chain for `voice`.
    ///
    /// Fails with `KbMissing` when the voice lacks a knowledge base a stage
    /// requires — before any item is processed.
    pub fn new(voice: Voice, config: EngineConfig) -> Result<Engine> {
        let voice = Rc::new(voice);
        let mk = |cap: usize| -> BufferHandle { Rc::new(RefCell::new(ItemBuffer::new(cap))) };

        let buffers: Vec<BufferHandle> = vec![
            mk(config.input_buffer_size),
            mk(config.stage_buffer_size),
            mk(config.stage_buffer_size),
            mk(2 * config.stage_buffer_size),
            mk(2 * config.stage_buffer_size),
            mk(config.output_buffer_size),
        ];

        let pus: Vec<Box<dyn crate::data::ProcessingUnit>> = vec![
            Box::new(WordAnaUnit::new(
                Rc::clone(&voice),
                Rc::clone(&buffers[0]),
                Rc::clone(&buffers[1]),
            )?),
            Box::new(SentAnaUnit::new(
                Rc::clone(&voice),
                Rc::clone(&buffers[1]),
                Rc::clone(&buffers[2]),
            )?),
            Box::new(AccPhrUnit::new(
                Rc::clone(&voice),
                Rc::clone(&buffers[2]),
                Rc::clone(&buffers[3]),
            )?),
            Box::new(SyllabUnit::new(
                Rc::clone(&voice),
                Rc::clone(&buffers[3]),
                Rc::clone(&buffers[4]),
            )?),
            Box::new(PamUnit::new(
                Rc::clone(&voice),
                Rc::clone(&buffers[4]),
                Rc::clone(&buffers[5]),
            )?),
        ];

        info!(voice = %voice.name(), stages = pus.len(), "engine created");
        Ok(Engine {
            voice,
            config,
            pipeline: pipeline::Pipeline::new(pus, buffers),
        })
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    /// Feed one item into the pipeline input.
    ///
    /// # Errors
    /// `BufOverflow` when the input buffer is full — run `step()` to drain.
    pub fn put_item(&mut self, item: &Item) -> Result<()> {
        self.pipeline.input().borrow_mut().put_item(item)
    }

    /// Inject the flush command: every stage discards its in-flight state.
    pub fn flush(&mut self) -> Result<()> {
        self.put_item(&Item::mark(ItemKind::Cmd, item::CMD_FLUSH, item::INFO_NA))
    }

    /// Run one cooperative scheduling turn.
    pub fn step(&mut self) -> Result<StepResult> {
        self.pipeline.step()
    }

    /// Pop one output item, if any.
    pub fn take_output(&mut self) -> Result<Option<Item>> {
        self.pipeline.take_output()
    }

    /// Drive the pipeline until it is idle, collecting every output item.
    pub fn process_to_end(&mut self, out: &mut Vec<Item>) -> Result<()> {
        for _ in 0..self.config.max_turns {
            let status = self.step()?;
            while let Some(it) = self.take_output()? {
                out.push(it);
            }
            if status == StepResult::Idle {
                return Ok(());
            }
        }
        Err(crate::error::OratioError::MaxNumExceeded(
            "pipeline scheduling turns",
        ))
    }

    /// Re-initialize every stage.
    pub fn reset(&mut self, mode: ResetMode) -> Result<()> {
        self.pipeline.reset(mode)
    }

    pub fn terminate(&mut self) -> Result<()> {
        self.pipeline.terminate()
    }

    /// Snapshot of the pipeline counters for observability.
    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::test_voice;

    fn engine() -> Engine {
        Engine::new(test_voice(), EngineConfig::default()).expect("fixture voice is complete")
    }

    fn word(graph: &[u8]) -> Item {
        Item::new(ItemKind::WordGraph, 0, 0, graph).unwrap()
    }

    fn sentend() -> Item {
        Item::mark(ItemKind::Punc, item::PUNC_SENTEND, item::PUNC_SENT_T)
    }

    #[test]
    fn config_round_trips_as_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage_buffer_size, config.stage_buffer_size);
        // defaults fill missing fields
        let partial: EngineConfig = serde_json::from_str(r#"{"maxTurns": 5}"#).unwrap_or_default();
        assert!(partial.max_turns > 0);
    }

    #[test]
    fn hello_world_end_to_end() {
        let mut engine = engine();
        let mut out = Vec::new();
        engine.put_item(&word(b"hello")).unwrap();
        engine.process_to_end(&mut out).unwrap();
        engine.put_item(&word(b"world")).unwrap();
        engine.process_to_end(&mut out).unwrap();
        engine.put_item(&sentend()).unwrap();
        engine.process_to_end(&mut out).unwrap();

        // order: BOUND(SBEG), PHONEs for the leading pause + "hello" (from
        // the lexicon) + "world" (predicted POS, G2P) + trailing pause,
        // BOUND(SEND)
        assert!(!out.is_empty());
        assert_eq!(out[0].kind(), ItemKind::Bound);
        assert_eq!(out[0].head.info1, item::BOUND_SBEG);
        assert_eq!(out.last().unwrap().kind(), ItemKind::Bound);
        assert_eq!(out.last().unwrap().head.info1, item::BOUND_SEND);

        let phones: Vec<&Item> = out
            .iter()
            .filter(|it| it.kind() == ItemKind::Phone)
            .collect();
        // pause + "hello" (h @ . l o = 4 phones over 2 syllables)
        // + "world" (4 consonants + stressed vowel) + pause
        assert_eq!(phones.len(), 1 + 4 + 5 + 1);
        for ph in &phones {
            assert_eq!(ph.head.info2, 5);
            assert_eq!(ph.payload().len(), 30);
        }
        // everything in between is PHONE items only: no stray items
        assert!(out[1..out.len() - 1]
            .iter()
            .all(|it| it.kind() == ItemKind::Phone));
    }

    #[test]
    fn flush_forces_buffered_input_through_as_a_term_sentence() {
        let mut engine = engine();
        let mut out = Vec::new();
        engine.put_item(&word(b"hello")).unwrap();
        engine.process_to_end(&mut out).unwrap();
        assert!(out.is_empty(), "nothing moves before a sentence terminator");
        engine.flush().unwrap();
        engine.process_to_end(&mut out).unwrap();
        // the flush travels the chain as a forced termination: the buffered
        // word is synthesized and the stream ends with a TERM bound
        assert!(out.iter().any(|it| it.kind() == ItemKind::Phone));
        assert_eq!(out.last().unwrap().kind(), ItemKind::Bound);
        assert_eq!(out.last().unwrap().head.info1, item::BOUND_TERM);
        // the next sentence starts clean
        let mut out2 = Vec::new();
        engine.put_item(&word(b"hello")).unwrap();
        engine.put_item(&sentend()).unwrap();
        engine.process_to_end(&mut out2).unwrap();
        assert_eq!(out2[0].head.info1, item::BOUND_SBEG);
        assert!(out2.iter().any(|it| it.kind() == ItemKind::Phone));
    }

    #[test]
    fn soft_reset_clears_in_flight_state() {
        let mut engine = engine();
        let mut out = Vec::new();
        engine.put_item(&word(b"hello")).unwrap();
        engine.process_to_end(&mut out).unwrap();
        engine.reset(ResetMode::Soft).unwrap();
        // a full fresh sentence still works
        let mut out2 = Vec::new();
        engine.put_item(&word(b"hello")).unwrap();
        engine.put_item(&sentend()).unwrap();
        engine.process_to_end(&mut out2).unwrap();
        assert_eq!(out2[0].head.info1, item::BOUND_SBEG);
        assert!(out2.iter().any(|it| it.kind() == ItemKind::Phone));
    }
}
