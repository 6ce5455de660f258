//! Word analysis: lexicon lookup and POS prediction.
//!
//! One item in flight: COLLECT pulls a single item, PROCESS rewrites it,
//! FEED pushes it downstream. WORDGRAPH items either resolve in a lexicon
//! (→ WORDINDEX with deferred phoneme indices) or get their POS predicted
//! from grapheme windows; everything else passes through unchanged.

use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::item::{self, Item, ItemKind};
use crate::data::{BufferHandle, PipelineStats, ProcessingUnit, ResetMode, StepResult};
use crate::error::{OratioError, Result};
use crate::kb::lexicon::{LexResult, MAX_NRRES};
use crate::kb::{KbId, Lexicon, PosTable, Tree};
use crate::rsrc::Voice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collect,
    Process,
    Feed,
}

pub struct WordAnaUnit {
    voice: Rc<Voice>,
    cb_in: BufferHandle,
    cb_out: BufferHandle,
    state: State,
    in_item: Option<Item>,
    out_item: Option<Item>,

    lex: Arc<Lexicon>,
    ulex: Vec<Arc<Lexicon>>,
    tabpos: Arc<PosTable>,
    dtposp: Arc<Tree>,
}

impl WordAnaUnit {
    pub fn new(voice: Rc<Voice>, cb_in: BufferHandle, cb_out: BufferHandle) -> Result<WordAnaUnit> {
        let lex = voice
            .lexicon(KbId::LexMain)
            .ok_or(OratioError::KbMissing("main lexicon"))?;
        let ulex = voice.user_lexica();
        let tabpos = voice
            .pos_table()
            .ok_or(OratioError::KbMissing("pos table"))?;
        let dtposp = voice
            .tree(KbId::TreePosPredict)
            .ok_or(OratioError::KbMissing("pos prediction tree"))?;
        Ok(WordAnaUnit {
            voice,
            cb_in,
            cb_out,
            state: State::Collect,
            in_item: None,
            out_item: None,
            lex,
            ulex,
            tabpos,
            dtposp,
        })
    }

    /// Predict a POS from grapheme windows; `INFO_ERR` when the tree fails.
    fn classify_pos(&self, stats: &mut PipelineStats, graph: &[u8]) -> u8 {
        // hyphen inside the word is the special-grapheme signal; the front
        // end maps all hyphen variants to ascii '-'
        let has_special = graph.contains(&b'-');

        let Some(invec) = self.dtposp.construct_pos_predict(graph, has_special) else {
            warn!("problem with pos prediction input vector");
            stats.warnings += 1;
            return item::INFO_ERR;
        };
        let res = self.dtposp.classify(&invec);
        if !res.set {
            warn!("problem classifying pos");
            stats.warnings += 1;
            return item::INFO_ERR;
        }
        match self.dtposp.map_out_fixed(res.class) {
            Some(class) => {
                debug!(class, "predicted pos");
                class as u8
            }
            None => {
                warn!("problem decomposing pos prediction output");
                stats.warnings += 1;
                item::INFO_ERR
            }
        }
    }

    /// Look up `graph` in the user lexica then the main lexicon. Returns the
    /// result plus the 1-based user-lexicon number (0 = main lexicon).
    fn lookup(&self, graph: &[u8]) -> Option<(LexResult, u8)> {
        for (i, ulex) in self.ulex.iter().enumerate() {
            if let Some(res) = ulex.lookup(graph) {
                return Some((res, i as u8 + 1));
            }
        }
        self.lex.lookup(graph).map(|res| (res, 0))
    }

    fn process_wordgraph(&mut self, stats: &mut PipelineStats, item: Item) -> Option<Item> {
        let graph = item.payload().to_vec();
        match self.lookup(&graph) {
            None => {
                // no entry: predict the POS, keep the graphemes
                let mut out = item;
                out.set_info1(self.classify_pos(stats, &graph));
                Some(out)
            }
            Some((res, found_in)) => {
                if res.truncated {
                    warn!(cap = MAX_NRRES, "using {} lexicon lookup results", MAX_NRRES);
                    stats.warnings += 1;
                    stats.fallbacks += 1;
                }
                if res.phon_found {
                    // WORDINDEX carrying (pos, index) records for deferred
                    // phoneme retrieval
                    let mut payload = Vec::with_capacity(res.records.len() * 4);
                    let mut poses = Vec::with_capacity(res.records.len());
                    for rec in &res.records {
                        poses.push(rec.pos);
                        payload.push(rec.pos);
                        payload.extend_from_slice(&rec.index.unwrap_or([0; 3]));
                    }
                    let info1 = if poses.len() == 1 {
                        poses[0]
                    } else {
                        self.tabpos.group_for(&poses)
                    };
                    match Item::new(ItemKind::WordIndex, info1, found_in, &payload) {
                        Ok(out) => Some(out),
                        Err(_) => {
                            warn!("word index payload too large, discarding item");
                            stats.warnings += 1;
                            None
                        }
                    }
                } else {
                    // needs G2P downstream: lexicon POS, graphemes kept
                    let mut out = item;
                    out.set_info1(res.records[0].pos);
                    Some(out)
                }
            }
        }
    }

    fn process(&mut self, stats: &mut PipelineStats, item: Item) -> Option<Item> {
        match item.kind() {
            ItemKind::WordGraph => {
                if item.payload().is_empty() {
                    // preprocessors may emit empty WORDGRAPH items
                    debug!("dropping empty wordgraph");
                    None
                } else {
                    self.process_wordgraph(stats, item)
                }
            }
            ItemKind::Other => {
                debug!("skipping OTHER item");
                stats.discarded_items += 1;
                None
            }
            _ => Some(item),
        }
    }
}

impl ProcessingUnit for WordAnaUnit {
    fn name(&self) -> &'static str {
        "wordana"
    }

    fn initialize(&mut self, mode: ResetMode) -> Result<()> {
        self.state = State::Collect;
        self.in_item = None;
        self.out_item = None;
        if mode == ResetMode::Soft {
            return Ok(());
        }
        self.lex = self
            .voice
            .lexicon(KbId::LexMain)
            .ok_or(OratioError::KbMissing("main lexicon"))?;
        self.ulex = self.voice.user_lexica();
        self.tabpos = self
            .voice
            .pos_table()
            .ok_or(OratioError::KbMissing("pos table"))?;
        self.dtposp = self
            .voice
            .tree(KbId::TreePosPredict)
            .ok_or(OratioError::KbMissing("pos prediction tree"))?;
        Ok(())
    }

    fn step(&mut self, stats: &mut PipelineStats) -> StepResult {
        loop {
            match self.state {
                State::Collect => {
                    if self.in_item.is_none() {
                        match self.cb_in.borrow_mut().get_item() {
                            Ok(Some(it)) => {
                                stats.items_in += 1;
                                self.in_item = Some(it);
                                self.state = State::Process;
                            }
                            Ok(None) => return StepResult::Idle,
                            Err(e) => {
                                warn!(error = %e, "problem getting item");
                                return StepResult::Error;
                            }
                        }
                    } else {
                        warn!("item already in input buffer");
                        stats.warnings += 1;
                        self.state = State::Process;
                    }
                }
                State::Process => {
                    let Some(it) = self.in_item.take() else {
                        self.state = State::Collect;
                        return StepResult::Busy;
                    };
                    match self.process(stats, it) {
                        Some(out) => {
                            self.out_item = Some(out);
                            self.state = State::Feed;
                        }
                        None => {
                            // item skipped; get the next one
                            self.state = State::Collect;
                            return StepResult::Busy;
                        }
                    }
                }
                State::Feed => {
                    let Some(out) = self.out_item.take() else {
                        self.state = State::Collect;
                        return StepResult::Busy;
                    };
                    match self.cb_out.borrow_mut().put_item(&out) {
                        Ok(()) => {
                            stats.items_out += 1;
                            self.state = State::Collect;
                            return StepResult::Busy;
                        }
                        Err(OratioError::BufOverflow) => {
                            // try again once downstream drained
                            self.out_item = Some(out);
                            return StepResult::OutFull;
                        }
                        Err(e) => {
                            warn!(error = %e, "feeding problem, discarding item");
                            stats.warnings += 1;
                            stats.discarded_items += 1;
                            self.state = State::Collect;
                            return StepResult::Busy;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ItemBuffer;
    use crate::testsupport::{test_voice, POS_DET, POS_NOUN, POS_PRED, POS_VERB};
    use std::cell::RefCell;

    fn unit() -> (WordAnaUnit, BufferHandle, BufferHandle) {
        let voice = Rc::new(test_voice());
        let cb_in = Rc::new(RefCell::new(ItemBuffer::new(1024)));
        let cb_out = Rc::new(RefCell::new(ItemBuffer::new(1024)));
        let wa = WordAnaUnit::new(voice, Rc::clone(&cb_in), Rc::clone(&cb_out)).unwrap();
        (wa, cb_in, cb_out)
    }

    fn run_until_idle(wa: &mut WordAnaUnit, stats: &mut PipelineStats) {
        loop {
            match wa.step(stats) {
                StepResult::Busy | StepResult::Atomic => continue,
                StepResult::Idle => break,
                other => panic!("unexpected step result {other:?}"),
            }
        }
    }

    #[test]
    fn known_word_becomes_wordindex() {
        let (mut wa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordGraph, 0, 0, b"hello").unwrap())
            .unwrap();
        run_until_idle(&mut wa, &mut stats);
        let out = cb_out.borrow_mut().get_item().unwrap().unwrap();
        assert_eq!(out.kind(), ItemKind::WordIndex);
        assert_eq!(out.head.info1, POS_NOUN);
        assert_eq!(out.head.info2, 0); // found in the main lexicon
        assert_eq!(out.payload().len(), 4);
        assert_eq!(out.payload()[0], POS_NOUN);
    }

    #[test]
    fn unknown_word_gets_predicted_pos() {
        let (mut wa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordGraph, 0, 0, b"world").unwrap())
            .unwrap();
        run_until_idle(&mut wa, &mut stats);
        let out = cb_out.borrow_mut().get_item().unwrap().unwrap();
        assert_eq!(out.kind(), ItemKind::WordGraph);
        assert_eq!(out.head.info1, POS_PRED);
        assert_eq!(out.payload(), b"world");
    }

    #[test]
    fn ambiguous_word_carries_pos_group() {
        let (mut wa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordGraph, 0, 0, b"bank").unwrap())
            .unwrap();
        run_until_idle(&mut wa, &mut stats);
        let out = cb_out.borrow_mut().get_item().unwrap().unwrap();
        assert_eq!(out.kind(), ItemKind::WordIndex);
        assert_eq!(out.head.info1, 100); // group id of {noun, verb}
        assert_eq!(out.payload().len(), 8);
        assert_eq!(out.payload()[0], POS_NOUN);
        assert_eq!(out.payload()[4], POS_VERB);
    }

    #[test]
    fn g2p_marked_word_keeps_graphemes_with_lexicon_pos() {
        let (mut wa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordGraph, 0, 0, b"the").unwrap())
            .unwrap();
        run_until_idle(&mut wa, &mut stats);
        let out = cb_out.borrow_mut().get_item().unwrap().unwrap();
        assert_eq!(out.kind(), ItemKind::WordGraph);
        assert_eq!(out.head.info1, POS_DET);
        assert_eq!(out.payload(), b"the");
    }

    #[test]
    fn other_items_are_discarded_and_rest_pass_through() {
        let (mut wa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::Other, 9, 9, b"x").unwrap())
            .unwrap();
        let punc = Item::mark(ItemKind::Punc, item::PUNC_SENTEND, item::PUNC_SENT_T);
        cb_in.borrow_mut().put_item(&punc).unwrap();
        run_until_idle(&mut wa, &mut stats);
        let out = cb_out.borrow_mut().get_item().unwrap().unwrap();
        assert_eq!(out, punc); // byte-exact pass-through
        assert!(cb_out.borrow_mut().get_item().unwrap().is_none());
        assert_eq!(stats.discarded_items, 1);
    }

    #[test]
    fn out_full_retries_without_losing_the_item() {
        let (mut wa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        // output buffer too small for the 9-byte wordgraph item
        *cb_out.borrow_mut() = ItemBuffer::new(6);
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordGraph, 0, 0, b"world").unwrap())
            .unwrap();
        assert_eq!(wa.step(&mut stats), StepResult::OutFull);
        // drain: replace with a big enough buffer and retry
        *cb_out.borrow_mut() = ItemBuffer::new(64);
        run_until_idle(&mut wa, &mut stats);
        let out = cb_out.borrow_mut().get_item().unwrap().unwrap();
        assert_eq!(out.payload(), b"world");
    }
}
