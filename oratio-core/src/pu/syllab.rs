//! Syllabification: WORDPHON → SYLLPHON.
//!
//! Lexicon and G2P phone strings carry syllable-boundary and stress marker
//! ids. This stage splits each word at the boundary markers, strips the
//! stress markers out of the phone strings, and hands the word accent to
//! the syllable carrying the primary stress (the first syllable when the
//! word has none). All other items pass through unchanged.

use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::item::{self, Item, ItemKind};
use crate::data::{BufferHandle, PipelineStats, ProcessingUnit, ResetMode, StepResult};
use crate::error::{OratioError, Result};
use crate::kb::PhoneTable;
use crate::rsrc::Voice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collect,
    Process,
    Feed,
}

pub struct SyllabUnit {
    voice: Rc<Voice>,
    cb_in: BufferHandle,
    cb_out: BufferHandle,
    state: State,
    in_item: Option<Item>,
    out_items: Vec<Item>,
    feed_pos: usize,

    tabphones: Arc<PhoneTable>,
}

impl SyllabUnit {
    pub fn new(voice: Rc<Voice>, cb_in: BufferHandle, cb_out: BufferHandle) -> Result<SyllabUnit> {
        let tabphones = voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        Ok(SyllabUnit {
            voice,
            cb_in,
            cb_out,
            state: State::Collect,
            in_item: None,
            out_items: Vec::new(),
            feed_pos: 0,
            tabphones,
        })
    }

    fn split_word(&self, word: &Item, stats: &mut PipelineStats) -> Vec<Item> {
        let accent = word.head.info2;

        // split at syllable bounds, remember which segment holds the
        // primary stress, strip the marker ids
        let mut sylls: Vec<Vec<u8>> = vec![Vec::new()];
        let mut stressed: Option<usize> = None;
        for &ph in word.payload() {
            if self.tabphones.is_syllbound(ph) {
                sylls.push(Vec::new());
            } else if self.tabphones.is_primstress(ph) {
                stressed = stressed.or(Some(sylls.len() - 1));
            } else if !self.tabphones.is_secstress(ph) {
                let Some(last) = sylls.last_mut() else {
                    continue;
                };
                last.push(ph);
            }
        }
        sylls.retain(|s| !s.is_empty());
        if sylls.is_empty() {
            warn!("word without phones after splitting, discarding");
            stats.warnings += 1;
            stats.discarded_items += 1;
            return Vec::new();
        }

        let carrier = stressed.unwrap_or(0).min(sylls.len() - 1);
        let mut out = Vec::with_capacity(sylls.len());
        for (i, phones) in sylls.iter().enumerate() {
            let acc = if i == carrier { accent } else { item::ACC0 };
            match Item::new(ItemKind::SyllPhon, item::INFO_NA, acc, phones) {
                Ok(it) => out.push(it),
                Err(_) => {
                    warn!("syllable phone string too long, discarding");
                    stats.warnings += 1;
                }
            }
        }
        debug!(sylls = out.len(), "word split");
        out
    }
}

impl ProcessingUnit for SyllabUnit {
    fn name(&self) -> &'static str {
        "syllab"
    }

    fn initialize(&mut self, mode: ResetMode) -> Result<()> {
        self.state = State::Collect;
        self.in_item = None;
        self.out_items.clear();
        self.feed_pos = 0;
        if mode == ResetMode::Soft {
            return Ok(());
        }
        self.tabphones = self
            .voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        Ok(())
    }

    fn step(&mut self, stats: &mut PipelineStats) -> StepResult {
        loop {
            match self.state {
                State::Collect => match self.cb_in.borrow_mut().get_item() {
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
                },
                State::Process => {
                    let Some(it) = self.in_item.take() else {
                        self.state = State::Collect;
                        return StepResult::Busy;
                    };
                    self.out_items = match it.kind() {
                        ItemKind::WordPhon => self.split_word(&it, stats),
                        _ => vec![it],
                    };
                    self.feed_pos = 0;
                    if self.out_items.is_empty() {
                        self.state = State::Collect;
                        return StepResult::Busy;
                    }
                    self.state = State::Feed;
                }
                State::Feed => {
                    while self.feed_pos < self.out_items.len() {
                        match self.cb_out.borrow_mut().put_item(&self.out_items[self.feed_pos]) {
                            Ok(()) => {
                                stats.items_out += 1;
                                self.feed_pos += 1;
                            }
                            Err(OratioError::BufOverflow) => return StepResult::OutFull,
                            Err(e) => {
                                warn!(error = %e, "feeding problem, discarding item");
                                stats.warnings += 1;
                                self.feed_pos += 1;
                            }
                        }
                    }
                    self.out_items.clear();
                    self.state = State::Collect;
                    return StepResult::Busy;
                }
            }
        }
    }
}
