//! Sentence analysis: POS disambiguation and word phoneme expansion.
//!
//! Collects a punctuation-delimited sentence part, then runs two passes:
//!
//! 1. left-to-right POS disambiguation with a 7-slot window — three slots of
//!    the tree's own previous outputs, the current POS group, three
//!    lookahead POS values; unique POS ids skip the tree but refresh the
//!    history through reverse output mapping;
//! 2. word phoneme expansion — WORDINDEX resolves its selected lexicon
//!    record to phones, WORDGRAPH runs grapheme-to-phoneme right-to-left;
//!    both become WORDPHON items.

use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::item::{self, Item, ItemKind};
use crate::data::{BufferHandle, PipelineStats, ProcessingUnit, ResetMode, StepResult};
use crate::error::{OratioError, Result};
use crate::kb::lexicon::POSIND_SIZE;
use crate::kb::tree::{EPSILON, HISTORY_ZERO};
use crate::kb::{KbId, Lexicon, PhoneTable, PosTable, Tree};
use crate::rsrc::Voice;

/// Sentence-part capacity: item slots and content bytes.
const MAX_ITEMS: usize = 60;
const MAX_CONTENT: usize = 7680;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collect,
    ProcessPosd,
    ProcessWpho,
    Feed,
}

pub struct SentAnaUnit {
    voice: Rc<Voice>,
    cb_in: BufferHandle,
    cb_out: BufferHandle,
    state: State,

    items: Vec<Item>,
    content_len: usize,
    needs_more: bool,
    in_space_ok: bool,
    feed_pos: usize,

    lex: Arc<Lexicon>,
    ulex: Vec<Arc<Lexicon>>,
    tabpos: Arc<PosTable>,
    tabphones: Arc<PhoneTable>,
    dtposd: Arc<Tree>,
    dtg2p: Arc<Tree>,
}

fn is_word_kind(kind: ItemKind) -> bool {
    matches!(
        kind,
        ItemKind::WordGraph | ItemKind::WordIndex | ItemKind::WordPhon
    )
}

/// ASCII vowel heuristic for the G2P vowel count/order attributes; the
/// original reads grapheme properties from the tokenizer's graphs table,
/// which belongs to the out-of-scope front end.
fn is_vowel_letter(b: u8) -> bool {
    matches!(b.to_ascii_lowercase(), b'a' | b'e' | b'i' | b'o' | b'u')
}

impl SentAnaUnit {
    pub fn new(voice: Rc<Voice>, cb_in: BufferHandle, cb_out: BufferHandle) -> Result<SentAnaUnit> {
        let lex = voice
            .lexicon(KbId::LexMain)
            .ok_or(OratioError::KbMissing("main lexicon"))?;
        let ulex = voice.user_lexica();
        let tabpos = voice
            .pos_table()
            .ok_or(OratioError::KbMissing("pos table"))?;
        let tabphones = voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        let dtposd = voice
            .tree(KbId::TreePosDisamb)
            .ok_or(OratioError::KbMissing("pos disambiguation tree"))?;
        let dtg2p = voice
            .tree(KbId::TreeG2p)
            .ok_or(OratioError::KbMissing("g2p tree"))?;
        Ok(SentAnaUnit {
            voice,
            cb_in,
            cb_out,
            state: State::Collect,
            items: Vec::new(),
            content_len: 0,
            needs_more: true,
            in_space_ok: true,
            feed_pos: 0,
            lex,
            ulex,
            tabpos,
            tabphones,
            dtposd,
            dtg2p,
        })
    }

    fn reset_buffers(&mut self) {
        self.items.clear();
        self.content_len = 0;
        self.needs_more = true;
        self.in_space_ok = true;
        self.feed_pos = 0;
    }

    /// Next POS to the right of `from`, advancing the scan cursor.
    fn pos_right(&self, from: &mut usize) -> u16 {
        let mut i = *from + 1;
        while i < self.items.len() {
            if is_word_kind(self.items[i].kind()) {
                *from = i;
                return self.items[i].head.info1 as u16;
            }
            i += 1;
        }
        *from = i.saturating_sub(1);
        EPSILON
    }

    // -------------------------------------------------------------------
    // pass 1: POS disambiguation
    // -------------------------------------------------------------------

    fn disamb_pos(&mut self, stats: &mut PipelineStats) {
        const HALF: usize = 3;
        let Some(first) = self.items.iter().position(|it| is_word_kind(it.kind())) else {
            debug!("no item with pos found");
            return;
        };

        let mut prevout: u16 = HISTORY_ZERO;
        let mut lookahead = first;
        let mut valbuf = [HISTORY_ZERO; 7];
        valbuf[HALF + 1] = self.items[first].head.info1 as u16;
        for i in HALF + 2..7 {
            valbuf[i] = self.pos_right(&mut lookahead);
        }

        for ci in first..self.items.len() {
            if !is_word_kind(self.items[ci].kind()) {
                continue;
            }

            // shift histories and lookaheads one slot left
            for i in 1..HALF {
                valbuf[i - 1] = valbuf[i];
            }
            valbuf[HALF - 1] = prevout;
            for i in HALF + 1..7 {
                valbuf[i - 1] = valbuf[i];
            }
            valbuf[6] = self.pos_right(&mut lookahead);

            let cur_pos = self.items[ci].head.info1;
            if valbuf[HALF] != cur_pos as u16 {
                warn!("syncing pos window");
                stats.warnings += 1;
                valbuf[HALF] = cur_pos as u16;
            }

            if self.tabpos.is_unique(cur_pos) {
                // no disambiguation needed; refresh the history with the
                // tree-domain encoding of this POS
                prevout = self
                    .dtposd
                    .reverse_map_out_fixed(cur_pos as u16)
                    .unwrap_or(cur_pos as u16);
                continue;
            }

            let class = match self.dtposd.construct_pos_disamb(&valbuf) {
                Some(invec) => {
                    let res = self.dtposd.classify(&invec);
                    if res.set {
                        prevout = res.class;
                        self.dtposd.map_out_fixed(res.class)
                    } else {
                        None
                    }
                }
                None => None,
            };
            let class = match class {
                Some(c) if c <= 255 => c as u8,
                _ => {
                    warn!("problem disambiguating pos");
                    stats.warnings += 1;
                    item::INFO_ERR
                }
            };

            self.items[ci].set_info1(class);
            if self.items[ci].kind() == ItemKind::WordIndex {
                // keep the one record whose (possibly combined) POS contains
                // the prediction; first record as contingency
                let payload = self.items[ci].payload().to_vec();
                let mut selected = &payload[..POSIND_SIZE.min(payload.len())];
                for rec in payload.chunks_exact(POSIND_SIZE) {
                    if self.tabpos.is_part_of_group(class, rec[0]) {
                        selected = rec;
                        break;
                    }
                }
                let info2 = self.items[ci].head.info2;
                if let Ok(it) = Item::new(ItemKind::WordIndex, class, info2, selected) {
                    self.items[ci] = it;
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // pass 2: word phoneme expansion
    // -------------------------------------------------------------------

    fn lexicon_by_number(&self, nr: u8) -> &Lexicon {
        if nr == 0 {
            &self.lex
        } else {
            self.ulex
                .get(nr as usize - 1)
                .map(|l| l.as_ref())
                .unwrap_or(&self.lex)
        }
    }

    fn expand_index(&self, it: &Item, stats: &mut PipelineStats) -> Option<Item> {
        let payload = it.payload();
        if payload.len() < POSIND_SIZE {
            return None;
        }
        let lex = self.lexicon_by_number(it.head.info2);
        match lex.ind_lookup(&payload[1..POSIND_SIZE]) {
            Some((_, phones)) => {
                debug!(pos = it.head.info1, plen = phones.len(), "index resolved");
                Item::new(ItemKind::WordPhon, it.head.info1, it.head.info2, phones).ok()
            }
            None => {
                warn!("lexicon index lookup problem");
                stats.warnings += 1;
                None
            }
        }
    }

    /// Right-to-left G2P over the word's UTF-8 graphemes.
    fn g2p(&self, graph: &[u8], pos: u8, stats: &mut PipelineStats) -> Option<Vec<u8>> {
        let chars = crate::kb::tree::utf8_chars(graph)?;
        if chars.is_empty() {
            return None;
        }
        let vowel_flags: Vec<bool> = chars
            .iter()
            .map(|c| c.len() == 1 && is_vowel_letter(c[0]))
            .collect();
        let total_vowels = vowel_flags.iter().filter(|&&v| v).count() as u8;

        let mut rev_phones: Vec<u8> = Vec::new();
        let mut hist = [HISTORY_ZERO; 3];
        let mut primstress_seen = false;

        for at in (0..chars.len()).rev() {
            let (nrvow, ordvow) = if vowel_flags[at] {
                let ord = vowel_flags[..=at].iter().filter(|&&v| v).count() as u8;
                (total_vowels, ord)
            } else {
                (0, 0)
            };

            let mut out_val = 0u16;
            let invec = self.dtg2p.construct_g2p(
                graph,
                at,
                pos,
                nrvow,
                ordvow,
                primstress_seen,
                hist,
            );
            match invec {
                Some(invec) => {
                    let res = self.dtg2p.classify(&invec);
                    if res.set {
                        out_val = res.class;
                        match self.dtg2p.map_out_var(res.class) {
                            Some(phones)
                                if !phones.is_empty() && phones[0] != EPSILON =>
                            {
                                for &ph in phones.iter().rev() {
                                    if ph > 255 {
                                        warn!("g2p output outside valid range, skipping phone");
                                        stats.warnings += 1;
                                        continue;
                                    }
                                    rev_phones.push(ph as u8);
                                    if !primstress_seen
                                        && self.tabphones.is_primstress(ph as u8)
                                    {
                                        primstress_seen = true;
                                    }
                                }
                            }
                            Some(_) => {} // epsilon: no phones for this grapheme
                            None => {
                                warn!("problem decomposing g2p output");
                                stats.warnings += 1;
                            }
                        }
                    } else {
                        warn!("problem classifying g2p");
                        stats.warnings += 1;
                    }
                }
                None => {
                    warn!("problem with g2p input vector");
                    stats.warnings += 1;
                }
            }

            hist[2] = hist[1];
            hist[1] = hist[0];
            hist[0] = out_val;
        }

        let mut phones: Vec<u8> = rev_phones.into_iter().rev().collect();
        if phones.len() > 255 {
            warn!(plen = phones.len(), "maximum number of phones exceeded, truncating");
            stats.warnings += 1;
            phones.truncate(255);
        }
        Some(phones)
    }

    fn expand_words(&mut self, stats: &mut PipelineStats) {
        for i in 0..self.items.len() {
            let it = self.items[i].clone();
            match it.kind() {
                ItemKind::WordIndex => {
                    if let Some(out) = self.expand_index(&it, stats) {
                        self.items[i] = out;
                    }
                }
                ItemKind::WordGraph => {
                    match self.g2p(it.payload(), it.head.info1, stats) {
                        Some(phones) => {
                            if let Ok(out) = Item::new(
                                ItemKind::WordPhon,
                                it.head.info1,
                                it.head.info2,
                                &phones,
                            ) {
                                debug!(plen = phones.len(), "g2p done");
                                self.items[i] = out;
                            }
                        }
                        None => {
                            warn!("problem doing g2p");
                            stats.warnings += 1;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl ProcessingUnit for SentAnaUnit {
    fn name(&self) -> &'static str {
        "sentana"
    }

    fn initialize(&mut self, mode: ResetMode) -> Result<()> {
        self.state = State::Collect;
        self.reset_buffers();
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
        self.tabphones = self
            .voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        self.dtposd = self
            .voice
            .tree(KbId::TreePosDisamb)
            .ok_or(OratioError::KbMissing("pos disambiguation tree"))?;
        self.dtg2p = self
            .voice
            .tree(KbId::TreeG2p)
            .ok_or(OratioError::KbMissing("g2p tree"))?;
        Ok(())
    }

    fn step(&mut self, stats: &mut PipelineStats) -> StepResult {
        loop {
            match self.state {
                State::Collect => {
                    while self.in_space_ok && self.needs_more {
                        let got = self.cb_in.borrow_mut().get_item();
                        match got {
                            Ok(Some(it)) => {
                                stats.items_in += 1;
                                // sentence terminators end collection
                                if it.kind() == ItemKind::Punc
                                    || (it.kind() == ItemKind::Cmd
                                        && it.head.info1 == item::CMD_FLUSH)
                                {
                                    self.needs_more = false;
                                }
                                self.content_len += it.payload().len();
                                self.items.push(it);
                                if self.items.len() >= MAX_ITEMS - 1
                                    || self.content_len >= MAX_CONTENT
                                {
                                    self.in_space_ok = false;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "problem getting item");
                                return StepResult::Error;
                            }
                        }
                    }
                    if !self.needs_more {
                        self.state = State::ProcessPosd;
                        return StepResult::Atomic;
                    } else if !self.in_space_ok {
                        // out of space: force a phrase end so the sentence
                        // part can drain
                        self.items.push(Item::mark(
                            ItemKind::Punc,
                            item::PUNC_PHRASEEND,
                            item::PUNC_PHRASE_FORCED,
                        ));
                        warn!("forcing phrase end, added punc");
                        stats.warnings += 1;
                        stats.forced_terminations += 1;
                        self.needs_more = false;
                        self.state = State::ProcessPosd;
                        return StepResult::Atomic;
                    } else {
                        return StepResult::Idle;
                    }
                }
                State::ProcessPosd => {
                    if self.items.is_empty() {
                        self.state = State::Collect;
                        return StepResult::Busy;
                    }
                    self.disamb_pos(stats);
                    self.state = State::ProcessWpho;
                }
                State::ProcessWpho => {
                    self.expand_words(stats);
                    self.state = State::Feed;
                }
                State::Feed => {
                    while self.feed_pos < self.items.len() {
                        let it = &self.items[self.feed_pos];
                        match self.cb_out.borrow_mut().put_item(it) {
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
                    self.reset_buffers();
                    self.state = State::Collect;
                    return StepResult::Busy;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ItemBuffer;
    use crate::testsupport::{
        test_voice, PH_CONS, PH_PRIMSTRESS, PH_VOWEL_A, POS_NOUN, POS_VERB,
    };
    use std::cell::RefCell;

    fn unit() -> (SentAnaUnit, BufferHandle, BufferHandle) {
        let voice = Rc::new(test_voice());
        let cb_in = Rc::new(RefCell::new(ItemBuffer::new(2048)));
        let cb_out = Rc::new(RefCell::new(ItemBuffer::new(2048)));
        let sa = SentAnaUnit::new(voice, Rc::clone(&cb_in), Rc::clone(&cb_out)).unwrap();
        (sa, cb_in, cb_out)
    }

    fn run(sa: &mut SentAnaUnit, stats: &mut PipelineStats) {
        loop {
            match sa.step(stats) {
                StepResult::Busy | StepResult::Atomic => continue,
                StepResult::Idle => break,
                other => panic!("unexpected step result {other:?}"),
            }
        }
    }

    fn drain(cb: &BufferHandle) -> Vec<Item> {
        let mut out = Vec::new();
        while let Some(it) = cb.borrow_mut().get_item().unwrap() {
            out.push(it);
        }
        out
    }

    fn sentend() -> Item {
        Item::mark(ItemKind::Punc, item::PUNC_SENTEND, item::PUNC_SENT_T)
    }

    #[test]
    fn wordindex_resolves_to_lexicon_phones() {
        let (mut sa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        // single-record index for "hello", as wordana produces it
        let voice = Rc::new(test_voice());
        let lex = voice.lexicon(KbId::LexMain).unwrap();
        let res = lex.lookup(b"hello").unwrap();
        let mut payload = vec![res.records[0].pos];
        payload.extend_from_slice(&res.records[0].index.unwrap());
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordIndex, POS_NOUN, 0, &payload).unwrap())
            .unwrap();
        cb_in.borrow_mut().put_item(&sentend()).unwrap();
        run(&mut sa, &mut stats);
        let items = drain(&cb_out);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind(), ItemKind::WordPhon);
        assert_eq!(items[0].head.info1, POS_NOUN);
        assert!(!items[0].payload().is_empty());
        assert_eq!(items[1].kind(), ItemKind::Punc);
    }

    #[test]
    fn ambiguous_wordindex_selects_matching_record() {
        let (mut sa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        let voice = Rc::new(test_voice());
        let lex = voice.lexicon(KbId::LexMain).unwrap();
        let res = lex.lookup(b"bank").unwrap();
        assert_eq!(res.records.len(), 2);
        let mut payload = Vec::new();
        for rec in &res.records {
            payload.push(rec.pos);
            payload.extend_from_slice(&rec.index.unwrap());
        }
        // info1 = POS group of {noun, verb}
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordIndex, 100, 0, &payload).unwrap())
            .unwrap();
        cb_in.borrow_mut().put_item(&sentend()).unwrap();
        run(&mut sa, &mut stats);
        let items = drain(&cb_out);
        assert_eq!(items[0].kind(), ItemKind::WordPhon);
        // the fixture posd tree always predicts the noun reading
        assert_eq!(items[0].head.info1, POS_NOUN);
        assert_ne!(items[0].head.info1, POS_VERB);
    }

    #[test]
    fn wordgraph_runs_g2p_with_stress_once() {
        let (mut sa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::new(ItemKind::WordGraph, POS_NOUN, 0, b"world").unwrap())
            .unwrap();
        cb_in.borrow_mut().put_item(&sentend()).unwrap();
        run(&mut sa, &mut stats);
        let items = drain(&cb_out);
        assert_eq!(items[0].kind(), ItemKind::WordPhon);
        let phones = items[0].payload();
        // rightmost grapheme produced [primstress, vowel]; the rest consonants
        assert_eq!(
            phones,
            &[PH_CONS, PH_CONS, PH_CONS, PH_CONS, PH_PRIMSTRESS, PH_VOWEL_A]
        );
        let stress_count = phones
            .iter()
            .filter(|&&p| p == PH_PRIMSTRESS)
            .count();
        assert_eq!(stress_count, 1);
    }

    #[test]
    fn space_exhaustion_forces_a_phrase_end() {
        let (mut sa, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        // feed word items without any punctuation until the unit gives up
        let word = Item::new(ItemKind::WordGraph, POS_NOUN, 0, b"ab").unwrap();
        for _ in 0..MAX_ITEMS {
            cb_in.borrow_mut().put_item(&word).unwrap();
            match sa.step(&mut stats) {
                StepResult::Idle | StepResult::Atomic | StepResult::Busy => {}
                other => panic!("unexpected {other:?}"),
            }
            if stats.forced_terminations > 0 {
                break;
            }
        }
        run(&mut sa, &mut stats);
        assert_eq!(stats.forced_terminations, 1);
        let items = drain(&cb_out);
        let last = items.last().unwrap();
        assert_eq!(last.kind(), ItemKind::Punc);
        assert_eq!(last.head.info1, item::PUNC_PHRASEEND);
        assert_eq!(last.head.info2, item::PUNC_PHRASE_FORCED);
    }
}
