//! Accentuation and phrasing.
//!
//! Collects one punctuation-delimited phrase, then runs two right-to-left
//! passes over the buffered word items:
//!
//! 1. **Sub-phrasing** — a 5-slot POS window plus word/syllable distance
//!    counts feeds the phrasing tree; the predicted boundary strength and
//!    type go into an *overlay* array parallel to the items, never into the
//!    items themselves.
//! 2. **Accentuation** — the accent tree is Markov-order-2 on its own
//!    previous outputs; distances include the span to the next accent-1
//!    foot. The accent class lands in the word head `info2`; a word without
//!    any stressed phone never keeps an accent above ACC0 — it is forced to
//!    ACC3.
//!
//! Feeding re-expands the phrase: a leading BOUND (sentence begin or primary
//! phrase, tracked across phrases by a 2-state separator machine), synthetic
//! BOUND items where the overlay carries PHR2/PHR3, and SEND/TERM bounds for
//! trailing sentence/flush punctuation.

use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::item::{self, Item, ItemKind};
use crate::data::{BufferHandle, PipelineStats, ProcessingUnit, ResetMode, StepResult};
use crate::error::{OratioError, Result};
use crate::kb::tree::{EPSILON, HISTORY_ZERO};
use crate::kb::{KbId, PhoneTable, Tree};
use crate::rsrc::Voice;

/// Phrase capacity: item slots and content bytes.
const MAX_ITEMS: usize = 60;
const MAX_CONTENT: usize = 7680;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collect,
    ProcessPhr,
    ProcessAcc,
    Feed,
}

/// Boundary-strength state across phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SepState {
    /// Last phrase ended a sentence: next phrase opens with SBEG.
    Sentence,
    /// Last phrase ended at a primary phrase separator: next opens with PHR1.
    PrimaryPhrase,
}

/// Overlay annotation for one buffered item; `strength == 0` means unset.
#[derive(Debug, Clone, Copy, Default)]
struct BoundMark {
    strength: u8,
    btype: u8,
}

pub struct AccPhrUnit {
    voice: Rc<Voice>,
    cb_in: BufferHandle,
    cb_out: BufferHandle,
    state: State,
    sep_state: SepState,

    items: Vec<Item>,
    bounds: Vec<BoundMark>,
    content_len: usize,
    needs_more: bool,
    in_space_ok: bool,
    feed_pos: usize,
    leading_done: bool,

    tabphones: Arc<PhoneTable>,
    dtphr: Arc<Tree>,
    dtacc: Arc<Tree>,
}

impl AccPhrUnit {
    pub fn new(voice: Rc<Voice>, cb_in: BufferHandle, cb_out: BufferHandle) -> Result<AccPhrUnit> {
        let tabphones = voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        let dtphr = voice
            .tree(KbId::TreePhrasing)
            .ok_or(OratioError::KbMissing("phrasing tree"))?;
        let dtacc = voice
            .tree(KbId::TreeAccent)
            .ok_or(OratioError::KbMissing("accentuation tree"))?;
        Ok(AccPhrUnit {
            voice,
            cb_in,
            cb_out,
            state: State::Collect,
            sep_state: SepState::Sentence,
            items: Vec::new(),
            bounds: Vec::new(),
            content_len: 0,
            needs_more: true,
            in_space_ok: true,
            feed_pos: 0,
            leading_done: false,
            tabphones,
            dtphr,
            dtacc,
        })
    }

    fn reset_buffers(&mut self) {
        self.items.clear();
        self.bounds.clear();
        self.content_len = 0;
        self.needs_more = true;
        self.in_space_ok = true;
        self.feed_pos = 0;
        self.leading_done = false;
    }

    fn is_word(&self, i: usize) -> bool {
        self.items[i].kind() == ItemKind::WordPhon
    }

    /// Syllables in word `i`: syllable bounds in the phone string plus one.
    fn nr_sylls(&self, i: usize) -> u16 {
        let mut count = 1;
        for &ph in self.items[i].payload() {
            if self.tabphones.is_syllbound(ph) {
                count += 1;
            }
        }
        count
    }

    /// POS of the next word at or left of `ind`; EPSILON when there is none.
    fn pos_left(&self, ind: usize) -> (u16, usize) {
        let mut i = ind as isize - 1;
        while i >= 0 {
            if self.is_word(i as usize) {
                return (self.items[i as usize].head.info1 as u16, i as usize);
            }
            i -= 1;
        }
        (EPSILON, 0)
    }

    /// Boundary type for the phrase after a boundary, from the trailing PUNC.
    fn btype_from_trailing(&self) -> u8 {
        let Some(last) = self.items.last() else {
            return 0;
        };
        match last.head.info2 {
            item::PUNC_SENT_T => item::BOUNDTYPE_T,
            item::PUNC_SENT_Q => item::BOUNDTYPE_Q,
            item::PUNC_SENT_E => item::BOUNDTYPE_E,
            item::PUNC_PHRASE | item::PUNC_PHRASE_FORCED => item::BOUNDTYPE_P,
            _ => {
                warn!("invalid boundary type, not set");
                0
            }
        }
    }

    // -------------------------------------------------------------------
    // pass 1: sub-phrasing
    // -------------------------------------------------------------------

    fn sub_phrasing(&mut self, stats: &mut PipelineStats) {
        let mut nosubphrases = true;

        // last word carries the sentence-final context; the first word gets
        // the phrase-leading bound instead of a predicted one
        let mut upbound = self.items.len() as isize - 1;
        while upbound > 0 && !self.is_word(upbound as usize) {
            upbound -= 1;
        }
        if upbound <= 0 {
            debug!("less than two words in phrase, no subphrasing");
        }
        let upbound = upbound.max(0) as usize;

        let mut nrwordspre: u16 = 1; // pre-decremented before first use
        for i in 0..upbound {
            if self.is_word(i) {
                nrwordspre += 1;
            }
        }
        let mut nrwordsfol: u16 = 0;
        let mut nrsyllsfol: u16 = 0;

        let mut valbuf = [EPSILON; 5];
        valbuf[1] = if self.items.is_empty() {
            EPSILON
        } else {
            self.items[upbound].head.info1 as u16
        };
        let (pos, mut lastprev) = self.pos_left(upbound);
        valbuf[0] = pos;

        let mut i = upbound;
        while i > 0 && nrwordspre > 1 {
            if !self.is_word(i) {
                i -= 1;
                continue;
            }
            let curpos = self.items[i].head.info1 as u16;

            valbuf[4] = valbuf[3];
            valbuf[3] = valbuf[2];
            valbuf[2] = valbuf[1];
            valbuf[1] = valbuf[0];
            let (pos, lp) = self.pos_left(lastprev);
            valbuf[0] = pos;
            lastprev = lp;

            if curpos != valbuf[2] {
                warn!("syncing pos window");
                stats.warnings += 1;
                valbuf[2] = curpos;
            }

            nrwordsfol += 1;
            nrsyllsfol += self.nr_sylls(i);
            nrwordspre -= 1;

            let strength = match self.dtphr.construct_phrasing(
                valbuf[0] as u8,
                valbuf[1] as u8,
                valbuf[2] as u8,
                valbuf[3] as u8,
                valbuf[4] as u8,
                nrwordspre,
                nrwordsfol,
                nrsyllsfol,
            ) {
                Some(invec) => {
                    let res = self.dtphr.classify(&invec);
                    if res.set {
                        self.dtphr.map_out_fixed(res.class)
                    } else {
                        None
                    }
                }
                None => None,
            };
            let strength = match strength {
                Some(s) if s <= 255 => s as u8,
                _ => {
                    warn!("problem determining subphrase boundary strength");
                    stats.warnings += 1;
                    stats.fallbacks += 1;
                    item::BOUND_PHR0
                }
            };

            self.bounds[i].strength = strength;
            if strength == item::BOUND_PHR2 || strength == item::BOUND_PHR3 {
                self.bounds[i].btype = if nosubphrases {
                    nosubphrases = false;
                    self.btype_from_trailing()
                } else {
                    item::BOUNDTYPE_P
                };
                nrwordsfol = 0;
                nrsyllsfol = 0;
            }
            i -= 1;
        }

        // leading bound of the whole phrase
        self.bounds[0].strength = match self.sep_state {
            SepState::Sentence => item::BOUND_SBEG,
            SepState::PrimaryPhrase => item::BOUND_PHR1,
        };
        self.bounds[0].btype = if nosubphrases {
            self.btype_from_trailing()
        } else {
            item::BOUNDTYPE_P
        };

        // advance the separator machine from the trailing PUNC
        if let Some(last) = self.items.last() {
            match last.head.info1 {
                item::PUNC_SENTEND | item::PUNC_FLUSH => self.sep_state = SepState::Sentence,
                item::PUNC_PHRASEEND => self.sep_state = SepState::PrimaryPhrase,
                _ => {
                    warn!("invalid boundary strength state, not changed");
                    stats.warnings += 1;
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // pass 2: accentuation
    // -------------------------------------------------------------------

    /// Syllable split of word `ind` around its first primary stress:
    /// sylls before it, sylls after it (the stressed one excluded).
    fn syll_parts(&self, ind: usize) -> (u16, u16) {
        let mut s1: u16 = 0;
        let mut s2: u16 = 0;
        let mut after = false;
        for &ph in self.items[ind].payload() {
            if self.tabphones.is_primstress(ph) {
                after = true;
            } else if self.tabphones.is_syllbound(ph) {
                if after {
                    s2 += 1;
                } else {
                    s1 += 1;
                }
            }
        }
        if after {
            s2 += 1;
        } else {
            s1 += 1;
        }
        if s2 > 0 {
            s2 -= 1;
        }
        if !after {
            s2 = s1;
        }
        (s1, s2)
    }

    fn word_without_stress(&self, ind: usize) -> bool {
        !self.items[ind].payload().iter().any(|&ph| {
            self.tabphones.is_primstress(ph) || self.tabphones.is_secstress(ph)
        })
    }

    #[allow(clippy::type_complexity)]
    fn distances_right(&self, ind: usize) -> (u16, u16, u16, u16) {
        let (_, s2) = self.syll_parts(ind);
        let mut nrwordsfol: u16 = 0;
        let mut nrsyllsfol: u16 = s2;
        let mut i = ind + 1;
        while i < self.items.len() && self.bounds[i].strength == item::BOUND_PHR0 {
            if self.is_word(i) {
                nrwordsfol += 1;
                nrsyllsfol += self.nr_sylls(i);
            }
            i += 1;
        }

        let mut footwordsfol: u16 = 0;
        let mut footsyllsfol: u16 = s2;
        let mut i = ind + 1;
        while i < self.items.len() && self.items[i].head.info2 != item::ACC1 {
            if self.is_word(i) {
                footwordsfol += 1;
                footsyllsfol += self.nr_sylls(i);
            }
            i += 1;
        }
        if i < self.items.len() && self.items[i].head.info2 == item::ACC1 {
            let (s1, _) = self.syll_parts(i);
            footsyllsfol += s1;
        }
        (nrwordsfol, nrsyllsfol, footwordsfol, footsyllsfol)
    }

    fn distances_left(&self, ind: usize) -> (u16, u16) {
        let (s1, _) = self.syll_parts(ind);
        let mut nrwordspre: u16 = 0;
        let mut nrsyllspre: u16 = s1;
        let mut i = ind as isize - 1;
        while i >= 0 && self.bounds[i as usize].strength == item::BOUND_PHR0 {
            if self.is_word(i as usize) {
                nrwordspre += 1;
                nrsyllspre += self.nr_sylls(i as usize);
            }
            i -= 1;
        }
        // the phrase-initial word carries a non-PHR0 bound but still counts
        if i > 0 && self.is_word(i as usize) {
            nrwordspre += 1;
            nrsyllspre += self.nr_sylls(i as usize);
        }
        (nrwordspre, nrsyllspre)
    }

    fn accentuation(&mut self, stats: &mut PipelineStats) {
        let mut upbound = self.items.len() as isize - 1;
        while upbound >= 0 && !self.is_word(upbound as usize) {
            upbound -= 1;
        }
        if upbound < 0 {
            debug!("no word in phrase, no accentuation");
            return;
        }
        let upbound = upbound as usize;

        let mut prevout: u16 = HISTORY_ZERO;
        let mut hist1: u16 = HISTORY_ZERO;
        let mut hist2: u16 = HISTORY_ZERO;

        let mut valbuf = [EPSILON; 5];
        valbuf[1] = self.items[upbound].head.info1 as u16;
        let (pos, mut lastprev) = self.pos_left(upbound);
        valbuf[0] = pos;

        let mut i = upbound as isize;
        while i >= 0 {
            let ind = i as usize;
            if !self.is_word(ind) {
                i -= 1;
                continue;
            }
            let curpos = self.items[ind].head.info1 as u16;

            valbuf[4] = valbuf[3];
            valbuf[3] = valbuf[2];
            valbuf[2] = valbuf[1];
            valbuf[1] = valbuf[0];
            let (pos, lp) = self.pos_left(lastprev);
            valbuf[0] = pos;
            lastprev = lp;

            if curpos != valbuf[2] {
                warn!("syncing pos window");
                stats.warnings += 1;
                valbuf[2] = curpos;
            }

            hist2 = hist1;
            hist1 = prevout;

            let (nrwordsfol, nrsyllsfol, footwordsfol, footsyllsfol) =
                self.distances_right(ind);
            let (nrwordspre, nrsyllspre) = self.distances_left(ind);

            let class = match self.dtacc.construct_accent(
                valbuf[0] as u8,
                valbuf[1] as u8,
                valbuf[2] as u8,
                valbuf[3] as u8,
                valbuf[4] as u8,
                hist1,
                hist2,
                nrwordspre,
                nrsyllspre,
                nrwordsfol,
                nrsyllsfol,
                footwordsfol,
                footsyllsfol,
            ) {
                Some(invec) => {
                    let res = self.dtacc.classify(&invec);
                    if res.set {
                        prevout = res.class;
                        self.dtacc.map_out_fixed(res.class)
                    } else {
                        None
                    }
                }
                None => None,
            };

            let accent = match class {
                Some(c) if c <= 255 => c as u8,
                _ => {
                    warn!("problem determining accentuation level");
                    stats.warnings += 1;
                    stats.fallbacks += 1;
                    item::ACC0
                }
            };
            // the tree's class is overridden when the phone string carries
            // no stress at all
            let accent = if self.word_without_stress(ind) && accent != item::ACC0 {
                item::ACC3
            } else {
                accent
            };
            self.items[ind].set_info2(accent);
            i -= 1;
        }
    }

    // -------------------------------------------------------------------
    // feed
    // -------------------------------------------------------------------

    fn put_bound(
        &mut self,
        strength: u8,
        btype: u8,
        stats: &mut PipelineStats,
    ) -> std::result::Result<(), StepResult> {
        let bound = Item::mark(ItemKind::Bound, strength, btype);
        match self.cb_out.borrow_mut().put_item(&bound) {
            Ok(()) => {
                stats.items_out += 1;
                Ok(())
            }
            Err(OratioError::BufOverflow) => Err(StepResult::OutFull),
            Err(e) => {
                warn!(error = %e, "problem putting bound item");
                Err(StepResult::Error)
            }
        }
    }

    fn feed(&mut self, stats: &mut PipelineStats) -> std::result::Result<(), StepResult> {
        if !self.leading_done {
            // no leading bound in front of a lone flush
            let lone_flush = self
                .items
                .first()
                .map(|it| it.kind() == ItemKind::Punc && it.head.info1 == item::PUNC_FLUSH)
                .unwrap_or(false);
            if !lone_flush {
                self.put_bound(self.bounds[0].strength, self.bounds[0].btype, stats)?;
            }
            self.leading_done = true;
        }

        while self.feed_pos < self.items.len() {
            let i = self.feed_pos;
            let last = i == self.items.len() - 1;
            match self.items[i].kind() {
                ItemKind::Punc => {
                    if last && self.items[i].head.info1 == item::PUNC_SENTEND {
                        self.put_bound(item::BOUND_SEND, item::INFO_NA, stats)?;
                    } else if last && self.items[i].head.info1 == item::PUNC_FLUSH {
                        self.put_bound(item::BOUND_TERM, item::INFO_NA, stats)?;
                    }
                    // phrase-end punctuation emits nothing: the next
                    // phrase's leading PHR1 covers it
                    self.feed_pos += 1;
                }
                _ => {
                    let mark = self.bounds[i];
                    if mark.strength == item::BOUND_PHR2 || mark.strength == item::BOUND_PHR3 {
                        self.put_bound(mark.strength, mark.btype, stats)?;
                        // on a later retry this bound must not re-emit
                        self.bounds[i].strength = 0;
                    }
                    match self.cb_out.borrow_mut().put_item(&self.items[i]) {
                        Ok(()) => {
                            stats.items_out += 1;
                            self.feed_pos += 1;
                        }
                        Err(OratioError::BufOverflow) => return Err(StepResult::OutFull),
                        Err(e) => {
                            warn!(error = %e, "feeding problem, discarding item");
                            stats.warnings += 1;
                            self.feed_pos += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl ProcessingUnit for AccPhrUnit {
    fn name(&self) -> &'static str {
        "acph"
    }

    fn initialize(&mut self, mode: ResetMode) -> Result<()> {
        self.state = State::Collect;
        self.sep_state = SepState::Sentence;
        self.reset_buffers();
        if mode == ResetMode::Soft {
            return Ok(());
        }
        self.tabphones = self
            .voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        self.dtphr = self
            .voice
            .tree(KbId::TreePhrasing)
            .ok_or(OratioError::KbMissing("phrasing tree"))?;
        self.dtacc = self
            .voice
            .tree(KbId::TreeAccent)
            .ok_or(OratioError::KbMissing("accentuation tree"))?;
        Ok(())
    }

    fn step(&mut self, stats: &mut PipelineStats) -> StepResult {
        loop {
            match self.state {
                State::Collect => {
                    while self.in_space_ok && self.needs_more {
                        let got = self.cb_in.borrow_mut().get_item();
                        match got {
                            Ok(Some(mut it)) => {
                                stats.items_in += 1;
                                // a flush command becomes a flush PUNC so it
                                // terminates the phrase like punctuation
                                if it.kind() == ItemKind::Cmd
                                    && it.head.info1 == item::CMD_FLUSH
                                {
                                    it = Item::mark(
                                        ItemKind::Punc,
                                        item::PUNC_FLUSH,
                                        item::PUNC_SENT_T,
                                    );
                                }
                                if it.kind() == ItemKind::Punc {
                                    self.needs_more = false;
                                }
                                self.content_len += it.payload().len();
                                self.items.push(it);
                                self.bounds.push(BoundMark::default());
                                if self.items.len() >= MAX_ITEMS - 2
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
                        self.state = State::ProcessPhr;
                        return StepResult::Atomic;
                    } else if !self.in_space_ok {
                        self.items.push(Item::mark(
                            ItemKind::Punc,
                            item::PUNC_PHRASEEND,
                            item::PUNC_PHRASE_FORCED,
                        ));
                        self.bounds.push(BoundMark::default());
                        warn!("forcing phrase end, added punc");
                        stats.warnings += 1;
                        stats.forced_terminations += 1;
                        self.needs_more = false;
                        self.state = State::ProcessPhr;
                        return StepResult::Atomic;
                    } else {
                        return StepResult::Idle;
                    }
                }
                State::ProcessPhr => {
                    if self.items.is_empty() {
                        warn!("no items in buffer");
                        self.state = State::Collect;
                        return StepResult::Busy;
                    }
                    self.sub_phrasing(stats);
                    self.state = State::ProcessAcc;
                }
                State::ProcessAcc => {
                    self.accentuation(stats);
                    self.state = State::Feed;
                }
                State::Feed => match self.feed(stats) {
                    Ok(()) => {
                        self.reset_buffers();
                        self.state = State::Collect;
                        return StepResult::Busy;
                    }
                    Err(r) => return r,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ItemBuffer;
    use crate::testsupport::{hello_phones, test_voice, POS_NOUN};
    use std::cell::RefCell;

    fn unit() -> (AccPhrUnit, BufferHandle, BufferHandle) {
        let voice = Rc::new(test_voice());
        let cb_in = Rc::new(RefCell::new(ItemBuffer::new(4096)));
        let cb_out = Rc::new(RefCell::new(ItemBuffer::new(4096)));
        let acph = AccPhrUnit::new(voice, Rc::clone(&cb_in), Rc::clone(&cb_out)).unwrap();
        (acph, cb_in, cb_out)
    }

    fn run(acph: &mut AccPhrUnit, stats: &mut PipelineStats) {
        loop {
            match acph.step(stats) {
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

    fn word() -> Item {
        Item::new(ItemKind::WordPhon, POS_NOUN, item::INFO_NA, &hello_phones()).unwrap()
    }

    fn punc(info1: u8, info2: u8) -> Item {
        Item::mark(ItemKind::Punc, info1, info2)
    }

    #[test]
    fn sentence_brackets_with_sbeg_and_send() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in.borrow_mut().put_item(&word()).unwrap();
        cb_in.borrow_mut().put_item(&word()).unwrap();
        cb_in
            .borrow_mut()
            .put_item(&punc(item::PUNC_SENTEND, item::PUNC_SENT_T))
            .unwrap();
        run(&mut acph, &mut stats);

        let items = drain(&cb_out);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].kind(), ItemKind::Bound);
        assert_eq!(items[0].head.info1, item::BOUND_SBEG);
        assert_eq!(items[0].head.info2, item::BOUNDTYPE_T);
        assert_eq!(items[1].kind(), ItemKind::WordPhon);
        assert_eq!(items[2].kind(), ItemKind::WordPhon);
        assert_eq!(items[3].head.info1, item::BOUND_SEND);
    }

    #[test]
    fn accent_classes_are_written_into_info2() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in.borrow_mut().put_item(&word()).unwrap();
        cb_in
            .borrow_mut()
            .put_item(&punc(item::PUNC_SENTEND, item::PUNC_SENT_T))
            .unwrap();
        run(&mut acph, &mut stats);
        let items = drain(&cb_out);
        // the fixture accent tree always answers ACC2, the word is stressed
        assert_eq!(items[1].head.info2, item::ACC2);
    }

    #[test]
    fn stressless_word_is_capped_at_acc3() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        // phones without any stress marker
        let bare = Item::new(ItemKind::WordPhon, POS_NOUN, item::INFO_NA, &[20, 30]).unwrap();
        cb_in.borrow_mut().put_item(&bare).unwrap();
        cb_in
            .borrow_mut()
            .put_item(&punc(item::PUNC_SENTEND, item::PUNC_SENT_T))
            .unwrap();
        run(&mut acph, &mut stats);
        let items = drain(&cb_out);
        assert_eq!(items[1].head.info2, item::ACC3);
    }

    #[test]
    fn boundary_round_trip_partitions_like_the_input() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        // two phrases, one sentence:  w w PHRASEEND w SENTEND
        for _ in 0..2 {
            cb_in.borrow_mut().put_item(&word()).unwrap();
        }
        cb_in
            .borrow_mut()
            .put_item(&punc(item::PUNC_PHRASEEND, item::PUNC_PHRASE))
            .unwrap();
        cb_in.borrow_mut().put_item(&word()).unwrap();
        cb_in
            .borrow_mut()
            .put_item(&punc(item::PUNC_SENTEND, item::PUNC_SENT_T))
            .unwrap();
        run(&mut acph, &mut stats);

        let items = drain(&cb_out);
        let bounds: Vec<(u8, u8)> = items
            .iter()
            .filter(|it| it.kind() == ItemKind::Bound)
            .map(|it| (it.head.info1, it.head.info2))
            .collect();
        // exactly one bound per input separator, plus the trailing SEND:
        // SBEG (sentence start), PHR1 (phrase end), SEND (sentence end)
        assert_eq!(bounds.len(), 3);
        assert_eq!(bounds[0].0, item::BOUND_SBEG);
        assert_eq!(bounds[1].0, item::BOUND_PHR1);
        assert_eq!(bounds[2].0, item::BOUND_SEND);
        // no duplication, no loss of words
        let words = items
            .iter()
            .filter(|it| it.kind() == ItemKind::WordPhon)
            .count();
        assert_eq!(words, 3);
    }

    #[test]
    fn flush_terminates_with_term_bound() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in.borrow_mut().put_item(&word()).unwrap();
        cb_in
            .borrow_mut()
            .put_item(&Item::mark(ItemKind::Cmd, item::CMD_FLUSH, item::INFO_NA))
            .unwrap();
        run(&mut acph, &mut stats);
        let items = drain(&cb_out);
        assert_eq!(items.last().unwrap().head.info1, item::BOUND_TERM);
        assert_eq!(items.last().unwrap().kind(), ItemKind::Bound);
    }

    #[test]
    fn lone_flush_suppresses_the_leading_bound() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        cb_in
            .borrow_mut()
            .put_item(&Item::mark(ItemKind::Cmd, item::CMD_FLUSH, item::INFO_NA))
            .unwrap();
        run(&mut acph, &mut stats);
        let items = drain(&cb_out);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].head.info1, item::BOUND_TERM);
    }

    #[test]
    fn forced_phrase_end_when_buffer_fills() {
        let (mut acph, cb_in, cb_out) = unit();
        let mut stats = PipelineStats::default();
        for _ in 0..MAX_ITEMS {
            if cb_in.borrow_mut().put_item(&word()).is_err() {
                break;
            }
            match acph.step(&mut stats) {
                StepResult::Idle | StepResult::Atomic | StepResult::Busy => {}
                other => panic!("unexpected {other:?}"),
            }
            if stats.forced_terminations > 0 {
                break;
            }
        }
        run(&mut acph, &mut stats);
        assert_eq!(stats.forced_terminations, 1);
        let items = drain(&cb_out);
        // the forced phrase still opens with a bound and keeps every word
        assert_eq!(items[0].kind(), ItemKind::Bound);
        assert_eq!(items[0].head.info1, item::BOUND_SBEG);
        assert!(items
            .iter()
            .skip(1)
            .all(|it| it.kind() == ItemKind::WordPhon));
    }
}
