//! Phonetic-to-acoustic mapping.
//!
//! A multi-pass adapter over one sentence at a time:
//!
//! ```text
//! COLLECT → SCHEDULE → {IMMEDIATE | FORWARD | FORWARD_FORCE_TERM | PROCESS}
//!                                   │                                 │
//!                                 FEED ◄───────────────────────────────
//! ```
//!
//! The forward pass consumes BOUND and SYLLPHON items, building per-syllable
//! feature vectors and the flat sentence phone string; non-PAM items are
//! queued verbatim for positional re-emission. A sentence-ending boundary
//! triggers the backward pass, then PROCESS walks syllable by syllable,
//! phone by phone, running the duration, pitch and spectral trees and
//! emitting one PHONE item per phone.
//!
//! Admission control: when the syllable/phone/queue arenas cannot take the
//! next item, a synthetic TERM is forced through the forward pass and the
//! truncated sentence is flushed — pathological input degrades loudly, it
//! never corrupts the following sentence.

mod features;
mod vector;

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::item::{self, Item, ItemKind};
use crate::data::{BufferHandle, PipelineStats, ProcessingUnit, ResetMode, StepResult};
use crate::error::{OratioError, Result};
use crate::kb::{KbId, PdfDur, PdfMul, PhoneTable, Tree};
use crate::rsrc::Voice;

use features::{Dir, Event, SyllFeat, Trackers, SENT_DECLARATIVE, SENT_INTERROGATIVE};

pub(crate) use features::B3;

/// Sentence arena limits; exceeding them forces a TERM.
pub(crate) const MAX_SYLLS: usize = 100;
pub(crate) const MAX_PHONES: usize = 400;
pub(crate) const MAX_QUEUED_ITEMS: usize = 255;
pub(crate) const MAX_QUEUED_BYTES: usize = 4096;

/// States per phone.
pub(crate) const NRSTPF: usize = 5;

/// Weight rows for pause-duration redistribution, by boundary kind.
const SIL_WEIGHTS: [[u16; NRSTPF]; 5] = [
    [10, 10, 10, 10, 1], // SBEG
    [1, 4, 8, 4, 1],     // PHR1
    [1, 4, 8, 4, 1],     // PHR2
    [1, 10, 10, 10, 10], // SEND
    [1, 1, 1, 1, 1],     // default
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collect,
    Schedule,
    Immediate,
    Forward,
    ForwardForceTerm,
    Process,
    Feed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyllType {
    Pause,
    Syllable,
}

/// Forward-pass outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fwd {
    /// Sentence complete, backward pass may start.
    Ready,
    /// More input needed.
    More,
    /// Not a PAM item.
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreSyll {
    Continue,
    GotoFeed,
    Ended,
    FlushReceived,
}

pub struct PamUnit {
    voice: Rc<Voice>,
    cb_in: BufferHandle,
    cb_out: BufferHandle,
    state: State,
    in_item: Option<Item>,
    out_items: VecDeque<Item>,

    // sentence arenas
    pub(crate) sylls: Vec<SyllFeat>,
    pub(crate) phone_ids: Vec<u8>,
    queued: Vec<Item>,
    queued_bytes: usize,
    /// Attached-item ids seen before the first syllable (1-based, 0=none).
    pre_syll_items: (u8, u8),

    // cursors
    pub(crate) curr_syll: isize,
    pub(crate) syll_phone: usize,
    curr_attached: usize,

    // sentence context
    sent_type: u8,
    phrase_type: u8,
    pub(crate) trackers: Trackers,

    // prosody modifiers
    pub(crate) pitch_factor: f32,
    pub(crate) speed_factor: f32,
    pub(crate) dur_rest: f32,

    // per-phone scratch
    pub(crate) ph_feats: [u8; features::VECT_SIZE],
    pub(crate) num_frames_state: [u8; NRSTPF],
    pub(crate) lf0_index: [u16; NRSTPF],
    pub(crate) mgc_index: [u16; NRSTPF],
    pub(crate) phon_dur: u16,
    pub(crate) phon_f0: [f32; NRSTPF],

    // knowledge
    pub(crate) tabphones: Arc<PhoneTable>,
    pub(crate) dtdur: Arc<Tree>,
    pub(crate) dtlfz: Vec<Arc<Tree>>,
    pub(crate) dtmgc: Vec<Arc<Tree>>,
    pub(crate) pdfdur: Arc<PdfDur>,
    pub(crate) pdflfz: Arc<PdfMul>,
}

impl PamUnit {
    pub fn new(voice: Rc<Voice>, cb_in: BufferHandle, cb_out: BufferHandle) -> Result<PamUnit> {
        let tabphones = voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        let dtdur = voice
            .tree(KbId::TreeDur)
            .ok_or(OratioError::KbMissing("duration tree"))?;
        let mut dtlfz = Vec::with_capacity(NRSTPF);
        let mut dtmgc = Vec::with_capacity(NRSTPF);
        for n in 0..NRSTPF {
            dtlfz.push(
                voice
                    .tree(KbId::lfz_tree(n))
                    .ok_or(OratioError::KbMissing("pitch tree"))?,
            );
            dtmgc.push(
                voice
                    .tree(KbId::mgc_tree(n))
                    .ok_or(OratioError::KbMissing("spectral tree"))?,
            );
        }
        let pdfdur = voice
            .pdf_dur(KbId::PdfDur)
            .ok_or(OratioError::KbMissing("duration pdf"))?;
        let pdflfz = voice
            .pdf_mul(KbId::PdfLfz)
            .ok_or(OratioError::KbMissing("pitch pdf"))?;

        Ok(PamUnit {
            voice,
            cb_in,
            cb_out,
            state: State::Collect,
            in_item: None,
            out_items: VecDeque::new(),
            sylls: Vec::new(),
            phone_ids: Vec::new(),
            queued: Vec::new(),
            queued_bytes: 0,
            pre_syll_items: (0, 0),
            curr_syll: -1,
            syll_phone: 0,
            curr_attached: 0,
            sent_type: SENT_DECLARATIVE,
            phrase_type: features::PHRASE_P,
            trackers: Trackers::default(),
            pitch_factor: 1.0,
            speed_factor: 1.0,
            dur_rest: 0.0,
            ph_feats: [0; features::VECT_SIZE],
            num_frames_state: [0; NRSTPF],
            lf0_index: [0; NRSTPF],
            mgc_index: [0; NRSTPF],
            phon_dur: 0,
            phon_f0: [0.0; NRSTPF],
            tabphones,
            dtdur,
            dtlfz,
            dtmgc,
            pdfdur,
            pdflfz,
        })
    }

    /// Discard the sentence under construction.
    fn reset_sentence(&mut self) {
        self.sylls.clear();
        self.phone_ids.clear();
        self.queued.clear();
        self.queued_bytes = 0;
        self.pre_syll_items = (0, 0);
        self.curr_syll = -1;
        self.syll_phone = 0;
        self.curr_attached = 0;
        self.sent_type = SENT_DECLARATIVE;
        self.phrase_type = features::PHRASE_P;
        self.dur_rest = 0.0;
        self.trackers.reset();
    }

    // -------------------------------------------------------------------
    // scheduling predicates
    // -------------------------------------------------------------------

    fn is_pam_command(it: &Item) -> bool {
        it.kind() == ItemKind::Cmd
            && matches!(
                it.head.info1,
                item::CMD_FLUSH | item::CMD_PITCH | item::CMD_SPEED
            )
    }

    /// Items arriving with no sentence open are passed along immediately.
    fn check_immediate(&self, it: &Item) -> bool {
        if self.curr_syll <= -1 {
            if it.kind() == ItemKind::SyllPhon {
                return false;
            }
            if it.kind() == ItemKind::Bound && it.head.info1 == item::BOUND_SBEG {
                return false;
            }
            if PamUnit::is_pam_command(it) {
                return false;
            }
            return true;
        }
        false
    }

    /// Would this item exceed the sentence arenas?
    fn exceeds_limits(&self, it: &Item) -> bool {
        match it.kind() {
            ItemKind::SyllPhon => {
                self.sylls.len() >= MAX_SYLLS - 2
                    || self.phone_ids.len() + it.payload().len() >= MAX_PHONES - 2
            }
            ItemKind::Bound => {
                // pause-bearing bounds add a syllable and a phone
                if matches!(
                    it.head.info1,
                    item::BOUND_SBEG
                        | item::BOUND_SEND
                        | item::BOUND_TERM
                        | item::BOUND_PHR1
                        | item::BOUND_PHR2
                ) {
                    self.sylls.len() >= MAX_SYLLS - 2
                        || self.phone_ids.len() + 1 >= MAX_PHONES - 2
                } else {
                    false
                }
            }
            _ => self.queued_bytes + it.wire_len() >= MAX_QUEUED_BYTES - 1,
        }
    }

    fn deal_with(it: &Item) -> bool {
        matches!(it.kind(), ItemKind::SyllPhon | ItemKind::Bound)
    }

    /// Should this item be queued for later positional re-emission?
    fn has_to_be_queued(it: &Item) -> bool {
        match it.kind() {
            ItemKind::SyllPhon => false,
            ItemKind::Bound => !matches!(
                it.head.info1,
                item::BOUND_PHR3 | item::BOUND_PHR0
            ),
            _ => true,
        }
    }

    fn queue_item(&mut self, it: &Item) -> bool {
        if self.queued.len() >= MAX_QUEUED_ITEMS
            || self.queued_bytes + it.wire_len() >= MAX_QUEUED_BYTES - 1
        {
            return false;
        }
        self.queued_bytes += it.wire_len();
        self.queued.push(it.clone());
        let id = self.queued.len() as u8; // 1-based
        if self.curr_syll > -1 {
            let syll = &mut self.sylls[self.curr_syll as usize];
            if syll.item_first == 0 {
                syll.item_first = id;
            }
            syll.item_last = id;
        } else {
            // queued before any syllable: attaches to the first one
            if self.pre_syll_items.0 == 0 {
                self.pre_syll_items.0 = id;
            }
            self.pre_syll_items.1 = id;
        }
        true
    }

    /// Is this re-emitted item for downstream consumers?
    fn is_item_to_put(it: &Item) -> bool {
        match it.kind() {
            // SPEED is consumed here
            ItemKind::Cmd => it.head.info1 != item::CMD_SPEED,
            // boundaries are consumed except sentence end / term
            ItemKind::Bound => !matches!(
                it.head.info1,
                item::BOUND_SBEG
                    | item::BOUND_PHR0
                    | item::BOUND_PHR1
                    | item::BOUND_PHR2
                    | item::BOUND_PHR3
            ),
            _ => true,
        }
    }

    // -------------------------------------------------------------------
    // sentence-type mapping
    // -------------------------------------------------------------------

    fn map_sentence_type(info2: u8) -> u8 {
        match info2 {
            item::BOUNDTYPE_Q => SENT_INTERROGATIVE,
            _ => SENT_DECLARATIVE,
        }
    }

    fn map_phrase_type(info1: u8, info2: u8) -> u8 {
        match info2 {
            item::BOUNDTYPE_P => match info1 {
                // PHR2 rides with PHR1: both open a "P" phrase
                item::BOUND_PHR1 | item::BOUND_PHR2 | item::BOUND_SBEG => features::PHRASE_P,
                item::BOUND_PHR3 => features::PHRASE_LOW_P,
                _ => {
                    debug!(info1, "unexpected boundary strength for phrase type");
                    features::PHRASE_P
                }
            },
            item::BOUNDTYPE_T | item::BOUNDTYPE_E => features::PHRASE_T,
            item::BOUNDTYPE_Q => features::PHRASE_Y,
            _ => {
                debug!(info2, "unexpected boundary type for phrase type");
                features::PHRASE_T
            }
        }
    }

    // -------------------------------------------------------------------
    // forward pass
    // -------------------------------------------------------------------

    fn forward_step(&mut self, it: &Item) -> Result<Fwd> {
        match it.kind() {
            ItemKind::Bound => {
                // duration-constrained bounds carry min/max ms
                let (mut min_dur, mut max_dur) = (0u16, 0u16);
                if matches!(
                    it.head.info1,
                    item::BOUND_SBEG
                        | item::BOUND_PHR1
                        | item::BOUND_PHR2
                        | item::BOUND_SEND
                        | item::BOUND_TERM
                ) && it.payload().len() == 4
                {
                    min_dur = it.payload_u16_le(0).unwrap_or(0);
                    max_dur = it.payload_u16_le(2).unwrap_or(0);
                }
                match it.head.info1 {
                    item::BOUND_SBEG => {
                        self.reset_sentence_keep_presyll();
                        self.sent_type = PamUnit::map_sentence_type(it.head.info2);
                        self.phrase_type = PamUnit::map_phrase_type(it.head.info1, it.head.info2);
                        self.create_syllable(SyllType::Pause, None, it.head.info1, min_dur, max_dur)?;
                        self.set_curr_to_last();
                        self.process_event(Event::PrimaryBound, Dir::Forward);
                        Ok(Fwd::More)
                    }
                    item::BOUND_PHR1 | item::BOUND_PHR2 => {
                        self.sent_type = PamUnit::map_sentence_type(it.head.info2);
                        self.phrase_type = PamUnit::map_phrase_type(it.head.info1, it.head.info2);
                        self.create_syllable(SyllType::Pause, None, it.head.info1, min_dur, max_dur)?;
                        self.set_curr_to_last();
                        self.process_event(Event::PrimaryBound, Dir::Forward);
                        Ok(Fwd::More)
                    }
                    item::BOUND_PHR3 => {
                        self.process_event(Event::SecondaryBound, Dir::Forward);
                        self.sent_type = PamUnit::map_sentence_type(it.head.info2);
                        self.phrase_type = PamUnit::map_phrase_type(it.head.info1, it.head.info2);
                        Ok(Fwd::More)
                    }
                    item::BOUND_PHR0 => {
                        self.process_event(Event::WordBound, Dir::Forward);
                        Ok(Fwd::More)
                    }
                    item::BOUND_SEND => {
                        self.create_syllable(SyllType::Pause, None, it.head.info1, min_dur, max_dur)?;
                        self.set_curr_to_last();
                        self.process_event(Event::PrimaryBound, Dir::Forward);
                        Ok(Fwd::Ready)
                    }
                    item::BOUND_TERM => {
                        if self.curr_syll == -1 {
                            return Ok(Fwd::NotApplicable);
                        }
                        self.create_syllable(SyllType::Pause, None, it.head.info1, min_dur, max_dur)?;
                        self.set_curr_to_last();
                        self.process_event(Event::PrimaryBound, Dir::Forward);
                        Ok(Fwd::Ready)
                    }
                    _ => Ok(Fwd::NotApplicable),
                }
            }
            ItemKind::SyllPhon => {
                if self.curr_syll == -1 {
                    // a TERM freed the arenas mid-sentence: reopen with the
                    // previous sentence context
                    self.reset_sentence_keep_presyll();
                    self.create_syllable(SyllType::Pause, None, item::BOUND_SBEG, 0, 0)?;
                    self.set_curr_to_last();
                    self.process_event(Event::PrimaryBound, Dir::Forward);
                }
                self.create_syllable(SyllType::Syllable, Some(it), 0, 0, 0)?;
                self.set_curr_to_last();
                self.process_event(Event::Syllable, Dir::Forward);
                Ok(Fwd::More)
            }
            _ => Ok(Fwd::NotApplicable),
        }
    }

    /// Full sentence reset that keeps items queued ahead of the sentence.
    fn reset_sentence_keep_presyll(&mut self) {
        let keep_queue: Vec<Item> = self.queued.clone();
        let keep_ids = self.pre_syll_items;
        let keep_bytes = self.queued_bytes;
        self.reset_sentence();
        self.queued = keep_queue;
        self.queued_bytes = keep_bytes;
        self.pre_syll_items = keep_ids;
    }

    fn set_curr_to_last(&mut self) {
        self.curr_syll = self.sylls.len() as isize - 1;
    }

    // -------------------------------------------------------------------
    // process-state helpers
    // -------------------------------------------------------------------

    fn has_to_process(&self) -> bool {
        if self.curr_syll <= -1 {
            return false;
        }
        let cur = self.curr_syll as usize;
        if cur >= self.sylls.len() {
            return false;
        }
        self.syll_phone < self.sylls[cur].v[B3] as usize
    }

    /// Advance to the next phone, attached item, or syllable.
    fn update_process(&mut self) {
        if self.curr_syll == -1 {
            return;
        }
        let cur = self.curr_syll as usize;
        let nphones = self.sylls[cur].v[B3] as usize;
        if self.syll_phone + 1 < nphones {
            self.syll_phone += 1;
            return;
        }
        if self.syll_phone < nphones {
            // marks end-of-syllable for has_to_process
            self.syll_phone += 1;
        }
        // any attached items on this syllable?
        let (first, last) = (self.sylls[cur].item_first, self.sylls[cur].item_last);
        if first > 0 {
            if self.curr_attached == 0 {
                self.curr_attached = first as usize;
                return;
            }
            if self.curr_attached < last as usize {
                self.curr_attached += 1;
                return;
            }
        }
        if cur + 1 < self.sylls.len() {
            self.curr_syll += 1;
            self.syll_phone = 0;
            self.curr_attached = 0;
            return;
        }
        self.curr_syll += 1;
        self.syll_phone = 0;
    }

    fn has_to_pop(&self) -> bool {
        if self.curr_syll <= -1 {
            return false;
        }
        let cur = self.curr_syll as usize;
        if cur >= self.sylls.len() {
            return false;
        }
        let (first, last) = (self.sylls[cur].item_first, self.sylls[cur].item_last);
        if first == 0 || last == 0 {
            return false;
        }
        self.curr_attached <= last as usize
    }

    fn pop_item(&self) -> Option<Item> {
        if !self.has_to_pop() || self.curr_attached == 0 {
            return None;
        }
        self.queued.get(self.curr_attached - 1).cloned()
    }

    /// Attached items of the first syllable queued ahead of SBEG.
    fn pop_pre_syll(&self) -> Option<Item> {
        if self.curr_syll != 0 {
            return None;
        }
        let (first, last) = (self.sylls[0].item_first, self.sylls[0].item_last);
        if first == 0 || last == 0 {
            return None;
        }
        if self.curr_attached > 0 && self.curr_attached > last as usize - 1 {
            return None;
        }
        self.queued.get(self.curr_attached).cloned()
    }

    fn do_command(&mut self, it: &Item) -> PreSyll {
        if it.kind() != ItemKind::Cmd {
            return PreSyll::Continue;
        }
        match it.head.info1 {
            item::CMD_FLUSH => {
                self.reset_sentence();
                PreSyll::FlushReceived
            }
            item::CMD_PITCH | item::CMD_SPEED => {
                let Some(value) = it.payload_u16_le(0) else {
                    warn!("pitch/speed command without value");
                    return PreSyll::Continue;
                };
                match it.head.info2 {
                    item::CMD_ABSOLUTE => {
                        let f = value as f32 / 100.0;
                        if it.head.info1 == item::CMD_PITCH {
                            self.pitch_factor = f;
                        } else {
                            self.speed_factor = 1.0 / f;
                        }
                    }
                    item::CMD_RELATIVE => {
                        let f = value as f32 / 1000.0;
                        if it.head.info1 == item::CMD_PITCH {
                            self.pitch_factor *= 1.0 / f;
                        } else {
                            self.speed_factor *= 1.0 / f;
                        }
                    }
                    _ => {}
                }
                PreSyll::Continue
            }
            _ => PreSyll::Continue,
        }
    }

    /// Re-emit items attached ahead of the first syllable, SBEG included.
    fn do_pre_syll(&mut self) -> PreSyll {
        let Some(qitem) = self.pop_pre_syll() else {
            return PreSyll::Ended;
        };
        let is_sbeg =
            qitem.kind() == ItemKind::Bound && qitem.head.info1 == item::BOUND_SBEG;
        if is_sbeg {
            self.out_items.push_back(qitem);
            self.curr_attached += 1;
            return PreSyll::GotoFeed;
        }
        let mut rc = PreSyll::Continue;
        if PamUnit::is_item_to_put(&qitem) {
            self.out_items.push_back(qitem.clone());
            rc = PreSyll::GotoFeed;
        }
        if PamUnit::is_pam_command(&qitem) {
            let crc = self.do_command(&qitem);
            if crc == PreSyll::FlushReceived {
                return crc;
            }
        }
        self.curr_attached += 1;
        rc
    }

    fn forced_term() -> Item {
        Item::mark(ItemKind::Bound, item::BOUND_TERM, item::BOUNDTYPE_T)
    }
}

impl ProcessingUnit for PamUnit {
    fn name(&self) -> &'static str {
        "pam"
    }

    fn initialize(&mut self, mode: ResetMode) -> Result<()> {
        self.state = State::Collect;
        self.in_item = None;
        self.out_items.clear();
        self.reset_sentence();
        if mode == ResetMode::Soft {
            return Ok(());
        }
        self.pitch_factor = 1.0;
        self.speed_factor = 1.0;
        self.tabphones = self
            .voice
            .phones()
            .ok_or(OratioError::KbMissing("phones table"))?;
        self.dtdur = self
            .voice
            .tree(KbId::TreeDur)
            .ok_or(OratioError::KbMissing("duration tree"))?;
        self.dtlfz.clear();
        self.dtmgc.clear();
        for n in 0..NRSTPF {
            self.dtlfz.push(
                self.voice
                    .tree(KbId::lfz_tree(n))
                    .ok_or(OratioError::KbMissing("pitch tree"))?,
            );
            self.dtmgc.push(
                self.voice
                    .tree(KbId::mgc_tree(n))
                    .ok_or(OratioError::KbMissing("spectral tree"))?,
            );
        }
        self.pdfdur = self
            .voice
            .pdf_dur(KbId::PdfDur)
            .ok_or(OratioError::KbMissing("duration pdf"))?;
        self.pdflfz = self
            .voice
            .pdf_mul(KbId::PdfLfz)
            .ok_or(OratioError::KbMissing("pitch pdf"))?;
        Ok(())
    }

    fn step(&mut self, stats: &mut PipelineStats) -> StepResult {
        loop {
            match self.state {
                State::Collect => match self.cb_in.borrow_mut().get_item() {
                    Ok(Some(it)) => {
                        stats.items_in += 1;
                        self.in_item = Some(it);
                        self.state = State::Schedule;
                    }
                    Ok(None) => return StepResult::Idle,
                    Err(e) => {
                        warn!(error = %e, "problem getting item");
                        return StepResult::Error;
                    }
                },

                State::Schedule => {
                    let Some(it) = self.in_item.clone() else {
                        self.state = State::Collect;
                        continue;
                    };
                    if self.check_immediate(&it) {
                        self.state = State::Immediate;
                    } else if self.exceeds_limits(&it) {
                        self.state = State::ForwardForceTerm;
                    } else if PamUnit::deal_with(&it) {
                        self.state = State::Forward;
                    } else if PamUnit::has_to_be_queued(&it) {
                        if !self.queue_item(&it) {
                            warn!("attached item queue full, discarding item");
                            stats.warnings += 1;
                            stats.discarded_items += 1;
                        }
                        self.in_item = None;
                        self.state = State::Collect;
                        return StepResult::Busy;
                    } else {
                        debug!("unexpected item sent to next stage");
                        self.state = State::Immediate;
                    }
                    return StepResult::Busy;
                }

                State::Forward => {
                    let Some(it) = self.in_item.clone() else {
                        self.state = State::Schedule;
                        continue;
                    };
                    let fwd = self.forward_step(&it);
                    if PamUnit::has_to_be_queued(&it) && !self.queue_item(&it) {
                        warn!("attached item queue full, discarding item");
                        stats.warnings += 1;
                    }
                    match fwd {
                        Ok(Fwd::Ready) => {
                            self.in_item = None;
                            self.backward_pass();
                            self.state = State::Process;
                            return StepResult::Busy;
                        }
                        Ok(Fwd::More) => {
                            self.in_item = None;
                            self.state = State::Schedule;
                            return StepResult::Atomic;
                        }
                        Ok(Fwd::NotApplicable) => {
                            self.state = State::Immediate;
                            return StepResult::Busy;
                        }
                        Err(e) => {
                            warn!(error = %e, "forward step failed, discarding sentence");
                            stats.warnings += 1;
                            stats.discarded_items += 1;
                            self.in_item = None;
                            self.reset_sentence();
                            self.state = State::Schedule;
                            return StepResult::Busy;
                        }
                    }
                }

                State::ForwardForceTerm => {
                    // free the arenas without losing the pending input item
                    let term = PamUnit::forced_term();
                    warn!("sentence arenas exhausted, forcing a term boundary");
                    stats.warnings += 1;
                    stats.forced_terminations += 1;
                    match self.forward_step(&term) {
                        Ok(Fwd::Ready) => {
                            self.queue_item(&term);
                            self.backward_pass();
                            self.state = State::Process;
                        }
                        _ => {
                            warn!("forced term did not close the sentence, discarding it");
                            stats.discarded_items += 1;
                            self.reset_sentence();
                            self.state = State::Schedule;
                        }
                    }
                    return StepResult::Busy;
                }

                State::Process => {
                    if self.curr_syll == 0 {
                        match self.do_pre_syll() {
                            PreSyll::GotoFeed => {
                                self.state = State::Feed;
                                return StepResult::Busy;
                            }
                            PreSyll::Continue => {
                                return StepResult::Busy;
                            }
                            PreSyll::FlushReceived => {
                                self.state = State::Schedule;
                                return StepResult::Busy;
                            }
                            PreSyll::Ended => {}
                        }
                    }
                    if self.has_to_process() {
                        match self.phone_process() {
                            Ok(()) => {
                                self.update_process();
                                self.state = State::Feed;
                                return StepResult::Busy;
                            }
                            Err(e) => {
                                warn!(error = %e, "phone processing failed");
                                return StepResult::Error;
                            }
                        }
                    }
                    if self.has_to_pop() {
                        let Some(qitem) = self.pop_item() else {
                            // stale attachment on a phone-less syllable
                            warn!("attached item index out of range, skipping");
                            stats.warnings += 1;
                            self.update_process();
                            return StepResult::Busy;
                        };
                        if PamUnit::is_item_to_put(&qitem) {
                            self.out_items.push_back(qitem.clone());
                            self.state = State::Feed;
                        }
                        if PamUnit::is_pam_command(&qitem)
                            && self.do_command(&qitem) == PreSyll::FlushReceived
                        {
                            self.state = State::Schedule;
                            return StepResult::Busy;
                        }
                        self.update_process();
                        return StepResult::Busy;
                    }
                    self.state = State::Schedule;
                    return StepResult::Busy;
                }

                State::Immediate => {
                    let Some(it) = self.in_item.take() else {
                        self.state = State::Schedule;
                        continue;
                    };
                    self.out_items.push_back(it);
                    self.state = State::Feed;
                    return StepResult::Busy;
                }

                State::Feed => {
                    while let Some(it) = self.out_items.front() {
                        match self.cb_out.borrow_mut().put_item(it) {
                            Ok(()) => {
                                stats.items_out += 1;
                                self.out_items.pop_front();
                            }
                            Err(OratioError::BufOverflow) => return StepResult::OutFull,
                            Err(e) => {
                                warn!(error = %e, "feeding problem, discarding item");
                                stats.warnings += 1;
                                self.out_items.pop_front();
                            }
                        }
                    }
                    if self.has_to_process() || self.has_to_pop() {
                        self.state = State::Process;
                    } else {
                        // sentence drained (or nothing active): clean slate
                        if self.curr_syll != -1
                            && self.curr_syll as usize >= self.sylls.len()
                        {
                            self.reset_sentence();
                        }
                        self.state = State::Schedule;
                    }
                    return StepResult::Busy;
                }
            }
        }
    }
}
