//! Per-syllable feature accumulation for the PAM adapter.
//!
//! Every letter-coded feature has its own small state machine driven by the
//! event stream (syllable / word bound / secondary bound / primary bound),
//! once forward and once backward over the buffered sentence. Forward
//! variants count from the last boundary, backward variants count to the
//! next one; sentence-wide J features are stamped on every syllable during
//! the backward pass.

use tracing::debug;

use super::{PamUnit, SyllType, MAX_PHONES, MAX_SYLLS};
use crate::data::item::{self, Item};
use crate::error::{OratioError, Result};

/// Width of the per-syllable feature vector (without the carrier fields).
pub(crate) const VECT_SIZE: usize = 60;

// Field indices into a syllable feature vector. P-fields double as sentence
// carriers while the sentence is being built; the phone expansion overwrites
// them with phone-level values.
pub(crate) const P1: usize = 0;
pub(crate) const P2: usize = 1;
pub(crate) const P3: usize = 2;
pub(crate) const P4: usize = 3;
pub(crate) const P5: usize = 4;
pub(crate) const P6: usize = 5;
pub(crate) const P7: usize = 6;
/// Boundary type of a pause syllable lives in the P7 slot.
pub(crate) const BND: usize = 6;
pub(crate) const P8: usize = 7;
pub(crate) const A3: usize = 8;
pub(crate) const B1: usize = 9;
pub(crate) const B2: usize = 10;
pub(crate) const B3: usize = 11;
pub(crate) const B4: usize = 12;
pub(crate) const B5: usize = 13;
pub(crate) const B6: usize = 14;
pub(crate) const B7: usize = 15;
pub(crate) const B8: usize = 16;
pub(crate) const B9: usize = 17;
pub(crate) const B10: usize = 18;
pub(crate) const B11: usize = 19;
pub(crate) const B12: usize = 20;
pub(crate) const B13: usize = 21;
pub(crate) const B14: usize = 22;
pub(crate) const B15: usize = 23;
pub(crate) const B16: usize = 24;
pub(crate) const B17: usize = 25;
pub(crate) const B18: usize = 26;
pub(crate) const B19: usize = 27;
pub(crate) const B20: usize = 28;
pub(crate) const B21: usize = 29;
pub(crate) const C3: usize = 30;
pub(crate) const D2: usize = 31;
pub(crate) const E1: usize = 32;
pub(crate) const E2: usize = 33;
pub(crate) const E3: usize = 34;
pub(crate) const E4: usize = 35;
pub(crate) const E5: usize = 36;
pub(crate) const E6: usize = 37;
pub(crate) const E7: usize = 38;
pub(crate) const E8: usize = 39;
pub(crate) const E9: usize = 40;
pub(crate) const E10: usize = 41;
pub(crate) const E11: usize = 42;
pub(crate) const E12: usize = 43;
pub(crate) const E13: usize = 44;
pub(crate) const F2: usize = 45;
pub(crate) const G1: usize = 46;
pub(crate) const G2: usize = 47;
pub(crate) const H1: usize = 48;
pub(crate) const H2: usize = 49;
pub(crate) const H3: usize = 50;
pub(crate) const H4: usize = 51;
pub(crate) const H5: usize = 52;
pub(crate) const I1: usize = 53;
pub(crate) const I2: usize = 54;
pub(crate) const J1: usize = 55;
pub(crate) const J2: usize = 56;
pub(crate) const J3: usize = 57;
pub(crate) const DUR: usize = 58;
pub(crate) const F0: usize = 59;

/// Placeholder in stored feature vectors; compressed to `DONT_CARE_FED`.
pub(crate) const DONT_CARE: u8 = 250;
/// Don't-care value actually fed to the trees.
pub(crate) const DONT_CARE_FED: u8 = 10;
/// Don't-care value for phone identity slots.
pub(crate) const PH_DONT_CARE: u8 = 7;

/// Sentence types as encoded for the trees (exclamations ride as
/// declaratives).
pub(crate) const SENT_DECLARATIVE: u8 = 0;
pub(crate) const SENT_INTERROGATIVE: u8 = 1;

/// Phrase types as encoded for the trees.
pub(crate) const PHRASE_T: u8 = 0;
pub(crate) const PHRASE_P: u8 = 1;
pub(crate) const PHRASE_LOW_P: u8 = 2;
pub(crate) const PHRASE_Y: u8 = 3;

/// One sentence syllable: feature vector plus carrier fields.
#[derive(Debug, Clone)]
pub(crate) struct SyllFeat {
    pub v: [u8; VECT_SIZE],
    /// 1-based ids into the attached-item queue; 0 = none.
    pub item_first: u8,
    pub item_last: u8,
    /// Offset of this syllable's first phone in the sentence phone string.
    pub phone_offset: u16,
    /// Pause-duration hints in ms; 0 = no constraint.
    pub min_dur: u16,
    pub max_dur: u16,
}

impl SyllFeat {
    pub(crate) fn new() -> SyllFeat {
        SyllFeat {
            v: [0; VECT_SIZE],
            item_first: 0,
            item_last: 0,
            phone_offset: 0,
            min_dur: 0,
            max_dur: 0,
        }
    }
}

/// Events driving the feature processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    PrimaryBound,
    SecondaryBound,
    WordBound,
    Syllable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dir {
    Forward,
    Backward,
}

/// State variables of the per-feature accumulators.
#[derive(Debug, Default, Clone)]
pub(crate) struct Trackers {
    pub a3_overall_syllable: u8,
    pub a3_primary_phrase_syllable: u8,
    pub b4_b5_syllable: u8,
    pub b6_b7_syllable: u8,
    pub b6_b7_state: u8,
    pub b8_b9_stressed_syllable: u8,
    pub b10_b11_accented_syllable: u8,
    pub b12_b13_syllable: u8,
    pub b12_b13_state: u8,
    pub b14_b15_syllable: u8,
    pub b14_b15_state: u8,
    pub b17_b19_syllable: u8,
    pub b17_b19_state: u8,
    pub b18_b20_b21_syllable: u8,
    pub b18_b20_b21_state: u8,
    pub c3_overall_syllable: u8,
    pub c3_primary_phrase_syllable: u8,
    pub d2_syllable_in_word: u8,
    pub d2_prev_syllable_in_word: u8,
    pub d2_current_primary_phrase_word: u8,
    pub e1_syllable_word_start: i16,
    pub e1_syllable_word_end: i16,
    pub e1_content: u8,
    pub e2_syllable_word_start: i16,
    pub e2_syllable_word_end: i16,
    pub e3_e4_word: u8,
    pub e3_e4_state: u8,
    pub e5_e6_content_word: u8,
    pub e5_e6_content: u8,
    pub e7_e8_word: u8,
    pub e7_e8_content: u8,
    pub e7_e8_state: u8,
    pub e9_e11_word: u8,
    pub e9_e11_saw_word: u8,
    pub e9_e11_state: u8,
    pub e10_e12_e13_word: u8,
    pub e10_e12_e13_state: u8,
    pub e10_e12_e13_saw_word: u8,
    pub f2_overall_word: u8,
    pub f2_word_syllable: u8,
    pub f2_next_word_syllable: u8,
    pub f2_current_primary_phrase_word: u8,
    pub g1_current_secondary_phrase_syllable: i16,
    pub g1_current_syllable: i16,
    pub g2_current_secondary_phrase_word: i16,
    pub g2_current_word: i16,
    pub h1_current_secondary_phrase_syll: u8,
    pub h2_current_secondary_phrase_word: u8,
    pub h3_h4_current_secondary_phrase_word: u8,
    pub h5_state: u8,
    pub i1_secondary_phrase_syllable: u8,
    pub i1_next_secondary_phrase_syllable: u8,
    pub i2_secondary_phrase_word: u8,
    pub i2_next_secondary_phrase_word: u8,
    pub j1_utterance_syllable: u8,
    pub j2_utterance_word: u8,
    pub j3_utterance_sec_phrases: u8,
}

impl Trackers {
    /// Common part of the forward/backward resets.
    fn clear(&mut self) {
        *self = Trackers::default();
        self.b4_b5_syllable = 1;
        self.b17_b19_syllable = 1;
        self.b18_b20_b21_syllable = 1;
        self.e9_e11_word = 1;
        self.e10_e12_e13_word = 1;
        self.e7_e8_word = 1;
        self.h2_current_secondary_phrase_word = 1;
        self.e1_syllable_word_start = -1;
        self.e1_syllable_word_end = -1;
        self.e2_syllable_word_start = -1;
        self.e2_syllable_word_end = -1;
    }

    pub(crate) fn reset(&mut self) {
        self.clear();
    }

    /// Reset before the backward pass keeps the J totals.
    pub(crate) fn reset_backward(&mut self) {
        let j1 = self.j1_utterance_syllable;
        let j2 = self.j2_utterance_word;
        let j3 = self.j3_utterance_sec_phrases;
        self.clear();
        self.j1_utterance_syllable = j1;
        self.j2_utterance_word = j2;
        self.j3_utterance_sec_phrases = j3;
    }
}

impl PamUnit {
    /// Default pause-duration hints per boundary type (ms).
    pub(crate) fn default_boundary_limits(bound: u8) -> (u16, u16) {
        match bound {
            item::BOUND_SBEG => (0, 20),
            item::BOUND_SEND => (550, 650),
            item::BOUND_PHR1 => (275, 325),
            item::BOUND_PHR2 => (4, 60),
            _ => (0, 0), // TERM, PHR0, PHR3: keep the tree prediction
        }
    }

    /// Insert a syllable into the sentence buffers.
    ///
    /// `content` is the SYLLPHON item for a real syllable; `None` creates a
    /// pause syllable for boundary `bound_type`.
    pub(crate) fn create_syllable(
        &mut self,
        syll_type: SyllType,
        content: Option<&Item>,
        bound_type: u8,
        mut min_dur: u16,
        mut max_dur: u16,
    ) -> Result<()> {
        if self.sylls.len() >= MAX_SYLLS - 1 {
            return Err(OratioError::MaxNumExceeded("syllables per sentence"));
        }
        let phones_needed = match syll_type {
            SyllType::Pause => 1,
            SyllType::Syllable => content.map(|c| c.payload().len()).unwrap_or(0),
        };
        if self.phone_ids.len() + phones_needed > MAX_PHONES - 1 {
            return Err(OratioError::MaxNumExceeded("phones per sentence"));
        }

        let mut syll = SyllFeat::new();
        // items queued before the first syllable attach to it
        if self.sylls.is_empty() {
            syll.item_first = self.pre_syll_items.0;
            syll.item_last = self.pre_syll_items.1;
        }
        syll.phone_offset = self.phone_ids.len() as u16;

        if syll_type == SyllType::Pause && min_dur == 0 && max_dur == 0 {
            let (lo, hi) = PamUnit::default_boundary_limits(bound_type);
            min_dur = lo;
            max_dur = hi;
        }
        syll.min_dur = min_dur;
        syll.max_dur = max_dur;

        match syll_type {
            SyllType::Pause => {
                syll.v[P6] = self.sent_type;
                syll.v[BND] = bound_type;
                syll.v[P1] = 1; // marks the pause-silence syllable
                syll.v[P8] = 1;
                syll.v[B3] = 1;
                syll.v[B4] = 1;
                syll.v[B5] = 1;
                syll.v[B6] = 1;
                syll.v[B7] = 1;
                syll.v[B16] = PH_DONT_CARE;
                syll.v[E2] = 1;
                syll.v[E3] = 1;
                syll.v[E4] = 1;
                syll.v[H5] = self.phrase_type;
                self.phone_ids.push(self.tabphones.pause_id());
            }
            SyllType::Syllable => {
                let Some(content) = content else {
                    return Err(OratioError::IndexOutOfRange);
                };
                let accent = content.head.info2;
                if accent > item::ACC0 {
                    syll.v[P5] = 1; // content syllable
                }
                syll.v[P6] = self.sent_type;
                if (item::ACC1..=item::ACC4).contains(&accent) {
                    syll.v[B1] = 1; // stressed
                }
                if (item::ACC1..=item::ACC2).contains(&accent) {
                    syll.v[B2] = 1; // accented
                }
                syll.v[B3] = content.payload().len() as u8;
                let mut vowel_pos = 0u8;
                syll.v[B16] = self.vowel_name(content.payload(), &mut vowel_pos);
                syll.v[P8] = vowel_pos; // vowel position, consumed by P8 later
                syll.v[H5] = self.phrase_type;
                self.phone_ids.extend_from_slice(content.payload());
            }
        }
        self.sylls.push(syll);
        debug!(
            sylls = self.sylls.len(),
            phones = self.phone_ids.len(),
            "syllable created"
        );
        Ok(())
    }

    /// First syllable-carrier phone in a syllable and its position.
    fn vowel_name(&self, phones: &[u8], pos: &mut u8) -> u8 {
        for (i, &ph) in phones.iter().enumerate() {
            if self.tabphones.is_syll_carrier(ph) {
                *pos = i as u8;
                return ph;
            }
        }
        PH_DONT_CARE
    }

    /// Feed one event to every feature processor.
    pub(crate) fn process_event(&mut self, event: Event, dir: Dir) {
        if dir == Dir::Forward {
            if let Some(cur) = self.sylls.last_mut() {
                match event {
                    Event::PrimaryBound => cur.v[P2] = 1,
                    Event::SecondaryBound => cur.v[P3] = 1,
                    Event::WordBound => cur.v[P4] = 1,
                    Event::Syllable => {}
                }
            }
        }
        for feat in A3..=J3 {
            self.process_event_feature(feat, event, dir);
        }
    }

    fn cur(&self) -> usize {
        self.curr_syll.max(0) as usize
    }

    fn v(&self, syll: usize, feat: usize) -> u8 {
        self.sylls[syll].v[feat]
    }

    fn set_v(&mut self, syll: usize, feat: usize, val: u8) {
        self.sylls[syll].v[feat] = val;
    }

    #[allow(clippy::cognitive_complexity)]
    fn process_event_feature(&mut self, feat: usize, event: Event, dir: Dir) {
        use Dir::*;
        use Event::*;
        let cur = self.cur();
        if cur >= self.sylls.len() {
            return;
        }
        match feat {
            A3 => {
                // syllable count of the previous syllable, primary phrases
                if dir == Forward {
                    if event == Syllable {
                        let t = &self.trackers;
                        let val = if self.v(cur, P1) == 1 || t.a3_primary_phrase_syllable >= 1 {
                            if t.a3_overall_syllable < 1 || cur == 0 {
                                0
                            } else {
                                self.v(cur - 1, B3)
                            }
                        } else {
                            0
                        };
                        self.set_v(cur, A3, val);
                        self.trackers.a3_primary_phrase_syllable += 1;
                        self.trackers.a3_overall_syllable += 1;
                    }
                    if event == PrimaryBound {
                        self.trackers.a3_primary_phrase_syllable = 0;
                    }
                }
            }
            B4 => {
                // syllables since/to a boundary of any kind
                let dest = if dir == Forward { B4 } else { B5 };
                if event == Syllable {
                    if self.v(cur, P1) == 0 {
                        let val = self.trackers.b4_b5_syllable;
                        self.set_v(cur, dest, val);
                        self.trackers.b4_b5_syllable += 1;
                    } else {
                        self.set_v(cur, dest, 0);
                    }
                }
                if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                    self.trackers.b4_b5_syllable = 1;
                }
            }
            B6 => {
                // syllables since/to a secondary boundary; dormant until the
                // first secondary bound of the phrase
                let dest = if dir == Forward { B6 } else { B7 };
                match self.trackers.b6_b7_state {
                    0 => {
                        if event == Syllable {
                            self.set_v(cur, dest, DONT_CARE);
                        }
                        if event == SecondaryBound {
                            self.trackers.b6_b7_syllable = 1;
                            self.trackers.b6_b7_state = 1;
                        }
                    }
                    _ => {
                        if event == Syllable {
                            let val = self.trackers.b6_b7_syllable;
                            self.set_v(cur, dest, val);
                            self.trackers.b6_b7_syllable += 1;
                        }
                        if event == SecondaryBound {
                            self.trackers.b6_b7_syllable = 1;
                        }
                        if event == PrimaryBound {
                            self.trackers.b6_b7_state = 0;
                        }
                    }
                }
            }
            B8 => {
                // stressed syllables since/to the phrase start/end
                let dest = if dir == Forward { B8 } else { B9 };
                if event == Syllable {
                    let val = self.trackers.b8_b9_stressed_syllable;
                    self.set_v(cur, dest, val);
                    if self.v(cur, B1) == 1 {
                        self.trackers.b8_b9_stressed_syllable += 1;
                    }
                }
                if event == PrimaryBound {
                    self.trackers.b8_b9_stressed_syllable = 0;
                }
            }
            B10 => {
                // accented syllables since/to the phrase start/end
                let dest = if dir == Forward { B10 } else { B11 };
                if event == Syllable {
                    let val = self.trackers.b10_b11_accented_syllable;
                    self.set_v(cur, dest, val);
                    if self.v(cur, B2) == 1 {
                        self.trackers.b10_b11_accented_syllable += 1;
                    }
                }
                if event == PrimaryBound {
                    self.trackers.b10_b11_accented_syllable = 0;
                }
            }
            B12 => {
                // syllables since/to the previous stressed syllable
                let dest = if dir == Forward { B12 } else { B13 };
                match self.trackers.b12_b13_state {
                    0 => {
                        if event == Syllable {
                            self.set_v(cur, dest, DONT_CARE);
                            if self.v(cur, B1) != 0 {
                                self.trackers.b12_b13_syllable = 0;
                                self.trackers.b12_b13_state = 1;
                            }
                        }
                    }
                    _ => {
                        if event == Syllable {
                            let val = self.trackers.b12_b13_syllable;
                            self.set_v(cur, dest, val);
                            if self.v(cur, B1) == 1 {
                                self.trackers.b12_b13_syllable = 0;
                            } else {
                                self.trackers.b12_b13_syllable += 1;
                            }
                            if self.trackers.b12_b13_state == 1 {
                                self.trackers.b12_b13_state = 2;
                            }
                        }
                        if event == PrimaryBound {
                            self.trackers.b12_b13_state = 0;
                        }
                    }
                }
            }
            B14 => {
                // syllables since/to the previous accented syllable
                let dest = if dir == Forward { B14 } else { B15 };
                match self.trackers.b14_b15_state {
                    0 => {
                        if event == Syllable {
                            self.set_v(cur, dest, DONT_CARE);
                            if self.v(cur, B2) != 0 {
                                self.trackers.b14_b15_syllable = 0;
                                self.trackers.b14_b15_state = 1;
                            }
                        }
                    }
                    _ => {
                        if event == Syllable {
                            let val = self.trackers.b14_b15_syllable;
                            self.set_v(cur, dest, val);
                            if self.v(cur, B2) == 1 {
                                self.trackers.b14_b15_syllable = 0;
                            } else {
                                self.trackers.b14_b15_syllable += 1;
                            }
                            if self.trackers.b14_b15_state == 1 {
                                self.trackers.b14_b15_state = 2;
                            }
                        }
                        if event == PrimaryBound {
                            self.trackers.b14_b15_state = 0;
                        }
                    }
                }
            }
            B17 => {
                // forward only: B19 counts inside the first secondary
                // phrase, B17 afterwards
                if dir == Forward {
                    match self.trackers.b17_b19_state {
                        0 => {
                            if event == Syllable {
                                self.set_v(cur, B17, DONT_CARE);
                                let val = self.trackers.b17_b19_syllable;
                                self.set_v(cur, B19, val);
                                self.trackers.b17_b19_syllable += 1;
                            }
                            if matches!(event, PrimaryBound | SecondaryBound)
                                && self.trackers.b17_b19_syllable > 1
                            {
                                if event == PrimaryBound {
                                    self.trackers.b17_b19_syllable = 1;
                                }
                                self.trackers.b17_b19_state = 1;
                            }
                        }
                        _ => {
                            if event == Syllable {
                                let val = self.trackers.b17_b19_syllable;
                                self.set_v(cur, B17, val);
                                self.set_v(cur, B19, DONT_CARE);
                                self.trackers.b17_b19_syllable += 1;
                            }
                            if event == PrimaryBound {
                                self.trackers.b17_b19_syllable = 1;
                            }
                        }
                    }
                }
            }
            B18 => {
                // backward only: B20/B21 split by sentence type in the last
                // secondary phrase, B18 before it
                if dir == Backward {
                    match self.trackers.b18_b20_b21_state {
                        0 => {
                            if event == Syllable {
                                self.set_v(cur, B18, DONT_CARE);
                                let val = self.trackers.b18_b20_b21_syllable;
                                if self.v(cur, P6) == SENT_DECLARATIVE {
                                    self.set_v(cur, B20, val);
                                    self.set_v(cur, B21, DONT_CARE);
                                } else {
                                    self.set_v(cur, B20, DONT_CARE);
                                    self.set_v(cur, B21, val);
                                }
                                self.trackers.b18_b20_b21_syllable += 1;
                            }
                            if matches!(event, PrimaryBound | SecondaryBound)
                                && self.trackers.b18_b20_b21_syllable > 1
                            {
                                if event == PrimaryBound {
                                    self.trackers.b18_b20_b21_syllable = 1;
                                }
                                self.trackers.b18_b20_b21_state = 1;
                            }
                        }
                        _ => {
                            if event == Syllable {
                                let val = self.trackers.b18_b20_b21_syllable;
                                self.set_v(cur, B18, val);
                                self.set_v(cur, B20, DONT_CARE);
                                self.set_v(cur, B21, DONT_CARE);
                                self.trackers.b18_b20_b21_syllable += 1;
                            }
                            if event == PrimaryBound {
                                self.trackers.b18_b20_b21_syllable = 1;
                            }
                        }
                    }
                }
            }
            C3 => {
                // backward mirror of A3: syllable count of the next syllable
                if dir == Backward {
                    if event == Syllable {
                        let t = &self.trackers;
                        let val = if self.v(cur, P1) == 1 || t.c3_primary_phrase_syllable >= 1 {
                            if t.c3_overall_syllable < 1 || cur + 1 >= self.sylls.len() {
                                0
                            } else {
                                self.v(cur + 1, B3)
                            }
                        } else {
                            0
                        };
                        self.set_v(cur, C3, val);
                        self.trackers.c3_primary_phrase_syllable += 1;
                        self.trackers.c3_overall_syllable += 1;
                    }
                    if event == PrimaryBound {
                        self.trackers.c3_primary_phrase_syllable = 0;
                    }
                }
            }
            D2 => {
                // syllable count of the previous word
                if dir == Forward {
                    if event == Syllable {
                        let t = &self.trackers;
                        let val = if self.v(cur, P1) == 1
                            || t.d2_current_primary_phrase_word >= 1
                        {
                            t.d2_prev_syllable_in_word
                        } else {
                            0
                        };
                        self.set_v(cur, D2, val);
                        self.trackers.d2_syllable_in_word += 1;
                    }
                    if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                        self.trackers.d2_current_primary_phrase_word = 1;
                        self.trackers.d2_prev_syllable_in_word =
                            self.trackers.d2_syllable_in_word;
                        self.trackers.d2_syllable_in_word = 0;
                    }
                    if event == PrimaryBound {
                        self.trackers.d2_current_primary_phrase_word = 0;
                    }
                }
            }
            E1 => {
                // word is a content word: back-filled over the whole word
                if dir == Forward {
                    if event == Syllable {
                        if self.trackers.e1_syllable_word_start == -1 {
                            self.trackers.e1_syllable_word_start = cur as i16;
                        }
                        if self.v(cur, P5) == 1 {
                            self.trackers.e1_content = 1;
                        }
                        self.trackers.e1_syllable_word_end = cur as i16;
                    }
                    if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                        let start = self.trackers.e1_syllable_word_start;
                        let end = self.trackers.e1_syllable_word_end;
                        if start != -1 && end != -1 {
                            let content = self.trackers.e1_content;
                            for i in start..=end {
                                self.set_v(i as usize, E1, content);
                            }
                        }
                        self.trackers.e1_content = 0;
                        self.trackers.e1_syllable_word_start = -1;
                        self.trackers.e1_syllable_word_end = -1;
                    }
                }
            }
            E2 => {
                // syllable count of the word: back-filled over the word
                if dir == Forward {
                    if event == Syllable {
                        if self.trackers.e2_syllable_word_start == -1 {
                            self.trackers.e2_syllable_word_start = cur as i16;
                        }
                        self.trackers.e2_syllable_word_end = cur as i16;
                    }
                    if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                        let start = self.trackers.e2_syllable_word_start;
                        let end = self.trackers.e2_syllable_word_end;
                        if start != -1 && end != -1 {
                            let count = (end - start + 1) as u8;
                            for i in start..=end {
                                self.set_v(i as usize, E2, count);
                            }
                        }
                        self.trackers.e1_content = 0;
                        self.trackers.e2_syllable_word_start = -1;
                        self.trackers.e2_syllable_word_end = -1;
                    }
                }
            }
            E3 => {
                // words since/to a secondary boundary
                let dest = if dir == Forward { E3 } else { E4 };
                match self.trackers.e3_e4_state {
                    0 => {
                        if event == Syllable {
                            self.set_v(cur, dest, DONT_CARE);
                        }
                        if event == SecondaryBound {
                            self.trackers.e3_e4_word = 1;
                            self.trackers.e3_e4_state = 1;
                        }
                    }
                    _ => {
                        if event == Syllable {
                            let val = self.trackers.e3_e4_word;
                            self.set_v(cur, dest, val);
                        }
                        if event == SecondaryBound {
                            self.trackers.e3_e4_word = 1;
                        }
                        if event == WordBound {
                            self.trackers.e3_e4_word += 1;
                        }
                        if event == PrimaryBound {
                            self.trackers.e3_e4_state = 0;
                        }
                    }
                }
            }
            E5 => {
                // content words since/to the phrase start/end
                let dest = if dir == Forward { E5 } else { E6 };
                if event == Syllable {
                    let val = self.trackers.e5_e6_content_word;
                    self.set_v(cur, dest, val);
                    if self.v(cur, P5) == 1 {
                        self.trackers.e5_e6_content = 1;
                    }
                }
                if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                    if self.trackers.e5_e6_content == 1 {
                        self.trackers.e5_e6_content_word += 1;
                    }
                    self.trackers.e5_e6_content = 0;
                    if event == PrimaryBound {
                        self.trackers.e5_e6_content_word = 0;
                    }
                }
            }
            E7 => {
                // words since/to the previous content word
                let dest = if dir == Forward { E7 } else { E8 };
                match self.trackers.e7_e8_state {
                    0 => {
                        if event == Syllable {
                            self.set_v(cur, dest, DONT_CARE);
                            if self.v(cur, P5) == 1 {
                                self.trackers.e7_e8_content = 1;
                            }
                        }
                        if event == PrimaryBound {
                            self.trackers.e7_e8_content = 0;
                        }
                        if matches!(event, WordBound | SecondaryBound)
                            && self.trackers.e7_e8_content == 1
                        {
                            self.trackers.e7_e8_word = 0;
                            self.trackers.e7_e8_content = 0;
                            self.trackers.e7_e8_state = 1;
                        }
                    }
                    _ => {
                        if event == Syllable {
                            let val = self.trackers.e7_e8_word;
                            self.set_v(cur, dest, val);
                            if self.v(cur, P5) == 1 {
                                self.trackers.e7_e8_content = 1;
                            }
                        }
                        if matches!(event, WordBound | SecondaryBound) {
                            if self.trackers.e7_e8_content == 1 {
                                self.trackers.e7_e8_word = 0;
                                self.trackers.e7_e8_content = 0;
                            } else {
                                self.trackers.e7_e8_word += 1;
                            }
                        }
                        if event == PrimaryBound {
                            self.trackers.e7_e8_state = 0;
                            self.trackers.e7_e8_content = 0;
                        }
                    }
                }
            }
            E9 => {
                // forward only: E11 words inside the first secondary phrase,
                // E9 afterwards
                if dir == Forward {
                    match self.trackers.e9_e11_state {
                        0 => {
                            if event == Syllable {
                                self.set_v(cur, E9, DONT_CARE);
                                let val = self.trackers.e9_e11_word;
                                self.set_v(cur, E11, val);
                                self.trackers.e9_e11_saw_word = 1;
                            }
                            if event == WordBound {
                                self.trackers.e9_e11_word += 1;
                            }
                            if matches!(event, PrimaryBound | SecondaryBound)
                                && self.trackers.e9_e11_saw_word == 1
                            {
                                if event == PrimaryBound {
                                    self.trackers.e9_e11_word = 1;
                                } else {
                                    self.trackers.e9_e11_word += 1;
                                }
                                self.trackers.e9_e11_state = 1;
                            }
                        }
                        _ => {
                            if event == Syllable {
                                let val = self.trackers.e9_e11_word;
                                self.set_v(cur, E9, val);
                                self.set_v(cur, E11, DONT_CARE);
                            }
                            if matches!(event, WordBound | SecondaryBound) {
                                self.trackers.e9_e11_word += 1;
                            }
                            if event == PrimaryBound {
                                self.trackers.e9_e11_word = 1;
                            }
                        }
                    }
                }
            }
            E10 => {
                // backward only: E12/E13 split by sentence type in the last
                // secondary phrase, E10 before it
                if dir == Backward {
                    match self.trackers.e10_e12_e13_state {
                        0 => {
                            if event == Syllable {
                                self.set_v(cur, E10, DONT_CARE);
                                self.trackers.e10_e12_e13_saw_word = 1;
                                let val = self.trackers.e10_e12_e13_word;
                                if self.v(cur, P6) == SENT_DECLARATIVE {
                                    self.set_v(cur, E12, val);
                                    self.set_v(cur, E13, DONT_CARE);
                                } else {
                                    self.set_v(cur, E12, DONT_CARE);
                                    self.set_v(cur, E13, val);
                                }
                            }
                            if event == WordBound {
                                self.trackers.e10_e12_e13_word += 1;
                            }
                            if matches!(event, PrimaryBound | SecondaryBound)
                                && self.trackers.e10_e12_e13_saw_word > 0
                            {
                                if event == PrimaryBound {
                                    self.trackers.e10_e12_e13_word = 1;
                                } else {
                                    self.trackers.e10_e12_e13_word += 1;
                                }
                                self.trackers.e10_e12_e13_state = 1;
                            }
                        }
                        _ => {
                            if event == Syllable {
                                let val = self.trackers.e10_e12_e13_word;
                                self.set_v(cur, E10, val);
                                self.set_v(cur, E12, DONT_CARE);
                                self.set_v(cur, E13, DONT_CARE);
                            }
                            if matches!(event, WordBound | SecondaryBound) {
                                self.trackers.e10_e12_e13_word += 1;
                            }
                            if event == PrimaryBound {
                                self.trackers.e10_e12_e13_word = 1;
                            }
                        }
                    }
                }
            }
            F2 => {
                // backward: syllable count of the next word
                if dir == Backward {
                    if event == Syllable {
                        let val = if self.trackers.f2_current_primary_phrase_word >= 1 {
                            self.trackers.f2_next_word_syllable
                        } else {
                            0
                        };
                        self.set_v(cur, F2, val);
                        self.trackers.f2_word_syllable += 1;
                    }
                    if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                        self.trackers.f2_next_word_syllable = self.trackers.f2_word_syllable;
                        self.trackers.f2_word_syllable = 0;
                    }
                    if event == PrimaryBound {
                        self.trackers.f2_current_primary_phrase_word = 0;
                    } else if matches!(event, WordBound | SecondaryBound) {
                        self.trackers.f2_current_primary_phrase_word += 1;
                    }
                }
            }
            G1 => {
                // syllable count of the previous secondary phrase
                if dir == Forward {
                    if event == Syllable {
                        let val = if self.trackers.g1_current_secondary_phrase_syllable > 0 {
                            self.trackers.g1_current_secondary_phrase_syllable as u8
                        } else {
                            0
                        };
                        self.set_v(cur, G1, val);
                        self.trackers.g1_current_syllable += 1;
                    }
                    if event == SecondaryBound {
                        self.trackers.g1_current_secondary_phrase_syllable =
                            self.trackers.g1_current_syllable;
                        self.trackers.g1_current_syllable = 0;
                    }
                    if event == PrimaryBound {
                        self.trackers.g1_current_secondary_phrase_syllable = 0;
                        self.trackers.g1_current_syllable = 0;
                    }
                }
            }
            G2 => {
                // word count of the previous secondary phrase
                if dir == Forward {
                    if event == Syllable {
                        let val = if self.trackers.g2_current_secondary_phrase_word > 0 {
                            self.trackers.g2_current_secondary_phrase_word as u8
                        } else {
                            0
                        };
                        self.set_v(cur, G2, val);
                    }
                    if event == WordBound {
                        self.trackers.g2_current_word += 1;
                    }
                    if event == SecondaryBound {
                        self.trackers.g2_current_secondary_phrase_word =
                            self.trackers.g2_current_word + 1;
                        self.trackers.g2_current_word = 0;
                    }
                    if event == PrimaryBound {
                        self.trackers.g2_current_secondary_phrase_word = 0;
                        self.trackers.g2_current_word = 0;
                    }
                }
            }
            H1 => {
                // syllables of the current secondary phrase
                match dir {
                    Forward => {
                        if event == Syllable {
                            self.trackers.h1_current_secondary_phrase_syll += 1;
                            let val = self.trackers.h1_current_secondary_phrase_syll;
                            self.set_v(cur, H1, val);
                        }
                        if matches!(event, SecondaryBound | PrimaryBound) {
                            self.trackers.h1_current_secondary_phrase_syll = 0;
                        }
                    }
                    Backward => {
                        if event == Syllable {
                            let val = self.trackers.h1_current_secondary_phrase_syll;
                            self.set_v(cur, H1, val);
                        }
                        if event == SecondaryBound {
                            self.trackers.h1_current_secondary_phrase_syll =
                                self.v(cur, H1);
                        }
                        if event == PrimaryBound && cur > 0 {
                            self.trackers.h1_current_secondary_phrase_syll =
                                self.v(cur - 1, H1);
                        }
                    }
                }
            }
            H2 => {
                // words of the current secondary phrase
                match dir {
                    Forward => {
                        if event == Syllable {
                            let val = self.trackers.h2_current_secondary_phrase_word;
                            self.set_v(cur, H2, val);
                        }
                        if event == WordBound {
                            self.trackers.h2_current_secondary_phrase_word += 1;
                            let val = self.trackers.h2_current_secondary_phrase_word;
                            self.set_v(cur, H2, val);
                        }
                        if event == SecondaryBound {
                            let val = self.trackers.h2_current_secondary_phrase_word + 1;
                            self.set_v(cur, H2, val);
                            self.trackers.h2_current_secondary_phrase_word = 0;
                        }
                        if event == PrimaryBound {
                            if cur > 1 {
                                let val = self.trackers.h2_current_secondary_phrase_word + 1;
                                self.set_v(cur - 1, H2, val);
                            }
                            self.trackers.h2_current_secondary_phrase_word = 0;
                        }
                    }
                    Backward => {
                        if event == Syllable {
                            let val = self.trackers.h2_current_secondary_phrase_word;
                            self.set_v(cur, H2, val);
                        }
                        if event == SecondaryBound {
                            self.trackers.h2_current_secondary_phrase_word = self.v(cur, H2);
                        }
                        if event == PrimaryBound && cur > 0 {
                            self.trackers.h2_current_secondary_phrase_word =
                                self.v(cur - 1, H2);
                        }
                    }
                }
            }
            H3 => {
                // secondary-phrase index since/to the sentence edge
                let dest = if dir == Forward { H3 } else { H4 };
                if event == Syllable {
                    let val = self.trackers.h3_h4_current_secondary_phrase_word;
                    self.set_v(cur, dest, val);
                }
                if matches!(event, SecondaryBound | PrimaryBound) {
                    self.trackers.h3_h4_current_secondary_phrase_word += 1;
                }
            }
            H5 => {
                // phrase type; backward pass downgrades non-final plain
                // phrases
                if dir == Backward {
                    match self.trackers.h5_state {
                        0 => {
                            if event == SecondaryBound {
                                self.trackers.h5_state = 1;
                            }
                        }
                        _ => {
                            if event == Syllable
                                && self.v(cur, H5) == PHRASE_P
                                && self.v(cur, P1) == 0
                            {
                                self.set_v(cur, H5, PHRASE_LOW_P);
                            }
                            if event == PrimaryBound {
                                self.trackers.h5_state = 0;
                            }
                        }
                    }
                }
            }
            I1 => {
                // syllables of the current/next secondary phrase
                match dir {
                    Forward => {
                        if event == Syllable {
                            self.trackers.i1_secondary_phrase_syllable += 1;
                            let val = self.trackers.i1_secondary_phrase_syllable;
                            self.set_v(cur, I1, val);
                        }
                        if matches!(event, SecondaryBound | PrimaryBound) {
                            self.trackers.i1_secondary_phrase_syllable = 0;
                        }
                    }
                    Backward => {
                        if event == Syllable {
                            let val = self.trackers.i1_next_secondary_phrase_syllable;
                            self.set_v(cur, I1, val);
                        }
                        if event == SecondaryBound {
                            self.trackers.i1_next_secondary_phrase_syllable =
                                self.trackers.i1_secondary_phrase_syllable;
                            self.trackers.i1_secondary_phrase_syllable = self.v(cur, I1);
                        }
                        if event == PrimaryBound {
                            self.trackers.i1_next_secondary_phrase_syllable = 0;
                            if cur > 0 {
                                self.trackers.i1_secondary_phrase_syllable =
                                    self.v(cur - 1, I1);
                            }
                        }
                    }
                }
            }
            I2 => {
                // words of the current/next secondary phrase
                match dir {
                    Forward => {
                        if event == Syllable {
                            let val = self.trackers.i2_secondary_phrase_word;
                            self.set_v(cur, I2, val);
                        }
                        if event == WordBound {
                            self.trackers.i2_secondary_phrase_word += 1;
                        }
                        if matches!(event, PrimaryBound | SecondaryBound) {
                            self.trackers.i2_secondary_phrase_word = 1;
                        }
                    }
                    Backward => {
                        if event == Syllable {
                            let val = self.trackers.i2_next_secondary_phrase_word;
                            self.set_v(cur, I2, val);
                        }
                        if event == SecondaryBound {
                            self.trackers.i2_next_secondary_phrase_word =
                                self.trackers.i2_secondary_phrase_word;
                            self.trackers.i2_secondary_phrase_word = self.v(cur, I2);
                        }
                        if event == PrimaryBound {
                            self.trackers.i2_next_secondary_phrase_word = 0;
                            if cur > 0 {
                                self.trackers.i2_secondary_phrase_word = self.v(cur - 1, I2);
                            }
                        }
                    }
                }
            }
            J1 => {
                // utterance syllable total
                match dir {
                    Forward => {
                        if event == Syllable && self.v(cur, P1) != 1 {
                            self.trackers.j1_utterance_syllable += 1;
                        }
                    }
                    Backward => {
                        let val = self.trackers.j1_utterance_syllable;
                        self.set_v(cur, J1, val);
                    }
                }
            }
            J2 => {
                // utterance word total
                match dir {
                    Forward => {
                        if matches!(event, WordBound | SecondaryBound | PrimaryBound) {
                            self.trackers.j2_utterance_word += 1;
                        }
                    }
                    Backward => {
                        let val = self.trackers.j2_utterance_word.saturating_sub(1);
                        self.set_v(cur, J2, val);
                    }
                }
            }
            J3 => {
                // utterance secondary-phrase total
                match dir {
                    Forward => {
                        if matches!(event, SecondaryBound | PrimaryBound) {
                            self.trackers.j3_utterance_sec_phrases += 1;
                        }
                    }
                    Backward => {
                        let val = self.trackers.j3_utterance_sec_phrases.saturating_sub(1);
                        self.set_v(cur, J3, val);
                    }
                }
            }
            // companions handled by their pair feature above
            _ => {}
        }
    }

    /// Backward pass: re-walk the finished sentence right-to-left.
    pub(crate) fn backward_pass(&mut self) {
        self.trackers.reset_backward();
        let total = self.sylls.len();
        let mut i = total as isize - 1;
        while i >= 0 {
            self.curr_syll = i;
            let cur = i as usize;
            if self.sylls[cur].v[P2] == 1 {
                self.process_event(Event::PrimaryBound, Dir::Backward);
            } else if self.sylls[cur].v[P3] == 1 {
                self.process_event(Event::SecondaryBound, Dir::Backward);
                self.process_event(Event::Syllable, Dir::Backward);
            } else if self.sylls[cur].v[P4] == 1 {
                self.process_event(Event::WordBound, Dir::Backward);
                self.process_event(Event::Syllable, Dir::Backward);
            } else {
                self.process_event(Event::Syllable, Dir::Backward);
            }
            i -= 1;
        }
        self.init_pauses();
        self.curr_syll = 0;
        self.syll_phone = 0;
    }

    /// Pause syllables inherit context from their real neighbours.
    fn init_pauses(&mut self) {
        for cur in (0..self.sylls.len()).rev() {
            if self.sylls[cur].v[P2] != 1 {
                continue;
            }
            if cur > 0 {
                for feat in [B8, B10, B12, B14, B17, B19, B20, B21, E5, E7, E9, E11, E12, E13, H1, H2, H3, H4] {
                    let val = self.v(cur - 1, feat);
                    self.set_v(cur, feat, val);
                }
                let val = self.v(cur - 1, B3);
                self.set_v(cur, A3, val);
                let val = self.v(cur - 1, E2);
                self.set_v(cur, D2, val);
                let val = self.v(cur - 1, H1);
                self.set_v(cur, G1, val);
                let val = self.v(cur - 1, H2);
                self.set_v(cur, G2, val);
            } else {
                for feat in [A3, B8, B10, B12, B14, B17, B19, B20, B21, E5, E9, E11, E12, H1, H2, H3] {
                    self.set_v(cur, feat, 0);
                }
                let val = self.v(cur, J3);
                self.set_v(cur, H4, val);
                self.set_v(cur, H5, PHRASE_LOW_P);
            }
            if cur + 1 < self.sylls.len() {
                let val = self.v(cur + 1, B3);
                self.set_v(cur, C3, val);
                let val = self.v(cur + 1, E2);
                self.set_v(cur, F2, val);
                let val = self.v(cur + 1, H1);
                self.set_v(cur, I1, val);
                let val = self.v(cur + 1, H2);
                self.set_v(cur, I2, val);
            } else {
                for feat in [C3, F2, I1, I2] {
                    self.set_v(cur, feat, 0);
                }
            }
            self.set_v(cur, B18, 0);
        }
    }
}
