//! Per-phone feature expansion and acoustic parameter prediction.
//!
//! For every phone the syllable feature vector is copied, the phone window
//! (±2), syllable positions and the consonant-side flag are filled in, wide
//! counts are compressed onto a 0–9 staircase, and the fields are reordered
//! into the column order the trees were trained with. Classification then
//! runs: duration tree → duration pdf, five pitch trees → pitch pdf
//! (log-domain, exponentiated), duration and average F0 folded back into the
//! vector, five spectral trees. The result is one PHONE item with per-state
//! `(frames, f0 index, spectral index)` triples.

use tracing::warn;

use super::features::{
    A3, B1, B16, B18, B19, B2, B20, B21, BND, C3, D2, DONT_CARE, DONT_CARE_FED, DUR, E1, E10,
    E11, E12, E13, E2, E9, F0, F2, G1, G2, H1, H2, H3, H4, H5, I1, I2, PH_DONT_CARE, P1, P2,
    P3, P4, P5, P6, P7, P8,
};
use super::{PamUnit, SIL_WEIGHTS, B3, NRSTPF};
use crate::data::duration::transform_durations;
use crate::data::item::{self, Item, ItemKind};
use crate::error::{OratioError, Result};
use crate::kb::Tree;

/// Frame duration: 2^2 = 4 ms.
const FRAME_DUR_EXP: u8 = 2;

/// Compress one component onto the 0–9 staircase.
///
/// Identity up to 5, then buckets 6..=10 → 6, 11..=20 → 7, 21..=30 → 8,
/// everything above → 9.
pub(crate) fn compress_component(val: u8) -> u8 {
    match val {
        0..=5 => val,
        6..=10 => 6,
        11..=20 => 7,
        21..=30 => 8,
        _ => 9,
    }
}

impl PamUnit {
    /// Build the phone vector for the current phone of the current syllable.
    fn expand_vector(&mut self) -> Result<()> {
        let cur = self.curr_syll.max(0) as usize;
        let syll = &self.sylls[cur];
        self.ph_feats.copy_from_slice(&syll.v);

        let offset = syll.phone_offset as usize + self.syll_phone;
        let len = syll.v[B3] as usize;
        if self.syll_phone >= len {
            return Err(OratioError::IndexOutOfRange);
        }
        let total = self.phone_ids.len();
        let ph_at = |o: isize| -> u8 {
            if o >= 0 && (o as usize) < total {
                self.phone_ids[o as usize]
            } else {
                PH_DONT_CARE
            }
        };
        let offset = offset as isize;
        self.ph_feats[P1] = ph_at(offset - 2);
        self.ph_feats[P2] = ph_at(offset - 1);
        self.ph_feats[P3] = ph_at(offset);
        self.ph_feats[P4] = ph_at(offset + 1);
        self.ph_feats[P5] = ph_at(offset + 2);
        // positions relative to the syllable edges (1-based)
        self.ph_feats[P6] = (self.syll_phone + 1) as u8;
        self.ph_feats[P7] = (len - self.syll_phone) as u8;
        // consonant side of the syllable: before the carrier vowel
        self.ph_feats[P8] = if self.syll_phone < syll.v[P8] as usize {
            1
        } else {
            0
        };
        Ok(())
    }

    /// Staircase compression; phone ids and a few raw fields stay verbatim.
    fn compress_vector(&mut self) {
        for (i, v) in self.ph_feats.iter_mut().enumerate() {
            match i {
                P1 | P2 | P3 | P4 | P5 | B1 | B2 | B16 | E1 | H5 => {}
                _ => {
                    *v = if *v == DONT_CARE {
                        DONT_CARE_FED
                    } else {
                        compress_component(*v)
                    };
                }
            }
        }
    }

    /// Reorder the fields into the trees' column order.
    fn reorg_vector(&mut self) {
        let src = self.ph_feats;
        // B block
        for (t, s) in (8..=28).zip([
            B1, B2, B3, super::features::B4, super::features::B5, super::features::B6,
            super::features::B7, super::features::B8, super::features::B9,
            super::features::B10, super::features::B11, super::features::B12,
            super::features::B13, super::features::B14, super::features::B15, B16,
            super::features::B17, B18, B19, B20, B21,
        ]) {
            self.ph_feats[t] = src[s];
        }
        // E block
        for (t, s) in (29..=41).zip([
            E1, E2, super::features::E3, super::features::E4, super::features::E5,
            super::features::E6, super::features::E7, super::features::E8, E9, E10, E11, E12,
            E13,
        ]) {
            self.ph_feats[t] = src[s];
        }
        // remaining singles
        for (t, s) in [
            (42, A3),
            (43, C3),
            (44, D2),
            (45, F2),
            (46, G1),
            (47, I1),
            (48, G2),
            (49, I2),
            (50, H1),
            (51, H2),
            (52, H3),
            (53, H4),
            (54, H5),
        ] {
            self.ph_feats[t] = src[s];
        }
        // J1..J3, DUR, F0 keep their positions
    }

    /// Run one PAM tree over the current phone vector; class 0 on failure.
    fn run_tree(&self, tree: &Tree) -> u16 {
        let Some(invec) = tree.construct_pam(&self.ph_feats) else {
            warn!("problem with pam tree input vector, using fallback value");
            return 0;
        };
        let res = tree.classify(&invec);
        if !res.set {
            warn!("problem classifying pam tree, using fallback value");
            return 0;
        }
        match tree.map_out_fixed(res.class) {
            Some(v) => v,
            None => {
                warn!("problem decomposing pam tree output, using fallback value");
                0
            }
        }
    }

    /// Duration pdf access: phone duration and per-state frame counts.
    ///
    /// Tree classes are 1-based; only a positive index is decremented, an
    /// off-by-one here silently corrupts all acoustic output.
    pub(crate) fn get_duration(&mut self, dur_index: u16) -> Result<()> {
        let mut index = dur_index as usize;
        if index > 0 {
            index -= 1;
        }
        let Some(frame) = self.pdfdur.frame(index) else {
            warn!(index, numframes = self.pdfdur.numframes, "duration pdf index overflow");
            return Err(OratioError::IndexOutOfRange);
        };
        if frame.len() < 3 {
            return Err(OratioError::FileCorrupt("duration pdf frame"));
        }
        let frame_ms = (self.pdfdur.sampperframe / 16) as u16;
        self.phon_dur = self.pdfdur.phonquant((frame[0] & 0xf0) >> 4) as u16 * frame_ms;
        self.num_frames_state[0] = self.pdfdur.statequant(frame[0] & 0x0f);
        self.num_frames_state[1] = self.pdfdur.statequant((frame[1] & 0xf0) >> 4);
        self.num_frames_state[2] = self.pdfdur.statequant(frame[1] & 0x0f);
        self.num_frames_state[3] = self.pdfdur.statequant((frame[2] & 0xf0) >> 4);
        self.num_frames_state[4] = self.pdfdur.statequant(frame[2] & 0x0f);

        // speed modification with a carried fractional rest
        self.phon_dur = (self.phon_dur as f32 * self.speed_factor) as u16;
        for state in self.num_frames_state.iter_mut() {
            let value = self.dur_rest + *state as f32 * self.speed_factor;
            *state = value as u8;
            self.dur_rest = value - *state as f32;
        }
        Ok(())
    }

    /// Pitch pdf access for one phone state (log domain, exponentiated).
    pub(crate) fn get_f0(&mut self, state: usize) -> Result<()> {
        let mut index = self.lf0_index[state] as usize;
        if index > 0 {
            index -= 1;
        }
        index += self.pdflfz.stateoffset[state] as usize;
        let Some(frame) = self.pdflfz.frame(index) else {
            warn!(index, numframes = self.pdflfz.numframes, "pitch pdf index overflow");
            return Err(OratioError::IndexOutOfRange);
        };
        if frame.len() < 7 {
            return Err(OratioError::FileCorrupt("pitch pdf frame"));
        }
        let mean = u16::from_le_bytes([frame[0], frame[1]]) as f32;
        let mean = mean * 2.0f32.powi(self.pdflfz.meanpow_um(0) as i32);
        let ivar = frame[6] as f32 * 2.0f32.powi(self.pdflfz.ivarpow(0) as i32);
        if ivar == 0.0 {
            return Err(OratioError::FileCorrupt("pitch pdf variance"));
        }
        let f0 = (mean / ivar).exp();
        self.phon_f0[state] = f0 * self.pitch_factor;
        Ok(())
    }

    fn round_half_away(v: f32) -> f32 {
        let trunc = v.trunc();
        if v > 0.0 {
            if v - trunc < 0.5 {
                trunc
            } else {
                trunc + 1.0
            }
        } else if trunc - v < 0.5 {
            trunc
        } else {
            trunc - 1.0
        }
    }

    /// Quantize predicted duration and average F0 back into the vector for
    /// the spectral trees.
    fn update_vector(&mut self) {
        const F0_QUANT: f32 = 30.0;
        const MIN_F0: f32 = 90.0;
        const MAX_F0: f32 = 360.0;
        const DUR_QUANT1: f32 = 20.0;
        const DUR_QUANT2: f32 = 100.0;
        const MIN_DUR: f32 = 40.0;
        const MAX_DUR1: f32 = 160.0;
        const MAX_DUR2: f32 = 600.0;

        let mut f0avg: f32 = self.phon_f0.iter().sum::<f32>() / NRSTPF as f32;
        f0avg = PamUnit::round_half_away(f0avg / F0_QUANT) * F0_QUANT;
        f0avg = f0avg.clamp(MIN_F0, MAX_F0);

        // keep the sentence-initial silence short
        if self.curr_syll == 0 && self.syll_phone == 0 {
            self.phon_dur = 2 * 4;
        }

        let mut dur = self.phon_dur as f32;
        dur = PamUnit::round_half_away(dur / DUR_QUANT1) * DUR_QUANT1;
        if dur < MIN_DUR {
            dur = MIN_DUR;
        }
        if dur > MAX_DUR1 {
            dur = PamUnit::round_half_away(dur / DUR_QUANT2) * DUR_QUANT2;
            if dur > MAX_DUR2 {
                dur = MAX_DUR2;
            }
        }
        self.ph_feats[DUR] = (dur / 10.0) as u8;
        self.ph_feats[F0] = (f0avg / 10.0) as u8;
    }

    /// Assemble the PHONE item for the current phone.
    fn build_phone_item(&mut self) -> Result<Item> {
        let cur = self.curr_syll.max(0) as usize;

        if cur == 0 && self.syll_phone == 0 {
            // sentence-initial silence: two frames in the last state
            self.num_frames_state = [0, 0, 0, 0, 2];
        } else {
            let syll = &self.sylls[cur];
            if syll.max_dur > 0 {
                // pause syllable with a target duration window
                let weights = match syll.v[BND] {
                    item::BOUND_SBEG => &SIL_WEIGHTS[0],
                    item::BOUND_PHR1 => &SIL_WEIGHTS[1],
                    item::BOUND_PHR2 => &SIL_WEIGHTS[2],
                    item::BOUND_SEND | item::BOUND_TERM => &SIL_WEIGHTS[3],
                    _ => &SIL_WEIGHTS[4],
                };
                let mut rest: i16 = 0;
                let (min_dur, max_dur) = (syll.min_dur as i16, syll.max_dur as i16);
                transform_durations(
                    FRAME_DUR_EXP,
                    &mut self.num_frames_state,
                    Some(weights),
                    min_dur,
                    max_dur,
                    0,
                    &mut rest,
                );
            }
        }

        let mut payload = Vec::with_capacity(NRSTPF * 6);
        for s in 0..NRSTPF {
            payload.extend_from_slice(&(self.num_frames_state[s] as u16).to_le_bytes());
            payload.extend_from_slice(&self.lf0_index[s].to_le_bytes());
            payload.extend_from_slice(&self.mgc_index[s].to_le_bytes());
        }
        Item::new(
            ItemKind::Phone,
            self.ph_feats[P3],
            NRSTPF as u8,
            &payload,
        )
    }

    /// Translate the current phone into a PHONE item on the output queue.
    pub(crate) fn phone_process(&mut self) -> Result<()> {
        self.expand_vector()?;
        self.compress_vector();
        self.reorg_vector();

        // duration
        let dur_index = self.run_tree(&self.dtdur);
        self.get_duration(dur_index)?;

        // pitch per state
        for s in 0..NRSTPF {
            self.lf0_index[s] = self.run_tree(&self.dtlfz[s]);
        }
        for s in 0..NRSTPF {
            self.get_f0(s)?;
        }

        // spectra per state, with duration and F0 folded in
        self.update_vector();
        for s in 0..NRSTPF {
            self.mgc_index[s] = self.run_tree(&self.dtmgc[s]);
        }

        let item = self.build_phone_item()?;
        self.out_items.push_back(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staircase_is_monotone_with_documented_buckets() {
        for v in 0..=5u8 {
            assert_eq!(compress_component(v), v);
        }
        for v in 6..=10u8 {
            assert_eq!(compress_component(v), 6);
        }
        for v in 11..=20u8 {
            assert_eq!(compress_component(v), 7);
        }
        for v in 21..=30u8 {
            assert_eq!(compress_component(v), 8);
        }
        for v in [31u8, 100, 249, 255] {
            assert_eq!(compress_component(v), 9);
        }
        let mut prev = 0;
        for v in 0..=255u8 {
            let c = compress_component(v);
            assert!(c >= prev, "not monotone at {v}");
            prev = c;
        }
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(PamUnit::round_half_away(1.4), 1.0);
        assert_eq!(PamUnit::round_half_away(1.5), 2.0);
        assert_eq!(PamUnit::round_half_away(-1.4), -1.0);
        assert_eq!(PamUnit::round_half_away(-1.5), -2.0);
        assert_eq!(PamUnit::round_half_away(0.0), 0.0);
    }

    mod with_fixture {
        use super::super::super::tests::{drain, run, unit};
        use crate::data::item::{self, Item, ItemKind};
        use crate::data::PipelineStats;
        use crate::testsupport::{PH_CONS, PH_VOWEL_A, TEST_F0};

        #[test]
        fn predicted_f0_indices_round_trip_through_the_pdf() {
            let (mut pam, cb_in, cb_out) = unit();
            let mut stats = PipelineStats::default();
            cb_in
                .borrow_mut()
                .put_item(&Item::mark(
                    ItemKind::Bound,
                    item::BOUND_SBEG,
                    item::BOUNDTYPE_T,
                ))
                .unwrap();
            cb_in
                .borrow_mut()
                .put_item(
                    &Item::new(
                        ItemKind::SyllPhon,
                        item::INFO_NA,
                        item::ACC2,
                        &[PH_CONS, PH_VOWEL_A],
                    )
                    .unwrap(),
                )
                .unwrap();
            cb_in
                .borrow_mut()
                .put_item(&Item::mark(ItemKind::Bound, item::BOUND_SEND, item::INFO_NA))
                .unwrap();
            run(&mut pam, &mut stats);
            drain(&cb_out);
            // the last f0 computed comes from the fixture pdf
            use approx::assert_relative_eq;
            assert_relative_eq!(pam.phon_f0[0] , TEST_F0, max_relative = 0.01);
        }
    }
}
