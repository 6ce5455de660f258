//! Shared test fixture: a complete synthetic voice.
//!
//! The voice is tiny but structurally real — every knowledge base goes
//! through the binary builders and the resource/voice plumbing, so the
//! stages exercise the same decode paths as production lingware.
//!
//! Fixture behavior:
//! - lexicon: "bank" (noun/verb, ambiguous), "hello" (noun, two syllables,
//!   initial stress), "the" (determiner, needs G2P);
//! - POS prediction always answers [`POS_PRED`];
//! - POS disambiguation always answers [`POS_NOUN`];
//! - G2P emits `[primary stress, vowel]` until a stress was placed, then
//!   consonants;
//! - phrasing always answers PHR0, accentuation always ACC2;
//! - the PAM trees answer constant pdf indices (duration/pitch 1, spectra
//!   2) and the pdfs hold uniform 2-frame states at [`TEST_F0`] Hz.

use crate::data::item;
use crate::kb::lexicon::NEEDS_G2P;
use crate::kb::phones::tests as phones_fix;
use crate::kb::pos::tests as pos_fix;
use crate::kb::tree::tests::{build_tree_image, BitWriter};
use crate::kb::KbId;
use crate::rsrc::tests::build_resource;
use crate::rsrc::{Resource, ResourceManager, Voice};

pub(crate) const POS_NOUN: u8 = 10;
pub(crate) const POS_VERB: u8 = 11;
pub(crate) const POS_DET: u8 = 12;
/// POS the prediction tree assigns to out-of-lexicon words.
pub(crate) const POS_PRED: u8 = 13;
/// Group id of {noun, verb}.
pub(crate) const POS_GROUP_NV: u8 = 100;

pub(crate) const PH_PRIMSTRESS: u8 = phones_fix::PRIMSTRESS;
pub(crate) const PH_SYLLBOUND: u8 = phones_fix::SYLLBOUND;
pub(crate) const PH_CONS: u8 = 20;
pub(crate) const PH_CONS2: u8 = 21;
pub(crate) const PH_VOWEL_A: u8 = 30;
pub(crate) const PH_VOWEL_O: u8 = 31;

/// F0 the fixture pitch pdf decodes to: exp(153·2^10 / (255·2^7)).
pub(crate) const TEST_F0: f32 = 121.510_42;

pub(crate) fn hello_phones() -> Vec<u8> {
    vec![
        PH_PRIMSTRESS,
        PH_CONS,
        PH_VOWEL_A,
        PH_SYLLBOUND,
        PH_CONS2,
        PH_VOWEL_O,
    ]
}

// ---------------------------------------------------------------------
// map-table builders
// ---------------------------------------------------------------------

fn empty_table() -> Vec<u8> {
    vec![3, 0, 0] // len 3, type empty
}

fn word_table(values: &[u16]) -> Vec<u8> {
    let mut t = Vec::new();
    let len = 5 + 2 * values.len();
    t.extend_from_slice(&(len as u16).to_le_bytes());
    t.push(2); // word type
    t.extend_from_slice(&(values.len() as u16).to_le_bytes());
    for v in values {
        t.extend_from_slice(&v.to_le_bytes());
    }
    t
}

fn letters_table() -> Vec<u8> {
    let letters: Vec<u8> = (b'a'..=b'z').collect();
    let mut t = Vec::new();
    let len = 5 + letters.len();
    t.extend_from_slice(&(len as u16).to_le_bytes());
    t.push(3); // graph type
    t.extend_from_slice(&(letters.len() as u16).to_le_bytes());
    t.extend_from_slice(&letters);
    t
}

fn byte_to_var_table(groups: &[&[u8]]) -> Vec<u8> {
    let payload: Vec<u8> = groups.concat();
    let mut t = Vec::new();
    let len = 5 + 2 * groups.len() + payload.len();
    t.extend_from_slice(&(len as u16).to_le_bytes());
    t.push(4); // byte-to-var type
    t.extend_from_slice(&(groups.len() as u16).to_le_bytes());
    let mut end = 0u16;
    for g in groups {
        end += g.len() as u16;
        t.extend_from_slice(&end.to_le_bytes());
    }
    t.extend_from_slice(&payload);
    t
}

// ---------------------------------------------------------------------
// tree builders: one continuous root, constant or binary answer
// ---------------------------------------------------------------------

/// A tree whose continuous root on `attr` (threshold `cut`) decides class
/// `lo` for values <= cut and `hi` above.
fn continuous_tree(
    nratt: usize,
    inmaps: Vec<Vec<u8>>,
    outmap: Vec<u8>,
    attr: u32,
    cut: u32,
    lo: u32,
    hi: u32,
) -> Vec<u8> {
    const QBITS: u8 = 6;
    const DBITS: u8 = 4;
    const CUTBITS: u8 = 8;
    let mut w = BitWriter::new();
    w.push(2, 2); // continuous node
    w.push(attr, QBITS as u16);
    w.push(cut, CUTBITS as u16);
    w.push(1, 1);
    w.push(lo, DBITS as u16);
    w.push(1, 1);
    w.push(hi, DBITS as u16);
    let qf = [[QBITS, QBITS, QBITS, 8, CUTBITS]; 64];
    build_tree_image(&inmaps, &outmap, [QBITS, DBITS], &qf[..nratt], &w.finish())
}

fn posp_tree() -> Vec<u8> {
    let mut inmaps: Vec<Vec<u8>> = (0..10).map(|_| letters_table()).collect();
    inmaps.push(empty_table());
    inmaps.push(empty_table());
    // always class 0 → POS_PRED
    continuous_tree(12, inmaps, word_table(&[POS_PRED as u16]), 11, 255, 0, 0)
}

fn posd_tree() -> Vec<u8> {
    let inmaps: Vec<Vec<u8>> = (0..7).map(|_| empty_table()).collect();
    // always class 0 → POS_NOUN
    continuous_tree(7, inmaps, word_table(&[POS_NOUN as u16]), 3, 255, 0, 0)
}

fn g2p_tree() -> Vec<u8> {
    let mut inmaps: Vec<Vec<u8>> = (0..9).map(|_| letters_table()).collect();
    for _ in 9..16 {
        inmaps.push(empty_table());
    }
    // attribute 12 is the primary-stress-seen flag: first grapheme (from
    // the right) gets stress+vowel, the rest consonants
    let outmap = byte_to_var_table(&[&[PH_PRIMSTRESS, PH_VOWEL_A], &[PH_CONS]]);
    continuous_tree(16, inmaps, outmap, 12, 0, 0, 1)
}

fn phr_tree() -> Vec<u8> {
    let inmaps: Vec<Vec<u8>> = (0..8).map(|_| empty_table()).collect();
    continuous_tree(
        8,
        inmaps,
        word_table(&[item::BOUND_PHR0 as u16]),
        2,
        255,
        0,
        0,
    )
}

fn acc_tree() -> Vec<u8> {
    let inmaps: Vec<Vec<u8>> = (0..13).map(|_| empty_table()).collect();
    continuous_tree(13, inmaps, word_table(&[item::ACC2 as u16]), 2, 255, 0, 0)
}

fn pam_tree(answer: u16) -> Vec<u8> {
    let inmaps: Vec<Vec<u8>> = (0..60).map(|_| empty_table()).collect();
    continuous_tree(60, inmaps, word_table(&[answer]), 0, 255, 0, 0)
}

// ---------------------------------------------------------------------
// pdf and table builders
// ---------------------------------------------------------------------

fn dur_pdf() -> Vec<u8> {
    // one frame: phone-duration nibble 2, all state nibbles 2; identity
    // quantizers; 64 samples/frame = 4 ms frames
    crate::kb::pdf::tests::build_dur_pdf(&[[0x22, 0x22, 0x22]], 64)
}

fn lfz_pdf() -> Vec<u8> {
    // five states, one frame each: mean 153, inverse variance 255
    let mut frame = [0u8; 10];
    frame[0] = 153;
    frame[6] = 255;
    crate::kb::pdf::tests::build_mul_pdf(&[frame; 5], 5)
}

fn lexicon_image() -> Vec<u8> {
    crate::kb::lexicon::tests::build_lexicon(&[vec![
        (
            b"bank".as_ref(),
            POS_NOUN,
            vec![PH_PRIMSTRESS, PH_CONS, PH_VOWEL_A],
        ),
        (
            b"bank".as_ref(),
            POS_VERB,
            vec![PH_PRIMSTRESS, PH_CONS, PH_VOWEL_O],
        ),
        (b"hello".as_ref(), POS_NOUN, hello_phones()),
        (b"the".as_ref(), POS_DET, vec![NEEDS_G2P]),
    ]])
}

/// Build the complete synthetic voice.
pub(crate) fn test_voice() -> Voice {
    let phones = phones_fix::build_phones(&[PH_VOWEL_A, PH_VOWEL_O, 32], &[]);
    let pos = pos_fix::build_pos(
        &[POS_NOUN, POS_VERB, POS_DET, POS_PRED],
        &[(POS_GROUP_NV, vec![POS_NOUN, POS_VERB])],
    );

    let mut kbs: Vec<(u8, Vec<u8>)> = vec![
        (KbId::TabPhones as u8, phones),
        (KbId::TabPos as u8, pos),
        (KbId::LexMain as u8, lexicon_image()),
        (KbId::TreePosPredict as u8, posp_tree()),
        (KbId::TreePosDisamb as u8, posd_tree()),
        (KbId::TreeG2p as u8, g2p_tree()),
        (KbId::TreePhrasing as u8, phr_tree()),
        (KbId::TreeAccent as u8, acc_tree()),
        (KbId::TreeDur as u8, pam_tree(1)),
        (KbId::PdfDur as u8, dur_pdf()),
        (KbId::PdfLfz as u8, lfz_pdf()),
    ];
    for n in 0..5 {
        kbs.push((KbId::lfz_tree(n) as u8, pam_tree(1)));
        kbs.push((KbId::mgc_tree(n) as u8, pam_tree(2)));
    }

    let image = build_resource("test-lingware", &kbs);
    let mut mgr = ResourceManager::new();
    let name = mgr.add_resource(Resource::parse(image).expect("fixture resource parses"));
    mgr.create_voice("test-voice", &[name])
        .expect("fixture voice binds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::tree::TreeKind;

    #[test]
    fn fixture_voice_is_complete() {
        let voice = test_voice();
        assert!(voice.phones().is_some());
        let pos = voice.pos_table().unwrap();
        assert_eq!(pos.group_for(&[POS_NOUN, POS_VERB]), POS_GROUP_NV);
        assert!(voice.lexicon(KbId::LexMain).is_some());
        assert_eq!(
            voice.tree(KbId::TreeG2p).map(|t| t.kind()),
            Some(TreeKind::G2p)
        );
        assert!(voice.pdf_dur(KbId::PdfDur).is_some());
        assert!(voice.pdf_mul(KbId::PdfLfz).is_some());
        for n in 0..5 {
            assert!(voice.tree(KbId::lfz_tree(n)).is_some());
            assert!(voice.tree(KbId::mgc_tree(n)).is_some());
        }
    }

    #[test]
    fn fixture_trees_answer_their_constants() {
        let voice = test_voice();
        let phr = voice.tree(KbId::TreePhrasing).unwrap();
        let invec = phr
            .construct_phrasing(7, 7, POS_NOUN, 7, 7, 1, 1, 2)
            .unwrap();
        let res = phr.classify(&invec);
        assert!(res.set);
        assert_eq!(phr.map_out_fixed(res.class), Some(item::BOUND_PHR0 as u16));

        let dur = voice.tree(KbId::TreeDur).unwrap();
        let invec = dur.construct_pam(&[0u8; 60]).unwrap();
        let res = dur.classify(&invec);
        assert!(res.set);
        assert_eq!(dur.map_out_fixed(res.class), Some(1));
    }
}
