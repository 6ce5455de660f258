//! Phones symbol table: special marker ids plus per-phone properties.
//!
//! Layout: 8 special-id slots (primary stress, secondary stress, syllable
//! boundary, pause, word boundary, 3 reserved), then a 256-byte property
//! table indexed by phone id.

use crate::error::{OratioError, Result};
use crate::kb::KbRegion;

const SPECIDS_LEN: usize = 8;
const IND_PRIMSTRESS: usize = 0;
const IND_SECSTRESS: usize = 1;
const IND_SYLLBOUND: usize = 2;
const IND_PAUSE: usize = 3;
const IND_WORDBOUND: usize = 4;

const PROP_VOWEL: u8 = 0x01;
const PROP_DIPHTH: u8 = 0x02;
const PROP_GLOTT: u8 = 0x04;
const PROP_NONSYLLVOWEL: u8 = 0x08;
const PROP_SYLLCONS: u8 = 0x10;

#[derive(Debug)]
pub struct PhoneTable {
    region: KbRegion,
}

impl PhoneTable {
    pub fn specialize(region: KbRegion) -> Result<PhoneTable> {
        if region.len() < SPECIDS_LEN + 256 {
            return Err(OratioError::FileCorrupt("phones table too short"));
        }
        Ok(PhoneTable { region })
    }

    fn specid(&self, ind: usize) -> u8 {
        self.region.bytes()[ind]
    }

    fn props(&self, ph: u8) -> u8 {
        self.region.bytes()[SPECIDS_LEN + ph as usize]
    }

    pub fn primstress_id(&self) -> u8 {
        self.specid(IND_PRIMSTRESS)
    }

    pub fn secstress_id(&self) -> u8 {
        self.specid(IND_SECSTRESS)
    }

    pub fn syllbound_id(&self) -> u8 {
        self.specid(IND_SYLLBOUND)
    }

    pub fn pause_id(&self) -> u8 {
        self.specid(IND_PAUSE)
    }

    pub fn wordbound_id(&self) -> u8 {
        self.specid(IND_WORDBOUND)
    }

    pub fn is_primstress(&self, ph: u8) -> bool {
        ph == self.primstress_id()
    }

    pub fn is_secstress(&self, ph: u8) -> bool {
        ph == self.secstress_id()
    }

    pub fn is_syllbound(&self, ph: u8) -> bool {
        ph == self.syllbound_id()
    }

    pub fn is_pause(&self, ph: u8) -> bool {
        ph == self.pause_id()
    }

    pub fn has_vowel_prop(&self, ph: u8) -> bool {
        self.props(ph) & PROP_VOWEL != 0
    }

    pub fn has_diphth_prop(&self, ph: u8) -> bool {
        self.props(ph) & PROP_DIPHTH != 0
    }

    pub fn has_glott_prop(&self, ph: u8) -> bool {
        self.props(ph) & PROP_GLOTT != 0
    }

    pub fn has_nonsyllvowel_prop(&self, ph: u8) -> bool {
        self.props(ph) & PROP_NONSYLLVOWEL != 0
    }

    pub fn has_syllcons_prop(&self, ph: u8) -> bool {
        self.props(ph) & PROP_SYLLCONS != 0
    }

    /// True for phones that can carry a syllable: syllabic vowels and
    /// syllabic consonants.
    pub fn is_syll_carrier(&self, ph: u8) -> bool {
        let p = self.props(ph);
        (p & PROP_VOWEL != 0 && p & PROP_NONSYLLVOWEL == 0) || p & PROP_SYLLCONS != 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Fixture ids used across the engine tests.
    pub(crate) const PRIMSTRESS: u8 = 1;
    pub(crate) const SECSTRESS: u8 = 2;
    pub(crate) const SYLLBOUND: u8 = 3;
    pub(crate) const PAUSE: u8 = 4;
    pub(crate) const WORDBOUND: u8 = 5;

    /// Build a phones table; `vowels` and `syllcons` get the matching props.
    pub(crate) fn build_phones(vowels: &[u8], syllcons: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; 8 + 256];
        image[IND_PRIMSTRESS] = PRIMSTRESS;
        image[IND_SECSTRESS] = SECSTRESS;
        image[IND_SYLLBOUND] = SYLLBOUND;
        image[IND_PAUSE] = PAUSE;
        image[IND_WORDBOUND] = WORDBOUND;
        for &v in vowels {
            image[8 + v as usize] |= PROP_VOWEL;
        }
        for &c in syllcons {
            image[8 + c as usize] |= PROP_SYLLCONS;
        }
        image
    }

    pub(crate) fn table(vowels: &[u8], syllcons: &[u8]) -> PhoneTable {
        let image = build_phones(vowels, syllcons);
        let len = image.len();
        PhoneTable::specialize(
            KbRegion::new(Arc::from(image.into_boxed_slice()), 0, len).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn special_ids_resolve() {
        let t = table(&[30], &[]);
        assert!(t.is_primstress(PRIMSTRESS));
        assert!(t.is_syllbound(SYLLBOUND));
        assert!(t.is_pause(PAUSE));
        assert!(!t.is_pause(PRIMSTRESS));
        assert_eq!(t.wordbound_id(), WORDBOUND);
    }

    #[test]
    fn syllable_carriers_are_vowels_and_syllabic_consonants() {
        let t = table(&[30, 31], &[40]);
        assert!(t.is_syll_carrier(30));
        assert!(t.is_syll_carrier(40));
        assert!(!t.is_syll_carrier(50));
        assert!(t.has_vowel_prop(31));
        assert!(!t.has_vowel_prop(40));
    }

    #[test]
    fn short_table_is_corrupt() {
        let image = vec![0u8; 100];
        assert!(PhoneTable::specialize(
            KbRegion::new(Arc::from(image.into_boxed_slice()), 0, 100).unwrap()
        )
        .is_err());
    }
}
