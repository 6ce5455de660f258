//! Text-preprocessing network: the FST-like knowledge consumed by the
//! (external) preprocessor stage.
//!
//! The container holds seven counted arrays in fixed order — strings,
//! lexical categories, attribute values, output items, tokens, productions,
//! contexts — each as `len:u32` followed by the payload bytes. The decoder
//! reconciles the declared lengths against the region size and exposes the
//! raw arrays; interpreting them is the preprocessor's business.

use crate::error::{OratioError, Result};
use crate::kb::reader::ByteReader;
use crate::kb::KbRegion;

const NR_ARRAYS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PrenetArray {
    Strings = 0,
    LexCats = 1,
    AttrVals = 2,
    OutItems = 3,
    Tokens = 4,
    Productions = 5,
    Contexts = 6,
}

#[derive(Debug)]
pub struct PrepNet {
    region: KbRegion,
    arrays: [(usize, usize); NR_ARRAYS],
}

impl PrepNet {
    pub fn specialize(region: KbRegion) -> Result<PrepNet> {
        let mut arrays = [(0usize, 0usize); NR_ARRAYS];
        {
            let mut r = ByteReader::new(region.bytes());
            for slot in arrays.iter_mut() {
                let len = r.u32_le()? as usize;
                *slot = (r.pos(), len);
                r.skip(len)?;
            }
            if r.remaining() != 0 {
                return Err(OratioError::FileCorrupt("preproc network size mismatch"));
            }
        }
        Ok(PrepNet { region, arrays })
    }

    pub fn array(&self, which: PrenetArray) -> &[u8] {
        let (start, len) = self.arrays[which as usize];
        &self.region.bytes()[start..start + len]
    }

    /// Null-terminated string at `offset` in the string array.
    pub fn string_at(&self, offset: usize) -> Option<&[u8]> {
        let strings = self.array(PrenetArray::Strings);
        let rest = strings.get(offset..)?;
        let nul = rest.iter().position(|&b| b == 0)?;
        Some(&rest[..nul])
    }

    /// Number of fixed-size production records (name offset + token offset,
    /// 6 bytes each).
    pub fn production_count(&self) -> usize {
        self.array(PrenetArray::Productions).len() / 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn build(arrays: &[&[u8]; 7]) -> Vec<u8> {
        let mut image = Vec::new();
        for a in arrays {
            image.extend_from_slice(&(a.len() as u32).to_le_bytes());
            image.extend_from_slice(a);
        }
        image
    }

    fn region_of(image: Vec<u8>) -> KbRegion {
        let len = image.len();
        KbRegion::new(Arc::from(image.into_boxed_slice()), 0, len).unwrap()
    }

    #[test]
    fn arrays_round_trip() {
        let net = PrepNet::specialize(region_of(build(&[
            b"abc\0de\0",
            &[1, 2],
            &[],
            &[9],
            &[7, 7, 7],
            &[0, 0, 0, 0, 0, 0],
            &[],
        ])))
        .unwrap();
        assert_eq!(net.string_at(0), Some(b"abc".as_ref()));
        assert_eq!(net.string_at(4), Some(b"de".as_ref()));
        assert_eq!(net.array(PrenetArray::Tokens), &[7, 7, 7]);
        assert_eq!(net.production_count(), 1);
    }

    #[test]
    fn trailing_bytes_fail_reconciliation() {
        let mut image = build(&[b"", &[], &[], &[], &[], &[], &[]]);
        image.push(0xee);
        assert!(matches!(
            PrepNet::specialize(region_of(image)),
            Err(OratioError::FileCorrupt(_))
        ));
    }
}
