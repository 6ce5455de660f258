//! Part-of-speech combination table.
//!
//! Layout: 8 × (count:u16, offset:u16) header describing groups of entries
//! with 1..=8 component symbols, then the group data. An entry with n
//! components is `combined_id:u8` followed by the n sorted component ids;
//! group 0 holds the plain (non-combined) POS symbols.

use tracing::warn;

use crate::error::{OratioError, Result};
use crate::kb::reader::u16_le_at;
use crate::kb::KbRegion;

/// Maximum number of POS symbols a combination can carry.
pub const MAX_IN_COMB: usize = 8;

#[derive(Debug)]
pub struct PosTable {
    region: KbRegion,
    count: [u16; MAX_IN_COMB],
    start: [usize; MAX_IN_COMB],
}

impl PosTable {
    pub fn specialize(region: KbRegion) -> Result<PosTable> {
        let data = region.bytes();
        let mut count = [0u16; MAX_IN_COMB];
        let mut start = [0usize; MAX_IN_COMB];
        let mut prev_off = 0usize;
        for i in 0..MAX_IN_COMB {
            let pos = i * 4;
            let n = u16_le_at(data, pos).ok_or(OratioError::FileCorrupt("pos table header"))?;
            count[i] = n;
            if n > 0 {
                let off =
                    u16_le_at(data, pos + 2).ok_or(OratioError::FileCorrupt("pos table header"))?
                        as usize;
                // groups must appear in order
                if off <= prev_off {
                    return Err(OratioError::FileCorrupt("pos table group order"));
                }
                let entry_size = if i == 0 { 1 } else { i + 2 };
                if off + n as usize * entry_size > data.len() {
                    return Err(OratioError::FileCorrupt("pos table group size"));
                }
                start[i] = off;
                prev_off = off;
            } else if i == 0 {
                return Err(OratioError::FileCorrupt("pos table has no plain symbols"));
            }
        }
        Ok(PosTable {
            region,
            count,
            start,
        })
    }

    /// True when `pos` is a plain (not combined) POS symbol.
    pub fn is_unique(&self, pos: u8) -> bool {
        let data = self.region.bytes();
        let n = self.count[0] as usize;
        let start = self.start[0];
        data[start..start + n].iter().any(|&p| p == pos)
    }

    /// True when `pos` equals `group` or is one of its components.
    pub fn is_part_of_group(&self, pos: u8, group: u8) -> bool {
        if pos == group {
            return true;
        }
        let data = self.region.bytes();
        for i in 1..MAX_IN_COMB {
            let n = self.count[i] as usize;
            if n == 0 {
                continue;
            }
            let size = i + 2;
            let mut e = self.start[i];
            for _ in 0..n {
                if data[e] == group {
                    return data[e + 1..e + size].contains(&pos);
                }
                e += size;
            }
        }
        false
    }

    /// Combined id for an unordered set of POS symbols.
    ///
    /// A single symbol maps to itself. An unknown combination falls back to
    /// the first symbol with a warning — possible when a lexicon carries
    /// combinations the table was not built with.
    pub fn group_for(&self, poslist: &[u8]) -> u8 {
        if poslist.is_empty() || poslist.len() > MAX_IN_COMB {
            return 0;
        }
        if poslist.len() == 1 {
            return poslist[0];
        }
        let data = self.region.bytes();
        let i = poslist.len() - 1;
        let n = self.count[i] as usize;
        let size = i + 2;
        let mut e = self.start[i];
        for _ in 0..n {
            if set_equal(poslist, &data[e + 1..e + size]) {
                return data[e];
            }
            e += size;
        }
        warn!(
            first = poslist[0],
            "POS combination not found in table; taking first"
        );
        poslist[0]
    }
}

/// Set equality irrespective of order (component lists are short).
fn set_equal(a: &[u8], b: &[u8]) -> bool {
    a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Build a POS table from plain ids and combinations.
    pub(crate) fn build_pos(plain: &[u8], combs: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut groups: Vec<Vec<u8>> = vec![Vec::new(); MAX_IN_COMB];
        groups[0] = plain.to_vec();
        for (id, parts) in combs {
            assert!(parts.len() >= 2);
            let g = &mut groups[parts.len() - 1];
            g.push(*id);
            g.extend_from_slice(parts);
        }
        let mut header = Vec::new();
        let mut body = Vec::new();
        let base = MAX_IN_COMB * 4;
        for (i, g) in groups.iter().enumerate() {
            let entry_size = if i == 0 { 1 } else { i + 2 };
            let n = if g.is_empty() { 0 } else { g.len() / entry_size };
            header.extend_from_slice(&(n as u16).to_le_bytes());
            let off = if n > 0 { base + body.len() } else { 0 };
            header.extend_from_slice(&(off as u16).to_le_bytes());
            body.extend_from_slice(g);
        }
        header.extend_from_slice(&body);
        header
    }

    pub(crate) fn table(plain: &[u8], combs: &[(u8, Vec<u8>)]) -> PosTable {
        let image = build_pos(plain, combs);
        let len = image.len();
        PosTable::specialize(
            KbRegion::new(Arc::from(image.into_boxed_slice()), 0, len).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn unique_symbols_are_found() {
        let t = table(&[10, 11, 12], &[(100, vec![10, 11])]);
        assert!(t.is_unique(11));
        assert!(!t.is_unique(100));
    }

    #[test]
    fn group_lookup_is_order_independent() {
        let t = table(&[10, 11, 12], &[(100, vec![10, 11]), (101, vec![10, 11, 12])]);
        assert_eq!(t.group_for(&[10, 11]), 100);
        assert_eq!(t.group_for(&[11, 10]), 100);
        assert_eq!(t.group_for(&[12, 10, 11]), 101);
        assert_eq!(t.group_for(&[12]), 12);
    }

    #[test]
    fn unknown_combination_falls_back_to_first() {
        let t = table(&[10, 11, 12], &[(100, vec![10, 11])]);
        assert_eq!(t.group_for(&[11, 12]), 11);
    }

    #[test]
    fn membership_covers_identity_and_components() {
        let t = table(&[10, 11, 12], &[(100, vec![10, 11])]);
        assert!(t.is_part_of_group(10, 100));
        assert!(t.is_part_of_group(11, 100));
        assert!(!t.is_part_of_group(12, 100));
        assert!(t.is_part_of_group(12, 12));
    }
}
