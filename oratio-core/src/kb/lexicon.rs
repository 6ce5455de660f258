//! Lexicon knowledge base: 512-byte blocks of sorted variable-length entries
//! behind a 3-byte-prefix search index.
//!
//! On-disk layout (little endian):
//!
//! ```text
//! nrblocks:u16
//! search index: nrblocks × (prefix[3] + blockno:u16)
//! blocks:       nrblocks × 512 bytes
//! entry = len_graph:u8 graph[len_graph-1]
//!         len_posphon:u8 pos:u8 phon[len_posphon-2]
//! ```
//!
//! `len_posphon == 2` means an entry without pronunciation; a first phon byte
//! of 5 marks an entry whose pronunciation must come from G2P.

use tracing::warn;

use crate::error::Result;
use crate::kb::reader::ByteReader;
use crate::kb::KbRegion;

/// Bytes per lexicon block.
pub const BLOCK_SIZE: usize = 512;
/// Search index entry: 3 prefix bytes + 2-byte block number.
const SIE_SIZE: usize = 5;
const SIE_NRGRAPHS: usize = 3;
/// Reserved phon value marking a needs-G2P entry.
pub const NEEDS_G2P: u8 = 5;
/// Maximum results per grapheme lookup.
pub const MAX_NRRES: usize = 4;
/// Bytes of a block-relative entry index.
pub const IND_SIZE: usize = 3;
/// Bytes of one (pos, index) record in a WORDINDEX payload.
pub const POSIND_SIZE: usize = 1 + IND_SIZE;

/// One lookup record: POS plus, when a pronunciation exists, the 3-byte
/// entry offset for deferred phoneme retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexRecord {
    pub pos: u8,
    pub index: Option<[u8; IND_SIZE]>,
}

/// Result of a grapheme lookup.
#[derive(Debug, Default)]
pub struct LexResult {
    /// True when the records carry entry indices (pronunciations present).
    pub phon_found: bool,
    pub records: Vec<LexRecord>,
    /// True when more than `MAX_NRRES` entries matched.
    pub truncated: bool,
}

#[derive(Debug)]
pub struct Lexicon {
    region: KbRegion,
    nrblocks: usize,
    searchind: usize,
    blocks: usize,
}

impl Lexicon {
    pub fn specialize(region: KbRegion) -> Result<Lexicon> {
        let mut r = ByteReader::new(region.bytes());
        let nrblocks = r.u16_le()? as usize;
        let searchind = r.pos();
        r.skip(nrblocks * SIE_SIZE)?;
        let blocks = r.pos();
        r.skip(nrblocks * BLOCK_SIZE)?;
        Ok(Lexicon {
            region,
            nrblocks,
            searchind,
            blocks,
        })
    }

    fn search_index_val(&self, index: usize) -> u32 {
        let pos = self.searchind + index * SIE_SIZE;
        let b = &self.region.bytes()[pos..pos + SIE_NRGRAPHS];
        ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
    }

    fn block_bytes(&self) -> &[u8] {
        &self.region.bytes()[self.blocks..self.blocks + self.nrblocks * BLOCK_SIZE]
    }

    /// First block whose prefix range may contain `searchval`.
    fn block_nr(&self, searchval: u32) -> usize {
        let mut low = 0usize;
        let mut high = self.nrblocks;
        while low < high {
            let mid = (low + high) / 2;
            if self.search_index_val(mid) < searchval {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        // low points to the first entry >= searchval
        if low < self.nrblocks {
            if self.search_index_val(low) > searchval && low > 0 {
                low -= 1;
                // identical prefixes share blocks; move to the first one
                while low > 0 && self.search_index_val(low) == self.search_index_val(low - 1) {
                    low -= 1;
                }
            }
            low
        } else {
            self.nrblocks - 1
        }
    }

    /// Number of adjacent blocks sharing the prefix of block `index`.
    fn block_range(&self, index: usize) -> usize {
        let val = self.search_index_val(index);
        let mut count = 1;
        while index + count < self.nrblocks && self.search_index_val(index + count) == val {
            count += 1;
        }
        count
    }

    /// -1/0/1 comparison of the entry at `pos` against `graph`.
    /// A truncated entry compares greater, which stops the scan.
    fn entry_cmp(blocks: &[u8], pos: usize, graph: &[u8]) -> i8 {
        let lexlen = blocks[pos] as usize - 1;
        let Some(lexgraph) = blocks.get(pos + 1..pos + 1 + lexlen) else {
            return 1;
        };
        for (a, b) in lexgraph.iter().zip(graph) {
            if a < b {
                return -1;
            }
            if a > b {
                return 1;
            }
        }
        if lexlen == graph.len() {
            0
        } else if lexlen < graph.len() {
            -1
        } else {
            1
        }
    }

    fn push_record(blocks: &[u8], pos: usize, out: &mut LexResult) {
        let len_graph = blocks[pos] as usize;
        let Some(&len_posphon) = blocks.get(pos + len_graph) else {
            return;
        };
        let len_posphon = len_posphon as usize;
        let Some(&pos_byte) = blocks.get(pos + len_graph + 1) else {
            return;
        };
        if len_posphon > 2 && blocks.get(pos + len_graph + 2) == Some(&NEEDS_G2P) {
            out.phon_found = false;
            out.records.push(LexRecord {
                pos: pos_byte,
                index: None,
            });
        } else {
            out.phon_found = true;
            out.records.push(LexRecord {
                pos: pos_byte,
                index: Some([
                    (pos & 0xff) as u8,
                    ((pos >> 8) & 0xff) as u8,
                    ((pos >> 16) & 0xff) as u8,
                ]),
            });
        }
    }

    /// Advance `pos` past the entry starting there, skipping block padding.
    fn next_entry(blocks: &[u8], mut pos: usize, end: usize) -> usize {
        pos += blocks[pos] as usize;
        if pos >= end {
            return end;
        }
        pos += blocks[pos] as usize;
        while pos < end && blocks[pos] == 0 {
            pos += 1;
        }
        pos
    }

    /// Look up a grapheme; `None` when no entry matches.
    ///
    /// Equal-prefix block runs are scanned forward, so multiple entries for
    /// the same grapheme come back in file (FIFO) order, capped at
    /// [`MAX_NRRES`] with `truncated` set.
    pub fn lookup(&self, graph: &[u8]) -> Option<LexResult> {
        if self.nrblocks == 0 || graph.is_empty() {
            return None;
        }
        let mut tgraph = [0u8; SIE_NRGRAPHS];
        for (i, t) in tgraph.iter_mut().enumerate() {
            *t = graph.get(i).copied().unwrap_or(0);
        }
        let searchval =
            ((tgraph[0] as u32) << 16) | ((tgraph[1] as u32) << 8) | tgraph[2] as u32;

        let lbnr = self.block_nr(searchval);
        let lbc = self.block_range(lbnr);
        let start = lbnr * BLOCK_SIZE;
        let end = start + lbc * BLOCK_SIZE;
        let blocks = self.block_bytes();

        let mut res = LexResult::default();
        let mut pos = start;
        while pos < end && blocks[pos] != 0 {
            match Lexicon::entry_cmp(blocks, pos, graph) {
                0 => {
                    if res.records.len() == MAX_NRRES {
                        res.truncated = true;
                        break;
                    }
                    Lexicon::push_record(blocks, pos, &mut res);
                    if !res.phon_found {
                        // :G2P entries are unique per grapheme
                        break;
                    }
                    pos = Lexicon::next_entry(blocks, pos, end);
                    // further equal entries must match too, otherwise stop
                    if pos < end && blocks[pos] != 0
                        && Lexicon::entry_cmp(blocks, pos, graph) != 0
                    {
                        break;
                    }
                }
                -1 => pos = Lexicon::next_entry(blocks, pos, end),
                _ => break, // entries are sorted, no later match possible
            }
        }

        if res.records.is_empty() {
            None
        } else {
            Some(res)
        }
    }

    /// Retrieve POS and phones for a 3-byte index produced by [`lookup`].
    ///
    /// Returns `None` for an index outside the block area.
    pub fn ind_lookup(&self, ind: &[u8]) -> Option<(u8, &[u8])> {
        if ind.len() != IND_SIZE {
            return None;
        }
        let mut pentry =
            ind[0] as usize | ((ind[1] as usize) << 8) | ((ind[2] as usize) << 16);
        let blocks = self.block_bytes();
        if pentry >= blocks.len() {
            warn!(index = pentry, "lexicon index outside block area");
            return None;
        }
        pentry += *blocks.get(pentry)? as usize;
        let len_posphon = *blocks.get(pentry)? as usize;
        if len_posphon < 2 {
            return None;
        }
        let pos = *blocks.get(pentry + 1)?;
        let phones = blocks.get(pentry + 2..pentry + len_posphon)?;
        Some((pos, phones))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Build a lexicon image: entries are laid out in order, one block per
    /// `blocks` element. Entry = (graph, pos, phones).
    pub(crate) fn build_lexicon(blocks: &[Vec<(&[u8], u8, Vec<u8>)>]) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&(blocks.len() as u16).to_le_bytes());
        for (i, entries) in blocks.iter().enumerate() {
            let first = entries.first().expect("block must not be empty");
            let mut prefix = [0u8; 3];
            for (j, p) in prefix.iter_mut().enumerate() {
                *p = first.0.get(j).copied().unwrap_or(0);
            }
            image.extend_from_slice(&prefix);
            image.extend_from_slice(&(i as u16).to_le_bytes());
        }
        for entries in blocks {
            let mut block = Vec::new();
            for (graph, pos, phones) in entries {
                block.push(graph.len() as u8 + 1);
                block.extend_from_slice(graph);
                block.push(phones.len() as u8 + 2);
                block.push(*pos);
                block.extend_from_slice(phones);
            }
            assert!(block.len() <= BLOCK_SIZE, "block overflow in fixture");
            block.resize(BLOCK_SIZE, 0);
            image.extend_from_slice(&block);
        }
        image
    }

    pub(crate) fn region_of(image: Vec<u8>) -> KbRegion {
        let len = image.len();
        KbRegion::new(Arc::from(image.into_boxed_slice()), 0, len).unwrap()
    }

    fn sample() -> Lexicon {
        let image = build_lexicon(&[
            vec![
                (b"apple".as_ref(), 20, vec![10, 2, 11]),
                (b"bar".as_ref(), 21, vec![12, 13]),
                (b"bar".as_ref(), 22, vec![14]),
            ],
            vec![
                (b"hello".as_ref(), 23, vec![30, 2, 31, 4, 32]),
                (b"mute".as_ref(), 24, vec![]),
                (b"zebra".as_ref(), 25, vec![NEEDS_G2P]),
            ],
        ]);
        Lexicon::specialize(region_of(image)).unwrap()
    }

    #[test]
    fn finds_present_grapheme_with_phones() {
        let lex = sample();
        let res = lex.lookup(b"hello").unwrap();
        assert!(res.phon_found);
        assert_eq!(res.records.len(), 1);
        assert_eq!(res.records[0].pos, 23);
        let ind = res.records[0].index.unwrap();
        let (pos, phones) = lex.ind_lookup(&ind).unwrap();
        assert_eq!(pos, 23);
        assert_eq!(phones, &[30, 2, 31, 4, 32]);
    }

    #[test]
    fn absent_graphemes_return_none() {
        let lex = sample();
        assert!(lex.lookup(b"world").is_none());
        assert!(lex.lookup(b"he").is_none()); // prefix of an entry, not an entry
        assert!(lex.lookup(b"helloo").is_none());
        assert!(lex.lookup(b"aaa").is_none()); // sorts before every entry
    }

    #[test]
    fn multiple_entries_come_back_in_file_order() {
        let lex = sample();
        let res = lex.lookup(b"bar").unwrap();
        assert!(res.phon_found);
        assert_eq!(res.records.len(), 2);
        assert_eq!(res.records[0].pos, 21);
        assert_eq!(res.records[1].pos, 22);
        assert!(!res.truncated);
    }

    #[test]
    fn g2p_sentinel_yields_pos_only() {
        let lex = sample();
        let res = lex.lookup(b"zebra").unwrap();
        assert!(!res.phon_found);
        assert_eq!(res.records.len(), 1);
        assert_eq!(res.records[0].pos, 25);
        assert!(res.records[0].index.is_none());
    }

    #[test]
    fn entry_without_phones_still_resolves() {
        let lex = sample();
        let res = lex.lookup(b"mute").unwrap();
        assert!(res.phon_found);
        let (pos, phones) = lex.ind_lookup(&res.records[0].index.unwrap()).unwrap();
        assert_eq!(pos, 24);
        assert!(phones.is_empty());
    }

    #[test]
    fn result_cap_is_four_with_truncation_flag() {
        let entries: Vec<(&[u8], u8, Vec<u8>)> = (0..6u8)
            .map(|i| (b"many".as_ref(), 40 + i, vec![50 + i]))
            .collect();
        let image = build_lexicon(&[entries]);
        let lex = Lexicon::specialize(region_of(image)).unwrap();
        let res = lex.lookup(b"many").unwrap();
        assert_eq!(res.records.len(), MAX_NRRES);
        assert!(res.truncated);
        assert_eq!(res.records[0].pos, 40);
        assert_eq!(res.records[3].pos, 43);
    }

    #[test]
    fn truncated_image_fails_specialization() {
        let mut image = build_lexicon(&[vec![(b"a".as_ref(), 1, vec![2])]]);
        image.truncate(image.len() - 10);
        assert!(Lexicon::specialize(region_of(image)).is_err());
    }
}
