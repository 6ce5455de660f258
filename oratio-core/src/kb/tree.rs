//! Decision-tree knowledge base: attribute map tables plus a bit-packed tree.
//!
//! On-disk layout (little endian):
//!
//! ```text
//! inpmap_off:u16 outmap_off:u16 tree_off:u16
//! input map tables:  count:u8, then count × (len:u16 type:u8 body)
//! output map table:  count:u8 (=1), len:u16 type:u8 body
//! tree: nrvfields:u8(=2) vfields[2]
//!       nrattributes:u8 nrqfields:u8(=5) qfields[nratt×5]
//!       bodysize:u32 body (bit packed, MSB first)
//! ```
//!
//! Map table types: 0 empty (identity), 1 byte, 2 word, 3 utf8 grapheme,
//! 4 byte-to-var (output only; maps one class to a phone id sequence).
//!
//! The tree body holds binary / continuous / discrete nodes; discrete nodes
//! carry subsets as single value, value pair, contiguous range or bit mask.
//! Traversal never allocates: a cursor walks byte/bit offsets, decisions are
//! terminal bit-flagged forks.

use crate::error::{OratioError, Result};
use crate::kb::reader::{u16_le_at, ByteReader};
use crate::kb::KbRegion;

/// Attribute value for "outside context" slots.
pub const EPSILON: u16 = 7;
/// History attribute value meaning "no previous output available".
pub const HISTORY_ZERO: u16 = 30000;
/// Grapheme fed to map tables for positions outside the word.
pub const OUTSIDE_GRAPH: &[u8] = b"0";
/// Grapheme fed for the word-boundary position.
pub const OUTSIDE_GRAPH_EOW: &[u8] = b"1";
/// Longest byte-to-var output sequence.
pub const MAX_OUTVEC: usize = 8;

const MT_EMPTY: u8 = 0;
const MT_BYTE: u8 = 1;
const MT_WORD: u8 = 2;
const MT_GRAPH: u8 = 3;
const MT_BYTETOVAR: u8 = 4;

/// What a tree predicts; fixes the expected attribute count and output map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    /// Part-of-speech prediction from graphemes (12 attributes).
    PosPredict,
    /// Part-of-speech disambiguation in sentence context (7 attributes).
    PosDisamb,
    /// Grapheme-to-phoneme (16 attributes, variable-length output).
    G2p,
    /// Phrase-boundary strength (8 attributes).
    Phrasing,
    /// Accent class (13 attributes).
    Accent,
    /// Duration/pitch/spectral indices (60 attributes).
    Pam,
}

impl TreeKind {
    pub fn attribute_count(self) -> usize {
        match self {
            TreeKind::PosPredict => 12,
            TreeKind::PosDisamb => 7,
            TreeKind::G2p => 16,
            TreeKind::Phrasing => 8,
            TreeKind::Accent => 13,
            TreeKind::Pam => 60,
        }
    }

    fn out_map_type(self) -> u8 {
        match self {
            TreeKind::G2p => MT_BYTETOVAR,
            _ => MT_WORD,
        }
    }
}

/// A single-class classification result.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyResult {
    pub set: bool,
    pub class: u16,
}

/// Outcome of an input-map lookup.
enum MapOutcome {
    Mapped(u16),
    /// Value was not in the table; the table's fallback (its entry count).
    Fallback(u16),
    Failed,
}

impl MapOutcome {
    fn resolve(self) -> Option<u16> {
        match self {
            MapOutcome::Mapped(v) => Some(v),
            MapOutcome::Fallback(v) if v != 0 => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Tree {
    region: KbRegion,
    kind: TreeKind,
    /// Start offset of each input map table (attribute_count entries).
    inmap_start: Vec<usize>,
    /// Offset of the output map table, `None` for an empty (identity) table.
    outmap: Option<usize>,
    /// Bits per question attribute index / per decision value.
    vfields: [u8; 2],
    qfields: usize,
    nrattributes: usize,
    body: usize,
}

/// Bit cursor into the tree body; bit 7 is read first within a byte.
#[derive(Debug, Clone, Copy)]
struct BitCursor {
    byte: usize,
    bit: i8,
}

// qfields columns per attribute
const Q_FORK_COUNT: usize = 0;
const Q_BIT_NO: usize = 1;
const Q_BIT_COUNT: usize = 2;
const Q_JUMP: usize = 3;
const Q_CUT: usize = 4;
const NR_QFIELDS: usize = 5;

// node and subset type tags in the body
const NODE_BINARY: u32 = 1;
const NODE_CONTINUOUS: u32 = 2;
const NODE_DISCRETE: u32 = 3;
const SUBSET_ONE_VALUE: u32 = 0;
const SUBSET_TWO_VALUES: u32 = 1;
const SUBSET_RANGE: u32 = 2;
const SUBSET_BITMASK: u32 = 3;

impl Tree {
    pub fn specialize(region: KbRegion, kind: TreeKind) -> Result<Tree> {
        let data = region.bytes();
        let mut r = ByteReader::new(data);
        let inp = r.u16_le()? as usize;
        let out = r.u16_le()? as usize;
        let tree = r.u16_le()? as usize;
        if inp == 0 || out == 0 || tree == 0 {
            return Err(OratioError::FileCorrupt("tree header offsets"));
        }

        // input map tables: count then length-prefixed tables
        let nr_inmaps = *data
            .get(inp)
            .ok_or(OratioError::FileCorrupt("tree input maps"))? as usize;
        if nr_inmaps != kind.attribute_count() {
            return Err(OratioError::FileCorrupt("tree input map count"));
        }
        let mut inmap_start = Vec::with_capacity(nr_inmaps);
        let mut pos = inp + 1;
        for _ in 0..nr_inmaps {
            inmap_start.push(pos);
            let len = u16_le_at(data, pos).ok_or(OratioError::FileCorrupt("tree map table"))?;
            if len < 3 {
                return Err(OratioError::FileCorrupt("tree map table length"));
            }
            pos += len as usize;
        }

        // output map table: exactly one, possibly empty
        if data.get(out).copied() != Some(1) {
            return Err(OratioError::FileCorrupt("tree output map count"));
        }
        let olen = u16_le_at(data, out + 1).ok_or(OratioError::FileCorrupt("tree output map"))?;
        let otype = *data
            .get(out + 3)
            .ok_or(OratioError::FileCorrupt("tree output map"))?;
        let outmap = if olen == 3 {
            if otype != MT_EMPTY {
                return Err(OratioError::FileCorrupt("tree output map type"));
            }
            None
        } else {
            if otype != kind.out_map_type() {
                return Err(OratioError::FileCorrupt("tree output map type"));
            }
            Some(out + 1)
        };

        // node info
        let nrvfields = *data
            .get(tree)
            .ok_or(OratioError::FileCorrupt("tree node info"))?;
        let vfields = [
            *data
                .get(tree + 1)
                .ok_or(OratioError::FileCorrupt("tree node info"))?,
            *data
                .get(tree + 2)
                .ok_or(OratioError::FileCorrupt("tree node info"))?,
        ];
        let nratt = *data
            .get(tree + 3)
            .ok_or(OratioError::FileCorrupt("tree node info"))? as usize;
        let nrqfields = *data
            .get(tree + 4)
            .ok_or(OratioError::FileCorrupt("tree node info"))?;
        if nrvfields != 2 || nrqfields as usize != NR_QFIELDS {
            return Err(OratioError::FileCorrupt("tree node field counts"));
        }
        if nratt != kind.attribute_count() {
            return Err(OratioError::FileCorrupt("tree attribute count"));
        }
        let qfields = tree + 5;
        let body = qfields + nratt * NR_QFIELDS + 4; // 4 = body size field
        if body > data.len() {
            return Err(OratioError::FileCorrupt("tree body offset"));
        }

        Ok(Tree {
            region,
            kind,
            inmap_start,
            outmap,
            vfields,
            qfields,
            nrattributes: nratt,
            body,
        })
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    fn data(&self) -> &[u8] {
        self.region.bytes()
    }

    fn qfield(&self, attr: usize, col: usize) -> u8 {
        self.data()
            .get(self.qfields + attr * NR_QFIELDS + col)
            .copied()
            .unwrap_or(0)
    }

    // ---------------------------------------------------------------
    // bit-packed body access
    // ---------------------------------------------------------------

    fn body_bytes(&self) -> &[u8] {
        &self.data()[self.body..]
    }

    fn read_bits(&self, size: u16, cur: &mut BitCursor) -> u32 {
        let body = self.body_bytes();
        let mut val = 0u32;
        for _ in 0..size {
            let byte = body.get(cur.byte).copied().unwrap_or(0);
            val = (val << 1) | ((byte >> cur.bit) & 1) as u32;
            cur.bit -= 1;
            if cur.bit < 0 {
                cur.bit = 7;
                cur.byte += 1;
            }
        }
        val
    }

    /// Advance the cursor by an absolute bit offset.
    fn jump(cur: &mut BitCursor, offset: u32) {
        let bytes = (offset / 8) as usize;
        let mut bit = (offset % 8) as i16 + (7 - cur.bit as i16);
        cur.byte += bytes;
        if bit >= 8 {
            cur.byte += 1;
            bit = 15 - bit;
        } else {
            bit = 7 - bit;
        }
        cur.bit = bit as i8;
    }

    /// One traversal step. Returns `Some(true)` when a decision was reached
    /// (stored in `out`), `Some(false)` to continue, `None` on failure.
    fn ask(&self, invec: &[u16], cur: &mut BitCursor, out: &mut u16) -> Option<bool> {
        let node_type = self.read_bits(2, cur);
        let question = self.read_bits(self.vfields[0] as u16, cur) as usize;
        if question >= self.nrattributes || question >= invec.len() {
            return None;
        }
        let val = invec[question] as i64;

        let mut forks = 0i64;
        let mut id: i64 = -1;
        match node_type {
            NODE_BINARY => {
                forks = 2;
                id = val;
            }
            NODE_CONTINUOUS => {
                forks = 2;
                let cut = self.read_bits(self.qfield(question, Q_CUT) as u16, cur) as i64;
                id = if val <= cut { 0 } else { 1 };
            }
            NODE_DISCRETE => {
                forks = self.read_bits(self.qfield(question, Q_FORK_COUNT) as u16, cur) as i64;
                for i in 0..forks - 1 {
                    let subset_type = self.read_bits(2, cur);
                    match subset_type {
                        SUBSET_ONE_VALUE => {
                            if id > -1 {
                                Tree::jump(cur, self.qfield(question, Q_BIT_NO) as u32);
                                continue;
                            }
                            let v = self.read_bits(self.qfield(question, Q_BIT_NO) as u16, cur);
                            if val == v as i64 {
                                id = i;
                            }
                        }
                        SUBSET_TWO_VALUES => {
                            if id > -1 {
                                Tree::jump(
                                    cur,
                                    self.qfield(question, Q_BIT_NO) as u32
                                        + self.qfield(question, Q_BIT_COUNT) as u32,
                                );
                                continue;
                            }
                            let a = self.read_bits(self.qfield(question, Q_BIT_NO) as u16, cur);
                            let b = self.read_bits(self.qfield(question, Q_BIT_COUNT) as u16, cur);
                            if val == a as i64 || val == b as i64 {
                                id = i;
                            }
                        }
                        SUBSET_RANGE => {
                            if id > -1 {
                                Tree::jump(
                                    cur,
                                    self.qfield(question, Q_BIT_NO) as u32
                                        + self.qfield(question, Q_BIT_COUNT) as u32,
                                );
                                continue;
                            }
                            let start = self.read_bits(self.qfield(question, Q_BIT_NO) as u16, cur);
                            let count =
                                self.read_bits(self.qfield(question, Q_BIT_COUNT) as u16, cur);
                            if val >= start as i64 && val < start as i64 + count as i64 {
                                id = i;
                            }
                        }
                        _ => {
                            // bit mask
                            let start = if id > -1 {
                                Tree::jump(cur, self.qfield(question, Q_BIT_NO) as u32);
                                0
                            } else {
                                self.read_bits(self.qfield(question, Q_BIT_NO) as u16, cur) as i64
                            };
                            let count =
                                self.read_bits(self.qfield(question, Q_BIT_COUNT) as u16, cur)
                                    as i64;
                            if id > -1 {
                                Tree::jump(cur, count as u32);
                                continue;
                            }
                            if val >= start && val < start + count {
                                Tree::jump(cur, (val - start) as u32);
                                let body = self.body_bytes();
                                let byte = body.get(cur.byte).copied().unwrap_or(0);
                                if (byte >> cur.bit) & 1 == 1 {
                                    id = i;
                                }
                                Tree::jump(cur, (count - (val - start)) as u32);
                            } else {
                                Tree::jump(cur, count as u32);
                            }
                        }
                    }
                }
                // default branch
                if id == -1 {
                    id = forks - 1;
                }
            }
            _ => {}
        }

        for i in 0..forks {
            let is_decide = self.read_bits(1, cur);
            if is_decide == 0 {
                if id == i {
                    let j = self.read_bits(self.qfield(question, Q_JUMP) as u16, cur);
                    Tree::jump(cur, j);
                    return Some(false); // continue below
                } else {
                    Tree::jump(cur, self.qfield(question, Q_JUMP) as u32);
                }
            } else if id == i {
                *out = self.read_bits(self.vfields[1] as u16, cur) as u16;
                return Some(true);
            } else {
                Tree::jump(cur, self.vfields[1] as u32);
            }
        }
        None
    }

    /// Traverse the tree with a mapped input vector.
    pub fn classify(&self, invec: &[u16]) -> ClassifyResult {
        let mut cur = BitCursor { byte: 0, bit: 7 };
        let mut class = 0u16;
        // a body can never hold more nodes than bits
        let max_steps = self.body_bytes().len() * 8 + 1;
        for _ in 0..max_steps {
            match self.ask(invec, &mut cur, &mut class) {
                Some(true) => return ClassifyResult { set: true, class },
                Some(false) => continue,
                None => break,
            }
        }
        ClassifyResult::default()
    }

    // ---------------------------------------------------------------
    // map tables
    // ---------------------------------------------------------------

    fn map_in_fixed(&self, table: usize, inval: u16) -> MapOutcome {
        let Some(&start) = self.inmap_start.get(table) else {
            return MapOutcome::Failed;
        };
        let data = self.data();
        let Some(len) = u16_le_at(data, start) else {
            return MapOutcome::Failed;
        };
        let bound = start + len as usize;
        let ttype = data.get(start + 2).copied().unwrap_or(MT_EMPTY);
        match ttype {
            MT_EMPTY => MapOutcome::Mapped(inval),
            MT_BYTE => {
                let Some(nr) = u16_le_at(data, start + 3) else {
                    return MapOutcome::Failed;
                };
                let mut pos = start + 5;
                for i in 0..nr {
                    if pos >= bound {
                        break;
                    }
                    if inval < 256 && data.get(pos).copied() == Some(inval as u8) {
                        return MapOutcome::Mapped(i);
                    }
                    pos += 1;
                }
                MapOutcome::Fallback(nr)
            }
            MT_WORD => {
                let Some(nr) = u16_le_at(data, start + 3) else {
                    return MapOutcome::Failed;
                };
                let mut pos = start + 5;
                for i in 0..nr {
                    if pos + 1 >= bound {
                        break;
                    }
                    if u16_le_at(data, pos) == Some(inval) {
                        return MapOutcome::Mapped(i);
                    }
                    pos += 2;
                }
                MapOutcome::Fallback(nr)
            }
            _ => MapOutcome::Failed,
        }
    }

    fn map_in_graph(&self, table: usize, graph: &[u8]) -> MapOutcome {
        let Some(&start) = self.inmap_start.get(table) else {
            return MapOutcome::Failed;
        };
        let data = self.data();
        let Some(len) = u16_le_at(data, start) else {
            return MapOutcome::Failed;
        };
        let bound = start + len as usize;
        if data.get(start + 2).copied() != Some(MT_GRAPH) {
            return MapOutcome::Failed;
        }
        let Some(nr) = u16_le_at(data, start + 3) else {
            return MapOutcome::Failed;
        };
        let glen = utf8_len(*graph.first().unwrap_or(&0));
        if glen == 0 || glen > graph.len() {
            return MapOutcome::Failed;
        }
        let gch = &graph[..glen];

        let mut pos = start + 5;
        for i in 0..nr {
            if pos >= bound {
                break;
            }
            let tlen = utf8_len(data[pos]);
            if tlen == 0 || pos + tlen > bound {
                return MapOutcome::Failed;
            }
            if &data[pos..pos + tlen] == gch {
                return MapOutcome::Mapped(i);
            }
            pos += tlen;
        }
        MapOutcome::Fallback(nr)
    }

    /// Map a raw tree class to the external output domain.
    pub fn map_out_fixed(&self, inval: u16) -> Option<u16> {
        let Some(start) = self.outmap else {
            return Some(inval);
        };
        let data = self.data();
        let ttype = data.get(start + 2).copied()?;
        let nr = u16_le_at(data, start + 3)?;
        if inval >= nr {
            return None;
        }
        match ttype {
            MT_EMPTY => Some(inval),
            MT_BYTE => data.get(start + 5 + inval as usize).map(|&b| b as u16),
            MT_WORD => u16_le_at(data, start + 5 + 2 * inval as usize),
            _ => None,
        }
    }

    /// Map an external output value back to the raw tree domain.
    ///
    /// Used to seed prediction histories with values the tree understands.
    pub fn reverse_map_out_fixed(&self, inval: u16) -> Option<u16> {
        let Some(start) = self.outmap else {
            return Some(inval);
        };
        let data = self.data();
        let len = u16_le_at(data, start)?;
        let bound = start + len as usize;
        let ttype = data.get(start + 2).copied()?;
        let nr = u16_le_at(data, start + 3)?;
        let mut pos = start + 5;
        for i in 0..nr {
            match ttype {
                MT_BYTE => {
                    if pos >= bound {
                        break;
                    }
                    if data[pos] as u16 == inval {
                        return Some(i);
                    }
                    pos += 1;
                }
                MT_WORD => {
                    if pos + 1 >= bound {
                        break;
                    }
                    if u16_le_at(data, pos) == Some(inval) {
                        return Some(i);
                    }
                    pos += 2;
                }
                _ => return None,
            }
        }
        // table fallback: the entry count
        if nr != 0 {
            Some(nr)
        } else {
            None
        }
    }

    /// Map a raw class to a variable-length output sequence (G2P phones).
    pub fn map_out_var(&self, inval: u16) -> Option<Vec<u16>> {
        let start = self.outmap?;
        let data = self.data();
        let len = u16_le_at(data, start)? as usize;
        if data.get(start + 2).copied() != Some(MT_BYTETOVAR) {
            return None;
        }
        let nr = u16_le_at(data, start + 3)? as usize;
        if nr == 0 || inval as usize >= nr {
            return None;
        }
        let index = start + 5; // offset table, one u16 per input value
        let values = index + 2 * nr;
        // offsets point one past each value group
        let group_start = if inval == 0 {
            0
        } else {
            u16_le_at(data, index + 2 * (inval as usize - 1))? as usize
        };
        let group_end = u16_le_at(data, index + 2 * inval as usize)? as usize;
        if group_end < group_start || values + group_end > start + len {
            return None;
        }
        let nphones = group_end - group_start;
        if nphones > MAX_OUTVEC {
            return None;
        }
        let mut out = Vec::with_capacity(nphones);
        for i in 0..nphones {
            out.push(*data.get(values + group_start + i)? as u16);
        }
        Some(out)
    }

    // ---------------------------------------------------------------
    // typed input-vector construction
    // ---------------------------------------------------------------

    /// PAM vector: 60 raw bytes, each mapped through its own table.
    pub fn construct_pam(&self, vec: &[u8]) -> Option<Vec<u16>> {
        if self.kind != TreeKind::Pam || vec.len() != self.nrattributes {
            return None;
        }
        let mut invec = Vec::with_capacity(vec.len());
        for (i, &v) in vec.iter().enumerate() {
            invec.push(self.map_in_fixed(i, v as u16).resolve()?);
        }
        Some(invec)
    }

    /// Phrasing vector: POS window + distance counts.
    #[allow(clippy::too_many_arguments)]
    pub fn construct_phrasing(
        &self,
        pre2: u8,
        pre1: u8,
        src: u8,
        fol1: u8,
        fol2: u8,
        nrwordspre: u16,
        nrwordsfol: u16,
        nrsyllsfol: u16,
    ) -> Option<Vec<u16>> {
        if self.kind != TreeKind::Phrasing {
            return None;
        }
        let raw = [
            pre2 as u16,
            pre1 as u16,
            src as u16,
            fol1 as u16,
            fol2 as u16,
            nrwordspre,
            nrwordsfol,
            nrsyllsfol,
        ];
        self.map_all(&raw)
    }

    /// Accentuation vector: POS window + 2 histories + distances.
    #[allow(clippy::too_many_arguments)]
    pub fn construct_accent(
        &self,
        pre2: u8,
        pre1: u8,
        src: u8,
        fol1: u8,
        fol2: u8,
        hist1: u16,
        hist2: u16,
        nrwordspre: u16,
        nrsyllspre: u16,
        nrwordsfol: u16,
        nrsyllsfol: u16,
        footwordsfol: u16,
        footsyllsfol: u16,
    ) -> Option<Vec<u16>> {
        if self.kind != TreeKind::Accent {
            return None;
        }
        let mut raw = [
            pre2 as u16,
            pre1 as u16,
            src as u16,
            fol1 as u16,
            fol2 as u16,
            hist1,
            hist2,
            nrwordspre,
            nrsyllspre,
            nrwordsfol,
            nrsyllsfol,
            footwordsfol,
            footsyllsfol,
        ];
        for h in [5usize, 6] {
            if raw[h] == HISTORY_ZERO {
                // histories were not trained with the no-value marker; feed
                // the tree-domain encoding of ACC0 instead
                raw[h] = self.reverse_map_out_fixed(crate::data::item::ACC0 as u16)?;
            }
        }
        self.map_all(&raw)
    }

    /// POS-disambiguation vector: 3 histories, the current POS group, 3
    /// lookahead POS values.
    pub fn construct_pos_disamb(&self, window: &[u16; 7]) -> Option<Vec<u16>> {
        if self.kind != TreeKind::PosDisamb {
            return None;
        }
        self.map_all(window)
    }

    fn map_all(&self, raw: &[u16]) -> Option<Vec<u16>> {
        let mut invec = Vec::with_capacity(raw.len());
        for (i, &v) in raw.iter().enumerate() {
            invec.push(self.map_in_fixed(i, v).resolve()?);
        }
        Some(invec)
    }

    /// POS-prediction vector from a grapheme string.
    ///
    /// Attributes 0-3 are prefix graphemes, 4-9 suffix graphemes (suffix has
    /// priority when the word is short), 10 the special-character flag, 11
    /// the grapheme count.
    pub fn construct_pos_predict(&self, graph: &[u8], has_special: bool) -> Option<Vec<u16>> {
        const NRPREF: usize = 4;
        const NRSUFF: usize = 6;
        if self.kind != TreeKind::PosPredict || graph.is_empty() {
            return None;
        }

        let mut invec = vec![0u16; self.nrattributes];
        // ring of the last NRSUFF graphemes seen
        let mut ring: [&[u8]; NRSUFF] = [&[]; NRSUFF];
        let mut rear = 0usize;
        let mut len = 0usize;
        let mut prefix_filled = 0usize;
        let mut nrutf = 0u16;

        let mut pos = 0usize;
        while pos < graph.len() {
            let clen = utf8_len(graph[pos]);
            if clen == 0 || pos + clen > graph.len() {
                return None;
            }
            if len == NRSUFF {
                // ring full: oldest grapheme leaves through the prefix
                if prefix_filled < NRPREF {
                    let front = (rear + NRSUFF - len) % NRSUFF;
                    invec[prefix_filled] = self
                        .map_in_graph(prefix_filled, ring[front])
                        .resolve()?;
                    prefix_filled += 1;
                }
                len -= 1;
            }
            ring[rear] = &graph[pos..pos + clen];
            rear = (rear + 1) % NRSUFF;
            len += 1;
            nrutf += 1;
            pos += clen;
        }
        if len == 0 {
            return None;
        }

        while prefix_filled < NRPREF {
            invec[prefix_filled] = self
                .map_in_graph(prefix_filled, OUTSIDE_GRAPH)
                .resolve()?;
            prefix_filled += 1;
        }
        // fill the suffix slots back to front from the ring
        let mut r = rear;
        for slot in (NRPREF..NRPREF + NRSUFF).rev() {
            if len > 0 {
                r = (r + NRSUFF - 1) % NRSUFF;
                invec[slot] = self.map_in_graph(slot, ring[r]).resolve()?;
                len -= 1;
            } else {
                invec[slot] = self.map_in_graph(slot, OUTSIDE_GRAPH).resolve()?;
            }
        }

        invec[10] = self
            .map_in_fixed(10, if has_special { 1 } else { 0 })
            .resolve()?;
        invec[11] = self.map_in_fixed(11, nrutf).resolve()?;
        Some(invec)
    }

    /// G2P vector for the grapheme at utf-char index `at` (0-based).
    ///
    /// Attributes 0-4: graphemes at -4..=0, 5-8: graphemes at +1..=+4 (with
    /// end-of-word markers), 9: word POS, 10/11: vowel count/order, 12:
    /// primary-stress-seen flag, 13-15: the last three tree outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn construct_g2p(
        &self,
        graph: &[u8],
        at: usize,
        pos: u8,
        nrvow: u8,
        ordvow: u8,
        primstress: bool,
        hist: [u16; 3],
    ) -> Option<Vec<u16>> {
        if self.kind != TreeKind::G2p {
            return None;
        }
        let chars = utf8_chars(graph)?;
        let n = chars.len();
        if at >= n {
            return None;
        }
        let count = at + 1; // 1-based position of the current grapheme

        let mut invec = vec![0u16; self.nrattributes];
        // left context and current: delta -4..=0
        let mut cinv: i32 = 4;
        for attr in 0..5usize {
            let ch: &[u8] = if count as i32 > cinv && count <= n {
                chars[(count as i32 - cinv - 1) as usize]
            } else if count as i32 == cinv && attr != 4 {
                OUTSIDE_GRAPH_EOW
            } else {
                OUTSIDE_GRAPH
            };
            invec[attr] = match self.map_in_graph(attr, ch).resolve() {
                Some(v) => v,
                None => 0,
            };
            cinv -= 1;
        }
        // right context: delta +1..=+4
        let mut cinv: i32 = n as i32;
        for attr in 5..9usize {
            let ch: &[u8] = if count >= 1 && (count as i32) <= cinv - 1 {
                chars[(count as i32 + n as i32 - cinv) as usize]
            } else if count as i32 == cinv {
                OUTSIDE_GRAPH_EOW
            } else {
                OUTSIDE_GRAPH
            };
            invec[attr] = match self.map_in_graph(attr, ch).resolve() {
                Some(v) => v,
                None => 0,
            };
            cinv -= 1;
        }
        // fixed attributes
        let fixed = [
            pos as u16,
            nrvow as u16,
            ordvow as u16,
            if primstress { 1 } else { 0 },
            hist[0],
            hist[1],
            hist[2],
        ];
        for (k, &v) in fixed.iter().enumerate() {
            let attr = 9 + k;
            invec[attr] = match self.map_in_fixed(attr, v).resolve() {
                Some(m) => m,
                None => 0,
            };
        }
        Some(invec)
    }
}

/// Byte length of the UTF-8 character starting with `b`; 0 when invalid.
pub fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 0,
    }
}

/// Split a byte string into UTF-8 character slices.
pub fn utf8_chars(graph: &[u8]) -> Option<Vec<&[u8]>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < graph.len() {
        let len = utf8_len(graph[pos]);
        if len == 0 || pos + len > graph.len() {
            return None;
        }
        out.push(&graph[pos..pos + len]);
        pos += len;
    }
    Some(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Bit writer matching the tree body order (MSB first).
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bit: i8,
    }

    impl BitWriter {
        pub(crate) fn new() -> BitWriter {
            BitWriter {
                bytes: Vec::new(),
                bit: 7,
            }
        }

        pub(crate) fn push(&mut self, val: u32, size: u16) {
            for i in (0..size).rev() {
                if self.bit == 7 {
                    self.bytes.push(0);
                }
                let b = ((val >> i) & 1) as u8;
                let last = self.bytes.len() - 1;
                self.bytes[last] |= b << self.bit;
                self.bit -= 1;
                if self.bit < 0 {
                    self.bit = 7;
                }
            }
        }

        pub(crate) fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }

    /// A word-type map table mapping `values[i] -> i`.
    fn word_table(values: &[u16]) -> Vec<u8> {
        let mut t = Vec::new();
        let len = 5 + 2 * values.len();
        t.extend_from_slice(&(len as u16).to_le_bytes());
        t.push(MT_WORD);
        t.extend_from_slice(&(values.len() as u16).to_le_bytes());
        for v in values {
            t.extend_from_slice(&v.to_le_bytes());
        }
        t
    }

    fn empty_table() -> Vec<u8> {
        vec![3, 0, MT_EMPTY]
    }

    /// Assemble a tree image from table bodies and a tree body.
    pub(crate) fn build_tree_image(
        inmaps: &[Vec<u8>],
        outmap: &[u8],
        vfields: [u8; 2],
        qfields_per_attr: &[[u8; 5]],
        body: &[u8],
    ) -> Vec<u8> {
        let inp_off = 6usize;
        let mut inp = vec![inmaps.len() as u8];
        for t in inmaps {
            inp.extend_from_slice(t);
        }
        let out_off = inp_off + inp.len();
        let mut out = vec![1u8];
        out.extend_from_slice(outmap);
        let tree_off = out_off + out.len();

        let mut image = Vec::new();
        image.extend_from_slice(&(inp_off as u16).to_le_bytes());
        image.extend_from_slice(&(out_off as u16).to_le_bytes());
        image.extend_from_slice(&(tree_off as u16).to_le_bytes());
        image.extend(inp);
        image.extend(out);
        image.push(2); // nrvfields
        image.extend_from_slice(&vfields);
        image.push(qfields_per_attr.len() as u8);
        image.push(5); // nrqfields
        for q in qfields_per_attr {
            image.extend_from_slice(q);
        }
        image.extend_from_slice(&(body.len() as u32).to_le_bytes());
        image.extend_from_slice(body);
        image
    }

    fn region_of(image: Vec<u8>) -> KbRegion {
        let len = image.len();
        KbRegion::new(Arc::from(image.into_boxed_slice()), 0, len).unwrap()
    }

    /// A minimal 8-attribute phrasing tree: one binary root on attribute 0,
    /// deciding class 2 for value 0 and class 3 for value 1.
    fn tiny_phrasing_tree() -> Tree {
        let mut w = BitWriter::new();
        w.push(NODE_BINARY, 2);
        w.push(0, 4); // question: attribute 0 (vfields[0] = 4 bits)
        w.push(1, 1); // fork 0: decide
        w.push(2, 4); // class 2 (vfields[1] = 4 bits)
        w.push(1, 1); // fork 1: decide
        w.push(3, 4); // class 3
        let body = w.finish();

        let inmaps: Vec<Vec<u8>> = (0..8).map(|_| empty_table()).collect();
        // classes 0..=3 map out to 10,20,30,40
        let outmap = word_table(&[10, 20, 30, 40]);
        let qf = [[4u8, 4, 4, 8, 6]; 8];
        let image = build_tree_image(&inmaps, &outmap, [4, 4], &qf, &body);
        Tree::specialize(region_of(image), TreeKind::Phrasing).unwrap()
    }

    #[test]
    fn binary_node_selects_fork_by_attribute() {
        let tree = tiny_phrasing_tree();
        let mut invec = vec![0u16; 8];
        let res = tree.classify(&invec);
        assert!(res.set);
        assert_eq!(tree.map_out_fixed(res.class), Some(30));

        invec[0] = 1;
        let res = tree.classify(&invec);
        assert!(res.set);
        assert_eq!(tree.map_out_fixed(res.class), Some(40));
    }

    #[test]
    fn word_map_falls_back_to_entry_count() {
        let mut inmaps: Vec<Vec<u8>> = (0..8).map(|_| empty_table()).collect();
        inmaps[5] = word_table(&[100, 200]); // maps 100->0, 200->1, else 2
        let mut w = BitWriter::new();
        w.push(NODE_BINARY, 2);
        w.push(0, 4);
        w.push(1, 1);
        w.push(0, 4);
        w.push(1, 1);
        w.push(1, 4);
        let image = build_tree_image(
            &inmaps,
            &word_table(&[7, 8]),
            [4, 4],
            &[[4u8, 4, 4, 8, 6]; 8],
            &w.finish(),
        );
        let tree = Tree::specialize(region_of(image), TreeKind::Phrasing).unwrap();
        let invec = tree
            .construct_phrasing(0, 0, 0, 0, 0, 200, 77, 0)
            .unwrap();
        assert_eq!(invec[5], 1); // mapped
        assert_eq!(invec[6], 2); // fallback = table size
    }

    #[test]
    fn continuous_node_compares_against_threshold() {
        // root: continuous on attribute 2, cut = 5
        let mut w = BitWriter::new();
        w.push(NODE_CONTINUOUS, 2);
        w.push(2, 4);
        w.push(5, 6); // threshold, qfield cut width = 6
        w.push(1, 1);
        w.push(0, 4); // <= 5 -> class 0
        w.push(1, 1);
        w.push(1, 4); // > 5 -> class 1
        let inmaps: Vec<Vec<u8>> = (0..8).map(|_| empty_table()).collect();
        let image = build_tree_image(
            &inmaps,
            &word_table(&[10, 11]),
            [4, 4],
            &[[4u8, 4, 4, 8, 6]; 8],
            &w.finish(),
        );
        let tree = Tree::specialize(region_of(image), TreeKind::Phrasing).unwrap();

        let mut invec = vec![0u16; 8];
        invec[2] = 5;
        assert_eq!(tree.map_out_fixed(tree.classify(&invec).class), Some(10));
        invec[2] = 6;
        assert_eq!(tree.map_out_fixed(tree.classify(&invec).class), Some(11));
    }

    #[test]
    fn attribute_count_mismatch_is_corrupt() {
        let inmaps: Vec<Vec<u8>> = (0..8).map(|_| empty_table()).collect();
        let image = build_tree_image(
            &inmaps,
            &word_table(&[1]),
            [4, 4],
            &[[4u8, 4, 4, 8, 6]; 8],
            &[0],
        );
        assert!(matches!(
            Tree::specialize(region_of(image), TreeKind::Accent),
            Err(OratioError::FileCorrupt(_))
        ));
    }

    #[test]
    fn byte_to_var_output_decomposes_groups() {
        // two classes: class 0 -> [4], class 1 -> [9, 2, 7]
        let mut out = Vec::new();
        let payload: &[u8] = &[4, 9, 2, 7];
        let len = 5 + 2 * 2 + payload.len();
        out.extend_from_slice(&(len as u16).to_le_bytes());
        out.push(MT_BYTETOVAR);
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // end of group 0
        out.extend_from_slice(&4u16.to_le_bytes()); // end of group 1
        out.extend_from_slice(payload);

        let inmaps: Vec<Vec<u8>> = (0..16).map(|_| empty_table()).collect();
        let mut w = BitWriter::new();
        w.push(NODE_BINARY, 2);
        w.push(0, 5);
        w.push(1, 1);
        w.push(0, 4);
        w.push(1, 1);
        w.push(1, 4);
        let image = build_tree_image(&inmaps, &out, [5, 4], &[[4u8, 4, 4, 8, 6]; 16], &w.finish());
        let tree = Tree::specialize(region_of(image), TreeKind::G2p).unwrap();
        assert_eq!(tree.map_out_var(0), Some(vec![4]));
        assert_eq!(tree.map_out_var(1), Some(vec![9, 2, 7]));
        assert_eq!(tree.map_out_var(2), None);
    }

    #[test]
    fn pos_predict_vector_orders_prefix_and_suffix() {
        // graph tables are identity-ish: one table per attribute mapping
        // ascii letters a..j to 0..9
        fn graph_table() -> Vec<u8> {
            let letters: Vec<u8> = (b'a'..=b'j').collect();
            let mut t = Vec::new();
            let len = 5 + letters.len();
            t.extend_from_slice(&(len as u16).to_le_bytes());
            t.push(MT_GRAPH);
            t.extend_from_slice(&(letters.len() as u16).to_le_bytes());
            t.extend_from_slice(&letters);
            t
        }
        let mut inmaps: Vec<Vec<u8>> = (0..10).map(|_| graph_table()).collect();
        inmaps.push(empty_table()); // special-char flag
        inmaps.push(empty_table()); // grapheme count
        let mut w = BitWriter::new();
        w.push(NODE_BINARY, 2);
        w.push(0, 4);
        w.push(1, 1);
        w.push(0, 4);
        w.push(1, 1);
        w.push(1, 4);
        let image = build_tree_image(
            &inmaps,
            &word_table(&[1, 2]),
            [4, 4],
            &[[4u8, 4, 4, 8, 6]; 12],
            &w.finish(),
        );
        let tree = Tree::specialize(region_of(image), TreeKind::PosPredict).unwrap();

        // 8 letters: prefix gets a,b; suffix gets c..h; 2 slots padded... no:
        // layout for 8 graphemes is [1 2 0 0 | 3 4 5 6 7 8] in 1-based counts
        let invec = tree.construct_pos_predict(b"abcdefgh", false).unwrap();
        let a = 0u16; // 'a' maps to 0 etc.
        assert_eq!(&invec[..4], &[a, a + 1, 10, 10]); // 'a','b', outside, outside
        assert_eq!(
            &invec[4..10],
            &[a + 2, a + 3, a + 4, a + 5, a + 6, a + 7]
        );
        assert_eq!(invec[11], 8); // grapheme count (empty table: identity)
    }
}
