//! Self-delimiting item codec.
//!
//! Wire format, identical for every stage:
//!
//! ```text
//! byte 0   item kind
//! byte 1   info1
//! byte 2   info2
//! byte 3   payload length in bytes (not including this head)
//! byte 4.. payload
//! ```
//!
//! Kinds not handled by a stage are copied through byte-exact.

use crate::error::{OratioError, Result};

/// Fixed head size on the wire.
pub const HEAD_SIZE: usize = 4;

/// Largest item a stage buffer must be able to hold.
pub const MAX_ITEM_SIZE: usize = HEAD_SIZE + 256;

/// Generic info value: not applicable.
pub const INFO_NA: u8 = 1;
/// Generic info value: error state.
pub const INFO_ERR: u8 = 0;

/// Accent classes carried in `info2` of WORDPHON/SYLLPHON items.
pub const ACC0: u8 = b'0';
pub const ACC1: u8 = b'1';
pub const ACC2: u8 = b'2';
pub const ACC3: u8 = b'3';
pub const ACC4: u8 = b'4';

/// PUNC `info1`: kind of punctuation event.
pub const PUNC_SENTEND: u8 = b's';
pub const PUNC_PHRASEEND: u8 = b'p';
pub const PUNC_FLUSH: u8 = b'f';

/// PUNC `info2`: sentence/phrase subtype.
pub const PUNC_SENT_T: u8 = b't';
pub const PUNC_SENT_Q: u8 = b'q';
pub const PUNC_SENT_E: u8 = b'e';
pub const PUNC_PHRASE: u8 = b'p';
pub const PUNC_PHRASE_FORCED: u8 = b'f';

/// BOUND `info1`: boundary strength.
pub const BOUND_SBEG: u8 = b'b';
pub const BOUND_SEND: u8 = b's';
pub const BOUND_TERM: u8 = b't';
pub const BOUND_PHR0: u8 = b'0';
pub const BOUND_PHR1: u8 = b'1';
pub const BOUND_PHR2: u8 = b'2';
pub const BOUND_PHR3: u8 = b'3';

/// BOUND `info2`: phrase type of the phrase *following* the boundary.
pub const BOUNDTYPE_P: u8 = b'P';
pub const BOUNDTYPE_T: u8 = b'T';
pub const BOUNDTYPE_Q: u8 = b'Q';
pub const BOUNDTYPE_E: u8 = b'E';

/// CMD `info1`: command selector.
pub const CMD_FLUSH: u8 = b'f';
pub const CMD_PITCH: u8 = b'P';
pub const CMD_SPEED: u8 = b'R';

/// CMD `info2` for pitch/speed: absolute (percent) or relative (promille).
pub const CMD_ABSOLUTE: u8 = b'a';
pub const CMD_RELATIVE: u8 = b'r';

/// Item kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemKind {
    WordGraph = b'g',
    WordIndex = b'i',
    WordPhon = b'w',
    SyllPhon = b'y',
    Bound = b'b',
    Punc = b'p',
    Cmd = b'c',
    Phone = b'h',
    Other = b'o',
}

impl ItemKind {
    pub fn from_u8(b: u8) -> Option<ItemKind> {
        match b {
            b'g' => Some(ItemKind::WordGraph),
            b'i' => Some(ItemKind::WordIndex),
            b'w' => Some(ItemKind::WordPhon),
            b'y' => Some(ItemKind::SyllPhon),
            b'b' => Some(ItemKind::Bound),
            b'p' => Some(ItemKind::Punc),
            b'c' => Some(ItemKind::Cmd),
            b'h' => Some(ItemKind::Phone),
            b'o' => Some(ItemKind::Other),
            _ => None,
        }
    }
}

/// Decoded item head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHead {
    pub kind: ItemKind,
    pub info1: u8,
    pub info2: u8,
    pub len: u8,
}

/// A decoded item: head plus owned payload.
///
/// Items are value copies; a buffer hand-off transfers the bytes, never a
/// reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub head: ItemHead,
    payload: Vec<u8>,
}

impl Item {
    /// Build an item. Fails if the payload exceeds the u8 length field.
    pub fn new(kind: ItemKind, info1: u8, info2: u8, payload: &[u8]) -> Result<Item> {
        if payload.len() > u8::MAX as usize {
            return Err(OratioError::MaxNumExceeded("item payload"));
        }
        Ok(Item {
            head: ItemHead {
                kind,
                info1,
                info2,
                len: payload.len() as u8,
            },
            payload: payload.to_vec(),
        })
    }

    /// Payload-less item (BOUND, PUNC, FLUSH).
    pub fn mark(kind: ItemKind, info1: u8, info2: u8) -> Item {
        Item {
            head: ItemHead {
                kind,
                info1,
                info2,
                len: 0,
            },
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.head.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total size on the wire (head + payload).
    pub fn wire_len(&self) -> usize {
        HEAD_SIZE + self.payload.len()
    }

    /// Replace `info1` in place (head mutation, content untouched).
    pub fn set_info1(&mut self, info1: u8) {
        self.head.info1 = info1;
    }

    pub fn set_info2(&mut self, info2: u8) {
        self.head.info2 = info2;
    }

    /// Encode into `out`, appending `wire_len()` bytes.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.head.kind as u8);
        out.push(self.head.info1);
        out.push(self.head.info2);
        out.push(self.head.len);
        out.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode one item from the front of `buf`.
    ///
    /// Returns `BufUnderflow` on an incomplete head/payload or an unknown
    /// kind byte — the buffer holds bytes but no valid item.
    pub fn decode(buf: &[u8]) -> Result<Item> {
        if buf.len() < HEAD_SIZE {
            return Err(OratioError::BufUnderflow);
        }
        let kind = ItemKind::from_u8(buf[0]).ok_or(OratioError::BufUnderflow)?;
        let len = buf[3] as usize;
        if buf.len() < HEAD_SIZE + len {
            return Err(OratioError::BufUnderflow);
        }
        Ok(Item {
            head: ItemHead {
                kind,
                info1: buf[1],
                info2: buf[2],
                len: buf[3],
            },
            payload: buf[HEAD_SIZE..HEAD_SIZE + len].to_vec(),
        })
    }

    /// A little-endian u16 read from the payload, used by duration-carrying
    /// BOUND items and pitch/speed commands.
    pub fn payload_u16_le(&self, offset: usize) -> Option<u16> {
        let b = self.payload.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_byte_for_byte() {
        let item = Item::new(ItemKind::SyllPhon, INFO_NA, ACC2, &[7, 12, 3, 9]).unwrap();
        let bytes = item.to_bytes();
        assert_eq!(bytes.len(), item.wire_len());
        let back = Item::decode(&bytes).unwrap();
        assert_eq!(back, item);
        assert_eq!(back.to_bytes(), bytes);
    }

    #[test]
    fn rejects_incomplete_and_unknown() {
        assert!(matches!(
            Item::decode(&[b'g', 1]),
            Err(OratioError::BufUnderflow)
        ));
        // head claims 4 payload bytes, only 2 present
        assert!(matches!(
            Item::decode(&[b'g', 1, 1, 4, 0, 0]),
            Err(OratioError::BufUnderflow)
        ));
        // 'z' is not an item kind
        assert!(matches!(
            Item::decode(&[b'z', 1, 1, 0]),
            Err(OratioError::BufUnderflow)
        ));
    }

    #[test]
    fn payload_is_capped_at_u8() {
        let big = vec![0u8; 300];
        assert!(Item::new(ItemKind::WordGraph, 0, 0, &big).is_err());
        let ok = vec![0u8; 255];
        assert!(Item::new(ItemKind::WordGraph, 0, 0, &ok).is_ok());
    }

    #[test]
    fn reads_little_endian_payload_words() {
        let item = Item::new(ItemKind::Bound, BOUND_PHR1, BOUNDTYPE_P, &[0x2c, 0x01, 0x90, 0x01])
            .unwrap();
        assert_eq!(item.payload_u16_le(0), Some(300));
        assert_eq!(item.payload_u16_le(2), Some(400));
        assert_eq!(item.payload_u16_le(3), None);
    }
}
