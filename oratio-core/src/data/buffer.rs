//! Bounded circular byte buffer carrying framed items.
//!
//! The buffer never grows: a `put_item` that does not fit fails with
//! `BufOverflow` and writes nothing, which is what drives the `OutFull`
//! backpressure path of the stage state machines.

use tracing::warn;

use crate::data::item::{Item, HEAD_SIZE};
use crate::error::{OratioError, Result};

pub struct ItemBuffer {
    buf: Vec<u8>,
    /// Next position to read.
    front: usize,
    /// Next free position to write.
    rear: usize,
    /// Occupied bytes; empty = 0, full = buf.len().
    len: usize,
}

impl ItemBuffer {
    pub fn new(capacity: usize) -> ItemBuffer {
        ItemBuffer {
            buf: vec![0; capacity],
            front: 0,
            rear: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Reset to the pristine state (as if just constructed).
    pub fn reset(&mut self) {
        self.front = 0;
        self.rear = 0;
        self.len = 0;
    }

    /// Kind byte of the item at the front, if any bytes are buffered.
    /// Peek only, nothing is consumed.
    pub fn front_kind(&self) -> Option<u8> {
        if self.len == 0 {
            None
        } else {
            Some(self.buf[self.front])
        }
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self.buf[(self.front + offset) % self.buf.len()]
    }

    fn push_byte(&mut self, b: u8) {
        self.buf[self.rear] = b;
        self.rear = (self.rear + 1) % self.buf.len();
        self.len += 1;
    }

    fn pop_byte(&mut self) -> u8 {
        let b = self.buf[self.front];
        self.front = (self.front + 1) % self.buf.len();
        self.len -= 1;
        b
    }

    /// Write one complete item, or nothing.
    pub fn put_item(&mut self, item: &Item) -> Result<()> {
        let need = item.wire_len();
        if need > self.free() {
            warn!("problem putting item, overflow");
            return Err(OratioError::BufOverflow);
        }
        for b in item.to_bytes() {
            self.push_byte(b);
        }
        Ok(())
    }

    /// Read one complete item.
    ///
    /// `Ok(None)` when the buffer is empty (no data is not an error);
    /// `BufUnderflow` when bytes are present but no valid item is readable.
    pub fn get_item(&mut self) -> Result<Option<Item>> {
        if self.len == 0 {
            return Ok(None);
        }
        if self.len < HEAD_SIZE {
            warn!("problem getting item, incomplete head, underflow");
            return Err(OratioError::BufUnderflow);
        }
        let total = HEAD_SIZE + self.byte_at(3) as usize;
        if total > self.len {
            warn!(
                need = total,
                have = self.len,
                "problem getting item, incomplete content, underflow"
            );
            return Err(OratioError::BufUnderflow);
        }
        let mut bytes = Vec::with_capacity(total);
        for _ in 0..total {
            bytes.push(self.pop_byte());
        }
        let item = Item::decode(&bytes)?;
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::item::{ItemKind, INFO_NA};

    #[test]
    fn fifo_order_survives_wraparound() {
        let mut cb = ItemBuffer::new(24);
        // 8 bytes per item, capacity 24: forces wrap after a few cycles
        for round in 0u8..10 {
            let a = Item::new(ItemKind::WordGraph, round, 0, &[1, 2, 3, 4]).unwrap();
            let b = Item::new(ItemKind::Bound, round, 1, &[9, 8, 7, 6]).unwrap();
            cb.put_item(&a).unwrap();
            cb.put_item(&b).unwrap();
            assert_eq!(cb.get_item().unwrap().unwrap(), a);
            assert_eq!(cb.get_item().unwrap().unwrap(), b);
        }
        assert!(cb.is_empty());
    }

    #[test]
    fn overflow_writes_nothing() {
        let mut cb = ItemBuffer::new(10);
        let item = Item::new(ItemKind::WordGraph, 0, 0, &[0; 8]).unwrap();
        assert!(matches!(
            cb.put_item(&item),
            Err(OratioError::BufOverflow)
        ));
        assert!(cb.is_empty());

        let fits = Item::new(ItemKind::WordGraph, 0, 0, &[0; 6]).unwrap();
        cb.put_item(&fits).unwrap();
        assert_eq!(cb.len(), 10);
    }

    #[test]
    fn empty_is_not_an_error() {
        let mut cb = ItemBuffer::new(16);
        assert!(cb.get_item().unwrap().is_none());
        assert_eq!(cb.front_kind(), None);
    }

    #[test]
    fn front_kind_peeks_without_consuming() {
        let mut cb = ItemBuffer::new(16);
        let item = Item::mark(ItemKind::Punc, b's', b't');
        cb.put_item(&item).unwrap();
        assert_eq!(cb.front_kind(), Some(b'p'));
        assert_eq!(cb.len(), 4);
        assert_eq!(cb.get_item().unwrap().unwrap().head.info1, b's');
    }

    #[test]
    fn reset_clears_all_state() {
        let mut cb = ItemBuffer::new(16);
        cb.put_item(&Item::mark(ItemKind::Bound, b'b', INFO_NA)).unwrap();
        cb.reset();
        assert!(cb.is_empty());
        assert!(cb.get_item().unwrap().is_none());
    }
}
