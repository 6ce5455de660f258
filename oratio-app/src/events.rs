//! JSON-lines output records.
//!
//! One record per pipeline output item; PHONE items expand their per-state
//! parameter triples so downstream tooling (vocoder drivers, analysis
//! scripts) can consume the stream without knowing the wire format.

use oratio_core::data::item::{Item, ItemKind};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum OutputRecord {
    Phone {
        /// Phone identity in the voice's phoneme alphabet.
        phone: u8,
        states: Vec<StateParams>,
    },
    Bound {
        strength: char,
        kind: char,
    },
    Other {
        item: char,
        info1: u8,
        info2: u8,
    },
}

/// Acoustic parameters of one phone state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateParams {
    pub frames: u16,
    pub f0_index: u16,
    pub spectral_index: u16,
}

impl OutputRecord {
    pub fn from_item(item: &Item) -> OutputRecord {
        match item.kind() {
            ItemKind::Phone => {
                let states = item
                    .payload()
                    .chunks_exact(6)
                    .map(|c| StateParams {
                        frames: u16::from_le_bytes([c[0], c[1]]),
                        f0_index: u16::from_le_bytes([c[2], c[3]]),
                        spectral_index: u16::from_le_bytes([c[4], c[5]]),
                    })
                    .collect();
                OutputRecord::Phone {
                    phone: item.head.info1,
                    states,
                }
            }
            ItemKind::Bound => OutputRecord::Bound {
                strength: item.head.info1 as char,
                kind: item.head.info2 as char,
            },
            kind => OutputRecord::Other {
                item: kind as u8 as char,
                info1: item.head.info1,
                info2: item.head.info2,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_items_expand_their_state_triples() {
        let mut payload = Vec::new();
        for s in 0..5u16 {
            payload.extend_from_slice(&(s + 1).to_le_bytes()); // frames
            payload.extend_from_slice(&7u16.to_le_bytes()); // f0
            payload.extend_from_slice(&9u16.to_le_bytes()); // spectral
        }
        let item = Item::new(ItemKind::Phone, 42, 5, &payload).unwrap();
        let json = serde_json::to_value(OutputRecord::from_item(&item)).unwrap();
        assert_eq!(json["type"], "phone");
        assert_eq!(json["phone"], 42);
        assert_eq!(json["states"].as_array().unwrap().len(), 5);
        assert_eq!(json["states"][0]["frames"], 1);
        assert_eq!(json["states"][4]["f0Index"], 7);
        assert_eq!(json["states"][4]["spectralIndex"], 9);
    }

    #[test]
    fn bounds_come_out_as_characters() {
        let item = Item::mark(ItemKind::Bound, b'b', b'T');
        let json = serde_json::to_value(OutputRecord::from_item(&item)).unwrap();
        assert_eq!(json["type"], "bound");
        assert_eq!(json["strength"], "b");
        assert_eq!(json["kind"], "T");
    }
}
