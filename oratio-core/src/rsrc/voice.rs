//! A voice: named binding from resources to the kb array the stages read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::kb::{KbId, KnowledgeBase, Lexicon, PdfDur, PdfMul, PhoneTable, PosTable, Tree};
use crate::kb::KB_ARRAY_SIZE;

/// Voice definition as stored on disk (`*.voice.json`): a name plus the
/// resource files to load and bind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceManifest {
    pub name: String,
    /// Resource file paths, bound in order (later files win on kb overlap).
    pub resources: Vec<String>,
}

/// A live voice holding one kb slot per knowledge type.
pub struct Voice {
    name: String,
    resource_names: Vec<String>,
    kb: Vec<Option<KnowledgeBase>>,
}

impl Voice {
    pub(crate) fn new(name: &str) -> Voice {
        Voice {
            name: name.to_string(),
            resource_names: Vec::new(),
            kb: vec![None; KB_ARRAY_SIZE],
        }
    }

    pub(crate) fn bind(&mut self, id: KbId, kb: KnowledgeBase) -> bool {
        let slot = &mut self.kb[id as u8 as usize];
        let overwritten = slot.is_some();
        *slot = Some(kb);
        overwritten
    }

    pub(crate) fn note_resource(&mut self, name: String) {
        self.resource_names.push(name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_names(&self) -> &[String] {
        &self.resource_names
    }

    pub fn get(&self, id: KbId) -> Option<&KnowledgeBase> {
        self.kb[id as u8 as usize].as_ref()
    }

    pub fn lexicon(&self, id: KbId) -> Option<Arc<Lexicon>> {
        self.get(id)?.as_lexicon()
    }

    pub fn tree(&self, id: KbId) -> Option<Arc<Tree>> {
        self.get(id)?.as_tree()
    }

    pub fn pdf_dur(&self, id: KbId) -> Option<Arc<PdfDur>> {
        self.get(id)?.as_pdf_dur()
    }

    pub fn pdf_mul(&self, id: KbId) -> Option<Arc<PdfMul>> {
        self.get(id)?.as_pdf_mul()
    }

    pub fn phones(&self) -> Option<Arc<PhoneTable>> {
        self.get(KbId::TabPhones)?.as_phones()
    }

    pub fn pos_table(&self) -> Option<Arc<PosTable>> {
        self.get(KbId::TabPos)?.as_pos()
    }

    /// User lexica in lookup order.
    pub fn user_lexica(&self) -> Vec<Arc<Lexicon>> {
        [KbId::LexUser1, KbId::LexUser2]
            .iter()
            .filter_map(|&id| self.lexicon(id))
            .collect()
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("name", &self.name)
            .field("resources", &self.resource_names)
            .field("bound_kbs", &self.kb.iter().filter(|k| k.is_some()).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_as_json() {
        let m = VoiceManifest {
            name: "en-demo".into(),
            resources: vec!["ta.bin".into(), "sg.bin".into()],
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: VoiceManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "en-demo");
        assert_eq!(back.resources, vec!["ta.bin", "sg.bin"]);
    }

    #[test]
    fn manifest_rejects_missing_fields() {
        let err = serde_json::from_str::<VoiceManifest>(r#"{"name":"x"}"#);
        assert!(err.is_err());
    }
}
