//! Resource loading and voice binding.
//!
//! A resource file is a pre-compiled container of knowledge bases:
//!
//! ```text
//! magic "ORKB"
//! header_len:u16
//! header: resource name (null-terminated) + reserved fields
//! kb_count:u8
//! kb_count × name (null-terminated)
//! kb_count × (kb_id:u8, offset:u32le, size:u32le)   offsets from file start
//! kb payloads
//! ```
//!
//! `offset == 0` marks a knowledge base that is declared but empty. Every
//! knowledge base is specialized at load time, so malformed files surface
//! as `FileCorrupt` before any synthesis begins — never mid-stream.

pub mod voice;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{OratioError, Result};
use crate::kb::{KbId, KbRegion, KnowledgeBase};

pub use voice::{Voice, VoiceManifest};

const MAGIC: &[u8; 4] = b"ORKB";

/// A loaded resource: name, image-backed knowledge bases, lock count.
#[derive(Debug)]
pub struct Resource {
    name: String,
    lock_count: u32,
    kbs: Vec<(KbId, KnowledgeBase)>,
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// Parse and specialize a resource image.
    pub fn parse(image: Vec<u8>) -> Result<Resource> {
        let data: Arc<[u8]> = Arc::from(image.into_boxed_slice());
        let mut r = crate::kb::reader::ByteReader::new(&data);

        let magic = r.take(4)?;
        if magic != MAGIC.as_slice() {
            return Err(OratioError::UnexpectedFileType(format!(
                "bad magic {magic:02x?}"
            )));
        }
        let header_len = r.u16_le()? as usize;
        let header_start = r.pos();
        let name = r.c_string()?.to_string();
        if name.is_empty() {
            return Err(OratioError::NameIllegal("empty resource name".into()));
        }
        // reserved header fields are skipped
        let directory = header_start + header_len;
        if directory < r.pos() || directory > data.len() {
            return Err(OratioError::FileCorrupt("resource header length"));
        }
        let mut r = crate::kb::reader::ByteReader::new(&data);
        r.skip(directory)?;

        let kb_count = r.u8()? as usize;
        let mut kb_names = Vec::with_capacity(kb_count);
        for _ in 0..kb_count {
            kb_names.push(r.c_string()?.to_string());
        }
        let mut kbs = Vec::with_capacity(kb_count);
        for i in 0..kb_count {
            let id_byte = r.u8()?;
            let offset = r.u32_le()? as usize;
            let size = r.u32_le()? as usize;
            if offset == 0 {
                debug!(name = %kb_names[i], "kb declared but empty");
                continue;
            }
            let id = KbId::from_u8(id_byte)
                .ok_or(OratioError::FileCorrupt("unknown kb id in directory"))?;
            let region = KbRegion::new(Arc::clone(&data), offset, size)?;
            let kb = KnowledgeBase::specialize(id, region)?;
            debug!(name = %kb_names[i], id = id_byte, size, "kb specialized");
            kbs.push((id, kb));
        }

        Ok(Resource {
            name,
            lock_count: 0,
            kbs,
        })
    }
}

/// Registry of loaded resources and active voices.
///
/// Voices returned by [`create_voice`](ResourceManager::create_voice) hold
/// locks on their resources; call
/// [`release_voice`](ResourceManager::release_voice) before unloading.
#[derive(Debug, Default)]
pub struct ResourceManager {
    resources: Vec<Resource>,
}

impl ResourceManager {
    pub fn new() -> ResourceManager {
        ResourceManager::default()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.name == name)
    }

    /// Register an already-parsed resource. A name collision with a loaded
    /// resource is a double load: logged, existing resource kept.
    pub fn add_resource(&mut self, resource: Resource) -> String {
        if self.find(&resource.name).is_some() {
            warn!(name = %resource.name, "resource double load, keeping loaded copy");
            return resource.name;
        }
        info!(name = %resource.name, kbs = resource.kbs.len(), "resource loaded");
        let name = resource.name.clone();
        self.resources.push(resource);
        name
    }

    /// Load a resource file into memory and register it.
    pub fn load_resource(&mut self, path: &Path) -> Result<String> {
        let image = std::fs::read(path)?;
        let resource = Resource::parse(image)?;
        Ok(self.add_resource(resource))
    }

    /// Unload a resource; fails while any voice still references it.
    pub fn unload_resource(&mut self, name: &str) -> Result<()> {
        let idx = self
            .find(name)
            .ok_or_else(|| OratioError::ResourceMissing(name.to_string()))?;
        let locks = self.resources[idx].lock_count;
        if locks > 0 {
            return Err(OratioError::ResourceBusy {
                name: name.to_string(),
                locks,
            });
        }
        self.resources.remove(idx);
        info!(name, "resource unloaded");
        Ok(())
    }

    /// Bind a voice to the named resources, incrementing their lock counts.
    ///
    /// A kb id provided by two resources is overwritten last-bound-wins with
    /// a warning.
    pub fn create_voice(&mut self, voice_name: &str, resource_names: &[String]) -> Result<Voice> {
        // validate first so a missing resource leaves no locks behind
        let mut indices = Vec::with_capacity(resource_names.len());
        for rn in resource_names {
            match self.find(rn) {
                Some(idx) => indices.push(idx),
                None => return Err(OratioError::ResourceMissing(rn.clone())),
            }
        }
        let mut voice = Voice::new(voice_name);
        for (rn, &idx) in resource_names.iter().zip(&indices) {
            self.resources[idx].lock_count += 1;
            for (id, kb) in &self.resources[idx].kbs {
                if voice.bind(*id, kb.clone()) {
                    warn!(resource = %rn, id = *id as u8, "kb overwrite, last bound wins");
                }
            }
            voice.note_resource(rn.clone());
        }
        info!(voice = voice_name, resources = resource_names.len(), "voice created");
        Ok(voice)
    }

    /// Release a voice, decrementing the lock counts it holds.
    pub fn release_voice(&mut self, voice: Voice) {
        for rn in voice.resource_names() {
            if let Some(idx) = self.find(rn) {
                let r = &mut self.resources[idx];
                r.lock_count = r.lock_count.saturating_sub(1);
            }
        }
        info!(voice = %voice.name(), "voice released");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a resource image from (id, payload) pairs.
    pub(crate) fn build_resource(name: &str, kbs: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut header = name.as_bytes().to_vec();
        header.push(0);

        let mut image = Vec::new();
        image.extend_from_slice(MAGIC);
        image.extend_from_slice(&(header.len() as u16).to_le_bytes());
        image.extend_from_slice(&header);

        image.push(kbs.len() as u8);
        for (id, _) in kbs {
            image.extend_from_slice(format!("kb-{id}").as_bytes());
            image.push(0);
        }
        let mut dir_pos = image.len();
        image.resize(image.len() + kbs.len() * 9, 0);
        for (id, payload) in kbs {
            let offset = image.len();
            image.extend_from_slice(payload);
            image[dir_pos] = *id;
            image[dir_pos + 1..dir_pos + 5].copy_from_slice(&(offset as u32).to_le_bytes());
            image[dir_pos + 5..dir_pos + 9].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            dir_pos += 9;
        }
        image
    }

    fn phones_resource(name: &str) -> Resource {
        let phones = crate::kb::phones::tests::build_phones(&[30], &[]);
        Resource::parse(build_resource(name, &[(KbId::TabPhones as u8, phones)])).unwrap()
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut image = build_resource("r1", &[]);
        image[0] = b'X';
        assert!(matches!(
            Resource::parse(image),
            Err(OratioError::UnexpectedFileType(_))
        ));
    }

    #[test]
    fn corrupt_kb_fails_at_load_time() {
        // phones table too short: specialization must fail during parse
        let image = build_resource("r1", &[(KbId::TabPhones as u8, vec![0u8; 10])]);
        assert!(matches!(
            Resource::parse(image),
            Err(OratioError::FileCorrupt(_))
        ));
    }

    #[test]
    fn lock_counts_guard_unload() {
        let mut mgr = ResourceManager::new();
        mgr.add_resource(phones_resource("r1"));
        let voice = mgr
            .create_voice("v", &["r1".to_string()])
            .expect("voice binds");
        assert!(matches!(
            mgr.unload_resource("r1"),
            Err(OratioError::ResourceBusy { .. })
        ));
        mgr.release_voice(voice);
        mgr.unload_resource("r1").expect("unlocked now");
    }

    #[test]
    fn double_load_keeps_first_copy() {
        let mut mgr = ResourceManager::new();
        mgr.add_resource(phones_resource("r1"));
        mgr.add_resource(phones_resource("r1"));
        assert_eq!(mgr.resources.len(), 1);
    }

    #[test]
    fn missing_resource_fails_voice_creation() {
        let mut mgr = ResourceManager::new();
        assert!(matches!(
            mgr.create_voice("v", &["nope".to_string()]),
            Err(OratioError::ResourceMissing(_))
        ));
    }
}
