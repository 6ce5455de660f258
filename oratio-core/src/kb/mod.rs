//! Knowledge bases: fixed-layout binary decoders.
//!
//! A knowledge base is an opaque read-only byte region inside a loaded
//! resource image, tagged with a [`KbId`] and *specialized* into a typed view
//! by a decoder that records offsets into the region — the bytes are shared
//! (`Arc`), never copied. Decoders validate length arithmetic only; garbage
//! data behind well-formed lengths is accepted silently.

pub mod lexicon;
pub mod pdf;
pub mod phones;
pub mod pos;
pub mod prenet;
pub mod reader;
pub mod tree;

use std::sync::Arc;

use crate::error::{OratioError, Result};

pub use lexicon::Lexicon;
pub use pdf::{PdfDur, PdfMul, PdfPhs};
pub use phones::PhoneTable;
pub use pos::PosTable;
pub use prenet::PrepNet;
pub use tree::{Tree, TreeKind};

/// Number of kb slots in a voice (one per knowledge type).
pub const KB_ARRAY_SIZE: usize = 128;

/// Knowledge-base ids as they appear in resource file directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KbId {
    Null = 0,
    PrenetMain = 1,
    TabPhones = 3,
    TabPos = 4,
    LexMain = 9,
    TreePosPredict = 10,
    TreePosDisamb = 11,
    TreeG2p = 12,
    TreePhrasing = 18,
    TreeAccent = 19,
    TreeDur = 34,
    TreeLfz1 = 35,
    TreeLfz2 = 36,
    TreeLfz3 = 37,
    TreeLfz4 = 38,
    TreeLfz5 = 39,
    TreeMgc1 = 40,
    TreeMgc2 = 41,
    TreeMgc3 = 42,
    TreeMgc4 = 43,
    TreeMgc5 = 44,
    PdfDur = 45,
    PdfLfz = 46,
    PdfMgc = 47,
    PdfPhs = 48,
    PrenetUser1 = 49,
    PrenetUser2 = 50,
    LexUser1 = 57,
    LexUser2 = 58,
}

impl KbId {
    pub fn from_u8(b: u8) -> Option<KbId> {
        use KbId::*;
        Some(match b {
            0 => Null,
            1 => PrenetMain,
            3 => TabPhones,
            4 => TabPos,
            9 => LexMain,
            10 => TreePosPredict,
            11 => TreePosDisamb,
            12 => TreeG2p,
            18 => TreePhrasing,
            19 => TreeAccent,
            34 => TreeDur,
            35 => TreeLfz1,
            36 => TreeLfz2,
            37 => TreeLfz3,
            38 => TreeLfz4,
            39 => TreeLfz5,
            40 => TreeMgc1,
            41 => TreeMgc2,
            42 => TreeMgc3,
            43 => TreeMgc4,
            44 => TreeMgc5,
            45 => PdfDur,
            46 => PdfLfz,
            47 => PdfMgc,
            48 => PdfPhs,
            49 => PrenetUser1,
            50 => PrenetUser2,
            57 => LexUser1,
            58 => LexUser2,
            _ => return None,
        })
    }

    /// The pitch tree id for phone state `n` (0..5).
    pub fn lfz_tree(n: usize) -> KbId {
        [
            KbId::TreeLfz1,
            KbId::TreeLfz2,
            KbId::TreeLfz3,
            KbId::TreeLfz4,
            KbId::TreeLfz5,
        ][n]
    }

    /// The spectral tree id for phone state `n` (0..5).
    pub fn mgc_tree(n: usize) -> KbId {
        [
            KbId::TreeMgc1,
            KbId::TreeMgc2,
            KbId::TreeMgc3,
            KbId::TreeMgc4,
            KbId::TreeMgc5,
        ][n]
    }
}

/// A read-only byte window into a loaded resource image.
#[derive(Debug, Clone)]
pub struct KbRegion {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl KbRegion {
    pub fn new(data: Arc<[u8]>, start: usize, len: usize) -> Result<KbRegion> {
        if start + len > data.len() {
            return Err(OratioError::FileCorrupt("kb region outside resource image"));
        }
        Ok(KbRegion { data, start, len })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A specialized knowledge base, as stored in a voice's kb array.
///
/// Cloning is cheap — the typed views are `Arc`-shared so stages can hold
/// onto the knowledge they acquired at initialization.
#[derive(Debug, Clone)]
pub enum KnowledgeBase {
    Lexicon(Arc<Lexicon>),
    Tree(Arc<Tree>),
    PdfDur(Arc<PdfDur>),
    PdfMul(Arc<PdfMul>),
    PdfPhs(Arc<PdfPhs>),
    Phones(Arc<PhoneTable>),
    Pos(Arc<PosTable>),
    Prenet(Arc<PrepNet>),
}

impl KnowledgeBase {
    /// Specialize `region` according to the directory id.
    ///
    /// Fails with `FileCorrupt` when declared lengths do not reconcile — at
    /// load time, never mid-stream.
    pub fn specialize(id: KbId, region: KbRegion) -> Result<KnowledgeBase> {
        use KbId::*;
        Ok(match id {
            LexMain | LexUser1 | LexUser2 => {
                KnowledgeBase::Lexicon(Arc::new(Lexicon::specialize(region)?))
            }
            TabPhones => KnowledgeBase::Phones(Arc::new(PhoneTable::specialize(region)?)),
            TabPos => KnowledgeBase::Pos(Arc::new(PosTable::specialize(region)?)),
            TreePosPredict => {
                KnowledgeBase::Tree(Arc::new(Tree::specialize(region, TreeKind::PosPredict)?))
            }
            TreePosDisamb => {
                KnowledgeBase::Tree(Arc::new(Tree::specialize(region, TreeKind::PosDisamb)?))
            }
            TreeG2p => KnowledgeBase::Tree(Arc::new(Tree::specialize(region, TreeKind::G2p)?)),
            TreePhrasing => {
                KnowledgeBase::Tree(Arc::new(Tree::specialize(region, TreeKind::Phrasing)?))
            }
            TreeAccent => {
                KnowledgeBase::Tree(Arc::new(Tree::specialize(region, TreeKind::Accent)?))
            }
            TreeDur | TreeLfz1 | TreeLfz2 | TreeLfz3 | TreeLfz4 | TreeLfz5 | TreeMgc1
            | TreeMgc2 | TreeMgc3 | TreeMgc4 | TreeMgc5 => {
                KnowledgeBase::Tree(Arc::new(Tree::specialize(region, TreeKind::Pam)?))
            }
            PdfDur => KnowledgeBase::PdfDur(Arc::new(pdf::PdfDur::specialize(region)?)),
            PdfLfz | PdfMgc => KnowledgeBase::PdfMul(Arc::new(pdf::PdfMul::specialize(region)?)),
            PdfPhs => KnowledgeBase::PdfPhs(Arc::new(pdf::PdfPhs::specialize(region)?)),
            PrenetMain | PrenetUser1 | PrenetUser2 => {
                KnowledgeBase::Prenet(Arc::new(PrepNet::specialize(region)?))
            }
            Null => return Err(OratioError::FileCorrupt("null kb id in directory")),
        })
    }

    pub fn as_lexicon(&self) -> Option<Arc<Lexicon>> {
        match self {
            KnowledgeBase::Lexicon(l) => Some(Arc::clone(l)),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<Arc<Tree>> {
        match self {
            KnowledgeBase::Tree(t) => Some(Arc::clone(t)),
            _ => None,
        }
    }

    pub fn as_pdf_dur(&self) -> Option<Arc<PdfDur>> {
        match self {
            KnowledgeBase::PdfDur(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_pdf_mul(&self) -> Option<Arc<PdfMul>> {
        match self {
            KnowledgeBase::PdfMul(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_phones(&self) -> Option<Arc<PhoneTable>> {
        match self {
            KnowledgeBase::Phones(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    pub fn as_pos(&self) -> Option<Arc<PosTable>> {
        match self {
            KnowledgeBase::Pos(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }
}
