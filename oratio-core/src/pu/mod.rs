//! The linguistic pipeline stages.
//!
//! ```text
//! WordAna  — lexicon lookup + POS prediction
//! SentAna  — POS disambiguation, index lookup, grapheme-to-phoneme
//! AccPhr   — phrasing boundaries + accentuation
//! Syllab   — WORDPHON → SYLLPHON splitting
//! Pam      — phonetic-to-acoustic mapping, PHONE item emission
//! ```
//!
//! Every stage implements [`ProcessingUnit`](crate::data::ProcessingUnit)
//! and is stepped cooperatively by the engine scheduler.

pub mod acph;
pub mod pam;
pub mod sentana;
pub mod syllab;
pub mod wordana;

pub use acph::AccPhrUnit;
pub use pam::PamUnit;
pub use sentana::SentAnaUnit;
pub use syllab::SyllabUnit;
pub use wordana::WordAnaUnit;
