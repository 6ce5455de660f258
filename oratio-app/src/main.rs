//! Oratio command-line host.
//!
//! ```text
//! oratio <voice.json> [text…]
//! ```
//!
//! Loads the voice manifest, binds the resources, feeds the text through a
//! demo-grade tokenizer (whitespace words, trailing punctuation) and prints
//! one JSON record per output item. Text is read from stdin when no text
//! arguments are given.
//!
//! The tokenizer lives here on purpose: the engine's contract starts at
//! WORDGRAPH/PUNC items, real front ends bring their own text analysis.

mod events;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use oratio_core::data::item::{self, Item, ItemKind};
use oratio_core::{Engine, EngineConfig, ResourceManager, VoiceManifest};
use tracing::{debug, info};

use events::OutputRecord;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Split `text` into WORDGRAPH and PUNC items.
///
/// Sentence-final `.`/`!`/`?` become SENTEND puncs with the matching
/// subtype, `,`/`;`/`:` become PHRASEEND. Hyphen variants are mapped to the
/// plain ascii hyphen the word analysis expects.
fn tokenize(text: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    for token in text.split_whitespace() {
        let token = token.replace(['\u{2010}', '\u{2011}', '\u{2013}', '\u{2014}'], "-");
        let trimmed = token.trim_end_matches(['.', '!', '?', ',', ';', ':']);
        let word = trimmed.to_lowercase();
        if !word.is_empty() {
            items.push(
                Item::new(ItemKind::WordGraph, item::INFO_NA, item::INFO_NA, word.as_bytes())
                    .context("word too long for an item payload")?,
            );
        }
        for p in token[trimmed.len()..].chars() {
            let (info1, info2) = match p {
                '.' => (item::PUNC_SENTEND, item::PUNC_SENT_T),
                '!' => (item::PUNC_SENTEND, item::PUNC_SENT_E),
                '?' => (item::PUNC_SENTEND, item::PUNC_SENT_Q),
                ',' | ';' | ':' => (item::PUNC_PHRASEEND, item::PUNC_PHRASE),
                _ => continue,
            };
            items.push(Item::mark(ItemKind::Punc, info1, info2));
        }
    }
    Ok(items)
}

fn load_engine(manifest_path: &Path) -> Result<Engine> {
    let manifest: VoiceManifest = serde_json::from_str(
        &std::fs::read_to_string(manifest_path)
            .with_context(|| format!("reading voice manifest {}", manifest_path.display()))?,
    )
    .context("parsing voice manifest")?;

    let base = manifest_path.parent().unwrap_or(Path::new("."));
    let mut mgr = ResourceManager::new();
    let mut names = Vec::new();
    for resource in &manifest.resources {
        let path = base.join(resource);
        let name = mgr
            .load_resource(&path)
            .with_context(|| format!("loading resource {}", path.display()))?;
        info!(resource = %name, file = %path.display(), "resource ready");
        names.push(name);
    }
    let voice = mgr.create_voice(&manifest.name, &names)?;
    Ok(Engine::new(voice, EngineConfig::default())?)
}

fn synthesize(engine: &mut Engine, text: &str) -> Result<()> {
    let items = tokenize(text)?;
    debug!(items = items.len(), "tokenized input");
    let stdout = std::io::stdout();

    let mut out = Vec::new();
    for it in &items {
        // the input buffer is small; drain between items
        while engine.put_item(it).is_err() {
            engine.process_to_end(&mut out)?;
        }
        engine.process_to_end(&mut out)?;
    }
    // terminate any unfinished sentence so nothing stays buffered
    engine.flush()?;
    engine.process_to_end(&mut out)?;

    use std::io::Write;
    let mut lock = stdout.lock();
    for it in &out {
        serde_json::to_writer(&mut lock, &OutputRecord::from_item(it))?;
        writeln!(lock)?;
    }

    let stats = engine.stats();
    info!(
        items_in = stats.items_in,
        items_out = stats.items_out,
        warnings = stats.warnings,
        forced_terminations = stats.forced_terminations,
        "synthesis finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(manifest) = args.next() else {
        bail!("usage: oratio <voice.json> [text…]");
    };
    let text_args: Vec<String> = args.collect();
    let text = if text_args.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading text from stdin")?;
        buf
    } else {
        text_args.join(" ")
    };
    if text.trim().is_empty() {
        bail!("no input text");
    }

    let mut engine = load_engine(&PathBuf::from(manifest))?;
    synthesize(&mut engine, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_splits_words_and_trailing_punctuation() {
        let items = tokenize("Hello world. Done!").unwrap();
        let kinds: Vec<ItemKind> = items.iter().map(|it| it.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ItemKind::WordGraph,
                ItemKind::WordGraph,
                ItemKind::Punc,
                ItemKind::WordGraph,
                ItemKind::Punc
            ]
        );
        assert_eq!(items[0].payload(), b"hello");
        assert_eq!(items[2].head.info2, item::PUNC_SENT_T);
        assert_eq!(items[4].head.info2, item::PUNC_SENT_E);
    }

    #[test]
    fn tokenizer_maps_phrase_punctuation_and_hyphens() {
        let items = tokenize("well\u{2013}known, yes?").unwrap();
        assert_eq!(items[0].payload(), b"well-known");
        assert_eq!(items[1].head.info1, item::PUNC_PHRASEEND);
        assert_eq!(items[3].head.info2, item::PUNC_SENT_Q);
    }
}
