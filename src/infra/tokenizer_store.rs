// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Word-level vocabulary persisted as a HuggingFace tokenizer
// JSON inside the archive folder.
//
// Documents arrive pre-tokenised (`words`), so the tokenizer is
// only used as a word → id table: ids 0 and 1 are reserved for
// [PAD] and [UNK], corpus words follow in frequency order.
//
// In tokenizers 0.15, train_from_files requires Trainer::Model
// to equal ModelWrapper, so the WordLevel JSON is written
// directly and loaded back with Tokenizer::from_file.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::domain::traits::WordIndexer;

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
const RESERVED: usize = 2;

/// A loaded word-level tokenizer.
pub struct Vocabulary {
    tokenizer: Tokenizer,
}

impl Vocabulary {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    /// Number of ids, special tokens included.
    pub fn size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

impl WordIndexer for Vocabulary {
    fn word_id(&self, word: &str) -> u32 {
        self.tokenizer.token_to_id(&word.to_lowercase()).unwrap_or(UNK_ID)
    }
}

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load a previously saved tokenizer from the archive folder.
    pub fn load(&self) -> Result<Vocabulary> {
        load_tokenizer(&self.path()).map(Vocabulary::new)
    }

    /// Count `words`, keep the `vocab_size - 2` most frequent and write the
    /// tokenizer JSON. Ties are broken alphabetically so rebuilding from
    /// the same corpus gives the same ids.
    pub fn build_and_save<'a>(&self, words: impl Iterator<Item = &'a str>, vocab_size: usize) -> Result<Vocabulary> {
        fs::create_dir_all(&self.dir).with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let mut freq: HashMap<String, usize> = HashMap::new();
        for word in words {
            let w = word.trim().to_lowercase();
            if !w.is_empty() {
                *freq.entry(w).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(vocab_size.saturating_sub(RESERVED));

        let mut vocab = serde_json::json!({ "[PAD]": PAD_ID, "[UNK]": UNK_ID });
        for (id, (word, _)) in ranked.iter().enumerate() {
            vocab[word.as_str()] = serde_json::json!(id + RESERVED);
        }

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": PAD_ID, "content": "[PAD]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": UNK_ID, "content": "[UNK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let path = self.path();
        fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write tokenizer JSON to '{}'", path.display()))?;
        tracing::info!("Tokenizer built with {} words, saved to '{}'", ranked.len() + RESERVED, path.display());

        self.load()
    }
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
}
