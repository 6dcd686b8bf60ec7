//! # Configuration
//! Environment variables with parsed fallbacks, plus the file-based global
//! stop-word list (the only persisted setting in scope) and an optional seed
//! file describing sources, groups, channels, and mappings. Word-list and
//! seed files support TOML or JSON, with an env-var path override.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::model::{Channel, Mapping, Source, SourceGroup};
use crate::store::Store;

const ENV_STOP_WORDS_PATH: &str = "STOP_WORDS_PATH";
const ENV_SEED_PATH: &str = "SEED_PATH";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub stop_words: Vec<String>,
    pub seed_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let stop_words = load_stop_words_default()?;
        let seed_path = seed_path_default();
        Ok(Self {
            bind_addr,
            stop_words,
            seed_path,
        })
    }
}

/// Load the global stop-word list from an explicit path. TOML or JSON.
pub fn load_stop_words_from(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading stop words from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_word_list(&content, ext.as_str())
}

/// Load stop words using env var + fallbacks:
/// 1) $STOP_WORDS_PATH
/// 2) config/stop_words.toml
/// 3) config/stop_words.json
pub fn load_stop_words_default() -> Result<Vec<String>> {
    if let Ok(p) = std::env::var(ENV_STOP_WORDS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_stop_words_from(&pb);
        }
        return Err(anyhow!("STOP_WORDS_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/stop_words.toml");
    if toml_p.exists() {
        return load_stop_words_from(&toml_p);
    }
    let json_p = PathBuf::from("config/stop_words.json");
    if json_p.exists() {
        return load_stop_words_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_word_list(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("words");
    if try_toml {
        if let Ok(v) = parse_toml_words(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json_words(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml_words(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported stop-word list format"))
}

fn parse_toml_words(s: &str) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    struct TomlWords {
        words: Vec<String>,
    }
    let v: TomlWords = toml::from_str(s)?;
    Ok(clean_list(v.words))
}

fn parse_json_words(s: &str) -> Result<Vec<String>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim().to_lowercase();
        if !t.is_empty() {
            set.insert(t);
        }
    }
    set.into_iter().collect()
}

fn seed_path_default() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(ENV_SEED_PATH) {
        return Some(PathBuf::from(p));
    }
    let p = PathBuf::from("config/seed.json");
    p.exists().then_some(p)
}

/// Bootstrap data for a store that starts empty: the admin surface that
/// would normally create these records is an external collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub groups: Vec<SourceGroup>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

pub fn load_seed(path: &Path) -> Result<SeedData> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading seed from {}", path.display()))?;
    let seed: SeedData = serde_json::from_str(&content)
        .with_context(|| format!("parsing seed {}", path.display()))?;
    Ok(seed)
}

/// Validate and persist seed records. Invalid records are rejected before
/// they reach the store.
pub async fn apply_seed(store: &Arc<dyn Store>, seed: SeedData) -> Result<()> {
    for source in seed.sources {
        source
            .validate()
            .map_err(|e| anyhow!("seed source {}: {e}", source.id))?;
        store.put_source(source).await?;
    }
    for group in seed.groups {
        store.put_group(group).await?;
    }
    for channel in seed.channels {
        store.put_channel(channel).await?;
    }
    for mapping in seed.mappings {
        store
            .put_mapping(mapping)
            .await
            .map_err(|e| anyhow!("seed mapping rejected: {e}"))?;
    }
    Ok(())
}
