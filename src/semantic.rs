use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::cli::EmbeddingBackend;

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbeddingModel;

pub const DEFAULT_LOCAL_MODEL_ID: &str = "schema-local-hash-v2";
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub const DEFAULT_ONNX_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L12-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub const DEFAULT_MODEL_CACHE_DIR: &str = "sentence_transformers_cache";

/// `text -> vector` capability used by the schema index and the retriever.
///
/// Vectors from different `model_id`s live in different spaces and must never
/// be compared; the persisted index is keyed by this identity.
pub trait EmbeddingProvider {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}

/// `model_name` and `cache_dir` only apply to the onnx backend; unset values
/// resolve to the MiniLM repository and `<tmp>/sentence_transformers_cache`.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model_name: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
impl EmbeddingSettings {
    pub fn resolved_model_name(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| DEFAULT_ONNX_MODEL_NAME.to_string())
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_MODEL_CACHE_DIR))
    }
}

/// Loads the configured embedding backend once. The returned session is owned
/// by the caller and reused for every index build and query.
pub fn initialize_embeddings(settings: &EmbeddingSettings) -> Result<Box<dyn EmbeddingProvider>> {
    match settings.backend {
        EmbeddingBackend::LocalHash => {
            let model = LocalHashEmbedder::new(DEFAULT_EMBEDDING_DIM);
            info!(
                model_id = %model.model_id(),
                dimensions = model.dimensions(),
                "embedding session ready"
            );
            Ok(Box::new(model))
        }
        EmbeddingBackend::Onnx => initialize_onnx(settings),
    }
}

#[cfg(feature = "onnx")]
fn initialize_onnx(settings: &EmbeddingSettings) -> Result<Box<dyn EmbeddingProvider>> {
    let model = OnnxEmbeddingModel::from_hub(
        &settings.resolved_model_name(),
        &settings.resolved_cache_dir(),
    )?;
    info!(
        model_id = %model.model_id(),
        dimensions = model.dimensions(),
        "embedding session ready"
    );
    Ok(Box::new(model))
}

#[cfg(not(feature = "onnx"))]
fn initialize_onnx(_settings: &EmbeddingSettings) -> Result<Box<dyn EmbeddingProvider>> {
    anyhow::bail!("onnx embedding backend requires building with `--features onnx`")
}

/// Deterministic hashed bag-of-words + bigram embedding. Needs no model
/// weights, which makes it the default for small schemas and for tests.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    model_id: String,
    dimensions: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model_id: DEFAULT_LOCAL_MODEL_ID.to_string(),
            dimensions: dimensions.max(8),
        }
    }
}

impl EmbeddingProvider for LocalHashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed_text_local(text, self.dimensions))
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Hashed feature presence: every word and adjacent-word pair sets its bucket
/// once, so repeated tokens cannot outweigh distinct matches. Buckets only
/// accumulate positive weight, which keeps shared features from cancelling.
pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in &tokens {
        let hash = stable_hash(token);
        let index = (hash as usize) % dims;
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>();
    let left_norm = squared_norm(left).sqrt();
    let right_norm = squared_norm(right).sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm * right_norm)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f32>::with_capacity(expected_dim);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    if out.len() == expected_dim {
        Some(out)
    } else {
        None
    }
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

// Question filler and DDL boilerplate; present in nearly every question or
// chunk, so they only add noise to the ranking.
const NOISE_WORDS: [&str; 61] = [
    "a", "all", "an", "and", "any", "are", "be", "by", "do", "does", "each", "find", "for", "from",
    "get", "give", "has", "have", "how", "in", "is", "it", "list", "many", "me", "of", "on", "or",
    "show", "that", "the", "their", "there", "this", "to", "was", "were", "what", "which", "who",
    "with", "boolean", "check", "create", "current", "decimal", "default", "exists", "if",
    "integer", "key", "not", "null", "primary", "references", "serial", "table", "text",
    "timestamp", "unique", "varchar",
];

// Underscores are dropped, so `user_id` and `userid` yield the same token.
// Plurals fold to their singular so `users` matches `user`.
fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(|character: char| {
            character.is_whitespace() || matches!(character, '(' | ')' | ',' | '.' | ';')
        })
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty() && !is_noise_word(value))
        .map(|value| fold_plural(&value))
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::<String>::with_capacity(words.len() * 2);
    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        let mut candidates = vec![format!("w:{word}")];
        if let Some(next) = words.get(index + 1) {
            candidates.push(format!("b:{word}_{next}"));
        }
        for feature in candidates {
            if seen.insert(feature.clone()) {
                features.push(feature);
            }
        }
    }
    features
}

fn is_noise_word(word: &str) -> bool {
    NOISE_WORDS.contains(&word)
}

fn fold_plural(word: &str) -> String {
    if word.len() > 3 {
        if let Some(stem) = word.strip_suffix("ies") {
            return format!("{stem}y");
        }
        if word.ends_with('s') && !word.ends_with("ss") {
            return word[..word.len() - 1].to_string();
        }
    }
    word.to_string()
}

fn squared_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
}

pub(crate) fn normalize_vector(values: &mut [f32]) {
    let squared_norm = squared_norm(values);

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_embedding_is_deterministic_and_normalized() {
        let embedder = LocalHashEmbedder::new(DEFAULT_EMBEDDING_DIM);
        let first = embedder.embed("CREATE TABLE users (user_id SERIAL)").unwrap();
        let second = embedder.embed("CREATE TABLE users (user_id SERIAL)").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), DEFAULT_EMBEDDING_DIM);
        let magnitude = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_payload_embeds_to_zero_vector() {
        let vector = embed_text_local("  ,;  ", 16);
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn tokenizer_folds_identifier_underscores() {
        let tokens = tokenize_payload("users(user_id, email)");
        assert!(tokens.contains(&"w:user".to_string()));
        assert!(tokens.contains(&"w:userid".to_string()));
        assert!(tokens.contains(&"b:userid_email".to_string()));
    }

    #[test]
    fn filler_words_are_dropped_and_repeats_count_once() {
        let tokens = tokenize_payload("what is the email and username of the userid 938?");
        assert_eq!(
            tokens,
            vec![
                "w:email",
                "b:email_username",
                "w:username",
                "b:username_userid",
                "w:userid",
                "b:userid_938",
                "w:938",
            ]
        );

        let tokens = tokenize_payload("orders orders orders");
        assert_eq!(tokens, vec!["w:order", "b:order_order"]);
    }

    #[test]
    fn plural_folding_keeps_short_and_double_s_words() {
        assert_eq!(fold_plural("categories"), "category");
        assert_eq!(fold_plural("reviews"), "review");
        assert_eq!(fold_plural("address"), "address");
        assert_eq!(fold_plural("ids"), "ids");
    }

    #[test]
    fn local_embedding_has_no_negative_components() {
        let vector = embed_text_local("CREATE TABLE orders (order_id INTEGER, status TEXT)", 64);
        assert!(vector.iter().all(|value| *value >= 0.0));
    }

    #[test]
    fn related_text_scores_higher_than_unrelated_text() {
        let question = embed_text_local("email and username of the userid 938", 384);
        let users = embed_text_local(
            "CREATE TABLE users (user_id SERIAL PRIMARY KEY, username VARCHAR(50), email VARCHAR(100));",
            384,
        );
        let suppliers = embed_text_local(
            "CREATE TABLE product_suppliers (product_id INTEGER, supply_price DECIMAL(10,2));",
            384,
        );

        assert!(cosine_similarity(&question, &users) > cosine_similarity(&question, &suppliers));
    }

    #[test]
    fn unset_onnx_settings_resolve_to_defaults() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::Onnx,
            model_name: None,
            cache_dir: None,
        };
        assert_eq!(settings.resolved_model_name(), DEFAULT_ONNX_MODEL_NAME);
        assert_eq!(
            settings.resolved_cache_dir(),
            std::env::temp_dir().join("sentence_transformers_cache")
        );

        let settings = EmbeddingSettings {
            model_name: Some("sentence-transformers/all-MiniLM-L6-v2".to_string()),
            cache_dir: Some(PathBuf::from("models")),
            ..settings
        };
        assert_eq!(
            settings.resolved_model_name(),
            "sentence-transformers/all-MiniLM-L6-v2"
        );
        assert_eq!(settings.resolved_cache_dir(), PathBuf::from("models"));
    }

    #[test]
    fn cosine_similarity_rejects_mismatched_dimensions() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn embedding_blob_decodes_only_expected_dimension() {
        let blob = encode_embedding_blob(&[0.25, -1.5, 3.0]);
        assert_eq!(decode_embedding_blob(&blob, 3), Some(vec![0.25, -1.5, 3.0]));
        assert_eq!(decode_embedding_blob(&blob, 4), None);
        assert_eq!(decode_embedding_blob(&blob, 0), None);
    }
}
