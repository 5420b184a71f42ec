use std::cell::Cell;
use std::collections::VecDeque;

use anyhow::{Result, bail};

use crate::generation::{GenerationProvider, SamplingConfig};
use crate::semantic::{EmbeddingProvider, LocalHashEmbedder};

pub const TEST_EMBEDDING_DIM: usize = 384;

/// Local hash embedder that counts `embed` calls.
pub struct CountingEmbedder {
    inner: LocalHashEmbedder,
    calls: Cell<usize>,
    fail_at: Option<usize>,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: LocalHashEmbedder::new(TEST_EMBEDDING_DIM),
            calls: Cell::new(0),
            fail_at: None,
        }
    }

    /// Errors on the `n`th `embed` call (1-based) and every call after it.
    pub fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl EmbeddingProvider for CountingEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if self.fail_at.is_some_and(|n| call >= n) {
            bail!("embedding backend unavailable (call {call})");
        }
        self.inner.embed(text)
    }
}

/// Returns queued replies in order and records every prompt it was given.
pub struct ScriptedGenerator {
    replies: VecDeque<String>,
    pub prompts: Vec<String>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        }
    }
}

impl GenerationProvider for ScriptedGenerator {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn generate(&mut self, prompt: &str, _sampling: &SamplingConfig) -> Result<String> {
        self.prompts.push(prompt.to_string());
        match self.replies.pop_front() {
            Some(reply) => Ok(reply),
            None => bail!("scripted generator has no reply left"),
        }
    }
}

pub const SAMPLE_SCHEMA: &str = "\
CREATE TABLE users (
    user_id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    full_name TEXT
);

CREATE INDEX idx_users_username ON users(username);
CREATE INDEX idx_users_email ON users(email);

CREATE TABLE categories (
    category_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    parent_id INTEGER REFERENCES categories(category_id)
);

CREATE TABLE product_suppliers (
    product_id INTEGER NOT NULL,
    supplier_id INTEGER NOT NULL,
    supply_price REAL,
    PRIMARY KEY (product_id, supplier_id)
);
";
