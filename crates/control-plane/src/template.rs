use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

/// `<{message}>` expands to the user message; any other `<{...}>` is a
/// file inclusion.
const MESSAGE_DIRECTIVE: &str = "message";

static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\{([^}]+)\}>").expect("directive pattern"));

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template registered for prefix {0}")]
    UnknownPrefix(String),
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

struct TemplateEntry {
    path: PathBuf,
    processed_hash: String,
    needs_warmup: bool,
}

/// Watches registered templates for content changes.
///
/// Change detection hashes the template expanded with an empty message,
/// so edits to included files are caught even when the template file's
/// mtime never moves.
#[derive(Default)]
pub struct TemplateWatcher {
    templates: RwLock<BTreeMap<String, TemplateEntry>>,
}

impl TemplateWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers a template for `prefix`. The file must be readable now;
    /// the entry starts out needing warmup.
    pub fn add(&self, prefix: &str, path: impl Into<PathBuf>) -> Result<(), TemplateError> {
        let path = path.into();
        let processed = process_file(&path, "")?;
        let entry = TemplateEntry {
            path: path.clone(),
            processed_hash: hash_text(&processed),
            needs_warmup: true,
        };
        self.templates.write().insert(prefix.to_string(), entry);
        debug!(prefix = %prefix, path = %path.display(), "template registered");
        Ok(())
    }

    /// Registered prefixes, in lexicographic order.
    pub fn prefixes(&self) -> Vec<String> {
        self.templates.read().keys().cloned().collect()
    }

    /// Re-expands every template and returns the prefixes that need
    /// warmup, in lexicographic order. A template whose files are
    /// transiently unreadable keeps its previous hash and is re-checked
    /// on the next call.
    pub fn check_for_changes(&self) -> Vec<String> {
        let mut templates = self.templates.write();
        let mut changed = Vec::new();
        for (prefix, entry) in templates.iter_mut() {
            if entry.needs_warmup {
                changed.push(prefix.clone());
                continue;
            }
            let processed = match process_file(&entry.path, "") {
                Ok(processed) => processed,
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "template check failed");
                    continue;
                }
            };
            let new_hash = hash_text(&processed);
            if new_hash != entry.processed_hash {
                entry.processed_hash = new_hash;
                entry.needs_warmup = true;
                changed.push(prefix.clone());
                debug!(prefix = %prefix, "template changed");
            }
        }
        changed
    }

    pub fn mark_warmed(&self, prefix: &str) {
        if let Some(entry) = self.templates.write().get_mut(prefix) {
            entry.needs_warmup = false;
        }
    }

    pub fn needs_warmup(&self, prefix: &str) -> bool {
        self.templates
            .read()
            .get(prefix)
            .map(|entry| entry.needs_warmup)
            .unwrap_or(false)
    }

    /// Fully expands the template registered for `prefix` with the given
    /// user message.
    pub fn process(&self, prefix: &str, user_message: &str) -> Result<String, TemplateError> {
        let path = {
            let templates = self.templates.read();
            let entry = templates
                .get(prefix)
                .ok_or_else(|| TemplateError::UnknownPrefix(prefix.to_string()))?;
            entry.path.clone()
        };
        process_file(&path, user_message)
    }
}

fn process_file(path: &Path, user_message: &str) -> Result<String, TemplateError> {
    let template = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(expand(&template, user_message))
}

/// Single-pass expansion of `<{...}>` directives.
///
/// Directives are matched only against the original template text;
/// substituted content (file contents and the user message) is inserted
/// verbatim and never re-scanned. An unreadable inclusion becomes an
/// inline error marker and expansion continues.
pub fn expand(template: &str, user_message: &str) -> String {
    DIRECTIVE
        .replace_all(template, |caps: &Captures<'_>| {
            let directive = caps[1].trim();
            if directive == MESSAGE_DIRECTIVE {
                return user_message.to_string();
            }
            match std::fs::read_to_string(directive) {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %directive, error = %err, "failed to read included file");
                    format!("[Error reading {directive}: {err}]")
                }
            }
        })
        .into_owned()
}

fn hash_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
