//! Cache of decoded reference images loaded from a directory.

use super::types::Template;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Extensions accepted as templates (compared case-insensitively).
pub const TEMPLATE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template directory {path:?} could not be read: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

type TemplateSet = HashMap<String, Arc<Template>>;

/// Holds the current template set. Reloads build a fresh set and swap it in
/// under the lock, so a lookup never sees a half-populated cache.
#[derive(Default)]
pub struct TemplateStore {
    current: Mutex<Arc<TemplateSet>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arc<TemplateSet>> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent set.
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn replace(&self, set: TemplateSet) {
        *self.lock() = Arc::new(set);
    }

    pub fn is_template_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                TEMPLATE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
    }

    /// Discard the current set and load every image file in `directory`.
    /// Files that fail to decode are logged and skipped. Returns the number
    /// of templates loaded.
    pub fn load(&self, directory: &Path) -> Result<usize, TemplateError> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(source) => {
                self.replace(TemplateSet::new());
                return Err(TemplateError::DirectoryUnreadable {
                    path: directory.to_path_buf(),
                    source,
                });
            }
        };

        let mut set = TemplateSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !Self::is_template_file(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                log::warn!("⚠️ Skipping template with non UTF-8 name: {}", path.display());
                continue;
            };
            match image::open(&path) {
                Ok(img) => {
                    let template = Template::new(name, img.to_rgb8());
                    log::debug!(
                        "Loaded template {} ({}x{})",
                        name,
                        template.width(),
                        template.height()
                    );
                    set.insert(name.to_string(), Arc::new(template));
                }
                Err(e) => {
                    log::warn!("⚠️ Failed to load template {}: {}", name, e);
                }
            }
        }

        let count = set.len();
        self.replace(set);
        log::info!("Loaded {} templates from {}", count, directory.display());
        Ok(count)
    }

    /// Replace the set with already-decoded templates.
    pub fn insert_all(&self, templates: impl IntoIterator<Item = Template>) {
        let set = templates
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();
        self.replace(set);
    }

    /// Exact, case-sensitive lookup by file name.
    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        self.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Merge a saved priority order with the templates currently available:
    /// saved names that still exist keep their order, new names follow sorted.
    pub fn prioritize(saved_order: &[String], available: &[String]) -> Vec<String> {
        let mut remaining: BTreeSet<&str> = available.iter().map(String::as_str).collect();
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in saved_order {
            if remaining.remove(name.as_str()) {
                ordered.push(name.clone());
            }
        }
        ordered.extend(remaining.into_iter().map(str::to_string));
        ordered
    }
}
