use std::sync::Arc;

use tracing::{info, warn};

use super::catalog::{self, CompiledSignature};

/// Immutable, explicitly constructed signature registry.
///
/// Built once by the composition root via [`SignatureRegistry::load`] and
/// shared read-only from then on; concurrent analyzer invocations never see
/// a writer. Registration order is significant: matching is
/// first-match-wins.
pub struct SignatureRegistry {
    signatures: Vec<CompiledSignature>,
}

impl SignatureRegistry {
    /// Load the registry from a JSON catalog file.
    ///
    /// Never fails: an absent, unreadable, or corrupt catalog falls back to
    /// the built-in set with a diagnostic, as callers must still get a
    /// working (if less specific) matcher. Loading twice builds two equal
    /// registries; there is no hidden global to duplicate into.
    pub async fn load(catalog_path: &str) -> Arc<Self> {
        if catalog_path.is_empty() {
            return Self::builtin();
        }

        let content = match tokio::fs::read_to_string(catalog_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %catalog_path, error = %e, "Signature catalog unreadable, using built-in set");
                return Self::builtin();
            }
        };

        match catalog::parse_catalog(&content) {
            Ok(signatures) if !signatures.is_empty() => {
                info!(path = %catalog_path, count = signatures.len(), "Signature catalog loaded");
                Arc::new(Self { signatures })
            }
            Ok(_) => {
                warn!(path = %catalog_path, "Signature catalog is empty, using built-in set");
                Self::builtin()
            }
            Err(e) => {
                warn!(path = %catalog_path, error = %e, "Signature catalog corrupt, using built-in set");
                Self::builtin()
            }
        }
    }

    /// The built-in fallback set.
    pub fn builtin() -> Arc<Self> {
        Arc::new(Self {
            signatures: catalog::builtin_signatures(),
        })
    }

    /// Build a registry from already-compiled signatures, preserving order.
    pub fn from_signatures(signatures: Vec<CompiledSignature>) -> Arc<Self> {
        Arc::new(Self { signatures })
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CompiledSignature> {
        self.signatures.get(index)
    }

    /// Signatures in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledSignature> {
        self.signatures.iter()
    }
}
