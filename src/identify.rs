//! Recognizer registry mapping sniffed signatures to resource tags.
//!
//! Components register two kinds of recognizer against a tag:
//! - exact MIME type matches (`register_mime`)
//! - predicates over the magic description (`register_description`)
//!
//! [`IdentifierRegistry::identify`] sniffs a resource and adds every tag whose
//! recognizer matches. Registration is explicit; nothing is registered until a
//! component's `register_identifiers` function runs.

use std::sync::{OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::magic::{self, Signature};
use crate::resource::{Resource, ResourceTag};

type DescriptionPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Default)]
struct Recognizers {
    mime: Vec<(String, ResourceTag)>,
    description: Vec<(DescriptionPredicate, ResourceTag)>,
}

#[derive(Default)]
pub struct IdentifierRegistry {
    recognizers: RwLock<Recognizers>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag resources whose MIME type equals `mime`.
    pub fn register_mime(&self, tag: ResourceTag, mime: impl Into<String>) {
        let mime = mime.into();
        debug!("Registered MIME {} -> {}", mime, tag);
        self.recognizers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mime
            .push((mime, tag));
    }

    /// Tag resources whose description satisfies `predicate`.
    pub fn register_description<F>(&self, tag: ResourceTag, predicate: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        debug!("Registered description recognizer -> {}", tag);
        self.recognizers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .description
            .push((Box::new(predicate), tag));
    }

    /// Tags matching `signature`, without duplicates, in registration order.
    pub fn matches(&self, signature: &Signature) -> Vec<ResourceTag> {
        let recognizers = self.recognizers.read().unwrap_or_else(PoisonError::into_inner);

        let by_mime = recognizers
            .mime
            .iter()
            .filter(|(mime, _)| mime == signature.mime)
            .map(|(_, tag)| *tag);
        let by_description = recognizers
            .description
            .iter()
            .filter(|(predicate, _)| predicate(signature.description.as_str()))
            .map(|(_, tag)| *tag);

        let mut tags = Vec::new();
        for tag in by_mime.chain(by_description) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }

    /// Sniff `resource` and tag it with every matching type.
    ///
    /// Returns the signature, or `None` when the bytes are not recognized.
    pub async fn identify(&self, resource: &Resource) -> Option<Signature> {
        let data = resource.get_data().await;
        let signature = magic::sniff(&data)?;

        for tag in self.matches(&signature) {
            resource.add_tag(tag).await;
        }
        Some(signature)
    }
}

/// The process-wide registry.
pub fn global() -> &'static IdentifierRegistry {
    static REGISTRY: OnceLock<IdentifierRegistry> = OnceLock::new();
    REGISTRY.get_or_init(IdentifierRegistry::new)
}
