//! Content fingerprints for elements and screens.
//!
//! Element hashes digest the element's type, stable identifier, visible text
//! and accessible description. Under [`FingerprintPolicy::AncestorContext`]
//! a bounded ancestor token (nearest ancestor roles plus the element's rank
//! among identical siblings) is mixed in, which separates otherwise identical
//! list rows. The raw sibling position is not hashed, so rows inserted by an
//! in-place expansion leave the hashes of later siblings unchanged.
//!
//! Screen hashes are order-insensitive: the sorted multiset of visible
//! element hashes plus the surface label. Reordering siblings (or a layout
//! pass that shuffles document order) does not produce a new screen.

use crate::element::UIElement;
use crate::tree::UiTree;
use crate::utils::normalize;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! hash_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

hash_newtype!(
    /// Content hash of a single element.
    ElementHash
);
hash_newtype!(
    /// Content hash of a whole screen.
    ScreenHash
);

/// Bytes of the blake3 digest kept in a hash (hex-encoded to twice this).
const DIGEST_BYTES: usize = 16;

/// How much surrounding structure goes into an element hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// Element attributes only. Identical rows collapse into one element.
    ContextFree,
    /// Attributes plus up to `depth` ancestor roles and the rank among
    /// identical siblings.
    AncestorContext { depth: usize },
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        FingerprintPolicy::AncestorContext { depth: 2 }
    }
}

/// Derives element and screen hashes. Pure; holds only its policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateFingerprinter {
    policy: FingerprintPolicy,
}

impl StateFingerprinter {
    pub fn new(policy: FingerprintPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    pub fn element_hash(&self, element: &UIElement) -> ElementHash {
        let attrs = &element.attributes;
        let mut hasher = blake3::Hasher::new();

        write_field(&mut hasher, "type", &attrs.role);
        write_field(
            &mut hasher,
            "id",
            attrs.resource_id.as_deref().unwrap_or_default(),
        );
        write_field(
            &mut hasher,
            "text",
            &normalize(attrs.text.as_deref().unwrap_or_default()),
        );
        write_field(
            &mut hasher,
            "desc",
            &normalize(attrs.description.as_deref().unwrap_or_default()),
        );

        if let FingerprintPolicy::AncestorContext { depth } = self.policy {
            let ancestry = element
                .ancestor_roles
                .iter()
                .take(depth)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(">");
            write_field(&mut hasher, "ctx", &ancestry);
            write_field(&mut hasher, "twin", &element.twin_index.to_string());
        }

        ElementHash(to_hex(hasher.finalize()))
    }

    /// Hash a screen from its surface label and visible elements.
    pub fn screen_hash(&self, surface_label: &str, elements: &[UIElement]) -> ScreenHash {
        let mut element_hashes: Vec<ElementHash> =
            elements.iter().map(|e| self.element_hash(e)).collect();
        self.screen_hash_from_element_hashes(surface_label, &mut element_hashes)
    }

    /// Same as [`screen_hash`](Self::screen_hash) for callers that already
    /// hashed the elements. Sorts `element_hashes` in place.
    pub fn screen_hash_from_element_hashes(
        &self,
        surface_label: &str,
        element_hashes: &mut [ElementHash],
    ) -> ScreenHash {
        element_hashes.sort();

        let mut hasher = blake3::Hasher::new();
        write_field(&mut hasher, "surface", surface_label);
        write_field(&mut hasher, "count", &element_hashes.len().to_string());
        for hash in element_hashes.iter() {
            write_field(&mut hasher, "el", hash.as_str());
        }

        ScreenHash(to_hex(hasher.finalize()))
    }

    pub fn tree_hash(&self, tree: &UiTree) -> ScreenHash {
        self.screen_hash(&tree.surface_label, &tree.flatten())
    }
}

// Length-prefixed so that ("ab", "c") and ("a", "bc") never collide.
fn write_field(hasher: &mut blake3::Hasher, tag: &str, value: &str) {
    hasher.update(tag.as_bytes());
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn to_hex(hash: blake3::Hash) -> String {
    hash.as_bytes()[..DIGEST_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
