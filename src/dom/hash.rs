//! Navigation-stable element identity.
//!
//! A `highlightIndex` is only meaningful within one snapshot generation.
//! `HashedDomElement` identifies the *logical* element across snapshots and
//! navigations: the same button keeps the same hashes even when the page
//! re-renders and its index changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use sha2::{Digest, Sha256};

use crate::error::{BrowserError, Result};

/// Logical identity of an element, independent of any snapshot generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedDomElement {
    /// Hash of the tag-name path from the root down to the element.
    pub branch_path_hash: String,
    /// Hash of the element's attribute map.
    pub attributes_hash: String,
    /// Hash of the element's xpath within its shadow/frame root.
    pub xpath_hash: String,
}

pub(crate) type HashFuture =
    BoxFuture<'static, std::result::Result<HashedDomElement, String>>;
type SharedHashFuture = Shared<HashFuture>;

/// Cache slot for a lazily computed identity hash.
enum Slot {
    Unset,
    InFlight(SharedHashFuture),
    Done(HashedDomElement),
}

/// Single-flight cache for one element's identity hash.
///
/// Concurrent callers during an in-flight computation attach to the same
/// shared future; the underlying computation runs once. A failed
/// computation resets the slot so the next call retries.
pub struct HashCell {
    slot: Mutex<Slot>,
}

impl HashCell {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Unset),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Return the cached value, or run `compute` (once, shared between
    /// concurrent callers) and cache its result.
    ///
    /// `tag` only enriches the error on failure.
    pub async fn get_or_compute<F>(&self, tag: &str, compute: F) -> Result<HashedDomElement>
    where
        F: FnOnce() -> HashFuture,
    {
        let shared = {
            let mut slot = self.lock();
            match &*slot {
                Slot::Done(value) => return Ok(value.clone()),
                Slot::InFlight(shared) => shared.clone(),
                Slot::Unset => {
                    let shared = compute().shared();
                    *slot = Slot::InFlight(shared.clone());
                    shared
                }
            }
        };

        match shared.await {
            Ok(value) => {
                *self.lock() = Slot::Done(value.clone());
                Ok(value)
            }
            Err(reason) => {
                *self.lock() = Slot::Unset;
                Err(BrowserError::HashComputationFailed {
                    tag: tag.to_string(),
                    reason,
                })
            }
        }
    }

    /// Drop whatever the cell holds; the next `get_or_compute` recomputes.
    pub fn invalidate(&self) {
        *self.lock() = Slot::Unset;
    }

    /// The completed value, if one is cached.
    pub fn cached(&self) -> Option<HashedDomElement> {
        match &*self.lock() {
            Slot::Done(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl Default for HashCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            Slot::Unset => "unset",
            Slot::InFlight(_) => "in-flight",
            Slot::Done(_) => "done",
        };
        f.debug_struct("HashCell").field("state", &state).finish()
    }
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Hash the tag-name path from the root down to an element.
pub fn hash_branch_path(path: &[String]) -> String {
    sha256_hex(&path.join("/"))
}

/// Hash an attribute map, order-independently.
pub fn hash_attributes(attributes: &HashMap<String, String>) -> String {
    let mut entries: Vec<String> = attributes
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    entries.sort();
    sha256_hex(&entries.join("|"))
}

/// Hash an xpath string.
pub fn hash_xpath(xpath: &str) -> String {
    sha256_hex(xpath)
}

/// Compute the full identity for one element's extracted fields.
pub fn compute_identity(
    branch_path: &[String],
    attributes: &HashMap<String, String>,
    xpath: &str,
) -> HashedDomElement {
    HashedDomElement {
        branch_path_hash: hash_branch_path(branch_path),
        attributes_hash: hash_attributes(attributes),
        xpath_hash: hash_xpath(xpath),
    }
}
