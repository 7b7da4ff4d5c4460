//! Transaction outputs claimed by in-flight test transactions.
//!
//! Tests that build several transactions from one wallet lock the outputs
//! they spend so a second builder does not pick the same ones before the
//! first transaction lands.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;

/// `tx_hash#index`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub tx_hash: String,
    pub index: u32,
}

impl OutputRef {
    pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index,
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

#[derive(Debug, Default)]
pub struct UsedOutputs {
    locked: Mutex<BTreeSet<OutputRef>>,
}

impl UsedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `output`. Returns `false` if it was already claimed.
    pub fn lock(&self, output: OutputRef) -> bool {
        self.locked
            .lock()
            .map(|mut locked| locked.insert(output))
            .unwrap_or(false)
    }

    /// Release `output`. Returns `false` if it was not claimed.
    pub fn release(&self, output: &OutputRef) -> bool {
        self.locked
            .lock()
            .map(|mut locked| locked.remove(output))
            .unwrap_or(false)
    }

    pub fn is_locked(&self, output: &OutputRef) -> bool {
        self.locked
            .lock()
            .map(|locked| locked.contains(output))
            .unwrap_or(false)
    }

    /// Every claimed output, in order.
    pub fn locked(&self) -> Vec<OutputRef> {
        self.locked
            .lock()
            .map(|locked| locked.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut locked) = self.locked.lock() {
            locked.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_output_is_claimed_once() {
        let used = UsedOutputs::new();
        let out = OutputRef::new("aa", 0);
        assert!(used.lock(out.clone()));
        assert!(!used.lock(out.clone()));
        assert!(used.is_locked(&out));
        assert!(used.release(&out));
        assert!(!used.release(&out));
        assert!(!used.is_locked(&out));
    }

    #[test]
    fn locked_lists_in_order() {
        let used = UsedOutputs::new();
        used.lock(OutputRef::new("bb", 1));
        used.lock(OutputRef::new("aa", 2));
        used.lock(OutputRef::new("aa", 0));
        let listed: Vec<String> = used.locked().iter().map(ToString::to_string).collect();
        assert_eq!(listed, vec!["aa#0", "aa#2", "bb#1"]);
        used.clear();
        assert!(used.locked().is_empty());
    }
}
