//! Bill-of-materials side channel.
//!
//! Workers append through cloned [`BomSink`]s; the single [`BomCollector`]
//! drains everything once the run has finished.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BomEntryType {
    Docker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomEntry {
    pub reference: String,
    #[serde(rename = "type")]
    pub entry_type: BomEntryType,
    /// What the entry belongs to, e.g. `<component>/<resource>`.
    pub origin: String,
}

impl BomEntry {
    pub fn docker(reference: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            entry_type: BomEntryType::Docker,
            origin: origin.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BomSink {
    tx: mpsc::UnboundedSender<BomEntry>,
}

impl BomSink {
    pub fn append(&self, entry: BomEntry) {
        if let Err(e) = self.tx.send(entry) {
            warn!(reference = %e.0.reference, "BOM collector is gone, dropping entry");
        }
    }
}

#[derive(Debug)]
pub struct BomCollector {
    rx: mpsc::UnboundedReceiver<BomEntry>,
}

impl BomCollector {
    /// Returns every entry appended so far, in arrival order.
    pub fn drain(mut self) -> Vec<BomEntry> {
        let mut entries = Vec::new();
        while let Ok(entry) = self.rx.try_recv() {
            entries.push(entry);
        }
        entries
    }
}

pub fn channel() -> (BomSink, BomCollector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BomSink { tx }, BomCollector { rx })
}
