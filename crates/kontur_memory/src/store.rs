use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kontur_core::config::MemoryConfig;
use kontur_core::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Episode,
    Fact,
    Heuristic,
}

impl MemoryKind {
    /// Partition order used by `recall` and `optimize`.
    pub const ALL: [MemoryKind; 3] = [MemoryKind::Episode, MemoryKind::Fact, MemoryKind::Heuristic];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "episode" => Some(MemoryKind::Episode),
            "fact" => Some(MemoryKind::Fact),
            "heuristic" => Some(MemoryKind::Heuristic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episode => "episode",
            MemoryKind::Fact => "fact",
            MemoryKind::Heuristic => "heuristic",
        }
    }

    fn id_prefix(&self) -> &'static str {
        &self.as_str()[..3]
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since epoch, strictly increasing within one store.
    pub stored_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReceipt {
    pub stored: bool,
    pub memory_id: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallResult {
    pub query: String,
    pub memory_type: Option<MemoryKind>,
    pub results: Vec<MemoryEntry>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeStats {
    pub optimized: bool,
    /// Exact duplicates removed across all partitions.
    pub nodes_merged: usize,
    /// Heuristics dropped by the retention cap.
    pub nodes_evicted: usize,
    /// `nodes_merged + nodes_evicted`.
    pub nodes_deleted: usize,
    pub episodic_memories: usize,
    pub semantic_memories: usize,
    pub heuristic_memories: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_stored: u64,
    pub total_recalled: u64,
    pub total_memories: usize,
    pub episodic_memories: usize,
    pub semantic_memories: usize,
    pub heuristic_memories: usize,
    pub load_factor: f64,
}

/// On-disk form of a [`MemoryStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Snapshot {
    episodes: Vec<MemoryEntry>,
    facts: Vec<MemoryEntry>,
    heuristics: Vec<MemoryEntry>,
    total_stored: u64,
    total_recalled: u64,
    load_factor: f64,
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Three append-only partitions; entries leave only through [`MemoryStore::optimize`].
pub struct MemoryStore {
    config: MemoryConfig,
    episodes: Vec<MemoryEntry>,
    facts: Vec<MemoryEntry>,
    heuristics: Vec<MemoryEntry>,
    load_factor: f64,
    total_stored: u64,
    total_recalled: u64,
    last_stored_at: i64,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            episodes: Vec::new(),
            facts: Vec::new(),
            heuristics: Vec::new(),
            load_factor: 0.0,
            total_stored: 0,
            total_recalled: 0,
            last_stored_at: 0,
        }
    }

    /// Build a store, restoring the configured snapshot if one exists.
    pub fn open(config: MemoryConfig) -> Result<Self> {
        let path = config.snapshot_path.clone();
        let mut store = Self::new(config);
        if let Some(path) = path {
            if path.exists() {
                store.load_snapshot(&path)?;
                tracing::info!(
                    "Restored {} memories from {}",
                    store.len(),
                    path.display()
                );
            }
        }
        Ok(store)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    pub fn len(&self) -> usize {
        self.episodes.len() + self.facts.len() + self.heuristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition(&self, kind: MemoryKind) -> &[MemoryEntry] {
        match kind {
            MemoryKind::Episode => &self.episodes,
            MemoryKind::Fact => &self.facts,
            MemoryKind::Heuristic => &self.heuristics,
        }
    }

    /// Whether `kind` already holds an entry with exactly this content.
    pub fn contains(&self, kind: MemoryKind, content: &str) -> bool {
        let hash = content_hash(content);
        self.partition(kind)
            .iter()
            .any(|entry| content_hash(&entry.content) == hash)
    }

    fn partition_mut(&mut self, kind: MemoryKind) -> &mut Vec<MemoryEntry> {
        match kind {
            MemoryKind::Episode => &mut self.episodes,
            MemoryKind::Fact => &mut self.facts,
            MemoryKind::Heuristic => &mut self.heuristics,
        }
    }

    /// Append an entry to the partition for `kind`.
    pub fn store(&mut self, kind: MemoryKind, content: &str, metadata: Value) -> StoreReceipt {
        let stored_at = now_millis().max(self.last_stored_at + 1);
        self.last_stored_at = stored_at;

        let metadata = match metadata {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let entry = MemoryEntry {
            id: format!("{}-{}", kind.id_prefix(), uuid::Uuid::new_v4()),
            kind,
            content: content.to_string(),
            metadata,
            timestamp: Utc::now(),
            stored_at,
        };
        let receipt = StoreReceipt {
            stored: true,
            memory_id: entry.id.clone(),
            kind,
            timestamp: entry.timestamp,
        };
        self.partition_mut(kind).push(entry);

        self.total_stored += 1;
        self.load_factor = (self.load_factor + self.config.store_increment).min(1.0);
        tracing::debug!("Stored {} ({} chars)", receipt.memory_id, content.len());
        receipt
    }

    /// Case-insensitive substring search, partition order then insertion order.
    pub fn recall(&mut self, query: &str, kind: Option<MemoryKind>, limit: usize) -> RecallResult {
        let needle = query.to_lowercase();
        let results: Vec<MemoryEntry> = MemoryKind::ALL
            .iter()
            .filter(|k| kind.map_or(true, |wanted| wanted == **k))
            .flat_map(|k| self.partition(*k).iter())
            .filter(|entry| entry.content.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect();

        self.total_recalled += 1;
        self.load_factor = (self.load_factor - self.config.recall_decrement).max(0.0);

        RecallResult {
            query: query.to_string(),
            memory_type: kind,
            count: results.len(),
            results,
            timestamp: Utc::now(),
        }
    }

    /// Drop exact duplicates per partition, then cap the heuristic partition
    /// to its newest entries.
    pub fn optimize(&mut self) -> OptimizeStats {
        let mut merged = 0;
        for kind in MemoryKind::ALL {
            let partition = self.partition_mut(kind);
            let before = partition.len();
            let mut seen = HashSet::new();
            partition.retain(|entry| seen.insert(content_hash(&entry.content)));
            merged += before - partition.len();
        }

        let cap = self.config.heuristic_cap;
        let mut evicted = 0;
        if self.heuristics.len() > cap {
            self.heuristics
                .sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
            evicted = self.heuristics.len() - cap;
            self.heuristics.truncate(cap);
        }

        self.load_factor = (self.load_factor - self.config.optimize_decrement).max(0.0);
        tracing::info!(
            "Memory optimized: {} duplicates merged, {} heuristics evicted",
            merged,
            evicted
        );

        OptimizeStats {
            optimized: true,
            nodes_merged: merged,
            nodes_evicted: evicted,
            nodes_deleted: merged + evicted,
            episodic_memories: self.episodes.len(),
            semantic_memories: self.facts.len(),
            heuristic_memories: self.heuristics.len(),
            timestamp: Utc::now(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_stored: self.total_stored,
            total_recalled: self.total_recalled,
            total_memories: self.len(),
            episodic_memories: self.episodes.len(),
            semantic_memories: self.facts.len(),
            heuristic_memories: self.heuristics.len(),
            load_factor: self.load_factor,
        }
    }

    // ========================================================================
    // Snapshot persistence
    // ========================================================================

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            episodes: self.episodes.clone(),
            facts: self.facts.clone(),
            heuristics: self.heuristics.clone(),
            total_stored: self.total_stored,
            total_recalled: self.total_recalled,
            load_factor: self.load_factor,
        };
        let json = serde_json::to_string(&snapshot).context("Failed to serialize memory snapshot")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace snapshot: {}", path.display()))?;
        Ok(())
    }

    pub fn load_snapshot(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;

        self.last_stored_at = snapshot
            .episodes
            .iter()
            .chain(&snapshot.facts)
            .chain(&snapshot.heuristics)
            .map(|e| e.stored_at)
            .max()
            .unwrap_or(0);
        self.episodes = snapshot.episodes;
        self.facts = snapshot.facts;
        self.heuristics = snapshot.heuristics;
        self.total_stored = snapshot.total_stored;
        self.total_recalled = snapshot.total_recalled;
        self.load_factor = snapshot.load_factor.clamp(0.0, 1.0);
        Ok(())
    }
}

fn content_hash(content: &str) -> [u8; 32] {
    Sha256::digest(content.as_bytes()).into()
}
