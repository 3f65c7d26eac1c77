use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KonturConfig {
    pub runtime: RuntimeConfig,
    pub guardian: GuardianConfig,
    pub memory: MemoryConfig,
    pub orchestrator: OrchestratorConfig,
    pub automation: AutomationConfig,
    pub llm: LlmConfig,
}

impl KonturConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: KonturConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("KONTUR_HEARTBEAT_EVERY") {
            self.runtime.heartbeat_every = n;
        }
        if let Some(n) = env_parse("KONTUR_MAX_ATTEMPTS") {
            self.orchestrator.max_attempts = n;
        }
        if let Some(n) = env_parse("KONTUR_EXECUTION_DEADLINE_SECS") {
            self.orchestrator.execution_deadline_secs = n;
        }
        if let Some(n) = env_parse("KONTUR_HEURISTIC_CAP") {
            self.memory.heuristic_cap = n;
        }
        if let Ok(v) = std::env::var("KONTUR_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("KONTUR_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("KONTUR_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("KONTUR_MEMORY_SNAPSHOT") {
            self.memory.snapshot_path = Some(PathBuf::from(v));
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Emit a heartbeat every N processed packets.
    pub heartbeat_every: u64,
    /// Where heartbeats are addressed.
    pub supervisor_urn: String,
    pub protocol_version: String,
    pub default_ttl_ms: u64,
    /// Treat packets with an empty `integrity` as corrupt.
    pub require_integrity: bool,
    /// Longer input lines are discarded and counted as decode errors.
    pub max_line_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_every: 10,
            supervisor_urn: "kontur://core/system".to_string(),
            protocol_version: crate::PROTOCOL_VERSION.to_string(),
            default_ttl_ms: crate::DEFAULT_TTL_MS,
            require_integrity: true,
            max_line_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThreatCategory {
    pub name: String,
    pub patterns: Vec<String>,
}

impl ThreatCategory {
    fn new(name: &str, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Categories named like `*injection*` are critical.
    pub fn is_critical(&self) -> bool {
        self.name.contains("injection")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub urn: String,
    pub dangerous_operations: Vec<String>,
    /// Checked in order; order only affects the listing of findings.
    pub categories: Vec<ThreatCategory>,
    pub dangerous_weight: u32,
    pub pattern_weight: u32,
    pub large_payload_chars: usize,
    pub large_payload_weight: u32,
    pub critical_above: u32,
    pub high_above: u32,
    pub medium_above: u32,
    pub approval_above: u32,
    /// Per-audit decay of the running threat level.
    pub smoothing: f64,
    /// Scale applied to the latest score before comparing against the decayed level.
    pub sample_scale: f64,
    /// Passive floor decay every N packets.
    pub decay_every: u64,
    pub decay_amount: f64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            urn: "kontur://organ/grisha".to_string(),
            dangerous_operations: ["execute_code", "delete_file", "modify_system", "network_access"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            categories: vec![
                ThreatCategory::new("code_injection", &["eval(", "exec(", "__import__"]),
                ThreatCategory::new("file_deletion", &["rm -rf", "os.remove"]),
                ThreatCategory::new("network", &["socket.socket", "requests.get"]),
                ThreatCategory::new("resource_bomb", &["while True:", "infinite loop"]),
            ],
            dangerous_weight: 3,
            pattern_weight: 5,
            large_payload_chars: 10_000,
            large_payload_weight: 1,
            critical_above: 50,
            high_above: 20,
            medium_above: 5,
            approval_above: 10,
            smoothing: 0.95,
            sample_scale: 0.1,
            decay_every: 50,
            decay_amount: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub urn: String,
    /// Newest heuristics kept by `optimize()`.
    pub heuristic_cap: usize,
    pub store_increment: f64,
    pub recall_decrement: f64,
    pub optimize_decrement: f64,
    pub default_recall_limit: usize,
    /// JSON snapshot of all partitions. In-memory only when unset.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            urn: "kontur://organ/memory".to_string(),
            heuristic_cap: 3,
            store_increment: 0.01,
            recall_decrement: 0.005,
            optimize_decrement: 0.05,
            default_recall_limit: 5,
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub urn: String,
    /// Bounds total replans across the whole run, not the number of steps.
    pub max_attempts: u32,
    pub execution_deadline_secs: u64,
    /// Neighbours requested from the similarity store while planning.
    pub similarity_k: usize,
    /// Used when neither generation nor recall produce a script.
    pub fallback_action: String,
    /// Ask the text generator to decompose the goal into steps.
    pub llm_planning: bool,
}

impl OrchestratorConfig {
    pub fn execution_deadline(&self) -> Duration {
        Duration::from_secs(self.execution_deadline_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            urn: "kontur://organ/tetyana".to_string(),
            max_attempts: 3,
            execution_deadline_secs: 60,
            similarity_k: 5,
            fallback_action: "tell application \"System Events\"\n    delay 0.5\nend tell"
                .to_string(),
            llm_planning: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Program that receives the instruction as its final argument.
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            program: "osascript".to_string(),
            args: vec!["-e".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `mock` or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = KonturConfig::default();
        assert_eq!(cfg.runtime.heartbeat_every, 10);
        assert_eq!(cfg.runtime.max_line_bytes, 1024 * 1024);
        assert_eq!(cfg.orchestrator.max_attempts, 3);
        assert_eq!(cfg.memory.heuristic_cap, 3);
        assert_eq!(cfg.guardian.categories.len(), 4);
        assert!(cfg.guardian.categories[0].is_critical());
        assert!(!cfg.guardian.categories[1].is_critical());
        assert_eq!(cfg.llm.provider, "mock");
        assert!(cfg.memory.snapshot_path.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[orchestrator]
max_attempts = 5
"#;
        let cfg: KonturConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.orchestrator.max_attempts, 5);
        // Defaults for unspecified fields
        assert_eq!(cfg.orchestrator.execution_deadline_secs, 60);
        assert_eq!(cfg.runtime.heartbeat_every, 10);
        assert_eq!(cfg.guardian.pattern_weight, 5);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[runtime]
heartbeat_every = 4
supervisor_urn = "kontur://core/test"
require_integrity = false

[guardian]
dangerous_operations = ["drop_table"]
pattern_weight = 7
critical_above = 40

[[guardian.categories]]
name = "sql_injection"
patterns = ["' OR 1=1", "; DROP"]

[memory]
heuristic_cap = 5
snapshot_path = "/tmp/kontur-memory.json"

[orchestrator]
max_attempts = 2
execution_deadline_secs = 5
llm_planning = true

[automation]
program = "sh"
args = ["-c"]

[llm]
provider = "openai"
model = "gpt-4o"
base_url = "http://localhost:11434/v1"
"#;
        let cfg: KonturConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.runtime.heartbeat_every, 4);
        assert!(!cfg.runtime.require_integrity);
        assert_eq!(cfg.guardian.dangerous_operations, vec!["drop_table"]);
        assert_eq!(cfg.guardian.categories.len(), 1);
        assert!(cfg.guardian.categories[0].is_critical());
        assert_eq!(cfg.guardian.pattern_weight, 7);
        assert_eq!(cfg.guardian.dangerous_weight, 3);
        assert_eq!(cfg.memory.heuristic_cap, 5);
        assert_eq!(
            cfg.memory.snapshot_path,
            Some(PathBuf::from("/tmp/kontur-memory.json"))
        );
        assert_eq!(cfg.orchestrator.execution_deadline(), Duration::from_secs(5));
        assert!(cfg.orchestrator.llm_planning);
        assert_eq!(cfg.automation.program, "sh");
        assert_eq!(cfg.llm.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kontur.toml");
        std::fs::write(&path, "[runtime]\nheartbeat_every = 3\n").unwrap();
        let cfg = KonturConfig::load(&path).unwrap();
        assert_eq!(cfg.runtime.heartbeat_every, 3);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[runtime\nheartbeat_every = ").unwrap();
        assert!(KonturConfig::load(&path).is_err());
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("KONTUR_MAX_ATTEMPTS", "7");
        std::env::set_var("KONTUR_LLM_PROVIDER", "openai");
        std::env::set_var("KONTUR_HEARTBEAT_EVERY", "not-a-number");

        let mut cfg = KonturConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.orchestrator.max_attempts, 7);
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.runtime.heartbeat_every, 10);

        std::env::remove_var("KONTUR_MAX_ATTEMPTS");
        std::env::remove_var("KONTUR_LLM_PROVIDER");
        std::env::remove_var("KONTUR_HEARTBEAT_EVERY");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = KonturConfig::load_or_default("/nonexistent/kontur.toml");
        assert_eq!(cfg.orchestrator.max_attempts, 3);
    }
}
