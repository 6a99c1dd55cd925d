//! Gateway configuration.
//!
//! Built once at process start from environment variables and threaded
//! explicitly through the server state; nothing reads the environment after
//! startup. Security-critical limits carry hard floors that environment
//! overrides cannot go below.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read an integer from the environment, clamping to a hard floor.
///
/// The floor cannot be bypassed via environment variables; misconfiguration
/// degrades to the floor rather than disabling the limit.
fn env_u64(name: &str, default: u64, floor: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
        .max(floor)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

// ── Grouped limits ───────────────────────────────────────────────────────

/// Input and timing limits.
#[derive(Debug, Clone)]
pub struct SecurityLimits {
    /// Maximum message length in characters.
    pub max_input_length: usize,
    /// Maximum request body size in bytes.
    pub max_request_size: usize,
    /// Whole-request deadline.
    pub request_timeout: Duration,
}

/// Rate limiting windows.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub per_ip_per_minute: u32,
    pub per_ip_per_hour: u32,
    pub global_per_minute: u32,
}

/// Model selection and backend settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Small classifier model for L2/L8 (~0.5B).
    pub classifier_model: String,
    /// Small router model for L3/L4 (~1B).
    pub router_model: String,
    /// Primary generation model for L6/L7 (~7B).
    pub generator_model: String,
    /// Verifier model for L8; defaults to the classifier model so the check
    /// comes from a different model than the one being checked.
    pub verifier_model: String,
    /// Embedding model for the optional grounding check.
    pub embedding_model: String,
    /// Ollama base URL.
    pub ollama_url: String,
    /// Per-call deadline for classifier-tier calls.
    pub classifier_timeout: Duration,
    /// Per-call deadline for generator-tier calls.
    pub generator_timeout: Duration,
    /// Maximum in-flight model calls across all requests.
    pub max_concurrency: usize,
}

/// Conversation store bounds.
#[derive(Debug, Clone)]
pub struct ConversationLimits {
    /// Maximum user turns per conversation.
    pub max_turns: usize,
    /// Idle expiry window.
    pub ttl: Duration,
    /// Token budget for history sent to models.
    pub max_history_tokens: usize,
    /// Global conversation count bound (LRU eviction beyond this).
    pub capacity: usize,
}

/// Safety-stage tuning.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Whether the embedding-based grounding check runs in L8.
    pub grounding_check_enabled: bool,
    /// Cosine similarity below which a response sentence counts as
    /// ungrounded.
    pub grounding_min_similarity: f32,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty means same-origin only.
    pub cors_origins: Vec<String>,
    /// Proxies whose forwarded headers are trusted for client-ip resolution.
    pub trusted_proxies: Vec<IpNet>,
    /// Salt mixed into the client-ip hash.
    pub ip_hash_salt: String,
    pub metrics_enabled: bool,
    pub log_level: String,
}

impl ServerConfig {
    /// Whether `addr` is one of the configured trusted proxies.
    pub fn is_trusted_proxy(&self, addr: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(&addr))
    }
}

/// Filesystem locations.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Directory of static context documents.
    pub context_dir: PathBuf,
    /// Directory of prompt template overrides.
    pub prompts_dir: PathBuf,
    /// Directory for persisted contact messages.
    pub contact_dir: PathBuf,
    /// Append-only request log file.
    pub request_log_path: PathBuf,
}

/// Context assembly bound.
#[derive(Debug, Clone)]
pub struct ContextLimits {
    /// Token budget for the assembled context blob.
    pub max_context_tokens: usize,
}

/// The full gateway configuration, composed at process start.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub security: SecurityLimits,
    pub rate_limits: RateLimits,
    pub models: ModelConfig,
    pub conversation: ConversationLimits,
    pub context: ContextLimits,
    pub safety: SafetyConfig,
    pub server: ServerConfig,
    pub paths: PathConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl GatewayConfig {
    /// Load configuration from the environment, applying defaults and hard
    /// security floors.
    pub fn from_env() -> Self {
        let classifier_model = env_str("CLASSIFIER_MODEL", "qwen2.5:0.5b");
        Self {
            security: SecurityLimits {
                max_input_length: env_u64("MAX_INPUT_LENGTH", 2000, 100) as usize,
                max_request_size: env_u64("MAX_REQUEST_SIZE", 8192, 1024) as usize,
                request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECONDS", 30, 5)),
            },
            rate_limits: RateLimits {
                per_ip_per_minute: env_u64("RATE_LIMIT_PER_IP_PER_MINUTE", 10, 1) as u32,
                per_ip_per_hour: env_u64("RATE_LIMIT_PER_IP_PER_HOUR", 100, 10) as u32,
                global_per_minute: env_u64("RATE_LIMIT_GLOBAL_PER_MINUTE", 1000, 100) as u32,
            },
            models: ModelConfig {
                verifier_model: env_str("VERIFIER_MODEL", &classifier_model),
                classifier_model,
                router_model: env_str("ROUTER_MODEL", "llama3.2:1b"),
                generator_model: env_str("GENERATOR_MODEL", "mistral:7b"),
                embedding_model: env_str("EMBEDDING_MODEL", "nomic-embed-text"),
                ollama_url: env_str("OLLAMA_URL", "http://localhost:11434"),
                classifier_timeout: Duration::from_secs(env_u64(
                    "CLASSIFIER_TIMEOUT_SECONDS",
                    10,
                    5,
                )),
                generator_timeout: Duration::from_secs(env_u64(
                    "GENERATOR_TIMEOUT_SECONDS",
                    60,
                    10,
                )),
                max_concurrency: env_u64("MAX_MODEL_CONCURRENCY", 4, 1) as usize,
            },
            conversation: ConversationLimits {
                max_turns: env_u64("MAX_TURNS", 10, 2) as usize,
                ttl: Duration::from_secs(env_u64("CONVERSATION_TTL_SECONDS", 1800, 60)),
                max_history_tokens: env_u64("MAX_HISTORY_TOKENS", 4000, 500) as usize,
                capacity: env_u64("CONVERSATION_CAPACITY", 1000, 16) as usize,
            },
            context: ContextLimits {
                max_context_tokens: env_u64("MAX_CONTEXT_TOKENS", 8000, 250) as usize,
            },
            safety: SafetyConfig {
                grounding_check_enabled: env_bool("GROUNDING_CHECK_ENABLED", false),
                grounding_min_similarity: std::env::var("GROUNDING_MIN_SIMILARITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.5),
            },
            server: ServerConfig {
                host: env_str("HOST", "127.0.0.1"),
                port: env_u64("PORT", 8080, 1) as u16,
                cors_origins: split_csv(&env_str("CORS_ORIGINS", "")),
                trusted_proxies: parse_proxy_list(&env_str("TRUSTED_PROXIES", "")),
                ip_hash_salt: env_str("IP_HASH_SALT", ""),
                metrics_enabled: env_bool("METRICS_ENABLED", false),
                log_level: env_str("LOG_LEVEL", "info"),
            },
            paths: PathConfig {
                context_dir: PathBuf::from(env_str("CONTEXT_DIR", "context")),
                prompts_dir: PathBuf::from(env_str("PROMPTS_DIR", "prompts")),
                contact_dir: PathBuf::from(env_str("CONTACT_DIR", "data/contacts")),
                request_log_path: PathBuf::from(env_str(
                    "REQUEST_LOG_PATH",
                    "data/requests.jsonl",
                )),
            },
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a comma-separated list of ips and CIDR ranges. Bare ips become
/// host-length networks; entries that parse as neither are dropped.
pub fn parse_proxy_list(raw: &str) -> Vec<IpNet> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            s.parse::<IpNet>()
                .ok()
                .or_else(|| s.parse::<IpAddr>().ok().map(IpNet::from))
        })
        .collect()
}
