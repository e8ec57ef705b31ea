use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bank: BankConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Shared secret for webhook signature verification
    pub webhook_secret: String,
    /// Accounts opened with a zero balance at startup (dev seeding)
    #[serde(default)]
    pub seed_accounts: Vec<i64>,
    /// PostgreSQL connection URL; in-memory backends are used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Bank simulator behavior
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub success_rate: f64,
    /// Timeout applied around each bank call by the worker
    pub call_timeout_ms: u64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 10_000,
            success_rate: 0.9,
            call_timeout_ms: 30_000,
        }
    }
}

/// Settlement worker pool and retry policy
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 600_000,
        }
    }
}

/// Sliding-window rate limits, all per 60s window
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub transactions_per_window: u32,
    pub balance_per_window: u32,
    pub global_per_window: u32,
    /// Admission when the window store itself fails. Denying on failure is
    /// the safer default: quota-based denial is less harmful than letting
    /// settlement traffic through unmetered.
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            transactions_per_window: 20,
            balance_per_window: 10,
            global_per_window: 1_000,
            fail_open: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdempotencyConfig {
    pub expiry_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            expiry_hours: 24,
            sweep_interval_secs: 3_600,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
