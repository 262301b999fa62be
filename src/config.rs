use std::collections::HashMap;
use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::types::Role;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ui_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    Ldap,
    Static,
}

/// Local account used by the static directory (development and tests).
#[derive(Debug, Clone, Deserialize)]
pub struct StaticAccount {
    pub username: String,
    pub password: SecretString,
    pub display_name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub mode: DirectoryMode,
    pub url: String,
    pub bind_dn: String,
    pub bind_password: SecretString,
    pub base_dn: String,
    pub user_filter: String,
    /// NetBIOS domain; a `DOMAIN\user` login is reduced to `user`.
    pub domain: String,
    pub timeout_seconds: u64,
    /// Role name -> AD group (CN or full DN).
    #[serde(default)]
    pub role_groups: HashMap<String, String>,
    #[serde(default)]
    pub accounts: Vec<StaticAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub root: String,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LoanPolicy {
    pub max_active_loans: i64,
    pub loan_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoansConfig {
    pub max_renewals: i64,
    pub renewal_days: i64,
    pub student: LoanPolicy,
    pub teacher: LoanPolicy,
    pub staff: LoanPolicy,
}

impl LoansConfig {
    /// Librarians and admins borrow under the staff policy.
    pub fn policy_for(&self, role: Role) -> LoanPolicy {
        match role {
            Role::Student => self.student,
            Role::Teacher => self.teacher,
            Role::Staff | Role::Librarian | Role::Admin => self.staff,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationsConfig {
    pub max_active_per_user: i64,
    pub hold_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PenaltiesConfig {
    pub daily_rate: i64,
    pub grace_days: i64,
    /// 0 disables the cap.
    pub max_amount: i64,
    pub lost_book_fee: i64,
    /// Unpaid total above which new loans are refused.
    pub block_threshold: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub circulation_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub directory: DirectoryConfig,
    pub storage: StorageConfig,
    pub loans: LoansConfig,
    pub reservations: ReservationsConfig,
    pub penalties: PenaltiesConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub jobs: JobsConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Repli : configuration embarquée
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: sigb.toml (in CWD)
        .add_source(::config::File::with_name("sigb").required(false));

    if let Ok(custom_path) = std::env::var("SIGB_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("SIGB").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if let Some(mc) = cfg.database.max_connections {
        if mc == 0 {
            return Err(anyhow::anyhow!("database.max_connections must be > 0 when set"));
        }
    }

    // Directory
    if cfg.directory.mode == DirectoryMode::Ldap {
        if cfg.directory.url.trim().is_empty() {
            return Err(anyhow::anyhow!("directory.url is required in ldap mode"));
        }
        if cfg.directory.base_dn.trim().is_empty() {
            return Err(anyhow::anyhow!("directory.base_dn is required in ldap mode"));
        }
    } else if cfg.directory.accounts.is_empty() {
        return Err(anyhow::anyhow!("directory.accounts must not be empty in static mode"));
    }
    for role in cfg.directory.role_groups.keys() {
        if role.parse::<Role>().is_err() {
            return Err(anyhow::anyhow!("directory.role_groups: unknown role '{}'", role));
        }
    }

    // Storage
    if cfg.storage.root.trim().is_empty() {
        return Err(anyhow::anyhow!("storage.root must not be empty"));
    }
    if cfg.storage.max_upload_bytes == 0 {
        return Err(anyhow::anyhow!("storage.max_upload_bytes must be > 0"));
    }
    if cfg.storage.allowed_extensions.is_empty() {
        return Err(anyhow::anyhow!("storage.allowed_extensions must not be empty"));
    }

    // Circulation
    for (name, p) in [("student", cfg.loans.student), ("teacher", cfg.loans.teacher), ("staff", cfg.loans.staff)] {
        if p.loan_days <= 0 {
            return Err(anyhow::anyhow!("loans.{}.loan_days must be > 0", name));
        }
        if p.max_active_loans <= 0 {
            return Err(anyhow::anyhow!("loans.{}.max_active_loans must be > 0", name));
        }
    }
    if cfg.loans.max_renewals < 0 || cfg.loans.renewal_days <= 0 {
        return Err(anyhow::anyhow!("loans.max_renewals must be >= 0 and loans.renewal_days > 0"));
    }
    if cfg.reservations.hold_days <= 0 || cfg.reservations.max_active_per_user <= 0 {
        return Err(anyhow::anyhow!("reservations.hold_days and reservations.max_active_per_user must be > 0"));
    }
    let p = &cfg.penalties;
    if p.daily_rate < 0 || p.grace_days < 0 || p.max_amount < 0 || p.lost_book_fee < 0 || p.block_threshold < 0 {
        return Err(anyhow::anyhow!("penalties.* values must not be negative"));
    }

    // Cache & jobs
    if cfg.cache.capacity == 0 {
        return Err(anyhow::anyhow!("cache.capacity must be > 0"));
    }
    if cfg.auth.session_ttl_hours <= 0 {
        return Err(anyhow::anyhow!("auth.session_ttl_hours must be > 0"));
    }
    if cfg.jobs.circulation_interval_seconds < 10 {
        return Err(anyhow::anyhow!("jobs.circulation_interval_seconds must be >= 10"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // sqlite:///C:/... sous Windows
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let path = path.split('?').next().unwrap_or(path);
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
