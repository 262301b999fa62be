#[cfg(test)]
mod tests {
    use crate::config::{self, AppConfig, DirectoryMode};
    use crate::types::Role;
    use tempfile::TempDir;

    fn expect_invalid(cfg: &AppConfig, fragment: &str) {
        let err = config::validate(cfg).unwrap_err().to_string();
        assert!(err.contains(fragment), "expected '{}' in '{}'", fragment, err);
    }

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.database.url, "sqlite://data/sigb.db");
        assert_eq!(cfg.directory.mode, DirectoryMode::Ldap);
        assert!(cfg.directory.accounts.is_empty());
        assert_eq!(cfg.directory.role_groups.get("librarian").map(String::as_str), Some("SIGB-Bibliothecaires"));
        assert_eq!(cfg.storage.allowed_extensions, vec!["pdf", "doc", "docx"]);
        assert_eq!(cfg.penalties.daily_rate, 100);
        assert_eq!(cfg.penalties.currency, "FCFA");
        assert_eq!(cfg.reservations.hold_days, 3);
        assert!(cfg.security.is_none());
        assert!(config::validate(&cfg).is_ok());
    }

    #[test]
    fn test_loan_policy_per_role() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.loans.policy_for(Role::Student).max_active_loans, 3);
        assert_eq!(cfg.loans.policy_for(Role::Student).loan_days, 14);
        assert_eq!(cfg.loans.policy_for(Role::Teacher).loan_days, 30);
        // Le personnel de la bibliothèque emprunte comme le personnel
        assert_eq!(cfg.loans.policy_for(Role::Librarian).max_active_loans, 5);
        assert_eq!(cfg.loans.policy_for(Role::Admin).loan_days, 21);
    }

    #[test]
    fn test_invalid_server_port() {
        let mut cfg = AppConfig::default();
        cfg.server.port = 0;
        expect_invalid(&cfg, "invalid server.port");
    }

    #[test]
    fn test_ldap_mode_requires_url_and_base() {
        let mut cfg = AppConfig::default();
        cfg.directory.mode = DirectoryMode::Ldap;
        cfg.directory.url = " ".to_string();
        expect_invalid(&cfg, "directory.url is required in ldap mode");

        cfg.directory.url = "ldaps://ad.univ.local".to_string();
        cfg.directory.base_dn = String::new();
        expect_invalid(&cfg, "directory.base_dn");
    }

    #[test]
    fn test_static_mode_requires_accounts() {
        let mut cfg = AppConfig::default();
        cfg.directory.mode = DirectoryMode::Static;
        expect_invalid(&cfg, "directory.accounts must not be empty in static mode");
    }

    #[test]
    fn test_unknown_role_group() {
        let mut cfg = AppConfig::default();
        cfg.directory.role_groups.insert("doyen".to_string(), "Doyens".to_string());
        expect_invalid(&cfg, "directory.role_groups: unknown role");
    }

    #[test]
    fn test_circulation_limits_validated() {
        let mut cfg = AppConfig::default();
        cfg.loans.teacher.loan_days = 0;
        expect_invalid(&cfg, "loans.teacher.loan_days");

        let mut cfg = AppConfig::default();
        cfg.reservations.hold_days = 0;
        expect_invalid(&cfg, "reservations.hold_days");

        let mut cfg = AppConfig::default();
        cfg.penalties.daily_rate = -1;
        expect_invalid(&cfg, "must not be negative");
    }

    #[test]
    fn test_cache_storage_and_jobs_validated() {
        let mut cfg = AppConfig::default();
        cfg.cache.capacity = 0;
        expect_invalid(&cfg, "cache.capacity must be > 0");

        let mut cfg = AppConfig::default();
        cfg.storage.allowed_extensions.clear();
        expect_invalid(&cfg, "storage.allowed_extensions");

        let mut cfg = AppConfig::default();
        cfg.jobs.circulation_interval_seconds = 5;
        expect_invalid(&cfg, "jobs.circulation_interval_seconds");

        let mut cfg = AppConfig::default();
        cfg.database.max_connections = Some(0);
        expect_invalid(&cfg, "database.max_connections");
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let override_toml = r#"
            [penalties]
            daily_rate = 250
            grace_days = 2
            max_amount = 0
            lost_book_fee = 30000
            block_threshold = 10000
            currency = "FCFA"

            [directory]
            mode = "static"

            [[directory.accounts]]
            username = "dev"
            password = "dev-secret"
            display_name = "Compte de développement"
        "#;
        let defaults = AppConfig::default();
        let built = ::config::Config::builder()
            .add_source(::config::File::from_str(include_str!("../../config/default.toml"), ::config::FileFormat::Toml))
            .add_source(::config::File::from_str(override_toml, ::config::FileFormat::Toml))
            .build()
            .unwrap();
        let cfg: AppConfig = built.try_deserialize().unwrap();

        assert_eq!(cfg.penalties.daily_rate, 250);
        assert_eq!(cfg.penalties.grace_days, 2);
        assert_eq!(cfg.directory.mode, DirectoryMode::Static);
        assert_eq!(cfg.directory.accounts.len(), 1);
        assert!(!format!("{:?}", cfg.directory.accounts).contains("dev-secret"));
        // Les autres sections gardent leurs valeurs par défaut
        assert_eq!(cfg.directory.url, defaults.directory.url);
        assert_eq!(cfg.loans.max_renewals, defaults.loans.max_renewals);
        assert!(config::validate(&cfg).is_ok());
    }

    #[test]
    fn test_ensure_sqlite_parent_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("sigb.db");
        let url = format!("sqlite://{}?mode=rwc", nested.display());
        config::ensure_sqlite_parent_dir(&url).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());

        // Autres schémas ignorés
        config::ensure_sqlite_parent_dir("sqlite::memory:").unwrap();
    }
}
