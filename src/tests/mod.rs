//! Integration and unit tests for the SIGB backend.
//!
//! ## Test Modules
//!
//! - **support**: temporary database, test configuration and request helpers
//! - **api_tests**: HTTP flows through the full router
//! - **circulation_tests**: loans, reservations and penalties at service level
//! - **error_tests**: error rendering and validation helpers
//! - **config_tests**: configuration defaults and validation
//! - **db_tests**: schema creation and constraints
//! - **health_api_tests**: health, metrics and version endpoints
//! - **users_tests**: directory upserts, role mapping and overrides
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test circulation_tests
//! ```

pub mod support;

pub mod api_tests;
pub mod config_tests;
pub mod db_tests;
