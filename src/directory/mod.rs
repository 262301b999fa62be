//! Active Directory access.
//!
//! Authentication always goes through a [`DirectoryService`]. Production uses
//! [`LdapDirectory`] against the university AD; development and tests use
//! [`StaticDirectory`] with accounts declared in the configuration.

pub mod ldap;
pub mod static_dir;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DirectoryConfig, DirectoryMode};
use crate::types::Role;

pub use ldap::LdapDirectory;
pub use static_dir::StaticDirectory;

/// Account attributes read from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    /// Group memberships, as CN or full DN.
    pub groups: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("LDAP operation failed")]
    Ldap(#[from] ldap3::LdapError),

    #[error("entry {dn} has no attribute {attribute}")]
    MissingAttribute { dn: String, attribute: String },
}

#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Verifies the password and returns the account's attributes.
    async fn authenticate(&self, username: &str, password: &str) -> Result<DirectoryUser, DirectoryError>;

    /// Lists every library-eligible account, for synchronisation.
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError>;
}

/// Builds the directory backend selected by `directory.mode`.
pub fn from_config(cfg: &DirectoryConfig) -> Arc<dyn DirectoryService> {
    match cfg.mode {
        DirectoryMode::Ldap => Arc::new(LdapDirectory::new(cfg)),
        DirectoryMode::Static => Arc::new(StaticDirectory::new(cfg.accounts.clone())),
    }
}

/// Maps AD group memberships to the strongest matching role.
///
/// `role_groups` maps a role name to a group given as CN or full DN; both forms
/// match case-insensitively. Accounts without any mapped group are students.
pub fn role_for_groups(groups: &[String], role_groups: &HashMap<String, String>) -> Role {
    mapped_role(groups, role_groups).unwrap_or(Role::Student)
}

/// Like [`role_for_groups`], but `None` when no configured group matches.
pub fn mapped_role(groups: &[String], role_groups: &HashMap<String, String>) -> Option<Role> {
    for role in Role::ALL {
        let Some(wanted) = role_groups.get(role.as_str()) else {
            continue;
        };
        let wanted = wanted.trim();
        if wanted.is_empty() {
            continue;
        }
        if groups.iter().any(|g| group_matches(g, wanted)) {
            return Some(role);
        }
    }
    None
}

fn group_matches(group: &str, wanted: &str) -> bool {
    if group.eq_ignore_ascii_case(wanted) {
        return true;
    }
    group_cn(group).is_some_and(|cn| cn.eq_ignore_ascii_case(wanted))
}

/// Extracts the CN from a DN such as `CN=Enseignants,OU=Groupes,DC=univ,DC=local`.
pub fn group_cn(dn: &str) -> Option<&str> {
    let first = dn.split(',').next()?.trim();
    let (key, value) = first.split_once('=')?;
    if key.trim().eq_ignore_ascii_case("cn") {
        Some(value.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> HashMap<String, String> {
        HashMap::from([
            ("admin".to_string(), "SIGB-Admins".to_string()),
            ("librarian".to_string(), "SIGB-Bibliothecaires".to_string()),
            ("teacher".to_string(), "CN=Enseignants,OU=Groupes,DC=univ,DC=local".to_string()),
        ])
    }

    #[test]
    fn test_group_cn() {
        assert_eq!(group_cn("CN=Enseignants,OU=Groupes,DC=univ,DC=local"), Some("Enseignants"));
        assert_eq!(group_cn("cn=x"), Some("x"));
        assert_eq!(group_cn("OU=Groupes,DC=univ"), None);
        assert_eq!(group_cn("plain"), None);
    }

    #[test]
    fn test_role_precedence() {
        let groups = vec![
            "CN=Enseignants,OU=Groupes,DC=univ,DC=local".to_string(),
            "CN=sigb-admins,OU=Groupes,DC=univ,DC=local".to_string(),
        ];
        assert_eq!(role_for_groups(&groups, &mapping()), Role::Admin);
    }

    #[test]
    fn test_role_full_dn_match() {
        let groups = vec!["cn=enseignants,ou=groupes,dc=univ,dc=local".to_string()];
        assert_eq!(role_for_groups(&groups, &mapping()), Role::Teacher);
    }

    #[test]
    fn test_role_default_student() {
        let groups = vec!["CN=Etudiants,OU=Groupes,DC=univ,DC=local".to_string()];
        assert_eq!(role_for_groups(&groups, &mapping()), Role::Student);
        assert_eq!(role_for_groups(&[], &mapping()), Role::Student);
        assert_eq!(mapped_role(&groups, &mapping()), None);
    }
}
