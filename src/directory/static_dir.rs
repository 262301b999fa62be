use async_trait::async_trait;
use secrecy::ExposeSecret;

use super::{DirectoryError, DirectoryService, DirectoryUser};
use crate::config::StaticAccount;

/// Directory backed by accounts from the configuration file.
///
/// Only meant for development and tests; passwords come from the config file.
pub struct StaticDirectory {
    accounts: Vec<StaticAccount>,
}

impl StaticDirectory {
    pub fn new(accounts: Vec<StaticAccount>) -> Self {
        Self { accounts }
    }
}

fn to_user(a: &StaticAccount) -> DirectoryUser {
    DirectoryUser {
        username: a.username.clone(),
        display_name: a.display_name.clone(),
        email: a.email.clone(),
        department: a.department.clone(),
        groups: a.groups.clone(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<DirectoryUser, DirectoryError> {
        if password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }
        let username = username.trim();
        let account = self
            .accounts
            .iter()
            .find(|a| a.username.eq_ignore_ascii_case(username))
            .ok_or(DirectoryError::InvalidCredentials)?;
        if constant_time_eq(account.password.expose_secret().as_bytes(), password.as_bytes()) {
            Ok(to_user(account))
        } else {
            Err(DirectoryError::InvalidCredentials)
        }
    }

    async fn list_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        Ok(self.accounts.iter().map(to_user).collect())
    }
}
