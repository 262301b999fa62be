use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};

use super::{DirectoryError, DirectoryService, DirectoryUser};
use crate::config::DirectoryConfig;

const USER_ATTRS: [&str; 6] = ["sAMAccountName", "displayName", "cn", "mail", "department", "memberOf"];
const PAGE_SIZE: i32 = 500;

/// Active Directory backend.
///
/// Users are located with the service account, then the password is verified
/// by binding as the user's own DN.
pub struct LdapDirectory {
    url: String,
    bind_dn: String,
    bind_password: SecretString,
    base_dn: String,
    user_filter: String,
    domain: String,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(cfg: &DirectoryConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            bind_dn: cfg.bind_dn.clone(),
            bind_password: cfg.bind_password.clone(),
            base_dn: cfg.base_dn.clone(),
            user_filter: cfg.user_filter.clone(),
            domain: cfg.domain.trim().to_string(),
            timeout: Duration::from_secs(cfg.timeout_seconds.max(1)),
        }
    }

    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        ldap3::drive!(conn);
        Ok(ldap)
    }

    /// Opens a service-account session, runs `f`, and always unbinds.
    async fn with_service_bind<T, F, Fut>(&self, f: F) -> Result<T, DirectoryError>
    where
        F: FnOnce(Ldap) -> Fut,
        Fut: Future<Output = (Result<T, DirectoryError>, Ldap)>,
    {
        let mut ldap = self.connect().await?;
        ldap.simple_bind(&self.bind_dn, self.bind_password.expose_secret()).await?.success()?;

        let (ret, mut ldap) = f(ldap).await;

        if let Err(e) = ldap.unbind().await {
            tracing::debug!("LDAP unbind failed: {}", e);
        }

        ret
    }

    /// Strips a `DOMAIN\` prefix matching the configured domain.
    fn account_name<'a>(&self, raw: &'a str) -> &'a str {
        let raw = raw.trim();
        match raw.split_once('\\') {
            Some((domain, user)) if !self.domain.is_empty() && domain.eq_ignore_ascii_case(&self.domain) => user,
            _ => raw,
        }
    }

    fn account_filter(&self, username: &str) -> String {
        format!("(&{}(sAMAccountName={}))", self.user_filter, ldap_escape(username))
    }

    async fn find_user(&self, ldap: &mut Ldap, username: &str) -> Result<Option<(String, DirectoryUser)>, DirectoryError> {
        let (entries, _) = ldap
            .search(&self.base_dn, Scope::Subtree, &self.account_filter(username), USER_ATTRS.to_vec())
            .await?
            .success()?;

        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };
        let entry = SearchEntry::construct(entry);
        let dn = entry.dn.clone();
        Ok(Some((dn, user_from_entry(entry)?)))
    }
}

#[async_trait]
impl DirectoryService for LdapDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<DirectoryUser, DirectoryError> {
        // Un bind avec mot de passe vide est un bind anonyme : AD l'accepte.
        let username = self.account_name(username).to_string();
        if username.is_empty() || password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }

        let found = self
            .with_service_bind(|mut ldap| async move {
                let res = self.find_user(&mut ldap, &username).await;
                (res, ldap)
            })
            .await?;
        let Some((dn, user)) = found else {
            return Err(DirectoryError::InvalidCredentials);
        };

        let mut ldap = self.connect().await?;
        let bind = ldap.simple_bind(&dn, password).await?;
        let _ = ldap.unbind().await;
        // 49 = invalidCredentials
        match bind.rc {
            0 => Ok(user),
            49 => Err(DirectoryError::InvalidCredentials),
            rc => Err(DirectoryError::Unavailable(format!("bind for {} failed: rc={} {}", dn, rc, bind.text))),
        }
    }

    async fn list_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let base_dn = self.base_dn.clone();
        let filter = self.user_filter.clone();
        self.with_service_bind(|mut ldap| async move {
            let res = async {
                let adapters: Vec<Box<dyn Adapter<_, _>>> =
                    vec![Box::new(EntriesOnly::new()), Box::new(PagedResults::new(PAGE_SIZE))];
                let mut search = ldap
                    .streaming_search_with(adapters, &base_dn, Scope::Subtree, &filter, USER_ATTRS.to_vec())
                    .await?;
                let mut users = Vec::new();
                while let Some(entry) = search.next().await? {
                    let entry = SearchEntry::construct(entry);
                    match user_from_entry(entry) {
                        Ok(user) => users.push(user),
                        Err(e) => tracing::warn!("Skipping directory entry: {}", e),
                    }
                }
                search.finish().await.success()?;
                Ok::<_, DirectoryError>(users)
            }
            .await;
            (res, ldap)
        })
        .await
    }
}

fn first_attr(entry: &SearchEntry, name: &str) -> Option<String> {
    entry
        .attrs
        .get(name)
        .and_then(|values| values.first())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn user_from_entry(entry: SearchEntry) -> Result<DirectoryUser, DirectoryError> {
    let username = first_attr(&entry, "sAMAccountName").ok_or_else(|| DirectoryError::MissingAttribute {
        dn: entry.dn.clone(),
        attribute: "sAMAccountName".to_string(),
    })?;
    let display_name = first_attr(&entry, "displayName")
        .or_else(|| first_attr(&entry, "cn"))
        .unwrap_or_else(|| username.clone());
    Ok(DirectoryUser {
        display_name,
        email: first_attr(&entry, "mail"),
        department: first_attr(&entry, "department"),
        groups: entry.attrs.get("memberOf").cloned().unwrap_or_default(),
        username,
    })
}
