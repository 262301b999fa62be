use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::{AppConfig, DirectoryMode, StaticAccount};
use crate::directory::DirectoryUser;
use crate::services::{catalog, users};
use crate::state::AppState;
use crate::types::{BookDto, BookInput, Role};

fn account(username: &str, display_name: &str, groups: &[&str]) -> StaticAccount {
    StaticAccount {
        username: username.to_string(),
        // Mot de passe = identifiant
        password: username.to_string().into(),
        display_name: display_name.to_string(),
        email: Some(format!("{}@univ.test", username)),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        department: Some("Informatique".to_string()),
    }
}

/// Defaults plus a static directory with one account per role.
pub fn test_config(dir: &TempDir) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.ui_dir = None;
    cfg.database.url = format!("sqlite://{}", dir.path().join("sigb.db").display());
    cfg.storage.root = dir.path().join("documents").display().to_string();
    cfg.directory.mode = DirectoryMode::Static;
    cfg.directory.accounts = vec![
        account("admin", "Administrateur", &["SIGB-Admins"]),
        account("biblio", "Marie Biblio", &["CN=SIGB-Bibliothecaires,OU=Groupes,DC=univ,DC=local"]),
        account("prof", "Paul Essomba", &["Enseignants"]),
        account("etudiant", "Jean Etudiant", &[]),
        account("etudiante", "Aïcha Etudiante", &[]),
    ];
    cfg
}

pub async fn test_pool(dir: &TempDir) -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("sigb.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(4).connect_with(opts).await.unwrap();
    crate::db::init_db(&pool).await.unwrap();
    pool
}

/// A full application over a throwaway database and file store.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let state = AppState::new(pool, test_config(&dir));
        let router = crate::build_router(state.clone());
        Self { router, state, _dir: dir }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.state.db
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(req).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Logs in a static account (password = username) and returns its token.
    pub async fn login(&self, username: &str) -> String {
        let body = serde_json::json!({ "username": username, "password": username });
        let (status, v) = self.call(Method::POST, "/auth/login", None, Some(body)).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", v);
        v["token"].as_str().unwrap().to_string()
    }

    /// Logs in and returns (token, user id).
    pub async fn login_with_id(&self, username: &str) -> (String, i64) {
        let token = self.login(username).await;
        let (_, me) = self.get("/auth/me", &token).await;
        (token, me["id"].as_i64().unwrap())
    }
}

pub fn book_input(title: &str, copies: i64) -> BookInput {
    BookInput {
        isbn: None,
        title: title.to_string(),
        author: "Mongo Beti".to_string(),
        publisher: None,
        publication_year: Some(1956),
        category: Some("Littérature".to_string()),
        keywords: None,
        language: None,
        location: None,
        total_copies: Some(copies),
    }
}

pub async fn seed_book(db: &SqlitePool, title: &str, copies: i64) -> BookDto {
    catalog::create_book(db, &book_input(title, copies), Utc::now()).await.unwrap()
}

/// Inserts a local user with the given role and returns its id.
pub async fn seed_user(db: &SqlitePool, username: &str, role: Role) -> i64 {
    let dir_user = DirectoryUser {
        username: username.to_string(),
        display_name: username.to_string(),
        email: None,
        department: None,
        groups: Vec::new(),
    };
    let mut conn = db.acquire().await.unwrap();
    let (user, _) = users::upsert_from_directory(&mut conn, &dir_user, &Default::default(), Utc::now())
        .await
        .unwrap();
    drop(conn);
    if role != Role::Student {
        users::update(db, user.id, Some(role), None).await.unwrap();
    }
    user.id
}
