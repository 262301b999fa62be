#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    use crate::tests::support::TestApp;

    const BOUNDARY: &str = "sigb-test-boundary";

    fn multipart_body(file_name: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn upload(app: &TestApp, token: &str, doc_id: i64, file_name: &str, content: &[u8]) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("/documents/{}/file", doc_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(multipart_body(file_name, content)))
            .unwrap();
        app.send(req).await
    }

    async fn create_thesis(app: &TestApp, token: &str, title: &str) -> i64 {
        let (status, doc) = app
            .post(
                "/documents",
                token,
                json!({
                    "kind": "thesis",
                    "title": title,
                    "author": "Ngono Brigitte",
                    "supervisor": "Pr. Fotso",
                    "department": "Génie électrique",
                    "year": 2021
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", doc);
        doc["id"].as_i64().unwrap()
    }

    async fn create_book(app: &TestApp, token: &str, title: &str, copies: i64) -> i64 {
        let (status, book) = app
            .post(
                "/books",
                token,
                json!({ "title": title, "author": "Mongo Beti", "category": "Littérature", "total_copies": copies }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", book);
        book["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_login_maps_directory_groups_to_roles() {
        let app = TestApp::new().await;

        for (username, role) in [("admin", "admin"), ("biblio", "librarian"), ("prof", "teacher"), ("etudiant", "student")] {
            let token = app.login(username).await;
            let (status, me) = app.get("/auth/me", &token).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(me["username"], username);
            assert_eq!(me["role"], role);
            assert_eq!(me["is_active"], true);
            assert!(me["last_login_at"].is_string());
        }
        assert_eq!(app.state.metrics.logins.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let app = TestApp::new().await;

        let (status, body) = app
            .call(Method::POST, "/auth/login", None, Some(json!({ "username": "admin", "password": "wrong" })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = app
            .call(Method::POST, "/auth/login", None, Some(json!({ "username": "inconnu", "password": "x" })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(app.state.metrics.login_failures.load(Ordering::Relaxed), 2);

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(app.db()).await.unwrap();
        assert_eq!(users, 0);
    }

    #[tokio::test]
    async fn test_requests_without_session_are_rejected() {
        let app = TestApp::new().await;

        let (status, _) = app.call(Method::GET, "/books", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.get("/books", "not-a-real-token").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = app.login("etudiant").await;
        let (status, _) = app.call(Method::POST, "/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.get("/auth/me", &token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_book_crud_and_permissions() {
        let app = TestApp::new().await;
        let student = app.login("etudiant").await;
        let librarian = app.login("biblio").await;

        let payload = json!({ "isbn": "978-2-7011-5821-6", "title": "Ville cruelle", "author": "Eza Boto", "total_copies": 2 });
        let (status, _) = app.post("/books", &student, payload.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, book) = app.post("/books", &librarian, payload.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(book["isbn"], "9782701158216");
        assert_eq!(book["available_copies"], 2);
        let id = book["id"].as_i64().unwrap();

        let (status, _) = app.post("/books", &librarian, payload).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) =
            app.post("/books", &librarian, json!({ "title": "  ", "author": "X", "total_copies": 1 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "title");

        let (status, book) = app
            .call(
                Method::PUT,
                &format!("/books/{}", id),
                Some(&librarian),
                Some(json!({ "title": "Ville cruelle", "author": "Eza Boto", "total_copies": 5 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(book["total_copies"], 5);
        assert_eq!(book["available_copies"], 5);

        let (status, page) = app.get("/books", &student).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 1);

        let (status, _) = app.call(Method::DELETE, &format!("/books/{}", id), Some(&librarian), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&format!("/books/{}", id), &student).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_catalog_search_and_cache() {
        let app = TestApp::new().await;
        let librarian = app.login("biblio").await;
        create_book(&app, &librarian, "Le pauvre Christ de Bomba", 1).await;
        create_book(&app, &librarian, "Ville cruelle", 2).await;
        create_thesis(&app, &librarian, "Analyse des réseaux électriques").await;

        let (status, res) = app.call(Method::GET, "/catalog/search?q=bomba", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res["total_count"], 1);
        assert_eq!(res["items"][0]["type"], "book");
        assert_eq!(res["cached"], false);

        let (_, res) = app.call(Method::GET, "/catalog/search?q=bomba", None, None).await;
        assert_eq!(res["cached"], true);
        assert_eq!(app.state.metrics.cache_hits.load(Ordering::Relaxed), 1);

        // Une écriture vide le cache
        create_book(&app, &librarian, "Perpétue", 1).await;
        let (_, res) = app.call(Method::GET, "/catalog/search?q=bomba", None, None).await;
        assert_eq!(res["cached"], false);

        let (_, res) = app.call(Method::GET, "/catalog/search?kind=thesis", None, None).await;
        assert_eq!(res["total_count"], 1);
        assert_eq!(res["items"][0]["type"], "document");
        assert_eq!(res["items"][0]["has_file"], false);

        let (_, res) = app.call(Method::GET, "/catalog/search", None, None).await;
        assert_eq!(res["total_count"], 4);
        let titles: Vec<&str> = res["items"].as_array().unwrap().iter().map(|i| i["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["Analyse des réseaux électriques", "Le pauvre Christ de Bomba", "Perpétue", "Ville cruelle"]);

        let (_, res) = app.call(Method::GET, "/catalog/search?category=Litt%C3%A9rature", None, None).await;
        assert_eq!(res["total_count"], 3);

        let long = "x".repeat(201);
        let (status, body) = app.call(Method::GET, &format!("/catalog/search?q={}", long), None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");

        let (status, cats) = app.call(Method::GET, "/catalog/categories", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cats, json!([{ "category": "Littérature", "count": 3 }]));
    }

    #[tokio::test]
    async fn test_document_upload_and_download() {
        let app = TestApp::new().await;
        let librarian = app.login("biblio").await;
        let student = app.login("etudiant").await;
        let doc_id = create_thesis(&app, &librarian, "Commande des onduleurs").await;

        let (status, _) = app.get(&format!("/documents/{}/file", doc_id), &student).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = upload(&app, &student, doc_id, "these.pdf", b"%PDF-1.4").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = upload(&app, &librarian, doc_id, "virus.exe", b"MZ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "file");

        let (status, body) = upload(&app, &librarian, doc_id, "vide.pdf", b"").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

        let content = b"%PDF-1.4 these de doctorat";
        let (status, doc) = upload(&app, &librarian, doc_id, "These finale.pdf", content).await;
        assert_eq!(status, StatusCode::OK, "{}", doc);
        assert_eq!(doc["file_name"], "These finale.pdf");
        assert_eq!(doc["file_size"], content.len() as i64);
        assert_eq!(doc["mime_type"], "application/pdf");
        let first_key = doc["file_key"].as_str().unwrap().to_string();
        assert!(first_key.starts_with(&format!("academic/{}/", doc_id)));

        // Remplacement : l'ancien fichier disparaît
        let (status, doc) = upload(&app, &librarian, doc_id, "v2.pdf", b"%PDF-1.5").await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(doc["file_key"].as_str().unwrap(), first_key);
        assert!(!app.state.store.exists(&first_key).await.unwrap());

        let req = Request::builder()
            .uri(format!("/documents/{}/file", doc_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", student))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert_eq!(disposition, "attachment; filename=\"v2.pdf\"");
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "application/pdf");
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "8");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"%PDF-1.5");

        let (_, doc) = app.get(&format!("/documents/{}", doc_id), &student).await;
        assert_eq!(doc["download_count"], 1);
        assert_eq!(app.state.metrics.uploads.load(Ordering::Relaxed), 2);
        assert_eq!(app.state.metrics.downloads.load(Ordering::Relaxed), 1);

        let (status, _) = app.call(Method::DELETE, &format!("/documents/{}", doc_id), Some(&librarian), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!app.state.store.exists(doc["file_key"].as_str().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_circulation_over_http() {
        let app = TestApp::new().await;
        let librarian = app.login("biblio").await;
        let (borrower, borrower_id) = app.login_with_id("etudiant").await;
        let (waiting, waiting_id) = app.login_with_id("etudiante").await;
        let book_id = create_book(&app, &librarian, "Mission terminée", 1).await;

        // Exemplaire libre : pas de réservation
        let (status, body) = app.post("/reservations", &waiting, json!({ "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"]["message"].as_str().unwrap().contains("borrow it directly"));

        let (status, _) = app.post("/loans", &borrower, json!({ "user_id": borrower_id, "book_id": book_id })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, loan) = app.post("/loans", &librarian, json!({ "user_id": borrower_id, "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CREATED, "{}", loan);
        let loan_id = loan["id"].as_i64().unwrap();
        assert_eq!(loan["status"], "active");

        let (status, reservation) = app.post("/reservations", &waiting, json!({ "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(reservation["priority_order"], 1);
        assert_eq!(reservation["status"], "pending");

        let (status, _) = app.post("/reservations", &waiting, json!({ "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Un étudiant ne réserve pas pour un autre
        let (status, _) =
            app.post("/reservations", &borrower, json!({ "book_id": book_id, "user_id": waiting_id })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, mine) = app.get("/me/loans", &borrower).await;
        assert_eq!(mine["total_count"], 1);
        let (status, _) = app.get(&format!("/loans/{}", loan_id), &waiting).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.call(Method::POST, &format!("/loans/{}/renew", loan_id), Some(&borrower), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"]["message"].as_str().unwrap().contains("reserved"));

        let (status, queue) = app.get(&format!("/books/{}/reservations", book_id), &librarian).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queue.as_array().unwrap().len(), 1);

        let (status, returned) =
            app.call(Method::POST, &format!("/loans/{}/return", loan_id), Some(&librarian), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(returned["loan"]["status"], "returned");
        assert_eq!(returned["days_late"], 0);
        assert!(returned["penalty"].is_null());

        let (status, _) = app.call(Method::POST, &format!("/loans/{}/return", loan_id), Some(&librarian), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, holds) = app.get("/me/reservations", &waiting).await;
        assert_eq!(holds[0]["status"], "ready");
        assert!(holds[0]["expires_at"].is_string());

        // Le livre est gardé pour la lectrice en tête de file
        let (status, _) = app.post("/loans", &librarian, json!({ "user_id": borrower_id, "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = app.post("/loans", &librarian, json!({ "user_id": waiting_id, "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, holds) = app.get("/me/reservations", &waiting).await;
        assert_eq!(holds[0]["status"], "fulfilled");

        let (_, summary) = app.get(&format!("/users/{}/summary", waiting_id), &waiting).await;
        assert_eq!(summary["active_loans"], 1);
        assert_eq!(summary["active_reservations"], 0);

        assert_eq!(app.state.metrics.loans_created.load(Ordering::Relaxed), 2);
        assert_eq!(app.state.metrics.loans_returned.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cancel_reservation_permissions() {
        let app = TestApp::new().await;
        let librarian = app.login("biblio").await;
        let (_, borrower_id) = app.login_with_id("etudiant").await;
        let (waiting, _) = app.login_with_id("etudiante").await;
        let prof = app.login("prof").await;
        let book_id = create_book(&app, &librarian, "Les bouts de bois de Dieu", 1).await;
        app.post("/loans", &librarian, json!({ "user_id": borrower_id, "book_id": book_id })).await;

        let (_, reservation) = app.post("/reservations", &waiting, json!({ "book_id": book_id })).await;
        let id = reservation["id"].as_i64().unwrap();

        let (status, _) = app.call(Method::DELETE, &format!("/reservations/{}", id), Some(&prof), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, cancelled) = app.call(Method::DELETE, &format!("/reservations/{}", id), Some(&waiting), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");
        let (status, _) = app.call(Method::DELETE, &format!("/reservations/{}", id), Some(&waiting), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_admin_user_management() {
        let app = TestApp::new().await;
        let (student, student_id) = app.login_with_id("etudiant").await;
        let (admin, admin_id) = app.login_with_id("admin").await;
        let librarian = app.login("biblio").await;

        let (status, _) = app.get("/users", &student).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, page) = app.get("/users?role=student", &librarian).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 1);
        let (status, _) = app.get("/users?role=chef", &librarian).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/users/{}", student_id);
        let (status, _) = app.call(Method::PATCH, &uri, Some(&librarian), Some(json!({ "is_active": false }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            app.call(Method::PATCH, &format!("/users/{}", admin_id), Some(&admin), Some(json!({ "role": "student" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, user) = app.call(Method::PATCH, &uri, Some(&admin), Some(json!({ "is_active": false }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["is_active"], false);

        // Sessions révoquées, connexion refusée
        let (status, _) = app.get("/auth/me", &student).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = app
            .call(Method::POST, "/auth/login", None, Some(json!({ "username": "etudiant", "password": "etudiant" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        // Un rôle local survit à la connexion sans groupe mappé
        let (_, other_id) = app.login_with_id("etudiante").await;
        app.call(Method::PATCH, &format!("/users/{}", other_id), Some(&admin), Some(json!({ "role": "staff" }))).await;
        let token = app.login("etudiante").await;
        let (_, me) = app.get("/auth/me", &token).await;
        assert_eq!(me["role"], "staff");
    }

    #[tokio::test]
    async fn test_directory_sync() {
        let app = TestApp::new().await;
        let admin = app.login("admin").await;
        let librarian = app.login("biblio").await;

        let (status, _) = app.call(Method::POST, "/directory/sync", Some(&librarian), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, report) = app.call(Method::POST, "/directory/sync", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report, json!({ "created": 3, "updated": 2, "total": 5 }));

        let (_, page) = app.get("/users?role=teacher", &admin).await;
        assert_eq!(page["items"][0]["username"], "prof");
    }

    #[tokio::test]
    async fn test_penalty_endpoints() {
        let app = TestApp::new().await;
        let librarian = app.login("biblio").await;
        let (student, student_id) = app.login_with_id("etudiant").await;

        let (status, _) = app.post("/penalties", &student, json!({ "user_id": student_id, "amount": 500 })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.post("/penalties", &librarian, json!({ "user_id": student_id, "amount": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app.post("/penalties", &librarian, json!({ "user_id": 9999, "amount": 500 })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, first) = app
            .post("/penalties", &librarian, json!({ "user_id": student_id, "amount": 2000, "description": "Reliure abîmée" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["kind"], "damaged");
        assert_eq!(first["status"], "unpaid");
        let (_, second) = app.post("/penalties", &librarian, json!({ "user_id": student_id, "amount": 700 })).await;

        let (status, mine) = app.get("/me/penalties", &student).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine["unpaid_total"], 2700);
        assert_eq!(mine["currency"], "FCFA");
        assert_eq!(mine["items"].as_array().unwrap().len(), 2);

        let pay = format!("/penalties/{}/pay", first["id"]);
        let (status, paid) = app.call(Method::POST, &pay, Some(&librarian), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paid["status"], "paid");
        assert!(paid["paid_at"].is_string());
        let (status, _) = app.call(Method::POST, &pay, Some(&librarian), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let waive = format!("/penalties/{}/waive", second["id"]);
        let (status, _) = app.post(&waive, &librarian, json!({ "reason": "  " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, waived) = app.post(&waive, &librarian, json!({ "reason": "Boursier" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(waived["status"], "waived");
        assert!(waived["description"].as_str().unwrap().contains("Boursier"));

        let (_, unpaid) = app.get("/penalties?status=unpaid", &librarian).await;
        assert_eq!(unpaid.as_array().unwrap().len(), 0);
        let (_, mine) = app.get("/me/penalties", &student).await;
        assert_eq!(mine["unpaid_total"], 0);
    }

    #[tokio::test]
    async fn test_analytics_and_export() {
        let app = TestApp::new().await;
        let librarian = app.login("biblio").await;
        let (student, student_id) = app.login_with_id("etudiant").await;
        let book_id = create_book(&app, &librarian, "L'enfant noir, \"édition\"", 3).await;
        create_thesis(&app, &librarian, "Hydrologie du Wouri").await;
        app.post("/loans", &librarian, json!({ "user_id": student_id, "book_id": book_id })).await;

        let (status, _) = app.get("/analytics/dashboard", &student).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, dash) = app.get("/analytics/dashboard", &librarian).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dash["total_books"], 1);
        assert_eq!(dash["total_copies"], 3);
        assert_eq!(dash["available_copies"], 2);
        assert_eq!(dash["theses"], 1);
        assert_eq!(dash["active_loans"], 1);
        assert_eq!(dash["overdue_loans"], 0);

        let (_, monthly) = app.get("/analytics/loans/monthly?months=3", &librarian).await;
        let monthly = monthly.as_array().unwrap();
        assert_eq!(monthly.len(), 3);
        assert_eq!(monthly[2]["count"], 1);
        assert_eq!(monthly[0]["count"], 0);

        let (_, top) = app.get("/analytics/top-books", &librarian).await;
        assert_eq!(top[0]["book_id"], book_id);
        assert_eq!(top[0]["loan_count"], 1);

        let (_, feed) = app.get("/analytics/activity?limit=5", &librarian).await;
        let feed = feed.as_array().unwrap();
        assert!(!feed.is_empty());
        assert_eq!(feed[0]["action"], "loan");
        assert_eq!(feed[0]["time_ago"], "à l'instant");

        let req = Request::builder()
            .uri("/analytics/export?dataset=books&format=csv")
            .header(header::AUTHORIZATION, format!("Bearer {}", librarian))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/csv; charset=utf-8");
        let disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"sigb_books_"));
        let csv = String::from_utf8(response.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"L'enfant noir, \"\"édition\"\"\""));

        let (status, json_export) = app.get("/analytics/export?dataset=loans&format=json", &librarian).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_export["dataset"], "loans");
        assert_eq!(json_export["row_count"], 1);
        assert_eq!(json_export["loans"][0]["user_id"], student_id);

        let (status, _) = app.get("/analytics/export?dataset=users&format=csv", &librarian).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app.get("/analytics/export?dataset=books&format=xml", &librarian).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_security_headers_and_no_store() {
        let app = TestApp::new().await;
        let token = app.login("etudiant").await;

        let req = Request::builder()
            .uri("/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert!(headers.contains_key("x-frame-options"));
        assert!(headers.contains_key("referrer-policy"));
        assert!(headers.get(header::CACHE_CONTROL).unwrap().to_str().unwrap().contains("no-store"));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let app = TestApp::new().await;
        let (status, body) = app.call(Method::GET, "/documents/%2e%2e/etc", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_PATH");
    }
}
