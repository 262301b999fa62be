use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::{ip::MaybeRemoteAddr, CurrentUser};
use crate::routes::page_bounds;
use crate::services::{activity, catalog};
use crate::state::AppState;
use crate::storage::{file_extension, mime_for_extension, sanitize_file_name};
use crate::types::{AcademicDocumentDto, AcademicDocumentInput, DocumentKind, Page};

#[derive(Debug, Deserialize)]
pub struct DocumentListQuery {
    pub kind: Option<String>,
    pub department: Option<String>,
    pub year: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    _current: CurrentUser,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Page<AcademicDocumentDto>>> {
    let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(k) => Some(k.parse::<DocumentKind>().map_err(AppError::BadRequest)?),
        None => None,
    };
    let filter = catalog::DocumentFilter { kind, department: query.department, year: query.year };
    let (limit, offset) = page_bounds(query.limit, query.offset);
    Ok(Json(catalog::list_documents(&state.db, &filter, limit, offset).await?))
}

pub async fn get_document(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<AcademicDocumentDto>> {
    Ok(Json(catalog::get_document(&state.db, id).await?))
}

pub async fn create_document(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<AcademicDocumentInput>,
) -> AppResult<(StatusCode, Json<AcademicDocumentDto>)> {
    current.require_staff()?;
    let doc = catalog::create_document(&state.db, &input, Utc::now()).await?;
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "create_document", "document", Some(doc.id), Some(doc.title.clone()))
        .await;
    Ok((StatusCode::CREATED, Json(doc)))
}

pub async fn update_document(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<AcademicDocumentInput>,
) -> AppResult<Json<AcademicDocumentDto>> {
    current.require_staff()?;
    let doc = catalog::update_document(&state.db, id, &input, Utc::now()).await?;
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "update_document", "document", Some(id), None).await;
    Ok(Json(doc))
}

pub async fn delete_document(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    current.require_staff()?;
    catalog::delete_document(&state.db, state.store.as_ref(), id).await?;
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "delete_document", "document", Some(id), None).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Stores the multipart field `file` as the document's file, replacing any
/// previous one.
pub async fn upload_file(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> AppResult<Json<AcademicDocumentDto>> {
    current.require_staff()?;
    // 404 avant de lire le corps
    catalog::get_document(&state.db, id).await?;

    let cfg = &state.config.storage;
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = sanitize_file_name(field.file_name().unwrap_or("document"));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read uploaded file: {}", e)))?;
        upload = Some((file_name, bytes.to_vec()));
        break;
    }
    let (file_name, bytes) =
        upload.ok_or_else(|| AppError::BadRequest("Missing multipart field 'file'".to_string()))?;

    let ext = file_extension(&file_name)
        .filter(|e| cfg.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .ok_or_else(|| AppError::ValidationError {
            field: "file".to_string(),
            message: format!("Allowed file types: {}", cfg.allowed_extensions.join(", ")),
        })?;
    if bytes.is_empty() {
        return Err(AppError::ValidationError { field: "file".to_string(), message: "File is empty".to_string() });
    }
    if bytes.len() > cfg.max_upload_bytes {
        return Err(AppError::ValidationError {
            field: "file".to_string(),
            message: format!("File exceeds {} bytes", cfg.max_upload_bytes),
        });
    }

    let key = format!("academic/{}/{}.{}", id, Uuid::new_v4().simple(), ext);
    state.store.put(&key, &bytes).await?;
    let size = bytes.len() as i64;
    let previous = match catalog::attach_file(&state.db, id, &key, &file_name, size, mime_for_extension(&ext), Utc::now())
        .await
    {
        Ok(previous) => previous,
        Err(e) => {
            // Le fichier n'est référencé par aucune ligne
            if let Err(del) = state.store.delete(&key).await {
                tracing::warn!(key = %key, "Failed to remove orphaned upload: {}", del);
            }
            return Err(e);
        }
    };
    if let Some(old) = previous {
        if let Err(e) = state.store.delete(&old).await {
            tracing::warn!(document_id = id, key = %old, "Failed to delete replaced file: {}", e);
        }
    }

    Metrics::inc(&state.metrics.uploads);
    state.catalog_cache.invalidate();
    tracing::info!(document_id = id, key = %key, size, "Document file uploaded");
    activity::record(&state.db, Some(current.id()), "upload", "document", Some(id), Some(file_name)).await;
    Ok(Json(catalog::get_document(&state.db, id).await?))
}

/// `filename="..."` value that survives any header parser.
fn ascii_file_name(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' { c } else { '_' })
        .collect();
    if ascii.trim().is_empty() {
        "document".to_string()
    } else {
        ascii
    }
}

pub async fn download_file(
    State(state): State<AppState>,
    current: CurrentUser,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/documents/{id}/file", ip).await?;

    let doc = catalog::get_document(&state.db, id).await?;
    let key = doc.file_key.as_deref().ok_or_else(|| AppError::NotFound("Document has no file".to_string()))?;
    let file = state.store.open(key).await?;
    catalog::count_download(&state.db, id).await?;
    Metrics::inc(&state.metrics.downloads);
    activity::record(&state.db, Some(current.id()), "download", "document", Some(id), None).await;

    let file_name = ascii_file_name(doc.file_name.as_deref().unwrap_or("document"));
    let mime = doc.mime_type.as_deref().unwrap_or("application/octet-stream");

    // Lecture par morceaux : le fichier n'est jamais chargé en entier
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file.reader)));
    response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    if let Ok(v) = HeaderValue::from_str(mime) {
        response.headers_mut().insert(header::CONTENT_TYPE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, v);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_file_name() {
        assert_eq!(ascii_file_name("these finale.pdf"), "these finale.pdf");
        assert_eq!(ascii_file_name("Mémoire.pdf"), "M_moire.pdf");
        assert_eq!(ascii_file_name("a\"b.pdf"), "a_b.pdf");
        assert_eq!(ascii_file_name("   "), "document");
    }
}
