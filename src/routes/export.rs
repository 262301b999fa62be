use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::{ip::MaybeRemoteAddr, CurrentUser};
use crate::services::analytics::{self, Dataset, ExportRows, MAX_EXPORT_ROWS};
use crate::state::AppState;
use crate::types::{BookDto, LoanDto, PenaltyDto};
use crate::util::time::format_ts;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub dataset: String, // loans, books ou penalties
    pub format: String,  // csv ou json
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExportData<'a> {
    pub dataset: &'a str,
    pub exported_at: String,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loans: Option<&'a [LoanDto]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub books: Option<&'a [BookDto]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalties: Option<&'a [PenaltyDto]>,
}

/// Staff only: dumps a dataset as CSV or JSON.
pub async fn export_dataset(
    State(state): State<AppState>,
    current: CurrentUser,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    current.require_staff()?;
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/analytics/export", ip).await?;

    let dataset: Dataset = query.dataset.parse()?;
    if !matches!(query.format.as_str(), "csv" | "json") {
        return Err(AppError::BadRequest("Invalid format. Use 'csv' or 'json'".to_string()));
    }
    let requested_limit = query.limit.unwrap_or(MAX_EXPORT_ROWS);
    if requested_limit > MAX_EXPORT_ROWS {
        tracing::warn!("Export limit clamped from {} to {}", requested_limit, MAX_EXPORT_ROWS);
    }

    let rows = analytics::export(&state.db, dataset, requested_limit).await?;
    let now = Utc::now();
    let file_stem = format!("sigb_{}_{}", dataset.as_str(), now.format("%Y%m%d"));

    let mut response = if query.format == "csv" {
        let mut response = to_csv(&rows).into_response();
        response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
        attach(&mut response, &format!("{}.csv", file_stem));
        response
    } else {
        let (loans, books, penalties) = match &rows {
            ExportRows::Loans(v) => (Some(v.as_slice()), None, None),
            ExportRows::Books(v) => (None, Some(v.as_slice()), None),
            ExportRows::Penalties(v) => (None, None, Some(v.as_slice())),
        };
        let data = ExportData {
            dataset: dataset.as_str(),
            exported_at: format_ts(now),
            row_count: rows.len(),
            loans,
            books,
            penalties,
        };
        let mut response = Json(data).into_response();
        attach(&mut response, &format!("{}.json", file_stem));
        response
    };
    response.headers_mut().insert("x-row-count", HeaderValue::from(rows.len()));
    tracing::info!(user_id = current.id(), dataset = dataset.as_str(), format = %query.format, "Dataset exported");
    Ok(response)
}

fn attach(response: &mut Response, file_name: &str) {
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, v);
    }
}

fn to_csv(rows: &ExportRows) -> String {
    let mut out = String::new();
    match rows {
        ExportRows::Loans(loans) => {
            out.push_str("id,user_id,username,book_id,book_title,loan_date,due_date,return_date,status,renewal_count\n");
            for l in loans {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{},{}\n",
                    l.id,
                    l.user_id,
                    csv_field(&l.username),
                    l.book_id,
                    csv_field(&l.book_title),
                    l.loan_date,
                    l.due_date,
                    l.return_date.as_deref().unwrap_or(""),
                    l.status,
                    l.renewal_count,
                ));
            }
        }
        ExportRows::Books(books) => {
            out.push_str("id,isbn,title,author,publisher,publication_year,category,language,total_copies,available_copies\n");
            for b in books {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{},{}\n",
                    b.id,
                    csv_field(b.isbn.as_deref().unwrap_or("")),
                    csv_field(&b.title),
                    csv_field(&b.author),
                    csv_field(b.publisher.as_deref().unwrap_or("")),
                    b.publication_year.map(|y| y.to_string()).unwrap_or_default(),
                    csv_field(b.category.as_deref().unwrap_or("")),
                    csv_field(&b.language),
                    b.total_copies,
                    b.available_copies,
                ));
            }
        }
        ExportRows::Penalties(penalties) => {
            out.push_str("id,user_id,loan_id,kind,amount,status,description,created_at,paid_at\n");
            for p in penalties {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{}\n",
                    p.id,
                    p.user_id,
                    p.loan_id.map(|id| id.to_string()).unwrap_or_default(),
                    p.kind,
                    p.amount,
                    p.status,
                    csv_field(p.description.as_deref().unwrap_or("")),
                    p.created_at,
                    p.paid_at.as_deref().unwrap_or(""),
                ));
            }
        }
    }
    out
}

/// Quotes a CSV field and neutralises spreadsheet formula prefixes.
fn csv_field(s: &str) -> String {
    format!("\"{}\"", escape_csv(s))
}

fn escape_csv(s: &str) -> String {
    let sanitized = if s.starts_with(['=', '+', '-', '@']) { format!("'{}", s) } else { s.to_string() };
    sanitized.replace('"', "\"\"").replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("Le \"Petit\" Prince"), "Le \"\"Petit\"\" Prince");
        assert_eq!(escape_csv("=SUM(A1)"), "'=SUM(A1)");
        assert_eq!(escape_csv("ligne 1\nligne 2"), "ligne 1 ligne 2");
        assert_eq!(csv_field("Achebe, Chinua"), "\"Achebe, Chinua\"");
    }

    #[test]
    fn test_penalty_csv_layout() {
        let rows = ExportRows::Penalties(vec![PenaltyDto {
            id: 1,
            user_id: 2,
            loan_id: None,
            kind: "damaged".to_string(),
            amount: 1500,
            status: "unpaid".to_string(),
            description: Some("Couverture déchirée".to_string()),
            created_at: "2024-05-01T10:00:00Z".to_string(),
            paid_at: None,
        }]);
        let csv = to_csv(&rows);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("id,user_id,loan_id,kind,amount,status,description,created_at,paid_at"));
        assert_eq!(lines.next(), Some("1,2,,damaged,1500,unpaid,\"Couverture déchirée\",2024-05-01T10:00:00Z,"));
        assert_eq!(lines.next(), None);
    }
}
