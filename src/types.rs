use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Library user category. Drives loan quotas and route permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Librarian,
    Teacher,
    Staff,
    Student,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Admin, Role::Librarian, Role::Teacher, Role::Staff, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Librarian => "librarian",
            Role::Teacher => "teacher",
            Role::Staff => "staff",
            Role::Student => "student",
        }
    }

    /// Library staff: may run circulation desk operations.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Librarian)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "librarian" => Ok(Role::Librarian),
            "teacher" => Ok(Role::Teacher),
            "staff" => Ok(Role::Staff),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Kind of academic document. These are digital downloads and do not circulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Thesis,
    Memoir,
    InternshipReport,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Thesis => "thesis",
            DocumentKind::Memoir => "memoir",
            DocumentKind::InternshipReport => "internship_report",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thesis" => Ok(DocumentKind::Thesis),
            "memoir" => Ok(DocumentKind::Memoir),
            "internship_report" => Ok(DocumentKind::InternshipReport),
            other => Err(format!("unknown document kind: {}", other)),
        }
    }
}

macro_rules! status_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum!(LoanStatus {
    Active => "active",
    Overdue => "overdue",
    Returned => "returned",
    Lost => "lost",
});

status_enum!(ReservationStatus {
    Pending => "pending",
    Ready => "ready",
    Fulfilled => "fulfilled",
    Cancelled => "cancelled",
    Expired => "expired",
});

status_enum!(PenaltyKind {
    LateReturn => "late_return",
    Lost => "lost",
    Damaged => "damaged",
});

status_enum!(PenaltyStatus {
    Unpaid => "unpaid",
    Paid => "paid",
    Waived => "waived",
});

// ---------------- Users ----------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl UserDto {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Student)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserDto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub user: UserDto,
    pub active_loans: i64,
    pub overdue_loans: i64,
    pub active_reservations: i64,
    pub unpaid_penalties: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub total: usize,
}

// ---------------- Catalog ----------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookDto {
    pub id: i64,
    pub isbn: Option<String>,
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    pub publication_year: Option<i64>,
    pub category: Option<String>,
    pub keywords: Option<String>,
    pub language: String,
    pub location: Option<String>,
    pub total_copies: i64,
    pub available_copies: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookInput {
    pub isbn: Option<String>,
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    pub publication_year: Option<i64>,
    pub category: Option<String>,
    pub keywords: Option<String>,
    pub language: Option<String>,
    pub location: Option<String>,
    pub total_copies: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AcademicDocumentDto {
    pub id: i64,
    pub kind: String,
    pub title: String,
    pub author: String,
    pub supervisor: Option<String>,
    pub institution: Option<String>,
    pub department: Option<String>,
    pub degree: Option<String>,
    pub year: Option<i64>,
    pub abstract_text: Option<String>,
    pub keywords: Option<String>,
    pub file_key: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub download_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcademicDocumentInput {
    pub kind: DocumentKind,
    pub title: String,
    pub author: String,
    pub supervisor: Option<String>,
    pub institution: Option<String>,
    pub department: Option<String>,
    pub degree: Option<String>,
    pub year: Option<i64>,
    #[serde(alias = "abstract")]
    pub abstract_text: Option<String>,
    pub keywords: Option<String>,
}

/// A catalog search hit. Books and academic documents share one result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogItem {
    Book {
        id: i64,
        title: String,
        author: String,
        isbn: Option<String>,
        category: Option<String>,
        year: Option<i64>,
        available_copies: i64,
        total_copies: i64,
    },
    Document {
        id: i64,
        kind: String,
        title: String,
        author: String,
        supervisor: Option<String>,
        department: Option<String>,
        year: Option<i64>,
        has_file: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<CatalogItem>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
    pub cached: bool,
}

// ---------------- Circulation ----------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LoanDto {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub username: String,
    pub loan_date: String,
    pub due_date: String,
    pub return_date: Option<String>,
    pub status: String,
    pub renewal_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLoanRequest {
    pub user_id: i64,
    pub book_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnResponse {
    pub loan: LoanDto,
    pub days_late: i64,
    pub penalty: Option<PenaltyDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReservationDto {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub username: String,
    pub reservation_date: String,
    pub priority_order: i64,
    pub status: String,
    pub ready_at: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReservationRequest {
    pub book_id: i64,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PenaltyDto {
    pub id: i64,
    pub user_id: i64,
    pub loan_id: Option<i64>,
    pub kind: String,
    pub amount: i64,
    pub status: String,
    pub description: Option<String>,
    pub created_at: String,
    pub paid_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePenaltyRequest {
    pub user_id: i64,
    pub loan_id: Option<i64>,
    pub kind: Option<PenaltyKind>,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaivePenaltyRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PenaltyList {
    pub items: Vec<PenaltyDto>,
    pub unpaid_total: i64,
    pub currency: String,
}

/// Generic paginated list body.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

// ---------------- Analytics ----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_books: i64,
    pub total_copies: i64,
    pub available_copies: i64,
    pub theses: i64,
    pub memoirs: i64,
    pub internship_reports: i64,
    pub total_users: i64,
    pub active_users: i64,
    pub active_loans: i64,
    pub overdue_loans: i64,
    pub pending_reservations: i64,
    pub unpaid_penalties: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub month: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopBook {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub loan_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: String,
    pub time_ago: String,
}
