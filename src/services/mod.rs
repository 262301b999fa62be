//! Domain logic shared by the HTTP handlers and the background jobs.

pub mod activity;
pub mod analytics;
pub mod cache;
pub mod catalog;
pub mod loans;
pub mod penalties;
pub mod reservations;
pub mod users;
