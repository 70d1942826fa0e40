//! Borrowings Domain
//!
//! Issue, return and extend book loans, and feed every change to the
//! notification pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────────────┐
//! │ BorrowingService │ ───► │ NotificationOrchestrator │  ← after commit
//! └────────┬─────────┘      └──────────────────────────┘
//!          │
//! ┌────────▼─────────┐
//! │    Repository    │  ← trait + Postgres (sea-orm)
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │   Models         │  ← Borrowing, BorrowingPolicy, IssueBook
//! └──────────────────┘
//! ```
//!
//! `PgBorrowingRepository` also implements
//! [`ReminderSource`](domain_notifications::ReminderSource) for the daily
//! reminder scan.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_borrowings::{BorrowingService, IssueBook, PgBorrowingRepository};
//!
//! let repository = PgBorrowingRepository::new(db);
//! let service = BorrowingService::new(repository, orchestrator);
//!
//! let borrowing = service.issue_book(input).await?;
//! ```

pub mod entity;
pub mod error;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod service;

/// DDL for the tables this crate reads and writes.
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");

// Re-export commonly used types
pub use error::{BorrowingError, BorrowingResult};
pub use models::{Borrowing, BorrowingPolicy, IssueBook, NewBorrowing, loan_notice};
pub use postgres::PgBorrowingRepository;
pub use repository::BorrowingRepository;
pub use service::BorrowingService;
