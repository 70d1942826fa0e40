use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_notifications::{ActiveLoan, NotificationResult, ReminderSource};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbBackend, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    entity::{book, borrowing, member, policy},
    error::{BorrowingError, BorrowingResult},
    models::{Borrowing, BorrowingPolicy, NewBorrowing},
    repository::BorrowingRepository,
};

const LOAN_SELECT: &str = r#"
SELECT b.id          AS borrowing_id,
       m.email       AS member_email,
       m.name        AS member_name,
       bk.name       AS book_title,
       bk.author     AS book_author,
       l.name        AS library_name,
       b.due_date,
       b.borrowed_at,
       b.extended_at
FROM borrowings b
LEFT JOIN members m    ON m.id = b.member_id
LEFT JOIN books bk     ON bk.id = b.book_id
LEFT JOIN libraries l  ON l.id = bk.library_id
"#;

/// Borrowing joined with the names the emails need.
#[derive(Debug, FromQueryResult)]
struct LoanRow {
    borrowing_id: Uuid,
    member_email: Option<String>,
    member_name: Option<String>,
    book_title: Option<String>,
    book_author: Option<String>,
    library_name: Option<String>,
    due_date: DateTimeWithTimeZone,
    borrowed_at: DateTimeWithTimeZone,
    extended_at: Option<DateTimeWithTimeZone>,
}

impl From<LoanRow> for ActiveLoan {
    fn from(row: LoanRow) -> Self {
        Self {
            borrowing_id: row.borrowing_id,
            member_email: row.member_email,
            member_name: row.member_name.unwrap_or_default(),
            book_title: row.book_title,
            book_author: row.book_author,
            library_name: row.library_name,
            due_date: row.due_date.into(),
            borrowed_at: row.borrowed_at.into(),
            extended_at: row.extended_at.map(Into::into),
        }
    }
}

pub struct PgBorrowingRepository {
    db: DatabaseConnection,
}

impl PgBorrowingRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn loans(&self, filter: &str, values: Vec<sea_orm::Value>) -> BorrowingResult<Vec<ActiveLoan>> {
        let sql = format!("{LOAN_SELECT} WHERE {filter} ORDER BY b.due_date, b.id");
        let rows = LoanRow::find_by_statement(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(ActiveLoan::from).collect())
    }
}

#[async_trait]
impl BorrowingRepository for PgBorrowingRepository {
    async fn find_policy(&self, library_id: Uuid) -> BorrowingResult<Option<BorrowingPolicy>> {
        let model = policy::Entity::find()
            .filter(policy::Column::LibraryId.eq(library_id))
            .one(&self.db)
            .await?;

        Ok(model.map(Into::into))
    }

    async fn count_overdue_for_member(&self, member_id: Uuid, now: DateTime<Utc>) -> BorrowingResult<u64> {
        let now: DateTimeWithTimeZone = now.into();
        let count = borrowing::Entity::find()
            .filter(borrowing::Column::MemberId.eq(member_id))
            .filter(borrowing::Column::ReturnedAt.is_null())
            .filter(borrowing::Column::DueDate.lt(now))
            .count(&self.db)
            .await?;

        Ok(count)
    }

    async fn count_active_for_member(&self, member_id: Uuid) -> BorrowingResult<u64> {
        let count = borrowing::Entity::find()
            .filter(borrowing::Column::MemberId.eq(member_id))
            .filter(borrowing::Column::ReturnedAt.is_null())
            .count(&self.db)
            .await?;

        Ok(count)
    }

    async fn create(&self, input: NewBorrowing) -> BorrowingResult<Borrowing> {
        let book_id = input.book_id;
        let member_id = input.member_id;
        let phone = input.phone.clone();

        let txn = self.db.begin().await?;

        let taken = book::Entity::update_many()
            .col_expr(
                book::Column::AvailableCopies,
                Expr::col(book::Column::AvailableCopies).sub(1),
            )
            .filter(book::Column::Id.eq(book_id))
            .filter(book::Column::AvailableCopies.gt(0))
            .exec(&txn)
            .await?;
        if taken.rows_affected == 0 {
            return Err(BorrowingError::NoCopiesAvailable(book_id));
        }

        member::Entity::update_many()
            .col_expr(member::Column::Phone, Expr::value(phone))
            .filter(member::Column::Id.eq(member_id))
            .exec(&txn)
            .await?;

        let active_model: borrowing::ActiveModel = input.into();
        let model = active_model.insert(&txn).await?;

        txn.commit().await?;

        tracing::info!(borrowing_id = %model.id, book_id = %book_id, member_id = %member_id, "Created borrowing");
        Ok(model.into())
    }

    async fn get_by_id(&self, id: Uuid) -> BorrowingResult<Option<Borrowing>> {
        let model = borrowing::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }

    async fn mark_returned(&self, id: Uuid, returned_at: DateTime<Utc>) -> BorrowingResult<bool> {
        let txn = self.db.begin().await?;

        let Some(model) = borrowing::Entity::find_by_id(id).one(&txn).await? else {
            return Err(BorrowingError::NotFound(id));
        };

        let returned_at: DateTimeWithTimeZone = returned_at.into();
        let updated = borrowing::Entity::update_many()
            .col_expr(borrowing::Column::ReturnedAt, Expr::value(returned_at))
            .filter(borrowing::Column::Id.eq(id))
            .filter(borrowing::Column::ReturnedAt.is_null())
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Ok(false);
        }

        book::Entity::update_many()
            .col_expr(
                book::Column::AvailableCopies,
                Expr::col(book::Column::AvailableCopies).add(1),
            )
            .filter(book::Column::Id.eq(model.book_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        tracing::info!(borrowing_id = %id, book_id = %model.book_id, "Marked borrowing returned");
        Ok(true)
    }

    async fn mark_extended(
        &self,
        id: Uuid,
        new_due_date: DateTime<Utc>,
        extended_at: DateTime<Utc>,
    ) -> BorrowingResult<bool> {
        let new_due_date: DateTimeWithTimeZone = new_due_date.into();
        let extended_at: DateTimeWithTimeZone = extended_at.into();

        let updated = borrowing::Entity::update_many()
            .col_expr(borrowing::Column::DueDate, Expr::value(new_due_date))
            .col_expr(borrowing::Column::ExtendedAt, Expr::value(extended_at))
            .filter(borrowing::Column::Id.eq(id))
            .filter(borrowing::Column::ExtendedAt.is_null())
            .filter(borrowing::Column::ReturnedAt.is_null())
            .exec(&self.db)
            .await?;

        let extended = updated.rows_affected > 0;
        if extended {
            tracing::info!(borrowing_id = %id, new_due_date = %new_due_date, "Extended borrowing");
        }
        Ok(extended)
    }

    async fn loan(&self, id: Uuid) -> BorrowingResult<Option<ActiveLoan>> {
        let mut loans = self.loans("b.id = $1", vec![id.into()]).await?;
        Ok(loans.pop())
    }
}

#[async_trait]
impl ReminderSource for PgBorrowingRepository {
    async fn overdue_loans(&self, now: DateTime<Utc>) -> NotificationResult<Vec<ActiveLoan>> {
        let loans = self
            .loans("b.returned_at IS NULL AND b.due_date < $1", vec![now.into()])
            .await?;
        Ok(loans)
    }

    async fn loans_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> NotificationResult<Vec<ActiveLoan>> {
        let loans = self
            .loans(
                "b.returned_at IS NULL AND b.due_date >= $1 AND b.due_date <= $2",
                vec![from.into(), to.into()],
            )
            .await?;
        Ok(loans)
    }
}
