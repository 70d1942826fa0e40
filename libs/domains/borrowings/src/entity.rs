//! Sea-ORM entities for the tables the borrowing workflow writes to.
//!
//! `schema.sql` at the crate root holds the matching DDL.

/// `borrowings`
pub mod borrowing {
    use sea_orm::ActiveValue::Set;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "borrowings")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub book_id: Uuid,
        pub member_id: Uuid,
        pub librarian_id: Uuid,
        #[sea_orm(column_type = "Text")]
        pub phone_at_borrow: String,
        pub borrowed_at: DateTimeWithTimeZone,
        pub due_date: DateTimeWithTimeZone,
        pub extended_at: Option<DateTimeWithTimeZone>,
        pub returned_at: Option<DateTimeWithTimeZone>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::Borrowing {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                book_id: model.book_id,
                member_id: model.member_id,
                librarian_id: model.librarian_id,
                phone_at_borrow: model.phone_at_borrow,
                borrowed_at: model.borrowed_at.into(),
                due_date: model.due_date.into(),
                extended_at: model.extended_at.map(Into::into),
                returned_at: model.returned_at.map(Into::into),
            }
        }
    }

    impl From<crate::models::NewBorrowing> for ActiveModel {
        fn from(input: crate::models::NewBorrowing) -> Self {
            ActiveModel {
                id: Set(Uuid::now_v7()),
                book_id: Set(input.book_id),
                member_id: Set(input.member_id),
                librarian_id: Set(input.librarian_id),
                phone_at_borrow: Set(input.phone),
                borrowed_at: Set(input.borrowed_at.into()),
                due_date: Set(input.due_date.into()),
                extended_at: Set(None),
                returned_at: Set(None),
            }
        }
    }
}

/// `borrowing_policies`, one row per library.
pub mod policy {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "borrowing_policies")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        #[sea_orm(unique)]
        pub library_id: Uuid,
        pub max_books_per_member: i32,
        pub borrow_duration_days: i32,
        pub extension_duration_days: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::BorrowingPolicy {
        fn from(model: Model) -> Self {
            Self {
                max_books_per_member: model.max_books_per_member,
                borrow_duration_days: model.borrow_duration_days,
                extension_duration_days: model.extension_duration_days,
            }
        }
    }
}

/// `books`, only the columns lending touches.
pub mod book {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "books")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub library_id: Uuid,
        pub name: String,
        pub author: String,
        pub total_copies: i32,
        pub available_copies: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// `members`
pub mod member {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "members")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub library_id: Uuid,
        pub name: String,
        pub email: String,
        pub phone: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
