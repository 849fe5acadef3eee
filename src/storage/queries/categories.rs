//! Category CRUD operations.
//!
//! Categories are owned by the (excluded) web layer's CRUD surface; the
//! triage pipeline only reads them to build classification prompts.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Category, CategoryId, UserId};
use crate::storage::database::{Database, Result};

/// Inserts a new category.
pub async fn insert(db: &Database, category: &Category) -> Result<()> {
    let category = category.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO categories (id, user_id, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                category.id.0,
                category.user_id.0,
                category.name,
                category.description,
                now
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a category by id.
pub async fn get(db: &Database, id: &CategoryId) -> Result<Option<Category>> {
    let id = id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, description FROM categories WHERE id = ?1",
        )?;
        let result = stmt.query_row([&id.0], row_to_category).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves all of a user's categories, in name order.
///
/// An empty result is valid: classification then always degrades to
/// "no category".
pub async fn for_user(db: &Database, user_id: &UserId) -> Result<Vec<Category>> {
    let user_id = user_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, description FROM categories
             WHERE user_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([&user_id.0], row_to_category)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Deletes a category. Messages referencing it keep their rows; the
/// reference is nulled by the schema's SET NULL action.
pub async fn delete(db: &Database, id: &CategoryId) -> Result<()> {
    let id = id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM categories WHERE id = ?1", [&id.0])?;
        Ok(())
    })
    .await
}

fn row_to_category(row: &Row<'_>) -> std::result::Result<Category, rusqlite::Error> {
    Ok(Category {
        id: CategoryId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_category(id: &str, user: &str, name: &str) -> Category {
        Category {
            id: CategoryId::from(id),
            user_id: UserId::from(user),
            name: name.to_string(),
            description: format!("{name} mail"),
        }
    }

    #[tokio::test]
    async fn insert_and_get_category() {
        let db = Database::open_in_memory().await.unwrap();
        let category = make_category("c1", "u1", "Newsletters");

        insert(&db, &category).await.unwrap();

        let stored = get(&db, &category.id).await.unwrap().unwrap();
        assert_eq!(stored, category);
    }

    #[tokio::test]
    async fn for_user_returns_only_that_users_categories() {
        let db = Database::open_in_memory().await.unwrap();

        insert(&db, &make_category("c1", "u1", "Newsletters"))
            .await
            .unwrap();
        insert(&db, &make_category("c2", "u1", "Receipts"))
            .await
            .unwrap();
        insert(&db, &make_category("c3", "u2", "Work")).await.unwrap();

        let mine = for_user(&db, &UserId::from("u1")).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].name, "Newsletters");
        assert_eq!(mine[1].name, "Receipts");
    }

    #[tokio::test]
    async fn for_user_with_no_categories_is_empty_not_error() {
        let db = Database::open_in_memory().await.unwrap();
        let none = for_user(&db, &UserId::from("nobody")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_category() {
        let db = Database::open_in_memory().await.unwrap();
        let category = make_category("c1", "u1", "Newsletters");
        insert(&db, &category).await.unwrap();

        delete(&db, &category.id).await.unwrap();
        assert!(get(&db, &category.id).await.unwrap().is_none());
    }
}
