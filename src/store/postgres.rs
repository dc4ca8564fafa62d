use async_trait::async_trait;
use sea_orm::prelude::Expr;
use sea_orm::*;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    Change, ChangeFeed, Direction, Document, DocumentStore, Filter, FilterOp, Query, StoreError,
    Update, empty_body, ensure_object,
};
use crate::models::documents;

/// Upserts race on the insert of a missing row; one retry re-reads the winner.
const UPSERT_ATTEMPTS: usize = 2;

/// Postgres-backed document store.
///
/// Conditional writes run in a transaction holding `SELECT ... FOR UPDATE` on
/// the row, so preconditions are checked against the committed state.
pub struct PgDocumentStore {
    db: DatabaseConnection,
    feed: ChangeFeed,
}

impl PgDocumentStore {
    pub fn new(db: DatabaseConnection, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    async fn try_update(
        &self,
        collection: &str,
        id: &str,
        update: &Update,
    ) -> Result<Document, DbOrStore> {
        let txn = self.db.begin().await?;

        let existing = documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let (mut body, version, is_new) = match existing {
            Some(row) => (row.body, row.version as u64, false),
            None if update.upsert => (empty_body(), 0, true),
            None => return Err(StoreError::not_found(collection, id).into()),
        };

        update.apply_to(&mut body, version)?;

        let row = documents::ActiveModel {
            collection: Set(collection.to_string()),
            id: Set(id.to_string()),
            body: Set(body),
            version: Set(version as i64 + 1),
            updated_at: Set(chrono::Utc::now()),
        };
        let saved = if is_new {
            row.insert(&txn).await?
        } else {
            row.update(&txn).await?
        };

        txn.commit().await?;
        Ok(into_document(saved))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(row.map(into_document))
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
    ) -> Result<Document, StoreError> {
        ensure_object(collection, id, &body)?;

        let row = documents::ActiveModel {
            collection: Set(collection.to_string()),
            id: Set(id.to_string()),
            body: Set(body),
            version: Set(1),
            updated_at: Set(chrono::Utc::now()),
        };

        match row.insert(&self.db).await {
            Ok(saved) => {
                self.feed.publish(Change::new(collection, id)).await;
                Ok(into_document(saved))
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::already_exists(collection, id)),
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: Update,
    ) -> Result<Document, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_update(collection, id, &update).await {
                Ok(document) => {
                    self.feed.publish(Change::new(collection, id)).await;
                    return Ok(document);
                }
                Err(DbOrStore::Db(e))
                    if update.upsert && attempt < UPSERT_ATTEMPTS && is_unique_violation(&e) =>
                {
                    debug!(collection, id, "Upsert lost insert race, retrying");
                }
                Err(DbOrStore::Db(e)) => return Err(backend(e)),
                Err(DbOrStore::Store(e)) => return Err(e),
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = documents::Entity::delete_by_id((collection.to_string(), id.to_string()))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        let removed = result.rows_affected > 0;
        if removed {
            self.feed.publish(Change::new(collection, id)).await;
        }
        Ok(removed)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut select =
            documents::Entity::find().filter(documents::Column::Collection.eq(query.collection.clone()));

        for filter in &query.filters {
            let (sql, value) = filter_sql(filter);
            select = select.filter(Expr::cust_with_values(sql, [Value::from(value)]));
        }

        if let Some((field, direction)) = &query.order_by {
            let order = match direction {
                Direction::Asc => Order::Asc,
                Direction::Desc => Order::Desc,
            };
            select = select
                .order_by(Expr::cust(field_path(field)), order.clone())
                .order_by(documents::Column::Id, order);
        } else {
            select = select.order_by_asc(documents::Column::Id);
        }

        if let Some(limit) = query.limit {
            select = select.limit(limit as u64);
        }

        let rows = select.all(&self.db).await.map_err(backend)?;
        Ok(rows.into_iter().map(into_document).collect())
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.feed.subscribe()
    }
}

enum DbOrStore {
    Db(DbErr),
    Store(StoreError),
}

impl From<DbErr> for DbOrStore {
    fn from(e: DbErr) -> Self {
        DbOrStore::Db(e)
    }
}

impl From<StoreError> for DbOrStore {
    fn from(e: StoreError) -> Self {
        DbOrStore::Store(e)
    }
}

/// Equality is a containment test so the GIN index on `body` applies; ranges
/// compare the jsonb field directly.
fn filter_sql(filter: &Filter) -> (String, JsonValue) {
    match filter.op {
        FilterOp::Eq => {
            let mut fragment = serde_json::Map::new();
            fragment.insert(filter.field.clone(), filter.value.clone());
            ("body @> $1::jsonb".to_string(), JsonValue::Object(fragment))
        }
        op => (
            format!("{} {} $1::jsonb", field_path(&filter.field), op.sql()),
            filter.value.clone(),
        ),
    }
}

/// `body -> 'field'` as a literal, matching the expression indexes of the
/// `documents` table so the planner can use them.
fn field_path(field: &str) -> String {
    format!("body -> '{}'", field.replace('\'', "''"))
}

fn into_document(row: documents::Model) -> Document {
    Document {
        id: row.id,
        version: row.version as u64,
        body: row.body,
    }
}

fn is_unique_violation(e: &DbErr) -> bool {
    matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn backend(e: DbErr) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_expression_matches_the_created_at_index() {
        assert_eq!(field_path("createdAt"), "body -> 'createdAt'");
    }

    #[test]
    fn equality_uses_containment() {
        let filter = Filter {
            field: "status".to_string(),
            op: FilterOp::Eq,
            value: serde_json::json!("pending"),
        };
        let (sql, value) = filter_sql(&filter);
        assert_eq!(sql, "body @> $1::jsonb");
        assert_eq!(value, serde_json::json!({ "status": "pending" }));
    }

    #[test]
    fn ranges_compare_the_field() {
        let filter = Filter {
            field: "rating".to_string(),
            op: FilterOp::Gte,
            value: serde_json::json!(4),
        };
        assert_eq!(filter_sql(&filter).0, "body -> 'rating' >= $1::jsonb");
    }

    #[test]
    fn field_names_are_quoted() {
        assert_eq!(field_path("it's"), "body -> 'it''s'");
    }
}
