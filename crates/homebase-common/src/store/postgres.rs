use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;

use super::{DocPath, DocumentStore, Fields, TransactionFn, Write, WriteBatch};
use crate::StoreError;

/// Document store over the `documents` table (see migrations).
/// A batch is one SQL transaction; a document transaction additionally holds
/// a row lock (`SELECT ... FOR UPDATE`) on the document it reads.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn select_for_update(
    conn: &mut PgConnection,
    path: &DocPath,
) -> Result<Option<Fields>, StoreError> {
    let row: Option<(Json<Fields>,)> = sqlx::query_as(
        "SELECT fields FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE"
    )
    .bind(path.collection())
    .bind(path.id())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(Json(fields),)| fields))
}

async fn upsert(conn: &mut PgConnection, path: &DocPath, fields: &Fields) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO documents (collection, id, fields, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (collection, id) DO UPDATE SET
            fields = EXCLUDED.fields,
            updated_at = NOW()"
    )
    .bind(path.collection())
    .bind(path.id())
    .bind(Json(fields))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_if_absent(conn: &mut PgConnection, path: &DocPath, fields: &Fields) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO documents (collection, id, fields)
         VALUES ($1, $2, $3)
         ON CONFLICT (collection, id) DO NOTHING"
    )
    .bind(path.collection())
    .bind(path.id())
    .bind(Json(fields))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Take every row lock a batch needs up front, in (collection, id) order,
/// so two batches over the same documents queue instead of deadlocking.
/// When the first write to a path is an upsert its defaults are inserted
/// here, which also serializes concurrent creators of the same document.
async fn lock_in_order(conn: &mut PgConnection, writes: &[Write]) -> Result<(), StoreError> {
    let mut paths: BTreeMap<&DocPath, Option<&Fields>> = BTreeMap::new();
    for write in writes {
        let defaults = match write {
            Write::Upsert(_, defaults, _) => Some(defaults),
            _ => None,
        };
        paths.entry(write.path()).or_insert(defaults);
    }

    for (path, defaults) in paths {
        if let Some(defaults) = defaults {
            insert_if_absent(conn, path, defaults).await?;
        }
        select_for_update(conn, path).await?;
    }
    Ok(())
}

async fn apply_write(conn: &mut PgConnection, write: Write) -> Result<(), StoreError> {
    match write {
        Write::Set(path, fields) => upsert(conn, &path, &fields).await,
        Write::Update(path, update) => {
            // Updates are resolved in Rust so dotted paths and array
            // operations behave exactly as they do in the memory store.
            let mut doc = select_for_update(conn, &path)
                .await?
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            update.apply_to(&mut doc);
            upsert(conn, &path, &doc).await
        }
        Write::Upsert(path, defaults, update) => {
            let mut doc = select_for_update(conn, &path).await?.unwrap_or(defaults);
            update.apply_to(&mut doc);
            upsert(conn, &path, &doc).await
        }
        Write::Delete(path) => {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(path.collection())
                .bind(path.id())
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>, StoreError> {
        let row: Option<(Json<Fields>,)> = sqlx::query_as(
            "SELECT fields FROM documents WHERE collection = $1 AND id = $2"
        )
        .bind(path.collection())
        .bind(path.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(fields),)| fields))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Fields)>, StoreError> {
        let rows: Vec<(String, Json<Fields>)> = sqlx::query_as(
            "SELECT id, fields FROM documents WHERE collection = $1 ORDER BY id"
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id, Json(fields))| (id, fields)).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let writes = batch.into_writes();
        let mut tx = self.pool.begin().await?;
        lock_in_order(&mut tx, &writes).await?;
        for write in writes {
            apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transaction(&self, path: &DocPath, body: TransactionFn) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = select_for_update(&mut tx, path).await?;
        let writes = body(current)?.into_writes();
        lock_in_order(&mut tx, &writes).await?;
        for write in writes {
            apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
