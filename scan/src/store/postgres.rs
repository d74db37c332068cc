use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::{KvItem, KvStore, StoreError};

/// `kv_items(pk, sk, data jsonb)` table; see `migrations/`.
#[derive(Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct KvRow {
    pk: String,
    sk: String,
    data: Value,
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<Value>, StoreError> {
        let data = sqlx::query_scalar::<_, Value>(
            "SELECT data FROM kv_items WHERE pk = $1 AND sk = $2",
        )
        .bind(pk)
        .bind(sk)
        .fetch_optional(&self.pool)
        .await?;
        Ok(data)
    }

    async fn put(&self, pk: &str, sk: &str, data: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_items (pk, sk, data, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (pk, sk)
            DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(pk)
        .bind(sk)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_new(&self, pk: &str, sk: &str, data: Value) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO kv_items (pk, sk, data, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (pk, sk) DO NOTHING
            "#,
        )
        .bind(pk)
        .bind(sk)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<KvItem>, StoreError> {
        let rows = sqlx::query_as::<_, KvRow>(
            r#"
            SELECT pk, sk, data
            FROM kv_items
            WHERE pk = $1
              AND starts_with(sk, $2)
            ORDER BY sk
            "#,
        )
        .bind(pk)
        .bind(sk_prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| KvItem {
                pk: row.pk,
                sk: row.sk,
                data: row.data,
            })
            .collect())
    }

    async fn update(
        &self,
        pk: &str,
        sk: &str,
        fields: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE kv_items
            SET data = data || $3,
                updated_at = NOW()
            WHERE pk = $1
              AND sk = $2
            "#,
        )
        .bind(pk)
        .bind(sk)
        .bind(Value::Object(fields))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn partitions_with(&self, sk: &str) -> Result<Vec<String>, StoreError> {
        let pks = sqlx::query_scalar::<_, String>(
            "SELECT pk FROM kv_items WHERE sk = $1 ORDER BY pk",
        )
        .bind(sk)
        .fetch_all(&self.pool)
        .await?;
        Ok(pks)
    }
}
