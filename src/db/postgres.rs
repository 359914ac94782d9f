use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::{postgres::PgPoolOptions, types::Json as Jsonb, PgPool, Postgres, QueryBuilder};

use super::{
    filter::{stored_time, Cond, Update, Value},
    store::{doc_id, Collection, DocumentStore, Returning, StoreError, Window},
};

/// Documents as `jsonb` rows: one table per collection with
/// `(id uuid primary key, doc jsonb, created_at timestamptz)`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

fn json_path(field: &str) -> String {
    debug_assert!(field.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
    format!("doc->'{field}'")
}

fn target_path(field: &str) -> String {
    debug_assert!(field.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
    format!("coalesce(t.doc->'{field}', '[]'::jsonb)")
}

fn text_path(field: &str) -> String {
    debug_assert!(field.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
    format!("doc->>'{field}'")
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_compare(qb: &mut QueryBuilder<'_, Postgres>, field: &str, op: &str, value: &Value) {
    match value {
        Value::Time(t) => {
            qb.push(format!("({})::timestamptz {op} ", text_path(field)));
            qb.push_bind(stored_time(*t));
        }
        Value::Int(_) | Value::Float(_) => {
            qb.push(format!("({})::double precision {op} ", text_path(field)));
            qb.push_bind(value.to_json().as_f64().unwrap_or_default());
        }
        Value::Text(_) | Value::Id(_) if op != "=" => {
            qb.push(format!("{} {op} ", text_path(field)));
            qb.push_bind(value.as_text().unwrap_or_default());
        }
        _ => {
            qb.push(format!("{} {op} ", json_path(field)));
            qb.push_bind(Jsonb(value.to_json()));
        }
    }
}

fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, cond: &Cond) {
    match cond {
        Cond::Missing(f) | Cond::Eq(f, Value::Null) => {
            qb.push(format!("coalesce(jsonb_typeof({}), 'null') = 'null'", json_path(f)));
        }
        Cond::Exists(f) | Cond::Ne(f, Value::Null) => {
            qb.push(format!("coalesce(jsonb_typeof({}), 'null') <> 'null'", json_path(f)));
        }
        Cond::Eq(f, v) => push_compare(qb, f, "=", v),
        Cond::Ne(f, v) => {
            qb.push("(");
            push_compare(qb, f, "=", v);
            qb.push(") IS NOT TRUE");
        }
        Cond::Gt(f, v) => push_compare(qb, f, ">", v),
        Cond::Gte(f, v) => push_compare(qb, f, ">=", v),
        Cond::Lt(f, v) => push_compare(qb, f, "<", v),
        Cond::Lte(f, v) => push_compare(qb, f, "<=", v),
        Cond::In(f, values) => {
            let texts: Vec<String> = values.iter().filter_map(Value::as_text).collect();
            qb.push(format!("{} = ANY(", text_path(f)));
            qb.push_bind(texts);
            qb.push(")");
        }
        Cond::Has(f, v) => {
            qb.push(format!("{} @> ", json_path(f)));
            qb.push_bind(Jsonb(Json::Array(vec![v.to_json()])));
        }
        Cond::Search(fields, term) => {
            if fields.is_empty() {
                qb.push("FALSE");
                return;
            }
            let pattern = format!("%{}%", escape_like(term));
            qb.push("(");
            for (i, f) in fields.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(format!("{} ILIKE ", text_path(f)));
                qb.push_bind(pattern.clone());
            }
            qb.push(")");
        }
    }
}

pub(crate) fn push_conditions(qb: &mut QueryBuilder<'_, Postgres>, conds: &[Cond]) {
    if conds.is_empty() {
        qb.push("TRUE");
        return;
    }
    for (i, cond) in conds.iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        push_condition(qb, cond);
    }
}

/// Unique indexes are named `<collection>_<field>_key`.
fn classify(coll: &Collection, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let field = db
                .constraint()
                .map(|c| {
                    c.trim_start_matches(coll.name)
                        .trim_start_matches('_')
                        .trim_end_matches("_key")
                        .to_string()
                })
                .unwrap_or_else(|| "unknown".into());
            return StoreError::DuplicateKey {
                collection: coll.name,
                field,
            };
        }
    }
    StoreError::Database(err)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub(crate) fn select_query<'a>(
    coll: &Collection,
    conds: &[Cond],
    window: Window,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT doc FROM {} WHERE ", coll.name));
    push_conditions(&mut qb, conds);
    qb.push(" ORDER BY created_at, id");
    if let Some(limit) = window.limit {
        qb.push(" LIMIT ");
        qb.push_bind(to_i64(limit));
    }
    if window.skip > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(window.skip));
    }
    qb
}

pub(crate) fn update_query<'a>(
    coll: &Collection,
    conds: &[Cond],
    update: &Update,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("WITH target AS (SELECT id, doc FROM {} WHERE ", coll.name));
    push_conditions(&mut qb, conds);
    qb.push(format!(
        " ORDER BY created_at, id LIMIT 1 FOR UPDATE) UPDATE {} AS t SET doc = ",
        coll.name
    ));
    let edits = update.added_fields().len() + update.pulled_fields().len();
    qb.push("jsonb_set(".repeat(edits));
    qb.push("(t.doc");
    for field in update.unset_fields() {
        qb.push(" - ");
        qb.push_bind(field.clone());
        qb.push("::text");
    }
    qb.push(") || ");
    qb.push_bind(Jsonb(Json::Object(update.set_fields().clone())));
    for (field, value) in update.added_fields() {
        let current = target_path(field);
        qb.push(format!(", '{{{field}}}', CASE WHEN {current} @> "));
        qb.push_bind(Jsonb(Json::Array(vec![value.clone()])));
        qb.push(format!(" THEN {current} ELSE {current} || "));
        qb.push_bind(Jsonb(Json::Array(vec![value.clone()])));
        qb.push(" END)");
    }
    for (field, value) in update.pulled_fields() {
        qb.push(format!(
            ", '{{{field}}}', (SELECT coalesce(jsonb_agg(e), '[]'::jsonb) FROM jsonb_array_elements({}) AS e WHERE e <> ",
            target_path(field)
        ));
        qb.push_bind(Jsonb(value.clone()));
        qb.push("))");
    }
    qb.push(" FROM target WHERE t.id = target.id RETURNING target.doc AS before, t.doc AS after");
    qb
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn insert(&self, coll: &Collection, docs: Vec<Json>) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let rows = docs
            .into_iter()
            .map(|doc| Ok((doc_id(coll, &doc)?, doc)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (id, doc) ", coll.name));
        qb.push_values(rows, |mut b, (id, doc)| {
            b.push_bind(id).push_bind(Jsonb(doc));
        });
        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| classify(coll, e))?;
        Ok(())
    }

    async fn select(
        &self,
        coll: &Collection,
        conds: &[Cond],
        window: Window,
    ) -> Result<Vec<Json>, StoreError> {
        let mut qb = select_query(coll, conds, window);
        let rows = qb
            .build_query_scalar::<Jsonb<Json>>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|Jsonb(doc)| doc).collect())
    }

    async fn count(&self, coll: &Collection, conds: &[Cond]) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {} WHERE ", coll.name));
        push_conditions(&mut qb, conds);
        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn update_first(
        &self,
        coll: &Collection,
        conds: &[Cond],
        update: &Update,
        returning: Returning,
    ) -> Result<Option<Json>, StoreError> {
        let mut qb = update_query(coll, conds, update);
        let row: Option<(Jsonb<Json>, Jsonb<Json>)> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(coll, e))?;
        Ok(row.map(|(Jsonb(before), Jsonb(after))| match returning {
            Returning::Before => before,
            Returning::After => after,
        }))
    }

    async fn delete_first(&self, coll: &Collection, conds: &[Cond]) -> Result<Option<Json>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "DELETE FROM {0} WHERE id = (SELECT id FROM {0} WHERE ",
            coll.name
        ));
        push_conditions(&mut qb, conds);
        qb.push(" ORDER BY created_at, id LIMIT 1 FOR UPDATE) RETURNING doc");
        let doc: Option<Jsonb<Json>> = qb.build_query_scalar().fetch_optional(&self.pool).await?;
        Ok(doc.map(|Jsonb(d)| d))
    }

    async fn delete_all(&self, coll: &Collection, conds: &[Cond]) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} WHERE ", coll.name));
        push_conditions(&mut qb, conds);
        let done = qb.build().execute(&self.pool).await?;
        Ok(done.rows_affected())
    }
}
