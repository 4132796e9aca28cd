// SQLite object catalog: IndexService + ModelService over the `objects` table
//
// JOB-class lookups go to the `jobs` table so cleanup jobs can target job
// records like any other object.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use reliquary_core::domain::{BlockItem, Filter, ObjectClass, ObjectRef};
use reliquary_core::error::{AppError, Result};
use reliquary_core::port::{IndexPage, IndexService, ModelService, ObjectListing, Sorter, Sublist};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// SQLite caps bound parameters per statement
const LOOKUP_CHUNK: usize = 500;
const LISTING_PAGE: i64 = 200;
const ACTIVE: &str = "ACTIVE";

const OBJECT_FIELDS: &[&str] = &["id", "parent_id", "title", "state"];
const JOB_FIELDS: &[&str] = &["id", "name", "plugin", "plugin_type", "username", "state"];

/// Table and filterable columns backing one object class
struct Table {
    name: &'static str,
    fields: &'static [&'static str],
    /// `objects` rows are scoped by class, `jobs` rows are not
    scoped: bool,
}

impl Table {
    fn for_class(class: ObjectClass) -> Self {
        match class {
            ObjectClass::Job => Table {
                name: "jobs",
                fields: JOB_FIELDS,
                scoped: false,
            },
            _ => Table {
                name: "objects",
                fields: OBJECT_FIELDS,
                scoped: true,
            },
        }
    }

    fn column(&self, field: &str) -> Result<&'static str> {
        self.fields
            .iter()
            .copied()
            .find(|column| *column == field)
            .ok_or_else(|| AppError::Validation(format!("{} cannot be filtered on {}", self.name, field)))
    }

    /// `<head> FROM <table> WHERE 1 = 1 [AND class = ?]`
    fn select<'a>(&self, head: &str, class: ObjectClass) -> QueryBuilder<'a, Sqlite> {
        let mut query = QueryBuilder::new(format!("{} FROM {} WHERE 1 = 1", head, self.name));
        if self.scoped {
            query.push(" AND class = ");
            query.push_bind(class.as_str());
        }
        query
    }

    fn push_filter(&self, query: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) -> Result<()> {
        for parameter in &filter.parameters {
            let column = self.column(&parameter.field)?;
            query.push(" AND ");
            query.push(column);
            query.push(" = ");
            query.push_bind(parameter.value.clone());
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct SqliteObjectCatalog {
    pool: SqlitePool,
}

impl SqliteObjectCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register an object in the catalog
    pub async fn insert_object(
        &self,
        class: ObjectClass,
        id: &str,
        parent_id: Option<&str>,
        title: Option<&str>,
        created_at: i64,
    ) -> Result<()> {
        if class == ObjectClass::Job {
            return Err(AppError::Validation("job records live in the job store".to_string()));
        }
        sqlx::query(
            "INSERT INTO objects (class, id, parent_id, title, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(class.as_str())
        .bind(id)
        .bind(parent_id)
        .bind(title)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Change an object's lifecycle state; anything but ACTIVE is unreadable
    pub async fn set_object_state(&self, class: ObjectClass, id: &str, state: &str) -> Result<()> {
        let result = sqlx::query("UPDATE objects SET state = ? WHERE class = ? AND id = ?")
            .bind(state)
            .bind(class.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {}", class, id)));
        }
        Ok(())
    }

    /// (id, state) rows for one chunk of ids
    async fn lookup(&self, class: ObjectClass, ids: &[String]) -> Result<HashMap<String, String>> {
        let table = Table::for_class(class);
        let head = if table.scoped {
            "SELECT id, state"
        } else {
            // Every stored job record is readable
            "SELECT id, 'ACTIVE'"
        };
        let mut query = table.select(head, class);
        query.push(" AND id IN (");
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(id.clone());
        }
        list.push_unseparated(")");

        let rows: Vec<(String, String)> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl IndexService for SqliteObjectCatalog {
    async fn find_ids(
        &self,
        class: ObjectClass,
        filter: &Filter,
        sorter: &Sorter,
        sublist: Sublist,
    ) -> Result<IndexPage> {
        let table = Table::for_class(class);

        let mut count_query = table.select("SELECT COUNT(*)", class);
        table.push_filter(&mut count_query, filter)?;
        let total_count: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut ids = Vec::new();
        if sublist.limit > 0 {
            let order_column = table.column(&sorter.field)?;
            let mut query = table.select("SELECT id", class);
            table.push_filter(&mut query, filter)?;
            query.push(" ORDER BY ");
            query.push(order_column);
            query.push(if sorter.ascending { " ASC" } else { " DESC" });
            query.push(" LIMIT ");
            query.push_bind(sublist.limit as i64);
            query.push(" OFFSET ");
            query.push_bind(sublist.offset as i64);

            ids = query
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }

        debug!(class = %class, offset = sublist.offset, returned = ids.len(), total_count, "Index page");
        Ok(IndexPage {
            ids,
            offset: sublist.offset,
            total_count: total_count.max(0) as u64,
        })
    }
}

#[async_trait]
impl ModelService for SqliteObjectCatalog {
    async fn retrieve_lite(&self, class: ObjectClass, ids: &[String]) -> Result<Vec<BlockItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let found = self.lookup(class, chunk).await?;
            for id in chunk {
                let reference = ObjectRef::new(class, id.clone());
                let item = match found.get(id).map(String::as_str) {
                    Some(ACTIVE) => BlockItem::readable(reference),
                    Some(state) => BlockItem::unreadable(reference, format!("{} {} is {}", class, id, state)),
                    None => BlockItem::unreadable(reference, format!("{} {} not found", class, id)),
                };
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn list_all(&self, class: ObjectClass) -> Result<Box<dyn ObjectListing>> {
        Ok(Box::new(SqliteListing {
            pool: self.pool.clone(),
            class,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
            closed: false,
        }))
    }
}

/// Keyset-paged listing over one class, ordered by id
pub struct SqliteListing {
    pool: SqlitePool,
    class: ObjectClass,
    after: Option<String>,
    buffer: VecDeque<(String, String)>,
    exhausted: bool,
    closed: bool,
}

impl SqliteListing {
    async fn fill(&mut self) -> Result<()> {
        let table = Table::for_class(self.class);
        let head = if table.scoped {
            "SELECT id, state"
        } else {
            "SELECT id, 'ACTIVE'"
        };
        let mut query = table.select(head, self.class);
        if let Some(after) = &self.after {
            query.push(" AND id > ");
            query.push_bind(after.clone());
        }
        query.push(" ORDER BY id ASC LIMIT ");
        query.push_bind(LISTING_PAGE);

        let rows: Vec<(String, String)> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if (rows.len() as i64) < LISTING_PAGE {
            self.exhausted = true;
        }
        if let Some((last, _)) = rows.last() {
            self.after = Some(last.clone());
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

#[async_trait]
impl ObjectListing for SqliteListing {
    async fn next(&mut self) -> Result<Option<BlockItem>> {
        if self.closed {
            return Err(AppError::Enumeration("listing already closed".to_string()));
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front().map(|(id, state)| {
            let reference = ObjectRef::new(self.class, id);
            if state == ACTIVE {
                BlockItem::readable(reference)
            } else {
                let cause = format!("{} {} is {}", self.class, reference.id, state);
                BlockItem::unreadable(reference, cause)
            }
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.buffer.clear();
        Ok(())
    }
}
