//! SQLite adapter (via rusqlite) laid out like a WordPress database.
//!
//! Configuration: WAL mode, NORMAL synchronous. Each created post and its
//! metadata are written in one transaction.

use crate::config::validate_table_prefix;
use crate::{
    BenchError, BenchResult, ContentStore, NewPost, PostId, PostQuery, QueryLogEntry, Relation,
    Table,
};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

struct TableNames {
    posts: String,
    postmeta: String,
    options: String,
}

impl TableNames {
    fn new(prefix: &str) -> Self {
        Self {
            posts: format!("{}posts", prefix),
            postmeta: format!("{}postmeta", prefix),
            options: format!("{}options", prefix),
        }
    }

    fn get(&self, table: Table) -> &str {
        match table {
            Table::Posts => &self.posts,
            Table::PostMeta => &self.postmeta,
            Table::Options => &self.options,
        }
    }
}

pub struct SqliteStore {
    conn: Connection,
    tables: TableNames,
    /// Result ids of cached queries, keyed by the serialized query.
    query_cache: HashMap<String, Vec<PostId>>,
    query_log: Option<Vec<QueryLogEntry>>,
    last_query: Option<String>,
    last_error: Option<String>,
}

impl SqliteStore {
    /// Open (or create) a database file and install the schema.
    pub fn open(path: &Path, table_prefix: &str) -> BenchResult<Self> {
        validate_table_prefix(table_prefix)?;
        let conn = Connection::open(path)
            .map_err(|e| BenchError::Database(format!("SQLite open: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| BenchError::Database(format!("SQLite pragma: {}", e)))?;

        Self::with_connection(conn, table_prefix)
    }

    pub fn open_in_memory(table_prefix: &str) -> BenchResult<Self> {
        validate_table_prefix(table_prefix)?;
        let conn = Connection::open_in_memory()
            .map_err(|e| BenchError::Database(format!("SQLite open: {}", e)))?;
        Self::with_connection(conn, table_prefix)
    }

    fn with_connection(conn: Connection, table_prefix: &str) -> BenchResult<Self> {
        let mut store = Self {
            conn,
            tables: TableNames::new(table_prefix),
            query_cache: HashMap::new(),
            query_log: None,
            last_query: None,
            last_error: None,
        };
        store.install()?;
        Ok(store)
    }

    /// Record the outcome of a statement: last query, last error, query log.
    fn track<T>(
        &mut self,
        sql: &str,
        elapsed: Duration,
        result: rusqlite::Result<T>,
    ) -> BenchResult<T> {
        self.last_query = Some(sql.to_string());
        if let Some(log) = self.query_log.as_mut() {
            log.push(QueryLogEntry {
                sql: sql.to_string(),
                elapsed,
            });
        }
        match result {
            Ok(v) => {
                self.last_error = None;
                Ok(v)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(BenchError::Database(format!("{}: {}", sql, e)))
            }
        }
    }

    fn schema_sql(&self) -> String {
        let TableNames {
            posts,
            postmeta,
            options,
        } = &self.tables;
        format!(
            "CREATE TABLE IF NOT EXISTS {posts} (
                ID            INTEGER PRIMARY KEY AUTOINCREMENT,
                post_author   INTEGER NOT NULL DEFAULT 0,
                post_date     TEXT    NOT NULL DEFAULT (datetime('now')),
                post_date_gmt TEXT    NOT NULL DEFAULT (datetime('now')),
                post_content  TEXT    NOT NULL DEFAULT '',
                post_title    TEXT    NOT NULL,
                post_status   TEXT    NOT NULL DEFAULT 'publish',
                post_name     TEXT    NOT NULL DEFAULT '',
                post_modified TEXT    NOT NULL DEFAULT (datetime('now')),
                post_type     TEXT    NOT NULL DEFAULT 'post'
            );
            CREATE INDEX IF NOT EXISTS {posts}_type_status_date
                ON {posts}(post_type, post_status, post_date, ID);
            CREATE TABLE IF NOT EXISTS {postmeta} (
                meta_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id    INTEGER NOT NULL DEFAULT 0,
                meta_key   TEXT,
                meta_value TEXT
            );
            CREATE INDEX IF NOT EXISTS {postmeta}_post_id  ON {postmeta}(post_id);
            CREATE INDEX IF NOT EXISTS {postmeta}_meta_key ON {postmeta}(meta_key);
            CREATE TABLE IF NOT EXISTS {options} (
                option_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                option_name  TEXT NOT NULL UNIQUE,
                option_value TEXT NOT NULL,
                autoload     TEXT NOT NULL DEFAULT 'yes'
            );"
        )
    }

    /// Build the id lookup for `query`; every meta clause becomes an EXISTS subquery.
    fn select_sql(&self, query: &PostQuery) -> (String, Vec<String>) {
        let posts = &self.tables.posts;
        let postmeta = &self.tables.postmeta;
        let mut sql = format!(
            "SELECT {posts}.ID FROM {posts} WHERE {posts}.post_type = ?1 AND {posts}.post_status = ?2"
        );
        let mut args = vec![query.post_type.clone(), query.post_status.clone()];

        if !query.meta_query.is_empty() {
            let glue = match query.meta_query.relation {
                Relation::And => " AND ",
                Relation::Or => " OR ",
            };
            let mut subqueries = Vec::with_capacity(query.meta_query.clauses.len());
            for clause in &query.meta_query.clauses {
                let n = args.len() + 1;
                subqueries.push(format!(
                    "EXISTS (SELECT 1 FROM {postmeta} AS mt WHERE mt.post_id = {posts}.ID \
                     AND mt.meta_key = ?{} AND mt.meta_value = ?{})",
                    n,
                    n + 1
                ));
                args.push(clause.key.clone());
                args.push(clause.value.clone());
            }
            sql.push_str(&format!(" AND ({})", subqueries.join(glue)));
        }

        sql.push_str(&format!(
            " ORDER BY {posts}.post_date DESC, {posts}.ID DESC LIMIT {}",
            query.posts_per_page
        ));
        (sql, args)
    }
}

/// Write one post and its meta rows in a transaction. On failure, returns the
/// statement that was running alongside the error.
fn write_post<'q>(
    conn: &Connection,
    post_sql: &'q str,
    meta_sql: &'q str,
    post: &NewPost,
) -> Result<(i64, &'q str), (&'q str, rusqlite::Error)> {
    let tx = conn.unchecked_transaction().map_err(|e| (post_sql, e))?;
    tx.prepare_cached(post_sql)
        .and_then(|mut stmt| stmt.execute(params![post.title, post.post_status, post.post_type]))
        .map_err(|e| (post_sql, e))?;
    let id = tx.last_insert_rowid();
    let mut last = post_sql;
    if !post.meta.is_empty() {
        let mut stmt = tx.prepare_cached(meta_sql).map_err(|e| (meta_sql, e))?;
        for (key, value) in &post.meta {
            stmt.execute(params![id, key, value]).map_err(|e| (meta_sql, e))?;
        }
        last = meta_sql;
    }
    tx.commit().map_err(|e| (last, e))?;
    Ok((id, last))
}

fn fetch_ids(conn: &Connection, sql: &str, args: &[String]) -> rusqlite::Result<Vec<PostId>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, i64>(0))?;
    let mut ids = Vec::new();
    for r in rows {
        ids.push(r? as PostId);
    }
    Ok(ids)
}

/// Escape LIKE wildcards so `prefix` matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 2);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl ContentStore for SqliteStore {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn install(&mut self) -> BenchResult<()> {
        let sql = self.schema_sql();
        let t = Instant::now();
        let result = self.conn.execute_batch(&sql);
        self.track(&sql, t.elapsed(), result)
    }

    fn check_connection(&mut self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    fn enable_query_log(&mut self) {
        self.query_log.get_or_insert_with(Vec::new);
    }

    fn take_query_log(&mut self) -> Vec<QueryLogEntry> {
        self.query_log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn count_rows(&mut self, table: Table) -> BenchResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.tables.get(table));
        let t = Instant::now();
        let result = self.conn.query_row(&sql, [], |row| row.get::<_, i64>(0));
        self.track(&sql, t.elapsed(), result).map(|n| n as u64)
    }

    fn truncate(&mut self, table: Table) -> BenchResult<()> {
        let name = self.tables.get(table);
        let sql = format!(
            "DELETE FROM {name}; DELETE FROM sqlite_sequence WHERE name = '{name}';"
        );
        let t = Instant::now();
        let result = self.conn.execute_batch(&sql);
        self.track(&sql, t.elapsed(), result)
    }

    fn delete_options_like(&mut self, prefix: &str) -> BenchResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE option_name LIKE ?1 ESCAPE '\\'",
            self.tables.options
        );
        let t = Instant::now();
        let result = self.conn.execute(&sql, params![like_prefix(prefix)]);
        self.track(&sql, t.elapsed(), result).map(|n| n as u64)
    }

    fn update_option(&mut self, name: &str, value: &str) -> BenchResult<()> {
        let sql = format!(
            "INSERT INTO {} (option_name, option_value, autoload) VALUES (?1, ?2, 'no')
             ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value",
            self.tables.options
        );
        let t = Instant::now();
        let result = self.conn.execute(&sql, params![name, value]);
        self.track(&sql, t.elapsed(), result).map(|_| ())
    }

    fn insert_post(&mut self, post: &NewPost) -> BenchResult<PostId> {
        let post_sql = format!(
            "INSERT INTO {} (post_title, post_status, post_type) VALUES (?1, ?2, ?3)",
            self.tables.posts
        );
        let meta_sql = format!(
            "INSERT INTO {} (post_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
            self.tables.postmeta
        );
        let t = Instant::now();
        let result = write_post(&self.conn, &post_sql, &meta_sql, post);
        let elapsed = t.elapsed();

        let (sql, result) = match result {
            Ok((id, sql)) => (sql, Ok(id)),
            Err((sql, e)) => (sql, Err(e)),
        };
        self.track(sql, elapsed, result).map(|id| id as PostId)
    }

    fn query_posts(&mut self, query: &PostQuery) -> BenchResult<Vec<PostId>> {
        let cache_key = if query.cache_results {
            let key = serde_json::to_string(query)?;
            if let Some(ids) = self.query_cache.get(&key) {
                return Ok(ids.clone());
            }
            Some(key)
        } else {
            None
        };

        let (sql, args) = self.select_sql(query);
        let t = Instant::now();
        let result = fetch_ids(&self.conn, &sql, &args);
        let ids = self.track(&sql, t.elapsed(), result)?;

        if let Some(key) = cache_key {
            self.query_cache.insert(key, ids.clone());
        }
        Ok(ids)
    }

    fn flush_cache(&mut self) -> BenchResult<()> {
        self.query_cache.clear();
        Ok(())
    }
}
