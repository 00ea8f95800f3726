//! In-process store over ordered maps. Same semantics as the SQLite adapter,
//! without any I/O; handy for dry runs.

use crate::{BenchResult, ContentStore, NewPost, PostId, PostQuery, QueryLogEntry, Table};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

struct StoredPost {
    post_type: String,
    post_status: String,
}

struct MetaRow {
    key: String,
    value: String,
}

#[derive(Default)]
pub struct MemoryStore {
    posts: BTreeMap<PostId, StoredPost>,
    postmeta: BTreeMap<u64, MetaRow>,
    meta_by_post: HashMap<PostId, Vec<u64>>,
    options: BTreeMap<String, String>,
    next_post_id: PostId,
    next_meta_id: u64,
    query_cache: HashMap<String, Vec<PostId>>,
    query_log: Option<Vec<QueryLogEntry>>,
    last_query: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&mut self, op: String, started: Instant) {
        if let Some(log) = self.query_log.as_mut() {
            log.push(QueryLogEntry {
                sql: op.clone(),
                elapsed: started.elapsed(),
            });
        }
        self.last_query = Some(op);
    }

    fn meta_of(&self, post_id: PostId) -> Vec<(&str, &str)> {
        self.meta_by_post
            .get(&post_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.postmeta.get(id))
            .map(|m| (m.key.as_str(), m.value.as_str()))
            .collect()
    }
}

impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn install(&mut self) -> BenchResult<()> {
        Ok(())
    }

    fn check_connection(&mut self) -> bool {
        true
    }

    fn last_error(&self) -> Option<&str> {
        None
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
        let t = Instant::now();
        let n = match table {
            Table::Posts => self.posts.len(),
            Table::PostMeta => self.postmeta.len(),
            Table::Options => self.options.len(),
        };
        self.track(format!("COUNT {}", table.base_name()), t);
        Ok(n as u64)
    }

    fn truncate(&mut self, table: Table) -> BenchResult<()> {
        let t = Instant::now();
        match table {
            Table::Posts => {
                self.posts.clear();
                self.next_post_id = 0;
            }
            Table::PostMeta => {
                self.postmeta.clear();
                self.meta_by_post.clear();
                self.next_meta_id = 0;
            }
            Table::Options => self.options.clear(),
        }
        self.track(format!("TRUNCATE {}", table.base_name()), t);
        Ok(())
    }

    fn delete_options_like(&mut self, prefix: &str) -> BenchResult<u64> {
        let t = Instant::now();
        let before = self.options.len();
        self.options.retain(|name, _| !name.starts_with(prefix));
        self.track(format!("DELETE options LIKE {}%", prefix), t);
        Ok((before - self.options.len()) as u64)
    }

    fn update_option(&mut self, name: &str, value: &str) -> BenchResult<()> {
        let t = Instant::now();
        self.options.insert(name.to_string(), value.to_string());
        self.track(format!("UPSERT option {}", name), t);
        Ok(())
    }

    fn insert_post(&mut self, post: &NewPost) -> BenchResult<PostId> {
        let t = Instant::now();
        self.next_post_id += 1;
        let id = self.next_post_id;
        self.posts.insert(
            id,
            StoredPost {
                post_type: post.post_type.clone(),
                post_status: post.post_status.clone(),
            },
        );
        let mut meta_ids = Vec::with_capacity(post.meta.len());
        for (key, value) in &post.meta {
            self.next_meta_id += 1;
            self.postmeta.insert(
                self.next_meta_id,
                MetaRow {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
            meta_ids.push(self.next_meta_id);
        }
        self.meta_by_post.entry(id).or_default().extend(meta_ids);
        self.track(format!("INSERT post {} (+{} meta)", id, post.meta.len()), t);
        Ok(id)
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

        let t = Instant::now();
        let ids: Vec<PostId> = self
            .posts
            .iter()
            .rev()
            .filter(|(_, p)| p.post_type == query.post_type && p.post_status == query.post_status)
            .filter(|(id, _)| query.meta_query.matches(&self.meta_of(**id)))
            .map(|(id, _)| *id)
            .take(query.posts_per_page)
            .collect();
        self.track(
            format!("SELECT posts ({} meta clauses)", query.meta_query.clauses.len()),
            t,
        );

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
