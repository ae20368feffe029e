//! Catalog (C1): table metadata plus the dialect binding and compiled-query
//! cache that make up a compile unit's read-only context.
//!
//! Mirrors how `prql-compiler`'s `Options`/`Target` are threaded through
//! `compile()` as plain configuration values rather than global state: a
//! [Catalog] is built once by the caller and handed to every `compile` call.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use dashmap::DashMap;
use indexmap::IndexSet;

use crate::dialect::Dialect;
use crate::error::{Error, Reason, Result};
use crate::ir::NodeRef;

/// A single table's metadata: an optional schema-qualifier chain, a name,
/// and an ordered, name-unique column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub qualifiers: Vec<String>,
    pub name: String,
    pub columns: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Result<Table> {
        Table::with_qualifiers(Vec::<String>::new(), name, columns)
    }

    pub fn with_qualifiers(
        qualifiers: impl IntoIterator<Item = impl Into<String>>,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Table> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut seen = IndexSet::new();
        for column in &columns {
            if !seen.insert(column.clone()) {
                return Err(Error::new(Reason::DuplicateLabel {
                    name: column.clone(),
                })
                .with_help("column names within a table must be unique")
                .into());
            }
        }
        Ok(Table {
            qualifiers: qualifiers.into_iter().map(Into::into).collect(),
            name: name.into(),
            columns,
        })
    }

    /// The name this table is addressed by in `FROM`: qualifiers, then name,
    /// dot-joined, *before* dialect quoting is applied.
    pub fn qualified_name(&self) -> String {
        let mut parts = self.qualifiers.clone();
        parts.push(self.name.clone());
        parts.join(".")
    }
}

/// Bounded LRU cache for compiled queries, keyed on the structural hash of
/// (dialect identity, Semantic tree). `None` disables caching entirely.
///
/// Entries live in a [DashMap] so concurrent reads never block each other —
/// a hit only touches the shard its key hashes into. Recency bookkeeping for
/// eviction is the one thing that needs a total order across shards, so it's
/// kept in a small side `Mutex<VecDeque<u64>>` that's only ever touched on
/// insert, never on a read.
pub struct Cache {
    capacity: usize,
    entries: DashMap<u64, (String, Vec<String>)>,
    order: Mutex<VecDeque<u64>>,
}

impl Cache {
    pub fn new(capacity: usize) -> Cache {
        Cache {
            capacity,
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    fn get(&self, key: u64) -> Option<(String, Vec<String>)> {
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    fn insert(&self, key: u64, sql: String, vars: Vec<String>) {
        if self.entries.contains_key(&key) {
            return;
        }
        let mut order = self.order.lock().expect("cache lock poisoned");
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (sql, vars));
        order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Default bound for [Catalog::new]'s compiled-query cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct Catalog {
    tables: indexmap::IndexMap<String, Table>,
    pub dialect: Dialect,
    cache: Option<Cache>,
    case_insensitive: bool,
}

impl Catalog {
    pub fn new(tables: impl IntoIterator<Item = Table>, dialect: Dialect) -> Result<Catalog> {
        Catalog::with_cache(tables, dialect, Some(DEFAULT_CACHE_CAPACITY))
    }

    pub fn with_cache(
        tables: impl IntoIterator<Item = Table>,
        dialect: Dialect,
        cache_capacity: Option<usize>,
    ) -> Result<Catalog> {
        let mut map = indexmap::IndexMap::new();
        for table in tables {
            if map.insert(table.name.clone(), table).is_some() {
                return Err(Error::new(Reason::Simple(format!(
                    "duplicate table name in catalog"
                )))
                .into());
            }
        }
        Ok(Catalog {
            tables: map,
            dialect,
            cache: cache_capacity.map(Cache::new),
            case_insensitive: false,
        })
    }

    /// Fold table names to lowercase for lookup, matching dialects whose
    /// identifiers are case-insensitive by default.
    pub fn case_insensitive(mut self, value: bool) -> Catalog {
        self.case_insensitive = value;
        self
    }

    fn normalize<'a>(&self, name: &'a str) -> std::borrow::Cow<'a, str> {
        if self.case_insensitive {
            std::borrow::Cow::Owned(name.to_lowercase())
        } else {
            std::borrow::Cow::Borrowed(name)
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&Table> {
        self.get(name).ok_or_else(|| {
            Error::new(Reason::CannotFind {
                name: name.to_string(),
            })
            .with_help("no such table in the catalog")
            .into()
        })
    }

    /// `get(catalog, name, default)`: infallible accessor for a table, or a
    /// caller-supplied default when absent.
    pub fn get<'a>(&'a self, name: &str) -> Option<&'a Table> {
        if !self.case_insensitive {
            return self.tables.get(name);
        }
        let target = self.normalize(name);
        self.tables
            .values()
            .find(|t| self.normalize(&t.name) == target)
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a Table) -> &'a Table {
        self.get(name).unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn structural_key(&self, node: &NodeRef) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.dialect.name.hash(&mut hasher);
        crate::ir::debug_hash(node, &mut hasher);
        hasher.finish()
    }

    /// Public compile entry point: looks up the compiled-query cache; on a
    /// miss, runs Resolve -> Link -> Translate -> Serialize and inserts the
    /// result under a structural key.
    pub fn compile(&self, query: &NodeRef) -> Result<crate::SqlString> {
        self.compile_with(query, crate::serialize::SerializeOptions::default())
    }

    pub fn compile_with(
        &self,
        query: &NodeRef,
        options: crate::serialize::SerializeOptions,
    ) -> Result<crate::SqlString> {
        let key = self.structural_key(query).wrapping_add(options.cache_tag());
        if let Some(cache) = &self.cache {
            if let Some((text, vars)) = cache.get(key) {
                log::debug!("catalog cache hit");
                return Ok(crate::SqlString { text, vars });
            }
            log::debug!("catalog cache miss");
        }
        let sql = crate::compile_with(query, self, options)?;
        if let Some(cache) = &self.cache {
            cache.insert(key, sql.text.clone(), sql.vars.clone());
        }
        Ok(sql)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map(Cache::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_column_rejected() {
        let err = Table::new("t", ["a", "a"]).unwrap_err();
        assert!(err.to_string().contains("duplicate label"));
    }

    #[test]
    fn duplicate_table_rejected() {
        let t1 = Table::new("person", ["id"]).unwrap();
        let t2 = Table::new("person", ["id"]).unwrap();
        let err = Catalog::new([t1, t2], Dialect::sqlite()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn case_insensitive_lookup() {
        let t = Table::new("Person", ["id"]).unwrap();
        let cat = Catalog::new([t], Dialect::sqlite())
            .unwrap()
            .case_insensitive(true);
        assert!(cat.lookup("person").is_ok());
        assert!(cat.lookup("PERSON").is_ok());
    }
}
