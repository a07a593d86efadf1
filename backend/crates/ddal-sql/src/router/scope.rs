//! Per-statement lookup tables mapping shard-key column references to the
//! tables they route.

use super::values::RouteSource;
use ddal_sharding::{RouteConfig, RouteInfo};
use std::collections::HashMap;

/// Statement kind that opened a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl ScopeKind {
    /// Rewritten tables of these statements keep their logical name as alias
    /// when columns are qualified with it.
    pub fn keeps_table_alias(&self) -> bool {
        matches!(self, ScopeKind::Select | ScopeKind::Update)
    }
}

/// Where the table reference of a binding lives in the scope owner's node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableSlot {
    /// Index into the owner's flattened table factors
    Factor(usize),
    InsertTarget,
}

/// Routing record of one sharded table occurrence.
#[derive(Debug, Clone)]
pub(crate) struct TableBinding {
    pub slot: TableSlot,
    /// Logical schema: written schema, or the default schema
    pub schema: Option<String>,
    pub table: String,
    pub table_quote: Option<char>,
    pub alias: Option<String>,
    pub config: RouteConfig,
    /// Shard-key column seen in a predicate of this scope
    pub shard_key: Option<String>,
    pub route: Option<RouteInfo>,
    pub sources: Vec<RouteSource>,
}

impl TableBinding {
    pub fn new(
        slot: TableSlot,
        schema: Option<String>,
        table: String,
        table_quote: Option<char>,
        alias: Option<String>,
        config: RouteConfig,
    ) -> Self {
        Self {
            slot,
            schema,
            table,
            table_quote,
            alias,
            config,
            shard_key: None,
            route: None,
            sources: Vec::new(),
        }
    }

    pub fn is_converted(&self) -> bool {
        self.route.is_some()
    }

    /// Name columns use to qualify this table: its alias, else the table name.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// `qualifier.shard_key`, for error messages
    pub fn shard_key_column(&self) -> String {
        format!("{}.{}", self.qualifier(), self.config.shard_key())
    }

    /// Lookup keys a column reference may use: `schema.alias.key` (with a
    /// schema), `alias.key` and `key`, all lower-cased.
    fn lookup_keys(&self) -> Vec<String> {
        let key = self.config.shard_key().to_lowercase();
        let qualified = format!("{}.{}", self.qualifier().to_lowercase(), key);
        let mut keys = Vec::with_capacity(3);
        if let Some(schema) = &self.schema {
            keys.push(format!("{}.{}", schema.to_lowercase(), qualified));
        }
        keys.push(qualified);
        keys.push(key);
        keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyEntry {
    Bound(usize),
    Ambiguous,
}

/// Result of resolving a column reference in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    NotFound,
    /// Index of the binding in the active scope
    Bound(usize),
    /// Reachable from more than one table; routing through it is forbidden
    Ambiguous,
}

#[derive(Debug)]
pub(crate) struct Scope {
    kind: ScopeKind,
    bindings: Vec<TableBinding>,
    keys: HashMap<String, KeyEntry>,
}

impl Scope {
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            bindings: Vec::new(),
            keys: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Add a binding under all of its lookup keys.
    pub fn register(&mut self, binding: TableBinding) -> usize {
        let idx = self.bindings.len();
        let keys = binding.lookup_keys();
        self.bindings.push(binding);
        for key in keys {
            self.register_key(key, idx);
        }
        idx
    }

    /// Re-registering the same binding is a no-op; a key claimed by a second
    /// binding becomes ambiguous.
    fn register_key(&mut self, key: String, idx: usize) {
        match self.keys.get(&key) {
            None => {
                self.keys.insert(key, KeyEntry::Bound(idx));
            }
            Some(KeyEntry::Bound(existing)) if *existing == idx => {}
            Some(_) => {
                log::debug!("Shard key reference '{}' is ambiguous in this scope", key);
                self.keys.insert(key, KeyEntry::Ambiguous);
            }
        }
    }

    pub fn resolve(&self, key: &str) -> Resolution {
        match self.keys.get(key) {
            None => Resolution::NotFound,
            Some(KeyEntry::Bound(idx)) => Resolution::Bound(*idx),
            Some(KeyEntry::Ambiguous) => Resolution::Ambiguous,
        }
    }

    pub fn binding_mut(&mut self, idx: usize) -> Option<&mut TableBinding> {
        self.bindings.get_mut(idx)
    }

    pub fn into_bindings(self) -> Vec<TableBinding> {
        self.bindings
    }
}

/// One scope per open statement or subquery; the last one is active.
#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    pub fn peek(&self) -> Option<&Scope> {
        self.scopes.last()
    }

    pub fn peek_mut(&mut self) -> Option<&mut Scope> {
        self.scopes.last_mut()
    }

    pub fn pop(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Resolve against the active scope only.
    pub fn resolve(&self, key: &str) -> Resolution {
        self.peek()
            .map(|scope| scope.resolve(key))
            .unwrap_or(Resolution::NotFound)
    }
}
