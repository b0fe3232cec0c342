use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Vec<u8>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// The backing store behind the cache. The real deployment uses a
/// disk-backed KV store; this seam is all the harness depends on.
pub trait BackingStore: Send + Sync + 'static {
    fn read(&self, table: &str, key: &str, fields: Option<&[String]>) -> (Status, Vec<Field>);
    fn update(&self, table: &str, key: &str, values: &[Field]) -> Status;
    fn insert(&self, table: &str, key: &str, values: &[Field]) -> Status;
    fn delete(&self, table: &str, key: &str) -> Status;
}

/// In-memory backing store for tests and self-contained runs.
#[derive(Default)]
pub struct MemStore {
    tables: RwLock<HashMap<String, HashMap<String, Vec<Field>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for MemStore {
    fn read(&self, table: &str, key: &str, fields: Option<&[String]>) -> (Status, Vec<Field>) {
        let tables = self.tables.read();
        match tables.get(table).and_then(|t| t.get(key)) {
            Some(row) => {
                let row = match fields {
                    Some(wanted) => row
                        .iter()
                        .filter(|f| wanted.contains(&f.name))
                        .cloned()
                        .collect(),
                    None => row.clone(),
                };
                (Status::Ok, row)
            }
            None => (Status::NotFound, Vec::new()),
        }
    }

    fn update(&self, table: &str, key: &str, values: &[Field]) -> Status {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), values.to_vec());
        Status::Ok
    }

    fn insert(&self, table: &str, key: &str, values: &[Field]) -> Status {
        self.update(table, key, values)
    }

    fn delete(&self, table: &str, key: &str) -> Status {
        let mut tables = self.tables.write();
        match tables.get_mut(table).and_then(|t| t.remove(key)) {
            Some(_) => Status::Ok,
            None => Status::NotFound,
        }
    }
}
