use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::driver::{ColumnStoreDriver, ColumnValidator, FamilyDef, RowData};
use crate::error::AdapterError;

#[derive(Debug, Clone)]
struct Family {
    validators: HashMap<String, ColumnValidator>,
    rows: BTreeMap<String, RowData>,
}

impl Family {
    fn check(&self, family: &str, row: &RowData) -> Result<(), AdapterError> {
        for (column, cell) in row {
            match self.validators.get(column) {
                Some(validator) if validator.accepts(cell) => {}
                Some(validator) => {
                    return Err(AdapterError::Driver(format!(
                        "column {family}.{column} expects {validator}, got {cell:?}"
                    )))
                }
                None => {
                    return Err(AdapterError::Driver(format!(
                        "unknown column {column} in family {family}"
                    )))
                }
            }
        }
        Ok(())
    }
}

type Keyspaces = HashMap<String, HashMap<String, Family>>;

/// Column store kept in process memory. Writes are checked against the
/// declared column validators. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryColumnStore {
    keyspaces: Arc<RwLock<Keyspaces>>,
    schema_changes: Arc<AtomicUsize>,
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyspaces and families created so far.
    pub fn schema_changes(&self) -> usize {
        self.schema_changes.load(Ordering::SeqCst)
    }

    /// Family names in a keyspace, sorted.
    pub fn families(&self, keyspace: &str) -> Vec<String> {
        let Ok(keyspaces) = self.keyspaces.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = keyspaces
            .get(keyspace)
            .map(|families| families.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn row(&self, keyspace: &str, family: &str, row_key: &str) -> Option<RowData> {
        self.keyspaces
            .read()
            .ok()?
            .get(keyspace)?
            .get(family)?
            .rows
            .get(row_key)
            .cloned()
    }

    fn with_family<T>(
        &self,
        keyspace: &str,
        family: &str,
        f: impl FnOnce(&mut Family) -> Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        let mut keyspaces = self
            .keyspaces
            .write()
            .map_err(|_| AdapterError::LockPoisoned("column store write"))?;
        let target = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| AdapterError::Driver(format!("keyspace {keyspace} does not exist")))?
            .get_mut(family)
            .ok_or_else(|| AdapterError::Driver(format!("unconfigured family {family}")))?;
        f(target)
    }
}

#[async_trait]
impl ColumnStoreDriver for InMemoryColumnStore {
    async fn ensure_keyspace(&self, keyspace: &str) -> Result<(), AdapterError> {
        let mut keyspaces = self
            .keyspaces
            .write()
            .map_err(|_| AdapterError::LockPoisoned("column store keyspace"))?;
        if !keyspaces.contains_key(keyspace) {
            keyspaces.insert(keyspace.to_string(), HashMap::new());
            self.schema_changes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn describe(&self, keyspace: &str) -> Result<Vec<String>, AdapterError> {
        let keyspaces = self
            .keyspaces
            .read()
            .map_err(|_| AdapterError::LockPoisoned("column store describe"))?;
        let families = keyspaces
            .get(keyspace)
            .ok_or_else(|| AdapterError::Driver(format!("keyspace {keyspace} does not exist")))?;
        Ok(families.keys().cloned().collect())
    }

    async fn create_family(&self, keyspace: &str, family: FamilyDef) -> Result<(), AdapterError> {
        let mut keyspaces = self
            .keyspaces
            .write()
            .map_err(|_| AdapterError::LockPoisoned("column store create family"))?;
        let families = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| AdapterError::Driver(format!("keyspace {keyspace} does not exist")))?;
        if families.contains_key(&family.name) {
            return Err(AdapterError::Driver(format!(
                "family {} already exists",
                family.name
            )));
        }
        let validators = family
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.validator))
            .collect();
        families.insert(
            family.name,
            Family {
                validators,
                rows: BTreeMap::new(),
            },
        );
        self.schema_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(
        &self,
        keyspace: &str,
        family: &str,
        row_key: &str,
        row: RowData,
    ) -> Result<(), AdapterError> {
        self.with_family(keyspace, family, |target| {
            target.check(family, &row)?;
            target.rows.insert(row_key.to_string(), row);
            Ok(())
        })
    }

    async fn update(
        &self,
        keyspace: &str,
        family: &str,
        row_key: &str,
        columns: RowData,
    ) -> Result<(), AdapterError> {
        self.with_family(keyspace, family, |target| {
            target.check(family, &columns)?;
            target
                .rows
                .entry(row_key.to_string())
                .or_default()
                .extend(columns);
            Ok(())
        })
    }

    async fn select(
        &self,
        keyspace: &str,
        family: &str,
        row_keys: &[String],
    ) -> Result<Vec<Option<RowData>>, AdapterError> {
        self.with_family(keyspace, family, |target| {
            Ok(row_keys
                .iter()
                .map(|key| target.rows.get(key).cloned())
                .collect())
        })
    }

    async fn select_keys(&self, keyspace: &str, family: &str) -> Result<Vec<String>, AdapterError> {
        self.with_family(keyspace, family, |target| Ok(target.rows.keys().cloned().collect()))
    }

    async fn delete(
        &self,
        keyspace: &str,
        family: &str,
        row_keys: &[String],
    ) -> Result<(), AdapterError> {
        self.with_family(keyspace, family, |target| {
            for key in row_keys {
                target.rows.remove(key);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::column::driver::{Cell, ColumnDef};

    fn widgets() -> FamilyDef {
        FamilyDef {
            name: "widgets".into(),
            key_validator: ColumnValidator::Utf8,
            columns: vec![
                ColumnDef::new("name", ColumnValidator::Utf8),
                ColumnDef::new("count", ColumnValidator::Double),
            ],
        }
    }

    #[tokio::test]
    async fn rejects_cells_that_fail_the_validator() {
        let store = InMemoryColumnStore::new();
        store.ensure_keyspace("ks").await.unwrap();
        store.create_family("ks", widgets()).await.unwrap();

        let bad = RowData::from([("count".to_string(), Cell::Utf8("three".into()))]);
        assert!(store.insert("ks", "widgets", "k1", bad).await.is_err());

        let unknown = RowData::from([("colour".to_string(), Cell::Utf8("red".into()))]);
        assert!(store.insert("ks", "widgets", "k1", unknown).await.is_err());

        let good = RowData::from([("count".to_string(), Cell::Double(3.0))]);
        store.insert("ks", "widgets", "k1", good.clone()).await.unwrap();
        assert_eq!(store.row("ks", "widgets", "k1"), Some(good));
    }

    #[tokio::test]
    async fn creating_a_family_twice_fails() {
        let store = InMemoryColumnStore::new();
        store.ensure_keyspace("ks").await.unwrap();
        store.ensure_keyspace("ks").await.unwrap();
        store.create_family("ks", widgets()).await.unwrap();
        assert!(store.create_family("ks", widgets()).await.is_err());
        assert_eq!(store.schema_changes(), 2);
    }

    #[tokio::test]
    async fn update_merges_columns() {
        let store = InMemoryColumnStore::new();
        store.ensure_keyspace("ks").await.unwrap();
        store.create_family("ks", widgets()).await.unwrap();
        store
            .insert(
                "ks",
                "widgets",
                "k1",
                RowData::from([("name".to_string(), Cell::Utf8("fred".into()))]),
            )
            .await
            .unwrap();
        store
            .update(
                "ks",
                "widgets",
                "k1",
                RowData::from([("count".to_string(), Cell::Double(2.0))]),
            )
            .await
            .unwrap();
        let row = store.row("ks", "widgets", "k1").unwrap();
        assert_eq!(row.len(), 2);
    }
}
