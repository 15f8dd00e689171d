use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Map, Value as Json};
use uuid::Uuid;

use super::driver::{DocumentReceipt, DocumentStoreDriver};
use crate::error::AdapterError;

#[derive(Debug, Clone)]
struct StoredAttachment {
    content_type: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Document {
    generation: u64,
    rev: String,
    body: Map<String, Json>,
    attachments: BTreeMap<String, StoredAttachment>,
}

impl Document {
    fn bump(&mut self) -> String {
        self.generation += 1;
        self.rev = format!("{}-{}", self.generation, Uuid::new_v4().simple());
        self.rev.clone()
    }

    fn to_json(&self, id: &str) -> Json {
        let mut doc = self.body.clone();
        doc.insert("_id".into(), json!(id));
        doc.insert("_rev".into(), json!(self.rev));
        if !self.attachments.is_empty() {
            let stubs: Map<String, Json> = self
                .attachments
                .iter()
                .map(|(name, a)| {
                    let stub = json!({
                        "content_type": a.content_type,
                        "length": a.data.len(),
                        "stub": true,
                    });
                    (name.clone(), stub)
                })
                .collect();
            doc.insert("_attachments".into(), Json::Object(stubs));
        }
        Json::Object(doc)
    }

    /// Applies an embedded `_attachments` object.
    fn apply_attachments(&mut self, entries: &Map<String, Json>) -> Result<(), AdapterError> {
        let mut next = BTreeMap::new();
        for (name, entry) in entries {
            if entry.get("stub").and_then(Json::as_bool).unwrap_or(false) {
                if let Some(existing) = self.attachments.get(name) {
                    next.insert(name.clone(), existing.clone());
                }
                continue;
            }
            let data = entry.get("data").and_then(Json::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let content_type = entry
                .get("content_type")
                .or_else(|| entry.get("contentType"))
                .and_then(Json::as_str)
                .unwrap_or("application/octet-stream")
                .to_string();
            next.insert(
                name.clone(),
                StoredAttachment {
                    content_type,
                    data: STANDARD.decode(data)?,
                },
            );
        }
        self.attachments = next;
        Ok(())
    }
}

type Databases = HashMap<String, BTreeMap<String, Document>>;

/// Document store kept in process memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    databases: Arc<RwLock<Databases>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self, db: &str) -> usize {
        self.databases
            .read()
            .ok()
            .and_then(|dbs| dbs.get(db).map(BTreeMap::len))
            .unwrap_or(0)
    }

    fn write<T>(
        &self,
        db: &str,
        f: impl FnOnce(&mut BTreeMap<String, Document>) -> Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        let mut databases = self
            .databases
            .write()
            .map_err(|_| AdapterError::LockPoisoned("document store write"))?;
        let docs = databases
            .get_mut(db)
            .ok_or_else(|| missing_database(db))?;
        f(docs)
    }

    fn read<T>(
        &self,
        db: &str,
        f: impl FnOnce(&BTreeMap<String, Document>) -> T,
    ) -> Result<T, AdapterError> {
        let databases = self
            .databases
            .read()
            .map_err(|_| AdapterError::LockPoisoned("document store read"))?;
        let docs = databases.get(db).ok_or_else(|| missing_database(db))?;
        Ok(f(docs))
    }
}

fn missing_database(db: &str) -> AdapterError {
    AdapterError::Driver(format!("database {db} does not exist"))
}

fn conflict(db: &str, id: &str) -> AdapterError {
    AdapterError::Conflict {
        collection: db.to_string(),
        key: id.to_string(),
    }
}

fn not_found(db: &str, id: &str) -> AdapterError {
    AdapterError::NotFound {
        collection: db.to_string(),
        key: id.to_string(),
    }
}

/// The stored document for a write naming `rev`, created when absent.
fn writable<'a>(
    docs: &'a mut BTreeMap<String, Document>,
    db: &str,
    id: &str,
    rev: Option<&str>,
) -> Result<&'a mut Document, AdapterError> {
    let current = docs.get(id).map(|doc| doc.rev.as_str());
    if current != rev {
        return Err(conflict(db, id));
    }
    Ok(docs.entry(id.to_string()).or_default())
}

#[async_trait]
impl DocumentStoreDriver for InMemoryDocumentStore {
    async fn create_database(&self, db: &str) -> Result<(), AdapterError> {
        self.databases
            .write()
            .map_err(|_| AdapterError::LockPoisoned("document store create"))?
            .entry(db.to_string())
            .or_default();
        Ok(())
    }

    async fn save(
        &self,
        db: &str,
        id: Option<&str>,
        rev: Option<&str>,
        body: Json,
    ) -> Result<DocumentReceipt, AdapterError> {
        let Json::Object(mut body) = body else {
            return Err(AdapterError::Serde("document body must be an object".into()));
        };
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        body.remove("_id");
        body.remove("_rev");
        let attachments = body.remove("_attachments");

        self.write(db, |docs| {
            let doc = writable(docs, db, &id, rev)?;
            match &attachments {
                Some(Json::Object(entries)) => doc.apply_attachments(entries)?,
                _ => doc.attachments.clear(),
            }
            doc.body = body;
            let rev = doc.bump();
            Ok(DocumentReceipt { id: id.clone(), rev })
        })
    }

    async fn get(&self, db: &str, id: &str) -> Result<Option<Json>, AdapterError> {
        self.read(db, |docs| docs.get(id).map(|doc| doc.to_json(id)))
    }

    async fn get_many(&self, db: &str, ids: &[String]) -> Result<Vec<Option<Json>>, AdapterError> {
        self.read(db, |docs| {
            ids.iter()
                .map(|id| docs.get(id).map(|doc| doc.to_json(id)))
                .collect()
        })
    }

    async fn merge(
        &self,
        db: &str,
        id: &str,
        fields: Map<String, Json>,
    ) -> Result<DocumentReceipt, AdapterError> {
        self.write(db, |docs| {
            let doc = docs.get_mut(id).ok_or_else(|| not_found(db, id))?;
            doc.body.extend(fields);
            let rev = doc.bump();
            Ok(DocumentReceipt {
                id: id.to_string(),
                rev,
            })
        })
    }

    async fn remove(&self, db: &str, id: &str, rev: &str) -> Result<(), AdapterError> {
        self.write(db, |docs| {
            let doc = docs.get(id).ok_or_else(|| not_found(db, id))?;
            if doc.rev != rev {
                return Err(conflict(db, id));
            }
            docs.remove(id);
            Ok(())
        })
    }

    async fn all_ids(&self, db: &str) -> Result<Vec<String>, AdapterError> {
        self.read(db, |docs| docs.keys().cloned().collect())
    }

    async fn get_attachment(
        &self,
        db: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, AdapterError> {
        self.read(db, |docs| {
            docs.get(id)
                .and_then(|doc| doc.attachments.get(name))
                .map(|a| a.data.clone())
        })
    }

    async fn save_attachment(
        &self,
        db: &str,
        id: &str,
        rev: Option<&str>,
        name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<DocumentReceipt, AdapterError> {
        self.write(db, |docs| {
            let doc = writable(docs, db, id, rev)?;
            doc.attachments.insert(
                name.to_string(),
                StoredAttachment {
                    content_type: content_type.to_string(),
                    data: body,
                },
            );
            let rev = doc.bump();
            Ok(DocumentReceipt {
                id: id.to_string(),
                rev,
            })
        })
    }

    async fn remove_attachment(
        &self,
        db: &str,
        id: &str,
        rev: Option<&str>,
        name: &str,
    ) -> Result<DocumentReceipt, AdapterError> {
        self.write(db, |docs| {
            if !docs.contains_key(id) {
                return Err(not_found(db, id));
            }
            let doc = writable(docs, db, id, rev)?;
            doc.attachments.remove(name);
            let rev = doc.bump();
            Ok(DocumentReceipt {
                id: id.to_string(),
                rev,
            })
        })
    }
}
