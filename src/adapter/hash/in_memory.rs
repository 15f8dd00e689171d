use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::driver::{HashCommand, HashReply, HashStoreDriver};
use crate::error::AdapterError;

#[derive(Debug, Clone)]
enum Entry {
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
}

/// Hash store kept in process memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHashStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    pipelines: Arc<AtomicUsize>,
}

impl InMemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pipelines executed.
    pub fn pipelines(&self) -> usize {
        self.pipelines.load(Ordering::SeqCst)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    /// Fields of the hash at `key`.
    pub fn hash(&self, key: &str) -> Option<BTreeMap<String, String>> {
        match self.entries.read().ok()?.get(key)? {
            Entry::Hash(fields) => Some(fields.clone()),
            Entry::Set(_) => None,
        }
    }

    fn apply(
        entries: &mut HashMap<String, Entry>,
        command: HashCommand,
    ) -> Result<HashReply, AdapterError> {
        match command {
            HashCommand::HGetAll(key) => match entries.get(&key) {
                Some(Entry::Hash(fields)) => Ok(HashReply::Hash(fields.clone())),
                Some(Entry::Set(_)) => Err(wrong_type(&key)),
                None => Ok(HashReply::Hash(BTreeMap::new())),
            },
            HashCommand::HMSet(key, pairs) => {
                if pairs.is_empty() {
                    return Err(AdapterError::Driver("wrong number of arguments for HMSET".into()));
                }
                let fields = hash_mut(entries, &key)?;
                fields.extend(pairs);
                Ok(HashReply::Ok)
            }
            HashCommand::HGet(key, field) => match entries.get(&key) {
                Some(Entry::Hash(fields)) => Ok(HashReply::Bulk(fields.get(&field).cloned())),
                Some(Entry::Set(_)) => Err(wrong_type(&key)),
                None => Ok(HashReply::Bulk(None)),
            },
            HashCommand::HSet(key, field, value) => {
                let fields = hash_mut(entries, &key)?;
                let added = fields.insert(field, value).is_none();
                Ok(HashReply::Integer(added as i64))
            }
            HashCommand::HDel(key, field) => {
                let removed = match entries.get_mut(&key) {
                    Some(Entry::Hash(fields)) => fields.remove(&field).is_some(),
                    Some(Entry::Set(_)) => return Err(wrong_type(&key)),
                    None => false,
                };
                if matches!(entries.get(&key), Some(Entry::Hash(fields)) if fields.is_empty()) {
                    entries.remove(&key);
                }
                Ok(HashReply::Integer(removed as i64))
            }
            HashCommand::Del(keys) => {
                let removed = keys.iter().filter(|k| entries.remove(*k).is_some()).count();
                Ok(HashReply::Integer(removed as i64))
            }
            HashCommand::SAdd(key, member) => {
                let set = match entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::Set(BTreeSet::new()))
                {
                    Entry::Set(set) => set,
                    Entry::Hash(_) => return Err(wrong_type(&key)),
                };
                Ok(HashReply::Integer(set.insert(member) as i64))
            }
            HashCommand::SRem(key, member) => {
                let removed = match entries.get_mut(&key) {
                    Some(Entry::Set(set)) => set.remove(&member),
                    Some(Entry::Hash(_)) => return Err(wrong_type(&key)),
                    None => false,
                };
                Ok(HashReply::Integer(removed as i64))
            }
            HashCommand::SMembers(key) => match entries.get(&key) {
                Some(Entry::Set(set)) => Ok(HashReply::Members(set.iter().cloned().collect())),
                Some(Entry::Hash(_)) => Err(wrong_type(&key)),
                None => Ok(HashReply::Members(Vec::new())),
            },
        }
    }
}

fn hash_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut BTreeMap<String, String>, AdapterError> {
    match entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::Hash(BTreeMap::new()))
    {
        Entry::Hash(fields) => Ok(fields),
        Entry::Set(_) => Err(wrong_type(key)),
    }
}

fn wrong_type(key: &str) -> AdapterError {
    AdapterError::Driver(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

#[async_trait]
impl HashStoreDriver for InMemoryHashStore {
    async fn exec(&self, commands: Vec<HashCommand>) -> Result<Vec<HashReply>, AdapterError> {
        self.pipelines.fetch_add(1, Ordering::SeqCst);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AdapterError::LockPoisoned("hash store exec"))?;

        // Work on a copy so a failing command leaves nothing applied.
        let mut staged = entries.clone();
        let replies = commands
            .into_iter()
            .map(|command| Self::apply(&mut staged, command))
            .collect::<Result<Vec<_>, _>>()?;
        *entries = staged;
        Ok(replies)
    }
}
