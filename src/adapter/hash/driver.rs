use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::AdapterError;

/// One command in a hash-store pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashCommand {
    HGetAll(String),
    HMSet(String, Vec<(String, String)>),
    HGet(String, String),
    HSet(String, String, String),
    HDel(String, String),
    Del(Vec<String>),
    SAdd(String, String),
    SRem(String, String),
    SMembers(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashReply {
    Ok,
    Integer(i64),
    Bulk(Option<String>),
    Hash(BTreeMap<String, String>),
    Members(Vec<String>),
}

impl HashReply {
    pub fn into_hash(self) -> Result<BTreeMap<String, String>, AdapterError> {
        match self {
            HashReply::Hash(fields) => Ok(fields),
            other => Err(unexpected("hash", &other)),
        }
    }

    pub fn into_bulk(self) -> Result<Option<String>, AdapterError> {
        match self {
            HashReply::Bulk(value) => Ok(value),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    pub fn into_members(self) -> Result<Vec<String>, AdapterError> {
        match self {
            HashReply::Members(members) => Ok(members),
            other => Err(unexpected("set members", &other)),
        }
    }
}

fn unexpected(expected: &str, reply: &HashReply) -> AdapterError {
    AdapterError::Driver(format!("expected {expected} reply, got {reply:?}"))
}

/// A connected hash-store client.
///
/// `exec` runs the commands as one atomic pipeline and returns one reply
/// per command, in order.
#[async_trait]
pub trait HashStoreDriver: Send + Sync {
    async fn exec(&self, commands: Vec<HashCommand>) -> Result<Vec<HashReply>, AdapterError>;

    async fn query(&self, command: HashCommand) -> Result<HashReply, AdapterError> {
        self.exec(vec![command])
            .await?
            .pop()
            .ok_or_else(|| AdapterError::Driver("empty pipeline reply".into()))
    }
}
