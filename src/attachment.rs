//! Named binary or text payloads kept beside a model's properties.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentBody {
    Binary(Vec<u8>),
    Text(String),
}

impl AttachmentBody {
    /// Text for `text/*` mime types when the bytes are UTF-8, binary
    /// otherwise.
    pub fn decode(bytes: Vec<u8>, content_type: &str) -> Self {
        if !content_type.starts_with("text") {
            return AttachmentBody::Binary(bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => AttachmentBody::Text(text),
            Err(err) => AttachmentBody::Binary(err.into_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttachmentBody::Binary(bytes) => bytes,
            AttachmentBody::Text(text) => text.as_bytes(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            AttachmentBody::Binary(bytes) => bytes,
            AttachmentBody::Text(text) => text.into_bytes(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttachmentBody::Text(text) => Some(text),
            AttachmentBody::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for AttachmentBody {
    fn from(bytes: Vec<u8>) -> Self {
        AttachmentBody::Binary(bytes)
    }
}

impl From<&[u8]> for AttachmentBody {
    fn from(bytes: &[u8]) -> Self {
        AttachmentBody::Binary(bytes.to_vec())
    }
}

impl From<String> for AttachmentBody {
    fn from(text: String) -> Self {
        AttachmentBody::Text(text)
    }
}

impl From<&str> for AttachmentBody {
    fn from(text: &str) -> Self {
        AttachmentBody::Text(text.to_string())
    }
}

/// Byte length of a body; zero when there is none.
pub fn data_length(body: Option<&AttachmentBody>) -> usize {
    body.map(AttachmentBody::len).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// `None` for a stub, or for a staged deletion when `dirty` is set.
    pub body: Option<AttachmentBody>,
    pub length: usize,
    pub content_type: String,
    /// Metadata only; the body has not been fetched.
    pub stub: bool,
    pub dirty: bool,
}

impl Attachment {
    /// A locally set body waiting to be saved.
    pub fn staged(body: Option<AttachmentBody>, content_type: impl Into<String>) -> Self {
        Attachment {
            length: data_length(body.as_ref()),
            body,
            content_type: content_type.into(),
            stub: false,
            dirty: true,
        }
    }

    pub fn stub(content_type: impl Into<String>, length: usize) -> Self {
        Attachment {
            body: None,
            length,
            content_type: content_type.into(),
            stub: true,
            dirty: false,
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.dirty && self.body.is_none()
    }

    /// Wire form. Dirty attachments carry their body base64-encoded (no
    /// data at all for a deletion); clean ones only carry metadata.
    pub fn to_payload(&self) -> AttachmentPayload {
        if self.dirty {
            AttachmentPayload {
                content_type: self.content_type.clone(),
                data: self.body.as_ref().map(|b| STANDARD.encode(b.as_bytes())),
                length: self.length,
                stub: false,
            }
        } else {
            AttachmentPayload {
                content_type: self.content_type.clone(),
                data: None,
                length: self.length,
                stub: true,
            }
        }
    }
}

/// Attachment entry of the `_attachments` map in the serialized wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    #[serde(alias = "content_type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub stub: bool,
}

impl AttachmentPayload {
    /// Decoded body; `None` for metadata-only entries.
    pub fn body(&self) -> Result<Option<Vec<u8>>, AdapterError> {
        match &self.data {
            Some(data) => Ok(Some(STANDARD.decode(data)?)),
            None => Ok(None),
        }
    }

    /// A dirty entry with no data deletes the stored body. Empty data is an
    /// empty body.
    pub fn is_deletion(&self) -> bool {
        !self.stub && self.data.is_none()
    }
}
