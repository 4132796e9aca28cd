// Execution Blocks

use crate::domain::job::ObjectClass;
use serde::{Deserialize, Serialize};

/// Position of a block in batcher emission order
pub type BlockIndex = usize;

/// Reference to one repository object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub class: ObjectClass,
    pub id: String,
}

impl ObjectRef {
    pub fn new(class: ObjectClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }
}

/// One entry of a block; unreadable objects carry the failure cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockItem {
    pub reference: ObjectRef,
    pub cause: Option<String>,
}

impl BlockItem {
    pub fn readable(reference: ObjectRef) -> Self {
        Self {
            reference,
            cause: None,
        }
    }

    pub fn unreadable(reference: ObjectRef, cause: impl Into<String>) -> Self {
        Self {
            reference,
            cause: Some(cause.into()),
        }
    }

    pub fn is_readable(&self) -> bool {
        self.cause.is_none()
    }
}

/// Ordered, size-bounded slice of a job's population. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    index: BlockIndex,
    items: Vec<BlockItem>,
}

impl Block {
    pub fn new(index: BlockIndex, items: Vec<BlockItem>) -> Self {
        Self { index, items }
    }

    /// Block with no objects, used for single-shot jobs
    pub fn empty(index: BlockIndex) -> Self {
        Self::new(index, Vec::new())
    }

    pub fn index(&self) -> BlockIndex {
        self.index
    }

    pub fn items(&self) -> &[BlockItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.reference.id.as_str())
    }

    /// References the plugin is allowed to see
    pub fn readable(&self) -> Vec<ObjectRef> {
        self.items
            .iter()
            .filter(|item| item.is_readable())
            .map(|item| item.reference.clone())
            .collect()
    }

    pub fn unreadable(&self) -> impl Iterator<Item = &BlockItem> {
        self.items.iter().filter(|item| !item.is_readable())
    }
}
