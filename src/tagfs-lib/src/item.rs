use crate::{TagFsError, TagFsResult};

pub type ItemId = i64;

/// Kind of a persistent item. The numeric values are the on-disk encoding
/// in the `items.type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    File,
    Dir,
    Tag,
    GroupTag,
}

impl ItemType {
    pub fn as_i64(self) -> i64 {
        match self {
            ItemType::File => 0,
            ItemType::Dir => 1,
            ItemType::Tag => 2,
            ItemType::GroupTag => 3,
        }
    }

    pub fn from_i64(v: i64) -> TagFsResult<Self> {
        match v {
            0 => Ok(ItemType::File),
            1 => Ok(ItemType::Dir),
            2 => Ok(ItemType::Tag),
            3 => Ok(ItemType::GroupTag),
            other => Err(TagFsError::Internal(format!("unknown item type {}", other))),
        }
    }

    pub fn is_dir_like(self) -> bool {
        !matches!(self, ItemType::File)
    }
}

/// One row of the `items` table. `tag` is only populated by the
/// tags-column query shape, where the planner yields a row per
/// (item, tag) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub item_type: ItemType,
    pub parent_id: ItemId,
    pub tag: Option<String>,
}

impl Item {
    pub fn new(name: impl Into<String>, item_type: ItemType, parent_id: ItemId) -> Self {
        Self {
            id: 0,
            name: name.into(),
            item_type,
            parent_id,
            tag: None,
        }
    }
}
