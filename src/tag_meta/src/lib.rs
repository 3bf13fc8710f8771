pub mod cache;
pub mod query;
pub mod store;


pub use cache::{CacheStamp, ListingCache};
pub use query::FileQuery;
pub use store::MetaStore;

pub(crate) fn map_db_err(err: rusqlite::Error) -> tagfs_lib::TagFsError {
    tagfs_lib::TagFsError::DbError(err.to_string())
}
