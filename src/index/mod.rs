pub mod handle_cache;
pub mod record_index;
pub mod search;

pub use handle_cache::{Evictable, HandleCache, DEFAULT_CAPACITY};
pub use record_index::{index_path_for, BuildOptions, FileStamp, IndexEntry, RecordIndex, LAST_KEY};
pub use search::locate;
