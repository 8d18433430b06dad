pub mod grammar;
pub mod reader;

pub use grammar::{format_record, format_value, parse_oid, parse_record, Record, Tag};
pub use reader::{FileCursor, LineReader, RawLine};
