#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod query;
pub mod record;
pub mod stats;
pub mod storage;
pub mod variation;

pub use crate::config::Config;
pub use crate::core::{Oid, Value, ValueType, VarBind};
pub use crate::error::{Result, StoreError};
pub use crate::query::{AgentRegistry, DataFile, RequestInfo, Responder};
