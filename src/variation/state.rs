use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::Oid;

/// 模块私有的持久状态：一个按类型存取的不透明槽位。
///
/// 槽位由存储层持有、按调用借给模块；进程存活期间不会过期。
#[derive(Default)]
pub struct StateSlot {
    value: Option<Box<dyn Any + Send>>,
}

impl StateSlot {
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_ref()?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.as_mut()?.downcast_mut::<T>()
    }

    pub fn set<T: Any + Send>(&mut self, v: T) {
        self.value = Some(Box::new(v));
    }

    /// 取出 T；槽位为空或类型不同则用 `f` 重新初始化
    pub fn get_or_insert_with<T: Any + Send>(&mut self, f: impl FnOnce() -> T) -> &mut T {
        let matches = self.value.as_ref().map(|v| v.is::<T>()).unwrap_or(false);
        if !matches {
            self.value = Some(Box::new(f()));
        }
        self.value
            .as_mut()
            .and_then(|v| v.downcast_mut::<T>())
            .expect("slot type checked above")
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

pub type SharedSlot = Arc<Mutex<StateSlot>>;

/// 单个模块的两级状态表：agent 级（按数据文件）与 record 级（按数据文件 + OID）
#[derive(Default)]
pub struct ModuleState {
    agents: DashMap<PathBuf, SharedSlot>,
    records: DashMap<(PathBuf, Oid), SharedSlot>,
}

impl ModuleState {
    pub fn agent_slot(&self, data_file: &std::path::Path) -> SharedSlot {
        if let Some(s) = self.agents.get(data_file) {
            return s.clone();
        }
        self.agents
            .entry(data_file.to_path_buf())
            .or_default()
            .clone()
    }

    pub fn record_slot(&self, data_file: &std::path::Path, oid: &Oid) -> SharedSlot {
        let key = (data_file.to_path_buf(), oid.clone());
        self.records.entry(key).or_default().clone()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
