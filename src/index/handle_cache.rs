use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Result;
use crate::stats::StoreStats;

pub const DEFAULT_CAPACITY: usize = 31;

/// 可被缓存淘汰的句柄持有者（数据文件）。
///
/// 淘汰只关闭底层文件描述符；持有者本身继续有效，下次访问时重新打开。
pub trait Evictable: Send + Sync {
    fn evict(&self);
    fn describe(&self) -> String;
}

struct Slot {
    id: u64,
    owner: Weak<dyn Evictable>,
}

/// 进程内唯一的已打开句柄池。
///
/// 按**打开顺序**淘汰（不是按最近访问）：频繁使用的文件在其后打开足够多
/// 其他文件时同样会被关闭。所有打开/淘汰动作都在同一把锁内完成，
/// 因此同时打开的数目永远不超过容量。已打开句柄的读取路径不经过这把锁。
pub struct HandleCache {
    capacity: usize,
    queue: Mutex<VecDeque<Slot>>,
    next_id: AtomicU64,
    stats: Arc<StoreStats>,
}

impl HandleCache {
    pub fn new(capacity: usize, stats: Arc<StoreStats>) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            next_id: AtomicU64::new(1),
            stats,
        })
    }

    pub fn with_default_capacity(stats: Arc<StoreStats>) -> Arc<Self> {
        Self::new(DEFAULT_CAPACITY, stats)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &Arc<StoreStats> {
        &self.stats
    }

    /// 为新的持有者分配缓存键
    pub fn register(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn open_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_open(&self, id: u64) -> bool {
        self.queue.lock().iter().any(|s| s.id == id)
    }

    /// 在缓存锁内执行打开动作。
    ///
    /// 持有者不在队列中时，先按打开顺序淘汰到低于容量，再调用 `open`；
    /// 打开成功后排到队尾。已在队列中的（例如源文件变化后的重开）保持原位置。
    /// `open` 只应做登记级别的轻量工作，耗时的索引构建放在锁外。
    ///
    /// 调用方不得持有自己的句柄锁（锁顺序：缓存锁 → 持有者锁）。
    pub fn open_with<T>(
        &self,
        id: u64,
        owner: Weak<dyn Evictable>,
        open: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        // 被淘汰者可能在此期间失去最后一个外部引用，其 Drop 会调用 `release`，
        // 所以升级出来的 Arc 必须在释放队列锁之后才析构。
        let mut evicted: Vec<Arc<dyn Evictable>> = Vec::new();
        let result = {
            let mut queue = self.queue.lock();
            if queue.iter().any(|s| s.id == id) {
                return open();
            }

            while queue.len() >= self.capacity {
                let Some(victim) = queue.pop_front() else { break };
                if let Some(v) = victim.owner.upgrade() {
                    v.evict();
                    self.stats.record_eviction();
                    evicted.push(v);
                }
            }

            let result = open();
            if result.is_ok() {
                queue.push_back(Slot {
                    id,
                    owner: owner.clone(),
                });
                self.stats.record_open();
            }
            result
        };

        for v in evicted {
            tracing::info!("Closed {}", v.describe());
        }
        if result.is_ok() {
            if let Some(o) = owner.upgrade() {
                tracing::info!("Opened {}", o.describe());
            }
        }
        result
    }

    /// 从队列移除（持有者主动关闭时使用）
    pub fn release(&self, id: u64) {
        self.queue.lock().retain(|s| s.id != id);
    }
}
