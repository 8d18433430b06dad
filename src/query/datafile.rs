use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::core::{Oid, Value, VarBind};
use crate::error::{Result, StoreError};
use crate::index::{
    index_path_for, locate, BuildOptions, Evictable, FileStamp, HandleCache, IndexEntry,
    RecordIndex, LAST_KEY,
};
use crate::record::{parse_oid, parse_record, LineReader};
use crate::stats::StoreStats;
use crate::variation::{CallInfo, ModuleRegistry, Outcome};

use super::{RequestInfo, Responder};

/// 源文件在建索引期间被替换时的重试次数
const OPEN_ATTEMPTS: usize = 3;

/// 已打开的文件句柄 + 与之配套的索引
struct Handles {
    file: File,
    index: RecordIndex,
    size: u64,
}

/// 单个 snmprec 记录文件：按需打开、随句柄缓存淘汰、源文件变化时重建索引。
///
/// 数据文件本身始终有效；被淘汰的只是底层句柄，下次查询时透明重开。
/// 查询只读取不可变的 `Handles` 快照；重建在 `build_lock` 内串行进行，
/// 完成后整体替换快照。
pub struct DataFile {
    me: Weak<DataFile>,
    id: u64,
    text_path: PathBuf,
    index_path: PathBuf,
    opts: BuildOptions,
    force_pending: AtomicBool,
    build_lock: Mutex<()>,
    cache: Arc<HandleCache>,
    modules: Option<Arc<ModuleRegistry>>,
    stats: Arc<StoreStats>,
    slot: RwLock<Option<Arc<Handles>>>,
}

impl DataFile {
    /// 登记一个数据文件（不打开）。`modules` 为空时遇到占位记录按模块未加载处理。
    pub fn open(
        text_path: &Path,
        cache_dir: &Path,
        cache: Arc<HandleCache>,
        modules: Option<Arc<ModuleRegistry>>,
        opts: BuildOptions,
    ) -> Result<Arc<Self>> {
        let text_path = std::fs::canonicalize(text_path)?;
        let index_path = index_path_for(cache_dir, &text_path);
        let stats = cache.stats().clone();
        let id = cache.register();
        Ok(Arc::new_cyclic(|me| DataFile {
            me: me.clone(),
            id,
            text_path,
            index_path,
            opts,
            force_pending: AtomicBool::new(opts.force),
            build_lock: Mutex::new(()),
            cache,
            modules,
            stats,
            slot: RwLock::new(None),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.text_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn is_open(&self) -> bool {
        self.slot.read().is_some()
    }

    /// 立即打开并确保索引可用，返回记录条数
    pub fn index_text(&self) -> Result<usize> {
        Ok(self.handles()?.index.len())
    }

    /// 主动关闭句柄；之后的查询会重新打开
    pub fn close(&self) {
        self.cache.release(self.id);
        *self.slot.write() = None;
    }

    fn handles(&self) -> Result<Arc<Handles>> {
        let current = FileStamp::of(&self.text_path)?;
        if let Some(h) = self.slot.read().as_ref() {
            if h.index.is_fresh(current) {
                return Ok(h.clone());
            }
            tracing::info!("{} changed on disk, reopening", self.text_path.display());
        }

        // 索引在缓存锁之外载入或重建；缓存锁内只做登记和安装
        let fresh = self.open_handles()?;
        let owner: Weak<dyn Evictable> = self.me.clone();
        self.cache.open_with(self.id, owner, || {
            let mut slot = self.slot.write();
            if let Some(h) = slot.as_ref() {
                if h.index.is_fresh(fresh.index.source_stamp()) {
                    return Ok(h.clone());
                }
            }
            *slot = Some(fresh.clone());
            Ok(fresh)
        })
    }

    /// 只构建/校验持久索引，不占用句柄缓存；返回记录条数。
    ///
    /// 批量预建索引时使用，可以并行调用；同一文件的构建彼此串行。
    pub fn prepare_index(&self) -> Result<usize> {
        Ok(self.load_index()?.len())
    }

    fn load_index(&self) -> Result<RecordIndex> {
        let _building = self.build_lock.lock();
        let mut opts = self.opts;
        opts.force = self.force_pending.swap(false, Ordering::SeqCst);
        let (index, rebuilt) = RecordIndex::open_or_build(&self.text_path, &self.index_path, opts)?;
        if rebuilt {
            self.stats.record_index_build();
        }
        Ok(index)
    }

    /// 先打开文件再载入索引，两者指纹一致才算成功（文件可能在此期间被整体替换）
    fn open_handles(&self) -> Result<Arc<Handles>> {
        for attempt in 1..=OPEN_ATTEMPTS {
            let file = File::open(&self.text_path)?;
            let stamp = FileStamp::from_metadata(&file.metadata()?);
            let index = self.load_index()?;
            if index.is_fresh(stamp) {
                return Ok(Arc::new(Handles {
                    file,
                    index,
                    size: stamp.len,
                }));
            }
            tracing::info!(
                "{} replaced while indexing (attempt {}/{})",
                self.text_path.display(),
                attempt,
                OPEN_ATTEMPTS
            );
        }
        Err(StoreError::InvalidIndex {
            path: self.index_path.clone(),
            reason: format!("source kept changing over {} attempts", OPEN_ATTEMPTS),
        })
    }

    fn entry(index: &RecordIndex, key: &str) -> Result<IndexEntry> {
        index
            .lookup(key)
            .ok_or_else(|| StoreError::IndexEntryMissing(key.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_one(
        &self,
        h: &Handles,
        pos: usize,
        total: usize,
        oid: &Oid,
        requested: &Value,
        next: bool,
        set: bool,
        request: &RequestInfo,
    ) -> Result<VarBind> {
        let (offset, mut subtree, mut exact) = match h.index.lookup_oid(oid) {
            Some(e) => {
                self.stats.record_exact_hit();
                (e.offset, e.subtree, true)
            }
            None => {
                self.stats.record_positional_search();
                (locate(&h.file, h.size, oid)?, false, false)
            }
        };

        let mut reader = LineReader::at(&h.file, offset);
        let mut line = reader.next_record()?;

        loop {
            if exact {
                if next && !subtree {
                    line = reader.next_record()?;
                    if let Some(l) = &line {
                        let succ = parse_oid(&l.text, l.offset)?;
                        subtree = Self::entry(&h.index, &succ.to_string())?.subtree;
                    }
                }
            } else {
                // 定位到的记录之前紧邻一条占位记录，且它覆盖请求 OID 时，改由它回答
                let key = match &line {
                    Some(l) => parse_oid(&l.text, l.offset)?.to_string(),
                    None => LAST_KEY.to_string(),
                };
                let entry = Self::entry(&h.index, &key)?;
                if entry.prev_offset >= 0 {
                    let mut prev_reader = LineReader::at(&h.file, entry.prev_offset as u64);
                    if let Some(prev) = prev_reader.next_record()? {
                        let prev_oid = parse_oid(&prev.text, prev.offset)?;
                        if prev_oid.is_prefix_of(oid) {
                            self.stats.record_placeholder_hit();
                            line = Some(prev);
                            subtree = true;
                            reader = prev_reader;
                        }
                    }
                }
            }

            let Some(raw) = line.as_ref() else {
                let sentinel = if next {
                    Value::EndOfMibView
                } else {
                    Value::NoSuchInstance
                };
                return Ok((oid.clone(), sentinel));
            };

            let record = parse_record(&raw.text, raw.offset)?;

            if let Some(module) = record.tag.module.as_deref() {
                let registry = self
                    .modules
                    .as_ref()
                    .ok_or_else(|| StoreError::ModuleNotLoaded(module.to_string()))?;
                self.stats.record_module_call();
                let call = CallInfo {
                    orig_oid: oid,
                    orig_value: requested,
                    next_flag: next,
                    set_flag: set,
                    exact_match: exact,
                    subtree_flag: subtree,
                    vars_remaining: total - pos - 1,
                    vars_total: total,
                    data_file: &self.text_path,
                    request,
                };
                match registry.variate(module, &record, call)? {
                    Outcome::Answer(vb) => return Ok(vb),
                    Outcome::Suppressed => {
                        self.stats.record_module_suppressed();
                        if next {
                            exact = true;
                            subtree = false;
                            continue;
                        }
                        return Ok((oid.clone(), Value::NoSuchInstance));
                    }
                    Outcome::RetryAfter(after) => {
                        tracing::warn!(
                            "Module {} asked for retry ({:?}) while serving {}, ignoring",
                            module,
                            after,
                            oid
                        );
                        return Ok((oid.clone(), Value::NoSuchInstance));
                    }
                }
            }

            if (!next && !exact) || set {
                return Ok((oid.clone(), Value::NoSuchInstance));
            }

            let value = record
                .decode_value()
                .map_err(|e| StoreError::parse(raw.offset, e))?;
            return Ok((record.oid, value));
        }
    }
}

impl Responder for DataFile {
    fn resolve(&self, vars: &[VarBind], next: bool, set: bool, request: &RequestInfo) -> Vec<VarBind> {
        let h = match self.handles() {
            Ok(h) => h,
            Err(e) => {
                tracing::error!("Store {} unusable: {}", self.text_path.display(), e);
                return vars
                    .iter()
                    .map(|(oid, _)| {
                        self.stats.record_query();
                        self.stats.record_failure();
                        (oid.clone(), Value::NoSuchInstance)
                    })
                    .collect();
            }
        };

        let total = vars.len();
        vars.iter()
            .enumerate()
            .map(|(pos, (oid, value))| {
                self.stats.record_query();
                match self.resolve_one(&h, pos, total, oid, value, next, set, request) {
                    Ok(vb) => vb,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to resolve {} in {}: {}",
                            oid,
                            self.text_path.display(),
                            e
                        );
                        self.stats.record_failure();
                        (oid.clone(), Value::NoSuchInstance)
                    }
                }
            })
            .collect()
    }
}

impl Evictable for DataFile {
    fn evict(&self) {
        *self.slot.write() = None;
    }

    fn describe(&self) -> String {
        self.text_path.display().to_string()
    }
}

impl Drop for DataFile {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}
