//! `multiplex`：按时间轮播一组快照文件
//!
//! 记录值：`dir=<目录>,period=<秒>,wrap=<0|1>`。目录相对所在数据文件解析，
//! 其中的 `.snmprec` 按文件名排序构成时间线；每过一个 period 切换到下一份快照，
//! 由它回答占位记录覆盖的子树。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::core::{Oid, Value, VarBind};
use crate::error::{Result, StoreError};
use crate::index::{BuildOptions, HandleCache};
use crate::query::{DataFile, RequestInfo, Responder};
use crate::record::Record;
use crate::stats::StoreStats;

use super::{Options, Outcome, VariationContext, VariationModule};

pub const DATA_EXT: &str = "snmprec";
pub const DEFAULT_PERIOD_SECS: f64 = 60.0;
const DEFAULT_HANDLES: usize = 8;

type Timeline = Arc<Vec<Arc<DataFile>>>;

pub struct Multiplex {
    cache: Arc<HandleCache>,
    cache_dir: PathBuf,
    timelines: DashMap<PathBuf, Timeline>,
}

impl Default for Multiplex {
    fn default() -> Self {
        Self {
            cache: HandleCache::new(DEFAULT_HANDLES, Arc::new(StoreStats::default())),
            cache_dir: std::env::temp_dir().join("snmprec-store-multiplex"),
            timelines: DashMap::new(),
        }
    }
}

struct Clock {
    started: Instant,
}

fn single(out: Vec<VarBind>, oid: &Oid) -> VarBind {
    out.into_iter()
        .next()
        .unwrap_or_else(|| (oid.clone(), Value::NoSuchInstance))
}

impl Multiplex {
    fn timeline(&self, dir: &Path) -> Result<Timeline> {
        if let Some(t) = self.timelines.get(dir) {
            return Ok(t.clone());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(DATA_EXT))
            .collect();
        paths.sort();

        let stores = paths
            .iter()
            .map(|p| {
                DataFile::open(
                    p,
                    &self.cache_dir,
                    self.cache.clone(),
                    None,
                    BuildOptions::default(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("Multiplexing {} snapshot(s) from {:?}", stores.len(), dir);

        let t: Timeline = Arc::new(stores);
        self.timelines.insert(dir.to_path_buf(), t.clone());
        Ok(t)
    }
}

impl VariationModule for Multiplex {
    fn init(&mut self, options: &Options) -> Result<()> {
        if let Some(dir) = options.get("cachedir") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(n) = options.get_parsed::<usize>("handles")? {
            self.cache = HandleCache::new(n, Arc::new(StoreStats::default()));
        }
        std::fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }

    fn variate(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<VarBind>> {
        let orig = ctx.orig_oid;
        if ctx.set_flag {
            return Ok(Outcome::Answer((orig.clone(), Value::NoSuchInstance)));
        }

        let params = Options::parse(&record.value)?;
        let dir = params.get("dir").ok_or_else(|| {
            StoreError::module_failed("multiplex", &record.oid, "missing dir option")
        })?;
        let dir = match ctx.data_file.parent() {
            Some(base) => base.join(dir),
            None => PathBuf::from(dir),
        };
        let timeline = self.timeline(&dir)?;
        if timeline.is_empty() {
            return Err(StoreError::module_failed(
                "multiplex",
                &record.oid,
                format!("no .{} files in {:?}", DATA_EXT, dir),
            ));
        }

        let period: f64 = params.get_or("period", DEFAULT_PERIOD_SECS)?;
        let wrap = params.get_bool("wrap")?.unwrap_or(false);
        let started = ctx
            .record_state
            .get_or_insert_with(|| Clock {
                started: Instant::now(),
            })
            .started;
        let step = if period > 0.0 {
            (started.elapsed().as_secs_f64() / period) as usize
        } else {
            0
        };
        let n = timeline.len();
        let store = &timeline[if wrap { step % n } else { step.min(n - 1) }];

        let subtree = &record.oid;
        let request: &RequestInfo = ctx.request;

        if !ctx.next_flag {
            if !subtree.is_prefix_of(orig) {
                return Ok(Outcome::Answer((orig.clone(), Value::NoSuchInstance)));
            }
            let answer = single(store.read(&[(orig.clone(), Value::Null)], request), orig);
            return Ok(Outcome::Answer(answer));
        }

        let answer = if orig < subtree {
            // 请求在子树之前：先试子树根本身，再取它的后继
            let root = single(store.read(&[(subtree.clone(), Value::Null)], request), subtree);
            if root.1.is_sentinel() {
                single(store.read_next(&[(subtree.clone(), Value::Null)], request), subtree)
            } else {
                root
            }
        } else {
            single(store.read_next(&[(orig.clone(), Value::Null)], request), orig)
        };

        if !answer.1.is_sentinel() && subtree.is_prefix_of(&answer.0) {
            Ok(Outcome::Answer(answer))
        } else {
            Ok(Outcome::Suppressed)
        }
    }
}
