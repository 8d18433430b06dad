use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use rayon::prelude::*;

use crate::config::Config;
use crate::core::{Value, VarBind};
use crate::error::{Result, StoreError};
use crate::index::{BuildOptions, HandleCache};
use crate::stats::{StatsReport, StoreStats};
use crate::variation::ModuleRegistry;

use super::{DataFile, RequestInfo, Responder};

pub const DATA_EXT: &str = "snmprec";

/// 在根目录下找出所有数据文件，返回 (agent 标识, 路径)，按标识排序。
///
/// 标识 = 相对根目录的路径去掉扩展名，分隔符统一为 `/`。
pub fn discover(root: &Path) -> Vec<(String, PathBuf)> {
    let mut found: Vec<(String, PathBuf)> = WalkBuilder::new(root)
        .hidden(true)
        .ignore(false)
        .git_ignore(false)
        .build()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(DATA_EXT))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?.with_extension("");
            let identity = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            Some((identity, e.path().to_path_buf()))
        })
        .collect();
    found.sort();
    found
}

/// agent 标识 → 数据文件。
///
/// 持有进程内唯一的句柄缓存和模块表；别名与原标识共享同一个 `Arc<DataFile>`。
pub struct AgentRegistry {
    agents: HashMap<String, Arc<DataFile>>,
    cache: Arc<HandleCache>,
    modules: Arc<ModuleRegistry>,
    stats: Arc<StoreStats>,
}

impl AgentRegistry {
    pub fn new(cache: Arc<HandleCache>, modules: Arc<ModuleRegistry>) -> Self {
        let stats = cache.stats().clone();
        Self {
            agents: HashMap::new(),
            cache,
            modules,
            stats,
        }
    }

    /// 按配置扫描数据目录、加载模块、登记别名（不打开任何文件）
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let stats = Arc::new(StoreStats::default());
        let cache = HandleCache::new(cfg.handle_cache_capacity, stats);
        let modules = Arc::new(ModuleRegistry::load(
            &cfg.module_paths,
            &cfg.modules,
            &cfg.module_options,
        )?);
        let mut reg = Self::new(cache, modules);

        let opts = cfg.build_options();
        for root in &cfg.data_dirs {
            let found = discover(root);
            tracing::info!("Found {} data file(s) under {}", found.len(), root.display());
            for (identity, path) in found {
                reg.add(&identity, &path, &cfg.cache_dir, opts)?;
            }
        }

        let mut aliases: Vec<(&String, &String)> = cfg.aliases.iter().collect();
        aliases.sort();
        for (alias, target) in aliases {
            reg.alias(alias, target)?;
        }
        Ok(reg)
    }

    /// 登记一个数据文件。标识已存在时保留先登记的那个。
    pub fn add(
        &mut self,
        identity: &str,
        path: &Path,
        cache_dir: &Path,
        opts: BuildOptions,
    ) -> Result<Arc<DataFile>> {
        if let Some(existing) = self.agents.get(identity) {
            tracing::warn!(
                "Duplicate agent {}: keeping {}, skipping {}",
                identity,
                existing.path().display(),
                path.display()
            );
            return Ok(existing.clone());
        }
        let df = DataFile::open(
            path,
            cache_dir,
            self.cache.clone(),
            Some(self.modules.clone()),
            opts,
        )?;
        self.agents.insert(identity.to_string(), df.clone());
        Ok(df)
    }

    pub fn alias(&mut self, alias: &str, target: &str) -> Result<()> {
        let df = self
            .agents
            .get(target)
            .cloned()
            .ok_or_else(|| StoreError::Config(format!("alias {} → unknown agent {}", alias, target)))?;
        self.agents.insert(alias.to_string(), df);
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<DataFile>> {
        self.agents.get(identity)
    }

    pub fn identities(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn cache(&self) -> &Arc<HandleCache> {
        &self.cache
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// 并行预建所有数据文件的索引；返回 (标识, 记录数或错误)，按标识排序。
    ///
    /// 别名不重复构建。
    pub fn index_all(&self) -> Vec<(String, Result<usize>)> {
        let mut seen = std::collections::HashSet::new();
        let mut unique: Vec<(&String, &Arc<DataFile>)> = self
            .agents
            .iter()
            .filter(|(_, df)| seen.insert(Arc::as_ptr(df)))
            .collect();
        unique.sort_by(|a, b| a.0.cmp(b.0));

        unique
            .par_iter()
            .map(|(id, df)| {
                let result = df.prepare_index();
                if let Err(e) = &result {
                    tracing::error!("Indexing {} failed: {}", id, e);
                }
                ((*id).clone(), result)
            })
            .collect()
    }

    pub fn report(&self) -> StatsReport {
        let mut r = self.stats.report();
        r.open_handles = self.cache.open_count();
        r
    }
}

impl Responder for AgentRegistry {
    fn resolve(&self, vars: &[VarBind], next: bool, set: bool, request: &RequestInfo) -> Vec<VarBind> {
        match self.agents.get(&request.context_name) {
            Some(df) => df.resolve(vars, next, set, request),
            None => {
                tracing::warn!("No data file for context {:?}", request.context_name);
                vars.iter()
                    .map(|(oid, _)| {
                        self.stats.record_query();
                        self.stats.record_failure();
                        (oid.clone(), Value::NoSuchInstance)
                    })
                    .collect()
            }
        }
    }
}
