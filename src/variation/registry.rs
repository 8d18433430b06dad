use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

use crate::core::VarBind;
use crate::error::{Result, StoreError};
use crate::record::Record;

use super::delay::Delay;
use super::multiplex::Multiplex;
use super::numeric::Numeric;
use super::state::ModuleState;
use super::writecache::WriteCache;
use super::{CallInfo, Options, Outcome, VariationContext, VariationModule};

pub const MANIFEST_EXT: &str = "toml";

/// 模块清单：`<搜索目录>/<name>.toml`
///
/// ```toml
/// kind = "numeric"          # 内置实现名
/// name = "counters"         # 可选，缺省取文件名
/// options = "rate=5"        # 可选，init 时传入
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ModuleManifest {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
}

pub const BUILTIN_KINDS: [&str; 4] = ["numeric", "delay", "writecache", "multiplex"];

fn instantiate(kind: &str) -> Option<Box<dyn VariationModule>> {
    match kind {
        "numeric" => Some(Box::new(Numeric::default())),
        "delay" => Some(Box::new(Delay::default())),
        "writecache" => Some(Box::new(WriteCache)),
        "multiplex" => Some(Box::new(Multiplex::default())),
        _ => None,
    }
}

struct LoadedModule {
    kind: String,
    module: Box<dyn VariationModule>,
    state: ModuleState,
}

/// 已初始化的模块表。进程级共享（`Arc`），释放时对每个模块调用一次 `shutdown`。
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, LoadedModule>,
    shut_down: AtomicBool,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 扫描搜索路径上的清单，加上内置模块，初始化 `enabled` 指定的那些。
    ///
    /// `enabled` 为空时加载全部已发现模块。同名清单以先出现的搜索路径为准。
    /// `overrides` 按模块名覆盖清单里的选项。
    pub fn load(
        search_paths: &[PathBuf],
        enabled: &[String],
        overrides: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut discovered: HashMap<String, (String, Options)> = BUILTIN_KINDS
            .iter()
            .map(|k| (k.to_string(), (k.to_string(), Options::default())))
            .collect();

        let mut from_manifest = std::collections::HashSet::new();
        for dir in search_paths {
            for (name, manifest) in discover_manifests(dir) {
                if !from_manifest.insert(name.clone()) {
                    tracing::debug!("Module {} already found earlier, skipping {:?}", name, dir);
                    continue;
                }
                let options = Options::parse(manifest.options.as_deref().unwrap_or(""))?;
                discovered.insert(name, (manifest.kind, options));
            }
        }

        let wanted: Vec<String> = if enabled.is_empty() {
            let mut all: Vec<String> = discovered.keys().cloned().collect();
            all.sort();
            all
        } else {
            enabled.to_vec()
        };

        let mut registry = Self::new();
        for name in wanted {
            let (kind, base) = discovered
                .get(&name)
                .ok_or_else(|| StoreError::ModuleNotLoaded(name.clone()))?;
            let options = match overrides.get(&name) {
                Some(text) => base.merged(&Options::parse(text)?),
                None => base.clone(),
            };
            let module = instantiate(kind).ok_or_else(|| {
                StoreError::Config(format!("module {} has unknown kind {:?}", name, kind))
            })?;
            registry.register_as(&name, kind, module, &options)?;
        }

        tracing::info!("Loaded {} variation module(s): {:?}", registry.len(), registry.names());
        Ok(registry)
    }

    /// 注册一个模块实例（自定义实现或测试替身）；会立即调用 `init`
    pub fn register(
        &mut self,
        name: &str,
        module: Box<dyn VariationModule>,
        options: &Options,
    ) -> Result<()> {
        self.register_as(name, name, module, options)
    }

    fn register_as(
        &mut self,
        name: &str,
        kind: &str,
        mut module: Box<dyn VariationModule>,
        options: &Options,
    ) -> Result<()> {
        module.init(options).map_err(|e| {
            tracing::error!("Module {} failed to initialize: {}", name, e);
            e
        })?;
        if let Some(old) = self.modules.insert(
            name.to_string(),
            LoadedModule {
                kind: kind.to_string(),
                module,
                state: ModuleState::default(),
            },
        ) {
            shutdown_one(name, &old);
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn kind_of(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(|m| m.kind.as_str())
    }

    /// 服务模式分派
    pub fn variate(&self, name: &str, record: &Record, call: CallInfo<'_>) -> Result<Outcome<VarBind>> {
        self.dispatch(name, record, call, |m, r, ctx| m.variate(r, ctx))
    }

    /// 捕获模式分派
    pub fn record(&self, name: &str, record: &Record, call: CallInfo<'_>) -> Result<Outcome<Record>> {
        self.dispatch(name, record, call, |m, r, ctx| m.record(r, ctx))
    }

    fn dispatch<T>(
        &self,
        name: &str,
        record: &Record,
        call: CallInfo<'_>,
        f: impl FnOnce(&dyn VariationModule, &Record, &mut VariationContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let loaded = self
            .modules
            .get(name)
            .ok_or_else(|| StoreError::ModuleNotLoaded(name.to_string()))?;

        // 锁顺序固定：agent 槽位 → record 槽位
        let agent = loaded.state.agent_slot(call.data_file);
        let rec = loaded.state.record_slot(call.data_file, &record.oid);
        let mut agent_state = agent.lock();
        let mut record_state = rec.lock();
        let mut ctx = VariationContext {
            call,
            agent_state: &mut *agent_state,
            record_state: &mut *record_state,
        };
        f(loaded.module.as_ref(), record, &mut ctx)
    }

    /// 对每个模块调用一次 `shutdown`；重复调用无效
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for (name, loaded) in &self.modules {
            shutdown_one(name, loaded);
        }
    }
}

fn shutdown_one(name: &str, loaded: &LoadedModule) {
    if let Err(e) = loaded.module.shutdown() {
        tracing::warn!("Module {} shutdown failed: {}", name, e);
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 读取目录下的 `*.toml` 清单；坏清单记警告后跳过
fn discover_manifests(dir: &Path) -> Vec<(String, ModuleManifest)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Cannot read module path {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(MANIFEST_EXT))
        .collect();
    paths.sort();

    let mut out = Vec::new();
    for path in paths {
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Cannot read module manifest {:?}: {}", path, e);
                continue;
            }
        };
        let manifest: ModuleManifest = match toml::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Bad module manifest {:?}: {}", path, e);
                continue;
            }
        };
        if !BUILTIN_KINDS.contains(&manifest.kind.as_str()) {
            tracing::warn!("Module manifest {:?} names unknown kind {:?}", path, manifest.kind);
            continue;
        }
        let name = match &manifest.name {
            Some(n) => n.clone(),
            None => match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            },
        };
        out.push((name, manifest));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Oid, Value};
    use crate::query::RequestInfo;
    use crate::record::Tag;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("snmprec-store-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl VariationModule for Counting {
        fn variate(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<VarBind>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = ctx.record_state.get_or_insert_with(|| 0u32);
            *n += 1;
            Ok(Outcome::Answer((record.oid.clone(), Value::Counter32(*n))))
        }

        fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn call<'a>(oid: &'a Oid, value: &'a Value, file: &'a Path, req: &'a RequestInfo) -> CallInfo<'a> {
        CallInfo {
            orig_oid: oid,
            orig_value: value,
            next_flag: false,
            set_flag: false,
            exact_match: true,
            subtree_flag: false,
            vars_remaining: 0,
            vars_total: 1,
            data_file: file,
            request: req,
        }
    }

    #[test]
    fn record_state_persists_per_file_and_oid() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut reg = ModuleRegistry::new();
        reg.register(
            "counting",
            Box::new(Counting {
                calls: calls.clone(),
                shutdowns: shutdowns.clone(),
            }),
            &Options::default(),
        )
        .unwrap();

        let oid: Oid = "1.3.6.1.4.1.1.0".parse().unwrap();
        let rec = Record::new(oid.clone(), Tag::module("counting", None), "");
        let req = RequestInfo::default();
        let a = PathBuf::from("/data/a.snmprec");
        let b = PathBuf::from("/data/b.snmprec");

        let v = |file: &Path| {
            let out = reg
                .variate("counting", &rec, call(&oid, &Value::Null, file, &req))
                .unwrap();
            match out {
                Outcome::Answer((_, v)) => v,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(v(&a), Value::Counter32(1));
        assert_eq!(v(&a), Value::Counter32(2));
        assert_eq!(v(&b), Value::Counter32(1));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        drop(reg);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_module_is_reported() {
        let reg = ModuleRegistry::new();
        let oid: Oid = "1.3".parse().unwrap();
        let rec = Record::new(oid.clone(), Tag::module("ghost", None), "");
        let req = RequestInfo::default();
        let file = PathBuf::from("/x");
        let err = reg
            .variate("ghost", &rec, call(&oid, &Value::Null, &file, &req))
            .unwrap_err();
        assert!(matches!(err, StoreError::ModuleNotLoaded(ref n) if n == "ghost"));
    }

    #[test]
    fn load_discovers_manifests_and_builtins() {
        let dir = unique_tmp_dir("manifests");
        std::fs::write(
            dir.join("counters.toml"),
            "kind = \"numeric\"\noptions = \"rate=2\"\n",
        )
        .unwrap();
        std::fs::write(dir.join("broken.toml"), "kind = [").unwrap();
        std::fs::write(dir.join("alien.toml"), "kind = \"python\"\n").unwrap();

        let reg = ModuleRegistry::load(&[dir.clone()], &[], &HashMap::new()).unwrap();
        assert!(reg.contains("counters"));
        assert_eq!(reg.kind_of("counters"), Some("numeric"));
        for builtin in BUILTIN_KINDS {
            assert!(reg.contains(builtin));
        }
        assert!(!reg.contains("broken"));
        assert!(!reg.contains("alien"));

        let only = ModuleRegistry::load(&[dir.clone()], &["counters".to_string()], &HashMap::new()).unwrap();
        assert_eq!(only.names(), vec!["counters"]);

        let missing = ModuleRegistry::load(&[dir.clone()], &["nope".to_string()], &HashMap::new());
        assert!(matches!(missing, Err(StoreError::ModuleNotLoaded(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
