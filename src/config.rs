//! 配置文件（TOML）
//!
//! ```toml
//! data_dirs = ["/var/lib/snmprec/data"]
//! cache_dir = "/var/cache/snmprec-store"
//! handle_cache_capacity = 31
//! validate_data = false
//! module_paths = ["/etc/snmprec-store/modules"]
//! modules = ["numeric", "writecache"]
//!
//! [module_options]
//! numeric = "rate=1"
//!
//! [aliases]
//! "public" = "recorded/linux-host"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::index::{BuildOptions, DEFAULT_CAPACITY};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 数据根目录；其下 `.snmprec` 文件的相对路径（去扩展名）即 agent 标识
    pub data_dirs: Vec<PathBuf>,
    /// 持久索引存放目录
    pub cache_dir: PathBuf,
    /// 同时打开的数据文件上限
    pub handle_cache_capacity: usize,
    /// 启动时忽略已有索引
    pub force_index_build: bool,
    /// 建索引时完整解码每条记录
    pub validate_data: bool,
    /// 模块清单搜索路径
    pub module_paths: Vec<PathBuf>,
    /// 启用的模块；为空表示全部
    pub modules: Vec<String>,
    /// 模块名 → 选项串（覆盖清单中的 options）
    pub module_options: HashMap<String, String>,
    /// 别名标识 → 已发现的标识；多个别名共享同一份数据文件
    pub aliases: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dirs: Vec::new(),
            cache_dir: Self::default_cache_dir(),
            handle_cache_capacity: DEFAULT_CAPACITY,
            force_index_build: false,
            validate_data: false,
            module_paths: Vec::new(),
            modules: Vec::new(),
            module_options: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

impl Config {
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("snmprec-store")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.handle_cache_capacity == 0 {
            anyhow::bail!("handle_cache_capacity must be at least 1");
        }
        for (alias, target) in &self.aliases {
            if alias == target {
                anyhow::bail!("alias {:?} points at itself", alias);
            }
        }
        Ok(())
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            validate: self.validate_data,
            force: self.force_index_build,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_takes_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            data_dirs = ["/data"]
            validate_data = true

            [module_options]
            numeric = "rate=2"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.data_dirs, vec![PathBuf::from("/data")]);
        assert_eq!(cfg.handle_cache_capacity, DEFAULT_CAPACITY);
        assert!(cfg.build_options().validate);
        assert!(!cfg.build_options().force);
        assert_eq!(cfg.module_options.get("numeric").map(String::as_str), Some("rate=2"));
        assert!(cfg.modules.is_empty());
    }

    #[test]
    fn rejects_zero_capacity_and_self_alias() {
        let cfg = Config {
            handle_cache_capacity: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.aliases.insert("a".into(), "a".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_bad_toml() {
        let path = std::env::temp_dir().join(format!(
            "snmprec-store-config-{}.toml",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, "data_dirs = 5").unwrap();
        assert!(Config::load(&path).is_err());
        std::fs::write(&path, "handle_cache_capacity = 4").unwrap();
        assert_eq!(Config::load(&path).unwrap().handle_cache_capacity, 4);
        let _ = std::fs::remove_file(&path);
    }
}
