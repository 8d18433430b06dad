use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::Oid;
use crate::error::{Result, StoreError};
use crate::record::grammar::split_record;
use crate::record::LineReader;
use crate::storage::snapshot::SnapshotFile;

/// 文件末尾哨兵键：offset 为 EOF，prev_offset 指向文件尾部的占位记录（如有）
pub const LAST_KEY: &str = "last";

/// 索引项
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub offset: u64,
    /// 该记录由模块负责，回答其整棵子树
    pub subtree: bool,
    /// 紧邻前一条占位记录的偏移；前一条不是占位记录时为 -1
    pub prev_offset: i64,
}

/// 源文件指纹
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub mtime_ns: u64,
    pub len: u64,
}

impl FileStamp {
    pub fn of(path: &Path) -> Result<Self> {
        let md = std::fs::metadata(path)?;
        Ok(Self::from_metadata(&md))
    }

    pub fn from_metadata(md: &std::fs::Metadata) -> Self {
        Self {
            mtime_ns: md.modified().map(system_time_to_ns).unwrap_or(0),
            len: md.len(),
        }
    }
}

fn system_time_to_ns(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOptions {
    /// 完整解码每条记录；OID 错误中止构建
    pub validate: bool,
    /// 忽略已有索引，强制重建
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexBody {
    source: PathBuf,
    source_stamp: FileStamp,
    built_at_ns: u64,
    entries: HashMap<String, IndexEntry>,
}

/// 记录文件的二级索引：规范 OID 文本 → (offset, subtree, prev_offset)。
///
/// 有效条件：构建时间 ≥ 源文件 mtime，且记录的源文件指纹与当前一致。
pub struct RecordIndex {
    body: IndexBody,
}

impl RecordIndex {
    pub fn lookup(&self, key: &str) -> Option<IndexEntry> {
        self.body.entries.get(key).copied()
    }

    pub fn lookup_oid(&self, oid: &Oid) -> Option<IndexEntry> {
        self.lookup(&oid.to_string())
    }

    pub fn last(&self) -> Option<IndexEntry> {
        self.lookup(LAST_KEY)
    }

    /// 记录条数（不含哨兵）
    pub fn len(&self) -> usize {
        self.body.entries.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_stamp(&self) -> FileStamp {
        self.body.source_stamp
    }

    pub fn is_fresh(&self, current: FileStamp) -> bool {
        self.body.built_at_ns >= current.mtime_ns && self.body.source_stamp == current
    }

    /// 载入持久化索引；不存在、损坏或过期时重建。返回 (索引, 是否重建)。
    pub fn open_or_build(text_path: &Path, index_path: &Path, opts: BuildOptions) -> Result<(Self, bool)> {
        let snap = SnapshotFile::new(index_path.to_path_buf());
        let current = FileStamp::of(text_path)?;

        if !opts.force {
            match snap.load_if_valid::<IndexBody>() {
                Ok(Some(body)) => {
                    let idx = RecordIndex { body };
                    if idx.body.source == text_path && idx.is_fresh(current) {
                        tracing::debug!(
                            "Index {:?} is fresh: {} records",
                            index_path,
                            idx.len()
                        );
                        return Ok((idx, false));
                    }
                    tracing::info!("Index {:?} is stale, rebuilding", index_path);
                }
                Ok(None) => {
                    tracing::info!("No valid index at {:?}, building", index_path);
                }
                Err(e) => {
                    tracing::warn!("Failed to read index {:?}: {}, rebuilding", index_path, e);
                }
            }
        }

        let idx = Self::build(text_path, &snap, opts.validate)?;
        Ok((idx, true))
    }

    /// 一次顺序扫描构建索引并原子落盘。
    ///
    /// 校验模式下 OID 解码失败（或顺序倒置）是致命的：删除索引文件并返回错误；
    /// 值解码失败只记录日志。
    fn build(text_path: &Path, snap: &SnapshotFile, validate: bool) -> Result<Self> {
        let built_at_ns = system_time_to_ns(SystemTime::now());
        let file = File::open(text_path)?;
        let source_stamp = FileStamp::from_metadata(&file.metadata()?);

        let result = Self::scan(&file, validate);
        let (entries, defects) = match result {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("Index build failed for {:?}: {}", text_path, e);
                snap.remove();
                return Err(e);
            }
        };

        let body = IndexBody {
            source: text_path.to_path_buf(),
            source_stamp,
            built_at_ns,
            entries,
        };
        snap.write_atomic(&body)?;

        let idx = RecordIndex { body };
        tracing::info!(
            "Indexed {:?}: {} records, {} value defects",
            text_path,
            idx.len(),
            defects
        );
        Ok(idx)
    }

    fn scan(file: &File, validate: bool) -> Result<(HashMap<String, IndexEntry>, usize)> {
        let mut entries = HashMap::new();
        let mut reader = LineReader::at(file, 0);
        let mut prev_subtree: i64 = -1;
        let mut prev_oid: Option<Oid> = None;
        let mut defects = 0usize;

        while let Some(line) = reader.next_record()? {
            let (oid_text, tag, _) = split_record(&line.text, line.offset)?;

            let key = match Oid::parse(oid_text) {
                Some(oid) => {
                    if validate {
                        if let Some(prev) = &prev_oid {
                            if oid <= *prev {
                                return Err(StoreError::parse(
                                    line.offset,
                                    format!("OID {} not above preceding {}", oid, prev),
                                ));
                            }
                        }
                        let record = crate::record::parse_record(&line.text, line.offset)?;
                        if !tag.is_placeholder() {
                            if let Err(e) = record.decode_value() {
                                defects += 1;
                                tracing::warn!(
                                    "Data error at line {} (offset {}): {}",
                                    line.line_no,
                                    line.offset,
                                    e
                                );
                            }
                        }
                    }
                    let key = oid.to_string();
                    prev_oid = Some(oid);
                    key
                }
                None if validate => {
                    return Err(StoreError::parse(
                        line.offset,
                        format!("bad OID {:?}", oid_text),
                    ));
                }
                None => oid_text.to_string(),
            };

            let subtree = tag.is_placeholder();
            entries.insert(
                key,
                IndexEntry {
                    offset: line.offset,
                    subtree,
                    prev_offset: prev_subtree,
                },
            );
            prev_subtree = if subtree { line.offset as i64 } else { -1 };
        }

        entries.insert(
            LAST_KEY.to_string(),
            IndexEntry {
                offset: reader.offset(),
                subtree: false,
                prev_offset: prev_subtree,
            },
        );
        Ok((entries, defects))
    }
}

/// 索引文件名：源文件绝对路径的分隔符替换为 `_`
pub fn index_path_for(cache_dir: &Path, text_path: &Path) -> PathBuf {
    let flat: String = text_path
        .to_string_lossy()
        .chars()
        .map(|c| if c == std::path::MAIN_SEPARATOR { '_' } else { c })
        .collect();
    cache_dir.join(format!("{}.idx", flat.trim_start_matches('_')))
}
