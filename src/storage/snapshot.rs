use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Result, StoreError};

/// 索引文件 Header
const MAGIC: u32 = 0x5352_4958; // "XIRS"
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 4; // magic + version + state + data_len + checksum

/// 进程内 tmp 文件序号；与 pid 一起保证并发写者互不覆盖
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 单文件原子快照（记录索引的落盘形式）
///
/// 落盘流程：
/// 1) 写 `<name>.<pid>.<seq>.tmp` 的 INCOMPLETE header（len/checksum 先置 0）
/// 2) `bincode::serialize_into` 流式写 body，边写边计算 checksum / data_len
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(tmpfile)
/// 5) rename(tmp, target)
///
/// 加载时校验 magic + version + state + data_len + checksum，任何不一致都视为“无快照”。
pub struct SnapshotFile {
    path: PathBuf,
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u32) {
        (self.bytes, fold_checksum(self.hasher.digest()))
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn fold_checksum(h: u64) -> u32 {
    (h ^ (h >> 32)) as u32
}

fn write_header(file: &mut std::fs::File, state: u32, data_len: u32, checksum: u32) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    header[8..12].copy_from_slice(&state.to_le_bytes());
    header[12..16].copy_from_slice(&data_len.to_le_bytes());
    header[16..20].copy_from_slice(&checksum.to_le_bytes());
    file.write_all(&header)?;
    Ok(())
}

impl SnapshotFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 每次调用都给出一个新的 tmp 路径
    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        self.path.with_file_name(name)
    }

    /// 加载并校验；文件缺失或任何校验失败都返回 `Ok(None)`
    pub fn load_if_valid<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < HEADER_SIZE {
            tracing::warn!("Index file {:?} too small, ignoring", self.path);
            return Ok(None);
        }

        let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let magic = word(0);
        let version = word(4);
        let state = word(8);
        let data_len = word(12) as usize;
        let stored_checksum = word(16);

        if magic != MAGIC {
            tracing::warn!("Index file magic mismatch: {:#x} != {:#x}", magic, MAGIC);
            return Ok(None);
        }
        if version != VERSION_CURRENT {
            tracing::warn!(
                "Index file version mismatch: {} != {}",
                version,
                VERSION_CURRENT
            );
            return Ok(None);
        }
        if state != STATE_COMMITTED {
            tracing::warn!("Index file state INCOMPLETE, ignoring");
            return Ok(None);
        }

        let body = &data[HEADER_SIZE..];
        if body.len() != data_len {
            tracing::warn!("Index file data length mismatch");
            return Ok(None);
        }

        let computed = fold_checksum(xxhash_rust::xxh3::xxh3_64(body));
        if computed != stored_checksum {
            tracing::warn!(
                "Index file checksum mismatch: {} != {}",
                computed,
                stored_checksum
            );
            return Ok(None);
        }

        match bincode::deserialize::<T>(body) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!("Index file deserialize failed: {}", e);
                Ok(None)
            }
        }
    }

    /// 原子写入
    pub fn write_atomic<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let result = self.write_tmp(&tmp_path, value);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
            return result;
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn write_tmp<T: Serialize>(&self, tmp_path: &Path, value: &T) -> Result<()> {
        let mut file = std::fs::File::create(tmp_path)?;
        write_header(&mut file, STATE_INCOMPLETE, 0, 0)?;

        let (data_len_u64, checksum) = {
            let mut buffered = std::io::BufWriter::new(&mut file);
            let (len, sum) = {
                let mut cw = ChecksumWriter::new(&mut buffered);
                bincode::serialize_into(&mut cw, value)?;
                cw.finish()
            };
            buffered.flush()?;
            (len, sum)
        };

        let data_len: u32 = data_len_u64.try_into().map_err(|_| StoreError::InvalidIndex {
            path: self.path.clone(),
            reason: format!("index too large (>{} bytes)", u32::MAX),
        })?;

        file.seek(SeekFrom::Start(0))?;
        write_header(&mut file, STATE_COMMITTED, data_len, checksum)?;
        file.sync_all()?;
        Ok(())
    }

    /// 删除快照（写失败时 tmp 已由写者自行清理）
    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove index file {:?}: {}", self.path, e);
            }
        }
    }
}
