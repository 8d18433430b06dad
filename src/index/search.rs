use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::core::Oid;
use crate::error::Result;
use crate::record::{parse_oid, LineReader};

const BACKSCAN_CHUNK: u64 = 256;

/// 从 `pos` 向回找到所在行的行首（`pos` 处本身是 `\n` 时，行首为 `pos + 1`）。
fn realign_to_line_start(file: &File, pos: u64) -> Result<u64> {
    let mut end = pos + 1;
    let mut buf = [0u8; BACKSCAN_CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(BACKSCAN_CHUNK);
        let want = (end - start) as usize;
        let n = read_full_at(file, &mut buf[..want], start)?;
        if let Some(i) = buf[..n].iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// 无索引的二分定位：返回第一条 OID ≥ `target` 的记录偏移，全部更小时返回 `size`。
///
/// 每轮把中点回退到行首后只解码该行的 OID。若回退后的中点与上一轮相同
/// （行极长、换行异常等），立即停止并返回当前上界，保证终止。
pub fn locate(file: &File, size: u64, target: &Oid) -> Result<u64> {
    let mut lo = 0u64;
    let mut hi = size;
    let mut prev_mid: Option<u64> = None;

    while lo < hi {
        let mid = realign_to_line_start(file, (lo + hi) / 2)?;
        if prev_mid == Some(mid) {
            tracing::debug!("positional search stalled at {} (lo={}, hi={})", mid, lo, hi);
            break;
        }
        prev_mid = Some(mid);
        if mid >= size {
            return Ok(size);
        }

        let mut reader = LineReader::at(file, mid);
        let Some(line) = reader.next_record()? else {
            // mid 之后只剩注释/空行
            hi = mid;
            continue;
        };
        let oid = parse_oid(&line.text, line.offset)?;
        match oid.cmp(target) {
            std::cmp::Ordering::Less => lo = line.end(),
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Ok(line.offset),
        }
    }
    Ok(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn unique_tmp_file(tag: &str, content: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!("snmprec-search-{}-{}.snmprec", tag, nanos));
        let mut f = File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        p
    }

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn record_at(file: &File, off: u64) -> Option<Oid> {
        LineReader::at(file, off)
            .next_record()
            .unwrap()
            .map(|l| parse_oid(&l.text, l.offset).unwrap())
    }

    #[test]
    fn locates_exact_and_successor() {
        let mut content = String::from("# comment\n");
        for i in 1..=200u32 {
            content.push_str(&format!("1.3.6.1.2.1.{}.0|2|{}\n", i * 2, i));
            if i % 17 == 0 {
                content.push_str("# interleaved\n\n");
            }
        }
        let p = unique_tmp_file("succ", &content);
        let f = File::open(&p).unwrap();
        let size = f.metadata().unwrap().len();

        let off = locate(&f, size, &oid("1.3.6.1.2.1.100.0")).unwrap();
        assert_eq!(record_at(&f, off), Some(oid("1.3.6.1.2.1.100.0")));

        // 落在两条记录之间：取后继
        let off = locate(&f, size, &oid("1.3.6.1.2.1.101")).unwrap();
        assert_eq!(record_at(&f, off), Some(oid("1.3.6.1.2.1.102.0")));

        // 比所有记录都小
        let off = locate(&f, size, &oid("1.3")).unwrap();
        assert_eq!(record_at(&f, off), Some(oid("1.3.6.1.2.1.2.0")));

        // 比所有记录都大
        let off = locate(&f, size, &oid("1.3.6.1.2.1.999")).unwrap();
        assert_eq!(off, size);
        assert_eq!(record_at(&f, off), None);

        std::fs::remove_file(p).unwrap();
    }

    #[test]
    fn empty_and_comment_only_files() {
        let p = unique_tmp_file("empty", "# only\n# comments\n");
        let f = File::open(&p).unwrap();
        let size = f.metadata().unwrap().len();
        let off = locate(&f, size, &oid("1.3.6")).unwrap();
        assert_eq!(record_at(&f, off), None);
        std::fs::remove_file(p).unwrap();
    }

    #[test]
    fn long_lines_still_terminate() {
        let big = "x".repeat(5000);
        let content = format!("1.3.6.1|4|{big}\n1.3.6.2|4|{big}\n1.3.6.3|4|{big}");
        let p = unique_tmp_file("long", &content);
        let f = File::open(&p).unwrap();
        let size = f.metadata().unwrap().len();
        let off = locate(&f, size, &oid("1.3.6.2.5")).unwrap();
        assert_eq!(record_at(&f, off), Some(oid("1.3.6.3")));
        std::fs::remove_file(p).unwrap();
    }
}
