use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::FileExt;

use crate::record::grammar::COMMENT_MARKER;

/// 基于 pread 的读游标：不共享文件偏移，多个读者可并发使用同一个 `File`。
pub struct FileCursor<'a> {
    file: &'a File,
    pos: u64,
}

impl<'a> FileCursor<'a> {
    pub fn new(file: &'a File, pos: u64) -> Self {
        Self { file, pos }
    }
}

impl Read for FileCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// 一条物理记录行
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLine {
    /// 行文本（含行尾换行符，如有）
    pub text: String,
    /// 该行起始字节偏移（已跳过前面的注释/空行）
    pub offset: u64,
    /// 该行字节数（含换行符）
    pub len: u64,
    /// 逻辑行号：只计记录行
    pub line_no: u64,
}

impl RawLine {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// 顺序行读取器：透明跳过空行与 `#` 注释行。
///
/// `offset()` 始终指向下一次读取的起点，跳过的字节也计入，
/// 因此返回的 `RawLine::offset` 可以直接写进索引。
pub struct LineReader<R> {
    inner: BufReader<R>,
    line_no: u64,
    offset: u64,
    buf: Vec<u8>,
}

impl<'a> LineReader<FileCursor<'a>> {
    /// 从文件的某个字节偏移开始读
    pub fn at(file: &'a File, offset: u64) -> Self {
        Self::new(FileCursor::new(file, offset), offset)
    }
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R, offset: u64) -> Self {
        Self {
            inner: BufReader::new(inner),
            line_no: 0,
            offset,
            buf: Vec::with_capacity(256),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// 下一条记录行；到达文件末尾返回 `None`
    pub fn next_record(&mut self) -> std::io::Result<Option<RawLine>> {
        loop {
            self.buf.clear();
            let n = self.inner.read_until(b'\n', &mut self.buf)?;
            if n == 0 {
                return Ok(None);
            }
            let start = self.offset;
            self.offset += n as u64;

            let text = String::from_utf8_lossy(&self.buf);
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
                continue;
            }

            self.line_no += 1;
            return Ok(Some(RawLine {
                text: text.into_owned(),
                offset: start,
                len: n as u64,
                line_no: self.line_no,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn skips_comments_and_blank_lines_keeping_offsets() {
        let data = "# header\n\n1.3.6.1|2|1\n   \n# mid\n1.3.6.2|2|2\n1.3.6.3|2|3";
        let mut r = LineReader::new(Cursor::new(data.as_bytes()), 0);

        let a = r.next_record().unwrap().unwrap();
        assert_eq!(a.offset, 10);
        assert_eq!(a.text, "1.3.6.1|2|1\n");
        assert_eq!(a.line_no, 1);
        assert_eq!(&data[a.offset as usize..a.end() as usize], a.text);

        let b = r.next_record().unwrap().unwrap();
        assert_eq!(&data[b.offset as usize..b.end() as usize], "1.3.6.2|2|2\n");
        assert_eq!(b.line_no, 2);

        // 最后一行没有换行符
        let c = r.next_record().unwrap().unwrap();
        assert_eq!(c.text, "1.3.6.3|2|3");
        assert_eq!(c.end(), data.len() as u64);

        assert!(r.next_record().unwrap().is_none());
        assert_eq!(r.offset(), data.len() as u64);
    }

    #[test]
    fn trailing_comments_advance_offset() {
        let data = "1.3|2|1\n# tail\n\n";
        let mut r = LineReader::new(Cursor::new(data.as_bytes()), 0);
        assert!(r.next_record().unwrap().is_some());
        assert!(r.next_record().unwrap().is_none());
        assert_eq!(r.offset(), data.len() as u64);
    }
}
