//! snmprec 行格式：`<OID>|<tag>|<value>`
//!
//! tag 取值：
//! - `4`、`65` 等数字类型标签
//! - `4x`：值为 hex 编码字节串
//! - `numeric:65`：交给变体模块 `numeric` 计算（也接受旧写法 `65:numeric`）

use std::fmt;

use crate::core::{Oid, Value, ValueType};
use crate::error::{Result, StoreError};

pub const FIELD_SEP: char = '|';
pub const MODULE_SEP: char = ':';
pub const HEX_MARKER: char = 'x';
pub const COMMENT_MARKER: &str = "#";

/// 解析后的 tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// 值类型；模块记录可以为空（由模块决定）
    pub value_type: Option<ValueType>,
    pub hex: bool,
    pub module: Option<String>,
}

impl Tag {
    pub fn plain(value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            hex: false,
            module: None,
        }
    }

    pub fn hex(value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            hex: true,
            module: None,
        }
    }

    pub fn module(module: &str, value_type: Option<ValueType>) -> Self {
        Self {
            value_type,
            hex: false,
            module: Some(module.to_string()),
        }
    }

    /// 是否为子树占位记录（由模块负责）
    pub fn is_placeholder(&self) -> bool {
        self.module.is_some()
    }

    pub fn parse(text: &str) -> std::result::Result<Tag, String> {
        let text = text.trim();
        match text.split_once(MODULE_SEP) {
            None => {
                let (value_type, hex) = parse_type_tag(text)?
                    .ok_or_else(|| "empty type tag".to_string())?;
                Ok(Tag {
                    value_type: Some(value_type),
                    hex,
                    module: None,
                })
            }
            Some((left, right)) => {
                // 类型标签必为数字，模块名不是：据此判断两种写法
                let (module, inner) = if looks_like_type_tag(left) && !looks_like_type_tag(right)
                {
                    (right, left)
                } else {
                    (left, right)
                };
                if !is_module_name(module) {
                    return Err(format!("bad module name {:?}", module));
                }
                let parsed = parse_type_tag(inner)?;
                Ok(Tag {
                    value_type: parsed.map(|(t, _)| t),
                    hex: parsed.map(|(_, h)| h).unwrap_or(false),
                    module: Some(module.to_string()),
                })
            }
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(m) = &self.module {
            write!(f, "{}{}", m, MODULE_SEP)?;
        }
        if let Some(t) = self.value_type {
            write!(f, "{}", t.tag())?;
            if self.hex {
                write!(f, "{}", HEX_MARKER)?;
            }
        }
        Ok(())
    }
}

/// 空串（由模块决定类型）或至少一位数字、可带 hex 标记
fn looks_like_type_tag(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    let digits = s.strip_suffix(HEX_MARKER).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_module_name(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn parse_type_tag(s: &str) -> std::result::Result<Option<(ValueType, bool)>, String> {
    if s.is_empty() {
        return Ok(None);
    }
    let (digits, hex) = match s.strip_suffix(HEX_MARKER) {
        Some(d) => (d, true),
        None => (s, false),
    };
    let num: u8 = digits
        .parse()
        .map_err(|_| format!("bad type tag {:?}", s))?;
    let value_type = ValueType::from_tag(num).ok_or_else(|| format!("unknown type tag {}", num))?;
    if hex && !value_type.allows_hex() {
        return Err(format!("type tag {} has no hex form", num));
    }
    Ok(Some((value_type, hex)))
}

/// 一条 record：值文本保持原样，是否解码由调用方决定
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub oid: Oid,
    pub tag: Tag,
    pub value: String,
}

impl Record {
    pub fn new(oid: Oid, tag: Tag, value: impl Into<String>) -> Self {
        Self {
            oid,
            tag,
            value: value.into(),
        }
    }

    /// 从已类型化的值构造静态记录（不可打印字节串自动 hex）
    pub fn from_value(oid: Oid, value: &Value) -> Self {
        let (hex, text) = value.encode();
        Self {
            oid,
            tag: Tag {
                value_type: Some(value.value_type()),
                hex,
                module: None,
            },
            value: text,
        }
    }

    /// 按 tag 解码值文本。模块记录不在这里解释。
    pub fn decode_value(&self) -> std::result::Result<Value, String> {
        let Some(value_type) = self.tag.value_type else {
            return Err(format!("record {} has no value type", self.oid));
        };
        if self.tag.hex {
            value_type.decode_hex(&self.value)
        } else {
            value_type.decode(&self.value)
        }
    }
}

fn strip_eol(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn split_fields(line: &str, offset: u64) -> Result<(&str, &str, &str)> {
    let line = strip_eol(line);
    let mut parts = line.splitn(3, FIELD_SEP);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(oid), Some(tag), Some(value)) => Ok((oid, tag, value)),
        _ => Err(StoreError::parse(offset, format!("expected 3 fields in {:?}", line))),
    }
}

/// 只拆分字段、不解码 OID：索引构建的非校验模式使用
pub fn split_record(line: &str, offset: u64) -> Result<(&str, Tag, &str)> {
    let (oid, tag, value) = split_fields(line, offset)?;
    let tag = Tag::parse(tag).map_err(|e| StoreError::parse(offset, e))?;
    Ok((oid.trim(), tag, value))
}

/// 只解码 OID 前缀（二分查找与后继推进用）
pub fn parse_oid(line: &str, offset: u64) -> Result<Oid> {
    let line = strip_eol(line);
    let oid_text = line.split(FIELD_SEP).next().unwrap_or("");
    Oid::parse(oid_text)
        .ok_or_else(|| StoreError::parse(offset, format!("bad OID {:?}", oid_text)))
}

pub fn parse_record(line: &str, offset: u64) -> Result<Record> {
    let (oid_text, tag, value) = split_record(line, offset)?;
    let oid = Oid::parse(oid_text)
        .ok_or_else(|| StoreError::parse(offset, format!("bad OID {:?}", oid_text)))?;
    Ok(Record {
        oid,
        tag,
        value: value.to_string(),
    })
}

/// 序列化为一行（含换行符）
pub fn format_record(record: &Record) -> String {
    format!(
        "{}{}{}{}{}\n",
        record.oid, FIELD_SEP, record.tag, FIELD_SEP, record.value
    )
}

pub fn format_value(oid: &Oid, value: &Value) -> String {
    format_record(&Record::from_value(oid.clone(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn parse_static_record() {
        let r = parse_record("1.3.6.1.2.1.1.1.0|4|Linux box\n", 0).unwrap();
        assert_eq!(r.oid, oid("1.3.6.1.2.1.1.1.0"));
        assert_eq!(r.tag, Tag::plain(ValueType::OctetString));
        assert_eq!(r.decode_value().unwrap(), Value::octets("Linux box"));
    }

    #[test]
    fn value_may_contain_separator() {
        let r = parse_record("1.3.6.1.2.1.1.5.0|4|a|b|c", 0).unwrap();
        assert_eq!(r.value, "a|b|c");
    }

    #[test]
    fn module_tag_both_orders() {
        let a = Tag::parse("numeric:65").unwrap();
        let b = Tag::parse("65:numeric").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.module.as_deref(), Some("numeric"));
        assert_eq!(a.value_type, Some(ValueType::Counter32));
        assert_eq!(a.to_string(), "numeric:65");

        let bare = Tag::parse("multiplex:").unwrap();
        assert!(bare.is_placeholder());
        assert_eq!(bare.value_type, None);

        // 单字母模块名 `x` 与 hex 标记同形
        let legacy = Tag::parse("4:x").unwrap();
        assert_eq!(legacy.module.as_deref(), Some("x"));
        assert_eq!(legacy.value_type, Some(ValueType::OctetString));
        assert_eq!(legacy, Tag::parse("x:4").unwrap());
        let hex = Tag::parse("x:4x").unwrap();
        assert_eq!(hex.module.as_deref(), Some("x"));
        assert!(hex.hex);
    }

    #[test]
    fn bad_tags_are_rejected() {
        assert!(Tag::parse("3").is_err());
        assert!(Tag::parse("2x").is_err());
        assert!(Tag::parse("").is_err());
        assert!(Tag::parse("9bad:4").is_err());
    }

    #[test]
    fn malformed_line_reports_offset() {
        match parse_record("1.3.6.1|4", 42) {
            Err(StoreError::Parse { offset, .. }) => assert_eq!(offset, 42),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_oid("1.3.x|4|v", 0).is_err());
    }

    #[test]
    fn format_then_parse_round_trips() {
        let cases = vec![
            Record::from_value(oid("1.3.6.1.2.1.1.1.0"), &Value::octets("hello world")),
            Record::from_value(oid("1.3.6.1.2.1.1.2.0"), &Value::ObjectIdentifier(oid("1.3.6.1.4.1.8072"))),
            Record::from_value(oid("1.3.6.1.2.1.2.2.1.6.1"), &Value::OctetString(vec![0, 0x1b, 0x21, 0xff])),
            Record::from_value(oid("1.3.6.1.2.1.4.20.1.1.10"), &Value::IpAddress([10, 0, 0, 1])),
            Record::new(oid("1.3.6.1.2.1.2.2.1.10.1"), Tag::module("numeric", Some(ValueType::Counter32)), "rate=10,initial=5"),
        ];
        for r in cases {
            let line = format_record(&r);
            assert_eq!(parse_record(&line, 0).unwrap(), r, "line {:?}", line);
        }
        let bin = Record::from_value(oid("1.3.6.1"), &Value::OctetString(vec![0, 1]));
        assert_eq!(format_record(&bin), "1.3.6.1|4x|0001\n");
    }
}
