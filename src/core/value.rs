use std::fmt;
use std::net::Ipv4Addr;

use crate::core::Oid;

/// 类型标签表：record 文件中的数字 tag ↔ 值类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Integer32,
    OctetString,
    Null,
    ObjectIdentifier,
    IpAddress,
    Counter32,
    Gauge32,
    TimeTicks,
    Opaque,
    Counter64,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl ValueType {
    pub const ALL: [ValueType; 13] = [
        ValueType::Integer32,
        ValueType::OctetString,
        ValueType::Null,
        ValueType::ObjectIdentifier,
        ValueType::IpAddress,
        ValueType::Counter32,
        ValueType::Gauge32,
        ValueType::TimeTicks,
        ValueType::Opaque,
        ValueType::Counter64,
        ValueType::NoSuchObject,
        ValueType::NoSuchInstance,
        ValueType::EndOfMibView,
    ];

    pub fn tag(self) -> u8 {
        match self {
            ValueType::Integer32 => 2,
            ValueType::OctetString => 4,
            ValueType::Null => 5,
            ValueType::ObjectIdentifier => 6,
            ValueType::IpAddress => 64,
            ValueType::Counter32 => 65,
            ValueType::Gauge32 => 66,
            ValueType::TimeTicks => 67,
            ValueType::Opaque => 68,
            ValueType::Counter64 => 70,
            ValueType::NoSuchObject => 128,
            ValueType::NoSuchInstance => 129,
            ValueType::EndOfMibView => 130,
        }
    }

    pub fn from_tag(tag: u8) -> Option<ValueType> {
        ValueType::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// 是否允许 hex 编码形式（`4x`、`68x`、`64x`）
    pub fn allows_hex(self) -> bool {
        matches!(
            self,
            ValueType::OctetString | ValueType::Opaque | ValueType::IpAddress
        )
    }

    /// 按原生文本形式解码
    pub fn decode(self, text: &str) -> Result<Value, String> {
        fn num<T: std::str::FromStr>(text: &str) -> Result<T, String> {
            text.trim()
                .parse::<T>()
                .map_err(|_| format!("bad numeric value {:?}", text))
        }

        Ok(match self {
            ValueType::Integer32 => Value::Integer32(num(text)?),
            ValueType::OctetString => Value::OctetString(text.as_bytes().to_vec()),
            ValueType::Null => Value::Null,
            ValueType::ObjectIdentifier => Value::ObjectIdentifier(
                Oid::parse(text).ok_or_else(|| format!("bad OID value {:?}", text))?,
            ),
            ValueType::IpAddress => {
                let ip: Ipv4Addr = text
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad IpAddress value {:?}", text))?;
                Value::IpAddress(ip.octets())
            }
            ValueType::Counter32 => Value::Counter32(num(text)?),
            ValueType::Gauge32 => Value::Gauge32(num(text)?),
            ValueType::TimeTicks => Value::TimeTicks(num(text)?),
            ValueType::Opaque => Value::Opaque(text.as_bytes().to_vec()),
            ValueType::Counter64 => Value::Counter64(num(text)?),
            ValueType::NoSuchObject => Value::NoSuchObject,
            ValueType::NoSuchInstance => Value::NoSuchInstance,
            ValueType::EndOfMibView => Value::EndOfMibView,
        })
    }

    /// 按 hex 文本解码（仅字节类类型）
    pub fn decode_hex(self, text: &str) -> Result<Value, String> {
        let bytes = decode_hex(text.trim())?;
        match self {
            ValueType::OctetString => Ok(Value::OctetString(bytes)),
            ValueType::Opaque => Ok(Value::Opaque(bytes)),
            ValueType::IpAddress => {
                let octets: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| "IpAddress hex value must be 4 bytes".to_string())?;
                Ok(Value::IpAddress(octets))
            }
            other => Err(format!("tag {} has no hex form", other.tag())),
        }
    }
}

/// 已类型化的变量值。
///
/// 最后三个变体是结构性哨兵：查询落空时由存储层合成，不代表真实数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Integer32(i32),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer32(_) => ValueType::Integer32,
            Value::OctetString(_) => ValueType::OctetString,
            Value::Null => ValueType::Null,
            Value::ObjectIdentifier(_) => ValueType::ObjectIdentifier,
            Value::IpAddress(_) => ValueType::IpAddress,
            Value::Counter32(_) => ValueType::Counter32,
            Value::Gauge32(_) => ValueType::Gauge32,
            Value::TimeTicks(_) => ValueType::TimeTicks,
            Value::Opaque(_) => ValueType::Opaque,
            Value::Counter64(_) => ValueType::Counter64,
            Value::NoSuchObject => ValueType::NoSuchObject,
            Value::NoSuchInstance => ValueType::NoSuchInstance,
            Value::EndOfMibView => ValueType::EndOfMibView,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    pub fn octets(text: &str) -> Value {
        Value::OctetString(text.as_bytes().to_vec())
    }

    /// 数值类值的 u64 视图（numeric 等模块使用）
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer32(v) => u64::try_from(*v).ok(),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v as u64),
            Value::Counter64(v) => Some(*v),
            _ => None,
        }
    }

    /// 编码为 record 文本：返回 (是否 hex, 文本)。
    ///
    /// 不可打印的字节串自动走 hex 形式。
    pub fn encode(&self) -> (bool, String) {
        match self {
            Value::Integer32(v) => (false, v.to_string()),
            Value::OctetString(b) | Value::Opaque(b) => {
                if is_printable(b) {
                    (false, String::from_utf8_lossy(b).into_owned())
                } else {
                    (true, encode_hex(b))
                }
            }
            Value::Null => (false, String::new()),
            Value::ObjectIdentifier(oid) => (false, oid.to_string()),
            Value::IpAddress(o) => (false, Ipv4Addr::from(*o).to_string()),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => (false, v.to_string()),
            Value::Counter64(v) => (false, v.to_string()),
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {
                (false, String::new())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::NoSuchObject => f.write_str("No Such Object"),
            Value::NoSuchInstance => f.write_str("No Such Instance"),
            Value::EndOfMibView => f.write_str("End of MIB View"),
            Value::OctetString(b) | Value::Opaque(b) if !is_printable(b) => {
                write!(f, "0x{}", encode_hex(b))
            }
            other => f.write_str(&other.encode().1),
        }
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (0x20..0x7f).contains(&b))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    hex::decode(text).map_err(|e| match e {
        hex::FromHexError::OddLength => format!("odd-length hex value {:?}", text),
        other => format!("bad hex value {:?}: {}", text, other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_table_is_bijective() {
        for t in ValueType::ALL {
            assert_eq!(ValueType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(ValueType::from_tag(3), None);
    }

    #[test]
    fn decode_native_forms() {
        assert_eq!(ValueType::Integer32.decode("-5").unwrap(), Value::Integer32(-5));
        assert_eq!(
            ValueType::IpAddress.decode("10.0.0.1").unwrap(),
            Value::IpAddress([10, 0, 0, 1])
        );
        assert_eq!(
            ValueType::Counter64.decode("18446744073709551615").unwrap(),
            Value::Counter64(u64::MAX)
        );
        assert!(ValueType::Counter32.decode("-1").is_err());
        assert!(ValueType::ObjectIdentifier.decode("1.x").is_err());
    }

    #[test]
    fn binary_octets_encode_as_hex() {
        let v = Value::OctetString(vec![0x00, 0xff, 0x10]);
        assert_eq!(v.encode(), (true, "00ff10".to_string()));
        assert_eq!(ValueType::OctetString.decode_hex("00FF10").unwrap(), v);
        assert!(ValueType::Integer32.decode_hex("00").is_err());
        assert!(decode_hex("abc").unwrap_err().starts_with("odd-length"));
        assert!(decode_hex("zz").unwrap_err().starts_with("bad hex"));
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
    }
}
