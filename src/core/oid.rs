use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 点分整数标识符（OID）。
///
/// 排序按分量逐个比较（字典序）：前缀总是排在其扩展之前，
/// 例如 `1.3.6.1 < 1.3.6.1.2 < 1.3.6.2`。
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// self 是否为 other 的前缀（相等也算前缀）
    pub fn is_prefix_of(&self, other: &Oid) -> bool {
        other.0.starts_with(&self.0)
    }

    /// self 是否为 other 的真前缀
    pub fn is_strict_prefix_of(&self, other: &Oid) -> bool {
        self.0.len() < other.0.len() && self.is_prefix_of(other)
    }

    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }

    /// 解析点分文本；允许一个前导 `.`。
    pub fn parse(text: &str) -> Option<Oid> {
        let text = text.trim();
        let text = text.strip_prefix('.').unwrap_or(text);
        if text.is_empty() {
            return None;
        }
        let mut arcs = Vec::with_capacity(text.len() / 2 + 1);
        for part in text.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            arcs.push(part.parse::<u32>().ok()?);
        }
        Some(Oid(arcs))
    }
}

impl FromStr for Oid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Oid::parse(s).ok_or_else(|| format!("bad OID {:?}", s))
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Oid(arcs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn ordering_is_by_component() {
        assert!(oid("1.3.6.1.2") < oid("1.3.6.1.10"));
        assert!(oid("1.3.6.1") < oid("1.3.6.1.0"));
        assert!(oid("1.3.6.1.2.1.1.9") < oid("1.3.6.1.2.1.2"));
    }

    #[test]
    fn prefix_checks() {
        assert!(oid("1.3.6.1.2.1.2").is_strict_prefix_of(&oid("1.3.6.1.2.1.2.2.1.1.1")));
        assert!(!oid("1.3.6.1.2.1.2").is_strict_prefix_of(&oid("1.3.6.1.2.1.2")));
        assert!(oid("1.3.6.1.2.1.2").is_prefix_of(&oid("1.3.6.1.2.1.2")));
        assert!(!oid("1.3.6.1.2.1.2").is_prefix_of(&oid("1.3.6.1.2.1.20")));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(oid(".1.3.6").to_string(), "1.3.6");
        assert!(Oid::parse("1..3").is_none());
        assert!(Oid::parse("1.3.x").is_none());
        assert!(Oid::parse("").is_none());
        assert!(Oid::parse("1.99999999999").is_none());
    }
}
