use std::str::FromStr;

use crate::error::{Result, StoreError};

pub const LIST_SEP: char = ':';

/// 扁平选项串：`key=value,key=value`；值内部可以是 `:` 分隔的小列表。
///
/// 同一个 key 出现多次时后者生效。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    pairs: Vec<(String, String)>,
}

impl Options {
    pub fn parse(text: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for item in text.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| StoreError::BadOptions(format!("expected key=value, got {:?}", item)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StoreError::BadOptions(format!("empty key in {:?}", item)));
            }
            pairs.push((key.to_string(), value.trim().to_string()));
        }
        Ok(Self { pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<T>()
                .map(Some)
                .map_err(|_| StoreError::BadOptions(format!("bad value for {}: {:?}", key, v))),
        }
    }

    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some("1") | Some("true") | Some("yes") | Some("on") => Ok(Some(true)),
            Some("0") | Some("false") | Some("no") | Some("off") => Ok(Some(false)),
            Some(v) => Err(StoreError::BadOptions(format!(
                "bad boolean for {}: {:?}",
                key, v
            ))),
        }
    }

    pub fn get_list(&self, key: &str) -> Vec<&str> {
        match self.get(key) {
            None | Some("") => Vec::new(),
            Some(v) => v.split(LIST_SEP).collect(),
        }
    }

    /// 用 `over` 覆盖自身
    pub fn merged(&self, over: &Options) -> Options {
        let mut pairs = self.pairs.clone();
        pairs.extend(over.pairs.iter().cloned());
        Options { pairs }
    }
}
