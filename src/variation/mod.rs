//! 变体模块运行时
//!
//! 占位记录（tag 形如 `module:type`）的值不直接返回，而是交给同名模块计算。
//! 模块可以回答、跳过（让存储层继续向后找）或要求延后重试（捕获模式）。

pub mod delay;
pub mod multiplex;
pub mod numeric;
pub mod options;
pub mod registry;
pub mod state;
pub mod writecache;

use std::ops::Deref;
use std::path::Path;
use std::time::Duration;

use crate::core::{Oid, Value, VarBind};
use crate::error::Result;
use crate::query::RequestInfo;
use crate::record::Record;

pub use options::Options;
pub use registry::{ModuleManifest, ModuleRegistry};
pub use state::{ModuleState, StateSlot};

/// 模块调用结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Answer(T),
    /// 本记录不回答；存储层继续向后查找
    Suppressed,
    /// 捕获模式：稍后重跑整个过程
    RetryAfter(Option<Duration>),
}

/// 一次模块调用的只读上下文
#[derive(Clone, Copy, Debug)]
pub struct CallInfo<'a> {
    /// 请求中的原始 OID 与值
    pub orig_oid: &'a Oid,
    pub orig_value: &'a Value,
    pub next_flag: bool,
    pub set_flag: bool,
    /// 索引中有与请求 OID 完全相同的记录
    pub exact_match: bool,
    /// 当前记录是覆盖请求 OID 的子树占位
    pub subtree_flag: bool,
    /// 本批次中此 var-bind 之后还剩几个
    pub vars_remaining: usize,
    pub vars_total: usize,
    pub data_file: &'a Path,
    pub request: &'a RequestInfo,
}

/// 模块看到的完整上下文：只读调用信息 + 两级可写状态
pub struct VariationContext<'a> {
    pub call: CallInfo<'a>,
    pub agent_state: &'a mut StateSlot,
    pub record_state: &'a mut StateSlot,
}

impl<'a> Deref for VariationContext<'a> {
    type Target = CallInfo<'a>;

    fn deref(&self) -> &Self::Target {
        &self.call
    }
}

/// 变体模块。
///
/// `init` 在注册时调用一次，`shutdown` 在注册表释放时调用一次；
/// 中间可以被多个线程并发调用 `variate` / `record`。
pub trait VariationModule: Send + Sync {
    fn init(&mut self, _options: &Options) -> Result<()> {
        Ok(())
    }

    /// 服务模式：为占位记录生成 (OID, 值)
    fn variate(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<VarBind>>;

    /// 捕获模式：把观测到的值改写成要落盘的 record
    fn record(&self, record: &Record, _ctx: &mut VariationContext<'_>) -> Result<Outcome<Record>> {
        Ok(Outcome::Answer(record.clone()))
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// 单 OID 占位记录相对请求的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// 这条记录就是答案
    Here,
    /// GETNEXT 还没越过请求 OID，跳过
    Skip,
    /// GET 请求的不是这条记录
    Missing,
}

pub fn scalar_position(record_oid: &Oid, call: &CallInfo<'_>) -> Position {
    if call.next_flag {
        if record_oid > call.orig_oid {
            Position::Here
        } else {
            Position::Skip
        }
    } else if record_oid == call.orig_oid {
        Position::Here
    } else {
        Position::Missing
    }
}

/// `scalar_position` 的非 `Here` 情形直接映射为结果
pub fn scalar_miss(pos: Position, call: &CallInfo<'_>) -> Option<Outcome<VarBind>> {
    match pos {
        Position::Here => None,
        Position::Skip => Some(Outcome::Suppressed),
        Position::Missing => Some(Outcome::Answer((
            call.orig_oid.clone(),
            Value::NoSuchInstance,
        ))),
    }
}

/// 从记录值选项里取出静态值：`value=...` 或 `hexvalue=...`，缺省为类型的空值
pub fn literal_value(record: &Record, params: &Options) -> Result<Value> {
    use crate::core::ValueType;
    use crate::error::StoreError;

    let vt = record.tag.value_type.unwrap_or(ValueType::OctetString);
    let decoded = if let Some(hex) = params.get("hexvalue") {
        vt.decode_hex(hex)
    } else {
        vt.decode(params.get("value").unwrap_or(""))
    };
    decoded.map_err(|e| {
        let module = record.tag.module.as_deref().unwrap_or("?");
        StoreError::module_failed(module, &record.oid, e)
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::PathBuf;

    /// 测试用的上下文构造器
    pub struct Harness {
        pub orig_oid: Oid,
        pub orig_value: Value,
        pub next_flag: bool,
        pub set_flag: bool,
        pub vars_remaining: usize,
        pub data_file: PathBuf,
        pub request: RequestInfo,
        pub agent_state: StateSlot,
        pub record_state: StateSlot,
    }

    impl Harness {
        pub fn new(orig: &str) -> Self {
            Self {
                orig_oid: orig.parse().unwrap(),
                orig_value: Value::Null,
                next_flag: false,
                set_flag: false,
                vars_remaining: 0,
                data_file: PathBuf::from("/tmp/agent.snmprec"),
                request: RequestInfo::default(),
                agent_state: StateSlot::default(),
                record_state: StateSlot::default(),
            }
        }

        pub fn ctx(&mut self) -> VariationContext<'_> {
            VariationContext {
                call: CallInfo {
                    orig_oid: &self.orig_oid,
                    orig_value: &self.orig_value,
                    next_flag: self.next_flag,
                    set_flag: self.set_flag,
                    exact_match: !self.next_flag,
                    subtree_flag: false,
                    vars_remaining: self.vars_remaining,
                    vars_total: self.vars_remaining + 1,
                    data_file: &self.data_file,
                    request: &self.request,
                },
                agent_state: &mut self.agent_state,
                record_state: &mut self.record_state,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    #[test]
    fn scalar_position_follows_request_kind() {
        let rec: Oid = "1.3.6.1.2.1.1.3.0".parse().unwrap();

        let mut h = Harness::new("1.3.6.1.2.1.1.3.0");
        assert_eq!(scalar_position(&rec, &h.ctx().call), Position::Here);

        h.next_flag = true;
        assert_eq!(scalar_position(&rec, &h.ctx().call), Position::Skip);

        let mut h = Harness::new("1.3.6.1.2.1.1.2.0");
        h.next_flag = true;
        assert_eq!(scalar_position(&rec, &h.ctx().call), Position::Here);
        h.next_flag = false;
        let ctx = h.ctx();
        assert_eq!(scalar_position(&rec, &ctx.call), Position::Missing);
        assert_eq!(
            scalar_miss(Position::Missing, &ctx.call),
            Some(Outcome::Answer((ctx.orig_oid.clone(), Value::NoSuchInstance)))
        );
    }
}
