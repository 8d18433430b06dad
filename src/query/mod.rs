//! 查询层：把一批 var-bind 解析为响应
//!
//! `DataFile` 负责单个记录文件；`AgentRegistry` 按请求上下文挑选数据文件。

pub mod agents;
pub mod datafile;

pub use agents::AgentRegistry;
pub use datafile::DataFile;

use crate::core::VarBind;

/// 协议层随请求传入的附加信息，原样转交给变体模块
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// SNMP context name / community，用于选择数据文件
    pub context_name: String,
    /// 请求来源地址（如 `10.0.0.5:161`），可为空
    pub transport_address: Option<String>,
}

impl RequestInfo {
    pub fn for_context(context_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            transport_address: None,
        }
    }
}

/// 响应一批 var-bind。
///
/// 输出与输入一一对应、同序；单个 var-bind 的失败只影响它自己
/// （以 not-found 哨兵替代），不会让整批失败。
pub trait Responder: Send + Sync {
    fn resolve(&self, vars: &[VarBind], next: bool, set: bool, request: &RequestInfo) -> Vec<VarBind>;

    /// GET
    fn read(&self, vars: &[VarBind], request: &RequestInfo) -> Vec<VarBind> {
        self.resolve(vars, false, false, request)
    }

    /// GETNEXT
    fn read_next(&self, vars: &[VarBind], request: &RequestInfo) -> Vec<VarBind> {
        self.resolve(vars, true, false, request)
    }

    /// SET
    fn write(&self, vars: &[VarBind], request: &RequestInfo) -> Vec<VarBind> {
        self.resolve(vars, false, true, request)
    }
}
