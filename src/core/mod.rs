pub mod oid;
pub mod value;

pub use oid::*;
pub use value::*;

/// 一个 (OID, 值) 对：查询的输入与输出单元
pub type VarBind = (Oid, Value);
