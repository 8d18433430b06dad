//! `writecache`：可写的标量。SET 的值按 agent 缓存，之后的读取返回缓存值。
//!
//! 记录值为初始值：`value=<文本>` 或 `hexvalue=<hex>`。

use std::collections::HashMap;

use crate::core::{Oid, Value, VarBind};
use crate::error::Result;
use crate::record::Record;

use super::{
    literal_value, scalar_miss, scalar_position, Options, Outcome, VariationContext,
    VariationModule,
};

#[derive(Debug, Default)]
pub struct WriteCache;

/// agent 级状态
#[derive(Default)]
struct Written {
    values: HashMap<Oid, Value>,
}

impl VariationModule for WriteCache {
    fn variate(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<VarBind>> {
        let pos = scalar_position(&record.oid, &ctx.call);
        if let Some(miss) = scalar_miss(pos, &ctx.call) {
            return Ok(miss);
        }

        if ctx.set_flag {
            let incoming = ctx.orig_value.clone();
            if let Some(vt) = record.tag.value_type {
                if incoming.value_type() != vt {
                    tracing::debug!(
                        "Rejecting write to {}: expected {:?}, got {:?}",
                        record.oid,
                        vt,
                        incoming.value_type()
                    );
                    return Ok(Outcome::Answer((ctx.orig_oid.clone(), Value::NoSuchInstance)));
                }
            }
            let written = ctx.agent_state.get_or_insert_with(Written::default);
            written.values.insert(record.oid.clone(), incoming.clone());
            return Ok(Outcome::Answer((record.oid.clone(), incoming)));
        }

        let cached = ctx
            .agent_state
            .get::<Written>()
            .and_then(|w| w.values.get(&record.oid))
            .cloned();
        let value = match cached {
            Some(v) => v,
            None => literal_value(record, &Options::parse(&record.value)?)?,
        };
        Ok(Outcome::Answer((record.oid.clone(), value)))
    }
}
