//! `delay`：在返回固定值前等待一段时间，模拟慢速 agent
//!
//! 记录值：`wait=<毫秒>,value=<文本>` 或 `wait=<毫秒>,hexvalue=<hex>`。

use std::time::Duration;

use crate::core::VarBind;
use crate::error::Result;
use crate::record::Record;

use super::{
    literal_value, scalar_miss, scalar_position, Options, Outcome, VariationContext,
    VariationModule,
};

#[derive(Debug, Default)]
pub struct Delay {
    default_wait: Duration,
}

impl VariationModule for Delay {
    fn init(&mut self, options: &Options) -> Result<()> {
        let ms: u64 = options.get_or("wait", 0)?;
        self.default_wait = Duration::from_millis(ms);
        Ok(())
    }

    fn variate(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<VarBind>> {
        let pos = scalar_position(&record.oid, &ctx.call);
        if let Some(miss) = scalar_miss(pos, &ctx.call) {
            return Ok(miss);
        }

        let params = Options::parse(&record.value)?;
        let wait = match params.get_parsed::<u64>("wait")? {
            Some(ms) => Duration::from_millis(ms),
            None => self.default_wait,
        };
        if !wait.is_zero() {
            tracing::debug!("Delaying {} by {:?}", record.oid, wait);
            std::thread::sleep(wait);
        }

        if ctx.set_flag {
            return Ok(Outcome::Answer((record.oid.clone(), ctx.orig_value.clone())));
        }
        Ok(Outcome::Answer((record.oid.clone(), literal_value(record, &params)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::record::Tag;
    use crate::variation::testing::Harness;
    use std::time::Instant;

    fn rec(value: &str) -> Record {
        Record::new(
            "1.3.6.1.2.1.1.5.0".parse().unwrap(),
            Tag::parse("delay:4").unwrap(),
            value,
        )
    }

    #[test]
    fn waits_then_answers() {
        let m = Delay::default();
        let r = rec("wait=30,value=slow-box");
        let mut h = Harness::new("1.3.6.1.2.1.1.5.0");
        let t0 = Instant::now();
        let out = m.variate(&r, &mut h.ctx()).unwrap();
        assert!(t0.elapsed() >= Duration::from_millis(30));
        assert_eq!(out, Outcome::Answer((r.oid.clone(), Value::octets("slow-box"))));
    }

    #[test]
    fn hexvalue_and_set_echo() {
        let m = Delay::default();
        let r = rec("hexvalue=0001ff");
        let mut h = Harness::new("1.3.6.1.2.1.1.5.0");
        assert_eq!(
            m.variate(&r, &mut h.ctx()).unwrap(),
            Outcome::Answer((r.oid.clone(), Value::OctetString(vec![0, 1, 0xff])))
        );

        h.set_flag = true;
        h.orig_value = Value::octets("new");
        assert_eq!(
            m.variate(&r, &mut h.ctx()).unwrap(),
            Outcome::Answer((r.oid.clone(), Value::octets("new")))
        );
    }

    #[test]
    fn init_sets_default_wait() {
        let mut m = Delay::default();
        m.init(&Options::parse("wait=5").unwrap()).unwrap();
        assert_eq!(m.default_wait, Duration::from_millis(5));
        assert!(m.init(&Options::parse("wait=soon").unwrap()).is_err());
    }
}
