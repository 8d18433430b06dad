//! `numeric`：随时间线性变化的计数器/仪表值
//!
//! 记录值形如 `initial=100,rate=5,max=1000,wrap=1`。
//! 值 = (initial + rate × 经过秒数) × scale + offset，再按 min/max 截断或回绕。

use std::time::{Duration, Instant};

use crate::core::{Value, ValueType, VarBind};
use crate::error::{Result, StoreError};
use crate::record::{Record, Tag};

use super::{scalar_miss, scalar_position, Options, Outcome, VariationContext, VariationModule};

pub const DEFAULT_CAPTURE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Numeric {
    initial: f64,
    rate: f64,
    capture_period: Duration,
}

impl Default for Numeric {
    fn default() -> Self {
        Self {
            initial: 0.0,
            rate: 1.0,
            capture_period: DEFAULT_CAPTURE_PERIOD,
        }
    }
}

/// record 级状态：计时起点
struct Clock {
    started: Instant,
}

/// 捕获模式第一遍留下的样本
struct Sample {
    value: u64,
    at: Instant,
}

fn type_bounds(vt: ValueType) -> Option<(f64, f64)> {
    match vt {
        ValueType::Integer32 => Some((i32::MIN as f64, i32::MAX as f64)),
        ValueType::Counter32 | ValueType::Gauge32 | ValueType::TimeTicks => {
            Some((0.0, u32::MAX as f64))
        }
        ValueType::Counter64 => Some((0.0, u64::MAX as f64)),
        _ => None,
    }
}

fn to_value(vt: ValueType, v: f64) -> Option<Value> {
    let v = v.floor();
    match vt {
        ValueType::Integer32 => Some(Value::Integer32(v as i32)),
        ValueType::Counter32 => Some(Value::Counter32(v as u32)),
        ValueType::Gauge32 => Some(Value::Gauge32(v as u32)),
        ValueType::TimeTicks => Some(Value::TimeTicks(v as u32)),
        ValueType::Counter64 => Some(Value::Counter64(v as u64)),
        _ => None,
    }
}

/// 计算 `elapsed` 秒后的值
pub fn evaluate(vt: ValueType, params: &Options, defaults: (f64, f64), elapsed: f64) -> Result<Value> {
    let (lo, hi) = type_bounds(vt)
        .ok_or_else(|| StoreError::BadOptions(format!("numeric cannot produce type {:?}", vt)))?;
    let initial = params.get_or("initial", defaults.0)?;
    let rate = params.get_or("rate", defaults.1)?;
    let scale = params.get_or("scale", 1.0)?;
    let offset = params.get_or("offset", 0.0)?;
    let min = params.get_or("min", lo)?.max(lo);
    let max = params.get_or("max", hi)?.min(hi);
    let wrap = params
        .get_bool("wrap")?
        .unwrap_or(matches!(vt, ValueType::Counter32 | ValueType::Counter64));

    let mut v = (initial + rate * elapsed) * scale + offset;
    if v > max {
        v = if wrap && max > min {
            min + (v - min) % (max - min + 1.0)
        } else {
            max
        };
    }
    if v < min {
        v = min;
    }
    to_value(vt, v).ok_or_else(|| StoreError::BadOptions(format!("numeric cannot produce type {:?}", vt)))
}

impl VariationModule for Numeric {
    fn init(&mut self, options: &Options) -> Result<()> {
        self.initial = options.get_or("initial", self.initial)?;
        self.rate = options.get_or("rate", self.rate)?;
        if let Some(secs) = options.get_parsed::<f64>("period")? {
            self.capture_period = Duration::try_from_secs_f64(secs.max(0.0))
                .map_err(|e| StoreError::BadOptions(format!("numeric period {}: {}", secs, e)))?;
        }
        Ok(())
    }

    fn variate(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<VarBind>> {
        let pos = scalar_position(&record.oid, &ctx.call);
        if let Some(miss) = scalar_miss(pos, &ctx.call) {
            return Ok(miss);
        }
        if ctx.set_flag {
            return Ok(Outcome::Answer((ctx.orig_oid.clone(), Value::NoSuchInstance)));
        }

        let params = Options::parse(&record.value)?;
        let vt = record.tag.value_type.unwrap_or(ValueType::Counter32);
        let started = ctx
            .record_state
            .get_or_insert_with(|| Clock {
                started: Instant::now(),
            })
            .started;
        let elapsed = started.elapsed().as_secs_f64();
        let value = evaluate(vt, &params, (self.initial, self.rate), elapsed)
            .map_err(|e| StoreError::module_failed("numeric", &record.oid, e.to_string()))?;
        Ok(Outcome::Answer((record.oid.clone(), value)))
    }

    /// 两遍捕获：第一遍记下样本并请求重跑，第二遍用差值推出速率
    fn record(&self, record: &Record, ctx: &mut VariationContext<'_>) -> Result<Outcome<Record>> {
        let Some(vt) = record.tag.value_type.filter(|t| type_bounds(*t).is_some()) else {
            return Ok(Outcome::Answer(record.clone()));
        };
        let current = match record.decode_value().ok().and_then(|v| v.as_u64()) {
            Some(v) => v,
            None => return Ok(Outcome::Answer(record.clone())),
        };

        if let Some(first) = ctx.record_state.get::<Sample>() {
            let secs = first.at.elapsed().as_secs_f64();
            let rate = if secs > 0.0 && current >= first.value {
                (current - first.value) as f64 / secs
            } else {
                0.0
            };
            ctx.record_state.clear();
            let text = format!("initial={},rate={:.3}", current, rate);
            return Ok(Outcome::Answer(Record::new(
                record.oid.clone(),
                Tag::module("numeric", Some(vt)),
                text,
            )));
        }

        ctx.record_state.set(Sample {
            value: current,
            at: Instant::now(),
        });
        if ctx.vars_remaining == 0 {
            Ok(Outcome::RetryAfter(Some(self.capture_period)))
        } else {
            Ok(Outcome::Answer(record.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variation::testing::Harness;

    fn rec(oid: &str, tag: &str, value: &str) -> Record {
        Record::new(oid.parse().unwrap(), Tag::parse(tag).unwrap(), value)
    }

    #[test]
    fn constant_rate_zero() {
        let m = Numeric::default();
        let r = rec("1.3.6.1.2.1.2.2.1.10.1", "numeric:65", "initial=42,rate=0");
        let mut h = Harness::new("1.3.6.1.2.1.2.2.1.10.1");
        let out = m.variate(&r, &mut h.ctx()).unwrap();
        assert_eq!(out, Outcome::Answer((r.oid.clone(), Value::Counter32(42))));
    }

    #[test]
    fn unrepresentable_period_is_rejected() {
        let mut m = Numeric::default();
        for bad in ["period=inf", "period=1e300"] {
            let err = m.init(&Options::parse(bad).unwrap()).unwrap_err();
            assert!(matches!(err, StoreError::BadOptions(_)), "{}", bad);
        }
        m.init(&Options::parse("period=2.5").unwrap()).unwrap();
        assert_eq!(m.capture_period, Duration::from_millis(2500));
    }

    #[test]
    fn clamps_and_wraps() {
        let p = Options::parse("initial=90,rate=10,max=100").unwrap();
        assert_eq!(
            evaluate(ValueType::Gauge32, &p, (0.0, 0.0), 5.0).unwrap(),
            Value::Gauge32(100)
        );
        // 计数器默认回绕：140 在 [0,100] 上回绕为 39
        assert_eq!(
            evaluate(ValueType::Counter32, &p, (0.0, 0.0), 5.0).unwrap(),
            Value::Counter32(39)
        );
        assert!(evaluate(ValueType::OctetString, &p, (0.0, 0.0), 0.0).is_err());
    }

    #[test]
    fn next_skips_until_past_request() {
        let m = Numeric::default();
        let r = rec("1.3.6.1.2.1.1.3.0", "numeric:67", "rate=0,initial=7");
        let mut h = Harness::new("1.3.6.1.2.1.1.3.0");
        h.next_flag = true;
        assert_eq!(m.variate(&r, &mut h.ctx()).unwrap(), Outcome::Suppressed);

        let mut h = Harness::new("1.3.6.1.2.1.1.2.0");
        h.next_flag = true;
        assert_eq!(
            m.variate(&r, &mut h.ctx()).unwrap(),
            Outcome::Answer((r.oid.clone(), Value::TimeTicks(7)))
        );
    }

    #[test]
    fn capture_takes_two_passes() {
        let mut m = Numeric::default();
        m.init(&Options::parse("period=0.5").unwrap()).unwrap();
        let mut h = Harness::new("1.3.6.1.2.1.2.2.1.10.1");

        let first = rec("1.3.6.1.2.1.2.2.1.10.1", "65", "100");
        assert_eq!(
            m.record(&first, &mut h.ctx()).unwrap(),
            Outcome::RetryAfter(Some(Duration::from_millis(500)))
        );

        std::thread::sleep(Duration::from_millis(20));
        let second = rec("1.3.6.1.2.1.2.2.1.10.1", "65", "200");
        match m.record(&second, &mut h.ctx()).unwrap() {
            Outcome::Answer(r) => {
                assert_eq!(r.tag, Tag::module("numeric", Some(ValueType::Counter32)));
                assert!(r.value.starts_with("initial=200,rate="));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn capture_passes_through_non_numeric() {
        let m = Numeric::default();
        let r = rec("1.3.6.1.2.1.1.1.0", "4", "hello");
        let mut h = Harness::new("1.3.6.1.2.1.1.1.0");
        assert_eq!(m.record(&r, &mut h.ctx()).unwrap(), Outcome::Answer(r.clone()));
    }
}
