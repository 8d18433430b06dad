use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 存储层计数器（无锁，进程内共享）
#[derive(Debug, Default)]
pub struct StoreStats {
    queries: AtomicU64,
    exact_hits: AtomicU64,
    positional_searches: AtomicU64,
    placeholder_hits: AtomicU64,
    module_calls: AtomicU64,
    module_suppressed: AtomicU64,
    failures: AtomicU64,
    index_builds: AtomicU64,
    handle_opens: AtomicU64,
    handle_evictions: AtomicU64,
}

macro_rules! counter {
    ($($method:ident => $field:ident),* $(,)?) => {
        impl StoreStats {
            $(
                pub fn $method(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    record_query => queries,
    record_exact_hit => exact_hits,
    record_positional_search => positional_searches,
    record_placeholder_hit => placeholder_hits,
    record_module_call => module_calls,
    record_module_suppressed => module_suppressed,
    record_failure => failures,
    record_index_build => index_builds,
    record_open => handle_opens,
    record_eviction => handle_evictions,
}

impl StoreStats {
    pub fn report(&self) -> StatsReport {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsReport {
            queries: get(&self.queries),
            exact_hits: get(&self.exact_hits),
            positional_searches: get(&self.positional_searches),
            placeholder_hits: get(&self.placeholder_hits),
            module_calls: get(&self.module_calls),
            module_suppressed: get(&self.module_suppressed),
            failures: get(&self.failures),
            index_builds: get(&self.index_builds),
            handle_opens: get(&self.handle_opens),
            handle_evictions: get(&self.handle_evictions),
            open_handles: 0,
        }
    }
}

/// 某一时刻的计数快照
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsReport {
    /// 处理的 var-bind 数
    pub queries: u64,
    pub exact_hits: u64,
    pub positional_searches: u64,
    /// 由前置占位记录回答的查询
    pub placeholder_hits: u64,
    pub module_calls: u64,
    pub module_suppressed: u64,
    /// 以 not-found 哨兵替代的失败
    pub failures: u64,
    pub index_builds: u64,
    pub handle_opens: u64,
    pub handle_evictions: u64,
    /// 当前已打开的数据文件数（由句柄缓存填入）
    pub open_handles: usize,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           snmprec-store Statistics               ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Queries:                                         ║")?;
        writeln!(f, "║   var-binds:    {:>10}                       ║", self.queries)?;
        writeln!(f, "║   exact hits:   {:>10}                       ║", self.exact_hits)?;
        writeln!(
            f,
            "║   bisections:   {:>10}                       ║",
            self.positional_searches
        )?;
        writeln!(
            f,
            "║   placeholders: {:>10}                       ║",
            self.placeholder_hits
        )?;
        writeln!(f, "║   failures:     {:>10}                       ║", self.failures)?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Modules:                                         ║")?;
        writeln!(f, "║   calls:        {:>10}                       ║", self.module_calls)?;
        writeln!(
            f,
            "║   suppressed:   {:>10}                       ║",
            self.module_suppressed
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Files:                                           ║")?;
        writeln!(f, "║   index builds: {:>10}                       ║", self.index_builds)?;
        writeln!(f, "║   opens:        {:>10}                       ║", self.handle_opens)?;
        writeln!(
            f,
            "║   evictions:    {:>10}                       ║",
            self.handle_evictions
        )?;
        writeln!(f, "║   open now:     {:>10}                       ║", self.open_handles)?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_report() {
        let s = StoreStats::default();
        s.record_query();
        s.record_query();
        s.record_eviction();
        let r = s.report();
        assert_eq!(r.queries, 2);
        assert_eq!(r.handle_evictions, 1);
        assert!(r.to_string().contains("var-binds"));
    }
}
