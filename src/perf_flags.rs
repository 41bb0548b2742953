//! Performance-flag interface (C5/§6): a plain `Copy` struct of booleans
//! snapshotted once per `execute(...)` call, plus the monotonic counters in
//! [`Stats`]. Neither is a global — both are owned by the `Interpreter`
//! instance (spec §9 "Global mutable state").

/// Every recognized flag from spec §6, each a boolean toggle queried by hot
/// paths. `Default` matches a conservative "everything fast-path enabled,
/// nothing adaptive" baseline; callers that want adaptive PIC sizing opt in
/// explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfFlags {
    pub rval_fastpath: bool,
    pub primitive_fastops: bool,
    pub field_pic: bool,
    pub field_pic_size_4: bool,
    pub index_pic: bool,
    pub index_pic_size_4: bool,
    pub method_pic: bool,
    pub method_pic_size_4: bool,
    pub local_slot_pic: bool,
    pub pic_adaptive: bool,
    pub pic_adaptive_methods_only: bool,
    pub pic_heuristic: bool,
    pub scope_pool: bool,
    pub regex_cache: bool,
    pub pic_debug_counters: bool,
}

impl PerfFlags {
    /// Every flag off — useful as a base for tests that only want to exercise
    /// one mechanism at a time.
    pub const fn all_off() -> Self {
        PerfFlags {
            rval_fastpath: false,
            primitive_fastops: false,
            field_pic: false,
            field_pic_size_4: false,
            index_pic: false,
            index_pic_size_4: false,
            method_pic: false,
            method_pic_size_4: false,
            local_slot_pic: false,
            pic_adaptive: false,
            pic_adaptive_methods_only: false,
            pic_heuristic: false,
            scope_pool: false,
            regex_cache: false,
            pic_debug_counters: false,
        }
    }

    pub const fn all_on() -> Self {
        PerfFlags {
            rval_fastpath: true,
            primitive_fastops: true,
            field_pic: true,
            field_pic_size_4: true,
            index_pic: true,
            index_pic_size_4: true,
            method_pic: true,
            method_pic_size_4: true,
            local_slot_pic: true,
            pic_adaptive: true,
            pic_adaptive_methods_only: false,
            pic_heuristic: true,
            scope_pool: true,
            regex_cache: true,
            pic_debug_counters: false,
        }
    }
}

impl Default for PerfFlags {
    /// The baseline a fresh `Interpreter` runs with: all fast paths and caches
    /// on, adaptive sizing and pooling on, debug counters off (they cost a
    /// write per access and are opt-in diagnostics).
    fn default() -> Self {
        PerfFlags {
            pic_debug_counters: false,
            ..Self::all_on()
        }
    }
}

/// Monotonically increasing counters (spec §6), owned by the interpreter
/// instance rather than a global, incremented only when `pic_debug_counters`
/// is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub field_pic_hit: u64,
    pub field_pic_miss: u64,
    pub field_pic_set_hit: u64,
    pub field_pic_set_miss: u64,
    pub index_pic_hit: u64,
    pub index_pic_miss: u64,
    pub method_pic_hit: u64,
    pub method_pic_miss: u64,
    pub local_var_pic_hit: u64,
    pub local_var_pic_miss: u64,
    pub fast_local_hit: u64,
    pub fast_local_miss: u64,
    pub primitive_fast_ops_hit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_enable_caches_but_not_debug_counters() {
        let flags = PerfFlags::default();
        assert!(flags.field_pic);
        assert!(flags.pic_adaptive);
        assert!(!flags.pic_debug_counters);
    }

    #[test]
    fn stats_start_at_zero() {
        let stats = Stats::default();
        assert_eq!(stats.field_pic_hit, 0);
    }
}
