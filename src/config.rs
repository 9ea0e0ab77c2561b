//! Runtime tunables.
//!
//! Mirrors the teacher's plain-struct-plus-`Default` configuration style
//! (e.g. `database::cache::CacheConfig`). The host owns parsing config files
//! or environment variables; this crate only needs the resulting values.

/// Policy + ceiling knobs for the virtual attribute subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct VasConfig {
    /// Dispatcher recursion ceiling before a lookup is abandoned with
    /// `LoopDetected` (spec.md §4.1: specified 50).
    pub dispatch_recursion_ceiling: u32,

    /// Nested-role recursion ceiling (spec.md §4.3: specified 5).
    pub role_nesting_ceiling: u32,

    /// COS template-building recursion ceiling (spec.md §3 invariants:
    /// specified 30).
    pub cos_template_recursion_ceiling: u32,

    /// When true, every cacheable lookup is memoised in the per-entry vattr
    /// cache (spec.md §4.1 `cache_all`).
    pub cache_all: bool,

    /// When true, no per-entry memoisation happens regardless of
    /// cacheability (spec.md §4.1 `cache_none`). Takes precedence over
    /// `cache_all`. `nsRole` is still always cached (hardcoded per spec.md).
    pub cache_none: bool,
}

impl Default for VasConfig {
    fn default() -> Self {
        VasConfig {
            dispatch_recursion_ceiling: 50,
            role_nesting_ceiling: 5,
            cos_template_recursion_ceiling: 30,
            cache_all: true,
            cache_none: false,
        }
    }
}
