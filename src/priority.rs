//! Priority bands. Lower numbers run first (§3 invariants).
//!
//! Named after the constants `original_source/glib/gmain.c`'s callers use
//! (`G_PRIORITY_HIGH`, `G_PRIORITY_DEFAULT`, `G_PRIORITY_DEFAULT_IDLE`), kept
//! here as plain `i32` constants rather than an enum since callers are free
//! to register at any priority in between.
pub struct Priority;

impl Priority {
    /// Use for sources that must preempt everything else (rare).
    pub const HIGH: i32 = -100;
    /// The priority [`crate::sources::timeout::TimeoutSource`] uses by default.
    pub const DEFAULT: i32 = 0;
    /// The priority [`crate::sources::idle::IdleSource`] uses by default: high
    /// enough that any ready source at `DEFAULT` or below starves it, per the
    /// gating rule in §4.4.
    pub const DEFAULT_IDLE: i32 = 200;
    /// Lower than `DEFAULT_IDLE`; for idle work that should still yield to
    /// ordinary idles.
    pub const LOW: i32 = 300;
}
