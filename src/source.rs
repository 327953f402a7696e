use std::any::Any;
use std::time::{Duration, Instant};

/// A stable handle to a registered source. Never reused while the source is
/// live; the underlying slot is recycled only after the last reference drops
/// (§3 Source, `refcount`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub(crate) usize);

/// The four-method polymorphic behavior a source implements (§4.6).
///
/// `finalize` is deliberately absent: the idiomatic replacement is `Drop`
/// on the concrete type behind `Box<dyn SourceFuncs>` (§9 Design Note,
/// Function pointers as source behaviors). Dropping the box *is* finalize.
pub trait SourceFuncs: Send {
    /// Pure inspection, called before the kernel poll. Returning `true`
    /// means "dispatch me without waiting"; the returned `Duration`, if
    /// any, bounds how long the tick may block.
    fn prepare(&mut self, now: Instant) -> (bool, Option<Duration>);

    /// Called after the kernel poll returns; decide whether to fire.
    fn check(&mut self, now: Instant) -> bool;

    /// Run the user's callback. Returning `false` asks the registry to
    /// destroy the source after this call returns.
    fn dispatch(&mut self, now: Instant, user_data: &mut dyn Any) -> bool;
}
