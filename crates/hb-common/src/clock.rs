use std::time::Duration;

/// Time source for lease arithmetic.
///
/// Lease expirations are kept on the boot clock (monotonic since boot,
/// unaffected by wall-clock jumps), so the clock is a trait seam rather
/// than ambient state: tests drive the lease logic with a manual clock.
pub trait Clock: Send + Sync {
    /// Time elapsed since boot.
    fn now_boot(&self) -> Duration;
}

/// Production clock backed by CLOCK_BOOTTIME.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootClock;

impl Clock for BootClock {
    fn now_boot(&self) -> Duration {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // Cannot fail for a valid clock id and timespec pointer.
        unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) };
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }
}
