pub mod clock;
pub mod escape;
pub mod lockfile;

pub use clock::{BootClock, Clock};
pub use lockfile::{LockFile, LockType};
