pub mod flock;
pub mod lockfile;

pub use flock::FileLock;
