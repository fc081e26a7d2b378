mod atomic_ops;
mod conflicts;
mod crash_recovery;
mod integrity;
