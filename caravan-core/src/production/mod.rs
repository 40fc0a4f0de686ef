pub mod facility;
pub mod scheduler;

pub use facility::{DEFAULT_RECLAIM_FRACTION, Facility, GoodRate};
pub use scheduler::{Conflict, Conflicts, RunReport, contention_divisor, execute, propose, resolve, run_all};
