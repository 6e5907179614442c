pub mod fs_atomic;
pub mod ids;
pub mod logging;

pub use ids::{ReportId, SessionId};

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
