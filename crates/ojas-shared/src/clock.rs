use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision the store persists (microseconds), so a
/// value handed back to a caller equals the value read back later.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
