mod activity;
mod ids;
mod session;
mod snapshot;

pub use activity::{ActivityEntry, ActivityKind, RECENT_ACTIVITY_CAP};
pub use ids::{
    FIRST_PRACTICE_PART, IdError, MAX_ID_LEN, MAX_PRACTICE_PARTS, PracticeKey, SessionKey, UserId,
    Year,
};
pub use session::{SavedSession, SavedSessionError};
pub use snapshot::{MAX_SCORE, ProgressSnapshot};
