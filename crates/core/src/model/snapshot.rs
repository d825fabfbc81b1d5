use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::activity::{ActivityEntry, RECENT_ACTIVITY_CAP};
use crate::model::ids::{FIRST_PRACTICE_PART, MAX_PRACTICE_PARTS, PracticeKey, SessionKey, Year};
use crate::model::session::SavedSession;
use crate::time::{calendar_days_between, same_calendar_day};

/// Scores are percentages.
pub const MAX_SCORE: u8 = 100;

/// The complete state of one learner's journey.
///
/// Snapshots are value objects: every mutator takes `&self` and returns a
/// new snapshot, leaving the input untouched, so a caller can roll back an
/// optimistic update by keeping the old value. Persistence stores and loads
/// the snapshot whole; there are no field-level writes anywhere.
///
/// Every field carries a serde default so documents written by older app
/// versions deserialize into a fully populated snapshot.
/// [`ProgressSnapshot::normalized`] then repairs what defaults cannot
/// express: a missing year 1, duplicate unlock entries, out-of-range
/// counters and scores, an over-long activity log, and saved sessions that
/// disagree with themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Ordered by unlock time, not numerically.
    #[serde(default = "defaults::unlocked_years")]
    unlocked_years: Vec<Year>,
    /// Year → highest unlocked part, `1..=MAX_PRACTICE_PARTS`.
    #[serde(default = "defaults::unlocked_practice_parts")]
    unlocked_practice_parts: BTreeMap<Year, u8>,
    #[serde(default)]
    completed_exams: Vec<Year>,
    /// Best score percentage ever achieved per part.
    #[serde(default)]
    practice_scores: BTreeMap<PracticeKey, u8>,
    #[serde(default)]
    saved_sessions: BTreeMap<SessionKey, SavedSession>,
    #[serde(default)]
    streak: u32,
    #[serde(default)]
    last_login_date: Option<DateTime<Utc>>,
    #[serde(default)]
    total_xp: u64,
    /// Most recent first, at most [`RECENT_ACTIVITY_CAP`] entries.
    #[serde(default)]
    recent_activities: Vec<ActivityEntry>,
    #[serde(default)]
    daily_challenge_last_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    highest_exam_score: u8,
    #[serde(default)]
    fastest_exam_time_secs: Option<u32>,
}

impl ProgressSnapshot {
    /// The snapshot every user starts from: year 1 unlocked at part 1,
    /// nothing else.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            unlocked_years: defaults::unlocked_years(),
            unlocked_practice_parts: defaults::unlocked_practice_parts(),
            completed_exams: Vec::new(),
            practice_scores: BTreeMap::new(),
            saved_sessions: BTreeMap::new(),
            streak: 0,
            last_login_date: None,
            total_xp: 0,
            recent_activities: Vec::new(),
            daily_challenge_last_completed: None,
            department: None,
            highest_exam_score: 0,
            fastest_exam_time_secs: None,
        }
    }

    /// Repairs a deserialized snapshot so the documented invariants hold.
    ///
    /// Applied at every decode boundary (remote store, local cache) before
    /// a snapshot reaches callers.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !self.unlocked_years.contains(&Year::first()) {
            self.unlocked_years.insert(0, Year::first());
        }
        self.unlocked_years = dedup_in_order(self.unlocked_years);
        self.completed_exams = dedup_in_order(self.completed_exams);

        for year in &self.unlocked_years {
            self.unlocked_practice_parts
                .entry(*year)
                .or_insert(FIRST_PRACTICE_PART);
        }
        let unlocked = self.unlocked_years.clone();
        self.unlocked_practice_parts
            .retain(|year, _| unlocked.contains(year));
        for part in self.unlocked_practice_parts.values_mut() {
            *part = (*part).clamp(FIRST_PRACTICE_PART, MAX_PRACTICE_PARTS);
        }

        for score in self.practice_scores.values_mut() {
            *score = (*score).min(MAX_SCORE);
        }
        self.highest_exam_score = self.highest_exam_score.min(MAX_SCORE);

        self.recent_activities.truncate(RECENT_ACTIVITY_CAP);
        self.saved_sessions
            .retain(|_, session| session.is_consistent());
        self
    }

    // ─── Accessors ─────────────────────────────────────────────────────────────

    /// Unlocked years in unlock order.
    #[must_use]
    pub fn unlocked_years(&self) -> &[Year] {
        &self.unlocked_years
    }

    #[must_use]
    pub fn is_year_unlocked(&self, year: Year) -> bool {
        self.unlocked_years.contains(&year)
    }

    /// Highest unlocked practice part for a year, or `None` while locked.
    #[must_use]
    pub fn max_unlocked_part(&self, year: Year) -> Option<u8> {
        self.unlocked_practice_parts.get(&year).copied()
    }

    #[must_use]
    pub fn completed_exams(&self) -> &[Year] {
        &self.completed_exams
    }

    #[must_use]
    pub fn is_exam_completed(&self, year: Year) -> bool {
        self.completed_exams.contains(&year)
    }

    #[must_use]
    pub fn practice_score(&self, key: PracticeKey) -> Option<u8> {
        self.practice_scores.get(&key).copied()
    }

    #[must_use]
    pub fn practice_scores(&self) -> &BTreeMap<PracticeKey, u8> {
        &self.practice_scores
    }

    /// Number of practice parts with a recorded score, across all years.
    ///
    /// This is the denormalized count pushed to the leaderboard.
    #[must_use]
    pub fn practice_parts_completed(&self) -> u32 {
        u32::try_from(self.practice_scores.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn saved_session(&self, key: &SessionKey) -> Option<&SavedSession> {
        self.saved_sessions.get(key)
    }

    #[must_use]
    pub fn saved_sessions(&self) -> &BTreeMap<SessionKey, SavedSession> {
        &self.saved_sessions
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    #[must_use]
    pub fn last_login_date(&self) -> Option<DateTime<Utc>> {
        self.last_login_date
    }

    #[must_use]
    pub fn total_xp(&self) -> u64 {
        self.total_xp
    }

    /// Recent accomplishments, most recent first.
    #[must_use]
    pub fn recent_activities(&self) -> &[ActivityEntry] {
        &self.recent_activities
    }

    #[must_use]
    pub fn daily_challenge_last_completed(&self) -> Option<DateTime<Utc>> {
        self.daily_challenge_last_completed
    }

    #[must_use]
    pub fn department(&self) -> Option<&str> {
        self.department.as_deref()
    }

    #[must_use]
    pub fn highest_exam_score(&self) -> u8 {
        self.highest_exam_score
    }

    #[must_use]
    pub fn fastest_exam_time_secs(&self) -> Option<u32> {
        self.fastest_exam_time_secs
    }

    // ─── Mutators ──────────────────────────────────────────────────────────────

    /// Adds a year to the unlocked set, starting its part counter at 1.
    ///
    /// Idempotent: unlocking an already-unlocked year changes nothing.
    #[must_use]
    pub fn with_year_unlocked(&self, year: Year) -> Self {
        if self.is_year_unlocked(year) {
            return self.clone();
        }
        let mut next = self.clone();
        next.unlocked_years.push(year);
        next.unlocked_practice_parts
            .entry(year)
            .or_insert(FIRST_PRACTICE_PART);
        next
    }

    /// Advances a year's part frontier after `passed_part` was passed.
    ///
    /// Only passing the current frontier moves it: re-passing an earlier
    /// part, skipping ahead, a locked year, or a frontier already at
    /// [`MAX_PRACTICE_PARTS`] are all no-ops.
    #[must_use]
    pub fn with_next_part_unlocked(&self, year: Year, passed_part: u8) -> Self {
        let Some(current) = self.max_unlocked_part(year) else {
            return self.clone();
        };
        if passed_part != current || current >= MAX_PRACTICE_PARTS {
            return self.clone();
        }
        let mut next = self.clone();
        next.unlocked_practice_parts.insert(year, current + 1);
        next
    }

    /// Records a practice score, keeping the best result per part.
    #[must_use]
    pub fn with_practice_score(&self, key: PracticeKey, score: u8) -> Self {
        let score = score.min(MAX_SCORE);
        let mut next = self.clone();
        let best = next.practice_scores.entry(key).or_insert(score);
        *best = (*best).max(score);
        next
    }

    /// Marks a year's exam as passed and unlocks the following year.
    ///
    /// The leaderboard denormalizations only improve: best exam score takes
    /// the max, fastest time takes the min.
    #[must_use]
    pub fn with_exam_passed(&self, year: Year, score: u8, elapsed_secs: u32) -> Self {
        let mut next = self.clone();
        if !next.completed_exams.contains(&year) {
            next.completed_exams.push(year);
        }
        next.highest_exam_score = next.highest_exam_score.max(score.min(MAX_SCORE));
        next.fastest_exam_time_secs = Some(match next.fastest_exam_time_secs {
            Some(best) => best.min(elapsed_secs),
            None => elapsed_secs,
        });
        next.with_year_unlocked(year.next())
    }

    /// Applies the daily streak rule and stamps the login date.
    ///
    /// Calendar dates, not 24-hour windows: visits at 23:59 and 00:01 the
    /// next day count as consecutive days.
    #[must_use]
    pub fn with_streak_updated(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.streak = match self.last_login_date {
            None => 1,
            Some(last) => match calendar_days_between(last, now) {
                // A backwards clock counts as a same-day visit.
                d if d <= 0 => self.streak.max(1),
                1 => self.streak.saturating_add(1),
                _ => 1,
            },
        };
        next.last_login_date = Some(now);
        next
    }

    /// Prepends an activity to the recent log and banks its XP.
    ///
    /// The log keeps at most [`RECENT_ACTIVITY_CAP`] entries, newest first.
    #[must_use]
    pub fn with_activity(&self, entry: ActivityEntry) -> Self {
        let mut next = self.clone();
        next.total_xp = next.total_xp.saturating_add(u64::from(entry.xp));
        next.recent_activities.insert(0, entry);
        next.recent_activities.truncate(RECENT_ACTIVITY_CAP);
        next
    }

    /// Stores an in-progress session under its key, replacing any previous
    /// one.
    #[must_use]
    pub fn with_session_saved(&self, key: SessionKey, session: SavedSession) -> Self {
        let mut next = self.clone();
        next.saved_sessions.insert(key, session);
        next
    }

    /// Deletes a saved session, typically on submission.
    #[must_use]
    pub fn with_session_cleared(&self, key: &SessionKey) -> Self {
        let mut next = self.clone();
        next.saved_sessions.remove(key);
        next
    }

    /// True when the user has not yet completed today's challenge.
    #[must_use]
    pub fn daily_challenge_available(&self, now: DateTime<Utc>) -> bool {
        match self.daily_challenge_last_completed {
            None => true,
            Some(last) => !same_calendar_day(last, now),
        }
    }

    /// Stamps the daily challenge as completed now.
    #[must_use]
    pub fn with_daily_challenge_completed(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.daily_challenge_last_completed = Some(now);
        next
    }

    /// Sets the department shown next to the user on the leaderboard.
    #[must_use]
    pub fn with_department(&self, department: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.department = Some(department.into());
        next
    }
}

fn dedup_in_order(years: Vec<Year>) -> Vec<Year> {
    let mut seen = Vec::with_capacity(years.len());
    for year in years {
        if !seen.contains(&year) {
            seen.push(year);
        }
    }
    seen
}

mod defaults {
    use std::collections::BTreeMap;

    use super::{FIRST_PRACTICE_PART, Year};

    pub(super) fn unlocked_years() -> Vec<Year> {
        vec![Year::first()]
    }

    pub(super) fn unlocked_practice_parts() -> BTreeMap<Year, u8> {
        BTreeMap::from([(Year::first(), FIRST_PRACTICE_PART)])
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::activity::ActivityKind;
    use crate::time::fixed_now;

    fn year(n: u16) -> Year {
        Year::new(n).unwrap()
    }

    fn key(y: u16, part: u8) -> PracticeKey {
        PracticeKey::new(year(y), part).unwrap()
    }

    fn entry(xp: u32) -> ActivityEntry {
        ActivityEntry::new(ActivityKind::PracticeCompleted, "Practice done", xp, fixed_now())
    }

    #[test]
    fn initial_unlocks_year_one_at_part_one() {
        let snapshot = ProgressSnapshot::initial();
        assert_eq!(snapshot.unlocked_years(), &[Year::first()]);
        assert_eq!(snapshot.max_unlocked_part(Year::first()), Some(1));
        assert_eq!(snapshot.max_unlocked_part(year(2)), None);
        assert_eq!(snapshot.total_xp(), 0);
        assert_eq!(snapshot.streak(), 0);
        assert!(snapshot.completed_exams().is_empty());
        assert!(snapshot.recent_activities().is_empty());
    }

    #[test]
    fn unlock_year_is_idempotent() {
        let snapshot = ProgressSnapshot::initial();
        let once = snapshot.with_year_unlocked(year(2));
        let twice = once.with_year_unlocked(year(2));
        assert_eq!(once, twice);
        assert!(once.is_year_unlocked(year(2)));
        assert_eq!(once.max_unlocked_part(year(2)), Some(1));
    }

    #[test]
    fn unlock_order_is_preserved_not_sorted() {
        let snapshot = ProgressSnapshot::initial()
            .with_year_unlocked(year(3))
            .with_year_unlocked(year(2));
        assert_eq!(snapshot.unlocked_years(), &[year(1), year(3), year(2)]);
    }

    #[test]
    fn part_unlock_advances_only_from_the_frontier() {
        let snapshot = ProgressSnapshot::initial();
        // Frontier is part 1; passing it advances to 2.
        let advanced = snapshot.with_next_part_unlocked(year(1), 1);
        assert_eq!(advanced.max_unlocked_part(year(1)), Some(2));

        // Re-passing an earlier part or skipping ahead changes nothing.
        assert_eq!(advanced.with_next_part_unlocked(year(1), 1), advanced);
        assert_eq!(advanced.with_next_part_unlocked(year(1), 5), advanced);

        // A locked year has no frontier to advance.
        assert_eq!(snapshot.with_next_part_unlocked(year(2), 1), snapshot);
    }

    #[test]
    fn part_unlock_caps_at_max() {
        let mut snapshot = ProgressSnapshot::initial();
        for part in 1..=MAX_PRACTICE_PARTS + 3 {
            snapshot = snapshot.with_next_part_unlocked(year(1), part);
        }
        assert_eq!(snapshot.max_unlocked_part(year(1)), Some(MAX_PRACTICE_PARTS));

        let at_cap = snapshot.with_next_part_unlocked(year(1), MAX_PRACTICE_PARTS);
        assert_eq!(at_cap.max_unlocked_part(year(1)), Some(MAX_PRACTICE_PARTS));
    }

    #[test]
    fn practice_score_keeps_the_best_result() {
        let snapshot = ProgressSnapshot::initial()
            .with_practice_score(key(1, 1), 60)
            .with_practice_score(key(1, 1), 80)
            .with_practice_score(key(1, 1), 70);
        assert_eq!(snapshot.practice_score(key(1, 1)), Some(80));

        // Scores are percentages; anything above 100 is clamped.
        let clamped = snapshot.with_practice_score(key(1, 2), 250);
        assert_eq!(clamped.practice_score(key(1, 2)), Some(100));
        assert_eq!(clamped.practice_parts_completed(), 2);
    }

    #[test]
    fn exam_pass_unlocks_the_next_year() {
        let snapshot = ProgressSnapshot::initial().with_exam_passed(year(1), 85, 1200);
        assert!(snapshot.is_exam_completed(year(1)));
        assert!(snapshot.is_year_unlocked(year(2)));
        assert_eq!(snapshot.max_unlocked_part(year(2)), Some(1));
        assert_eq!(snapshot.highest_exam_score(), 85);
        assert_eq!(snapshot.fastest_exam_time_secs(), Some(1200));
    }

    #[test]
    fn exam_records_never_regress() {
        let first = ProgressSnapshot::initial().with_exam_passed(year(1), 85, 1200);
        // A slower, worse retake leaves both records alone.
        let retake = first.with_exam_passed(year(1), 70, 1800);
        assert_eq!(retake.highest_exam_score(), 85);
        assert_eq!(retake.fastest_exam_time_secs(), Some(1200));
        assert_eq!(retake.completed_exams(), &[year(1)]);

        // A better retake improves them.
        let better = retake.with_exam_passed(year(1), 95, 900);
        assert_eq!(better.highest_exam_score(), 95);
        assert_eq!(better.fastest_exam_time_secs(), Some(900));
    }

    #[test]
    fn streak_transition_table() {
        let now = fixed_now();

        // First-ever use: no login date, streak 0 → 1.
        let first = ProgressSnapshot::initial().with_streak_updated(now);
        assert_eq!(first.streak(), 1);
        assert_eq!(first.last_login_date(), Some(now));

        // Same calendar day: unchanged.
        let same_day = first.with_streak_updated(now + Duration::minutes(30));
        assert_eq!(same_day.streak(), 1);

        // Exactly one day later: increment.
        let next_day = same_day.with_streak_updated(now + Duration::days(1));
        assert_eq!(next_day.streak(), 2);

        // More than one day later: reset to 1.
        let lapsed = next_day.with_streak_updated(now + Duration::days(6));
        assert_eq!(lapsed.streak(), 1);
        assert_eq!(lapsed.last_login_date(), Some(now + Duration::days(6)));
    }

    #[test]
    fn streak_builds_across_consecutive_days() {
        let now = fixed_now();
        let mut snapshot = ProgressSnapshot::initial();
        for day in 0..5 {
            snapshot = snapshot.with_streak_updated(now + Duration::days(day));
        }
        assert_eq!(snapshot.streak(), 5);
    }

    #[test]
    fn activity_log_is_bounded_and_newest_first() {
        let mut snapshot = ProgressSnapshot::initial();
        for i in 0..25 {
            let entry = ActivityEntry::new(
                ActivityKind::PracticeCompleted,
                format!("activity {i}"),
                10,
                fixed_now(),
            );
            snapshot = snapshot.with_activity(entry);
        }
        assert_eq!(snapshot.recent_activities().len(), RECENT_ACTIVITY_CAP);
        assert_eq!(snapshot.recent_activities()[0].label, "activity 24");
        assert_eq!(snapshot.recent_activities()[19].label, "activity 5");
        assert_eq!(snapshot.total_xp(), 250);
    }

    #[test]
    fn activity_xp_saturates_instead_of_overflowing() {
        let mut snapshot = ProgressSnapshot::initial();
        snapshot = snapshot.with_activity(entry(u32::MAX));
        let before = snapshot.total_xp();
        snapshot = snapshot.with_activity(entry(u32::MAX));
        assert!(snapshot.total_xp() >= before);
    }

    #[test]
    fn saved_sessions_round_trip_and_clear() {
        let key = SessionKey::new("year1-exam").unwrap();
        let session = SavedSession::new(vec!["q1".into(), "q2".into()], 600, fixed_now()).unwrap();

        let saved = ProgressSnapshot::initial().with_session_saved(key.clone(), session.clone());
        assert_eq!(saved.saved_session(&key), Some(&session));

        let cleared = saved.with_session_cleared(&key);
        assert_eq!(cleared.saved_session(&key), None);
        // Clearing an absent key is a no-op, not an error.
        assert_eq!(cleared.with_session_cleared(&key), cleared);
    }

    #[test]
    fn daily_challenge_gates_per_calendar_day() {
        let now = fixed_now();
        let snapshot = ProgressSnapshot::initial();
        assert!(snapshot.daily_challenge_available(now));

        let done = snapshot.with_daily_challenge_completed(now);
        assert!(!done.daily_challenge_available(now + Duration::minutes(90)));
        // 22:13 UTC + 2h crosses midnight, so the gate reopens.
        assert!(done.daily_challenge_available(now + Duration::hours(2)));
    }

    #[test]
    fn mutators_leave_their_input_untouched() {
        let snapshot = ProgressSnapshot::initial();
        let _ = snapshot.with_year_unlocked(year(2));
        let _ = snapshot.with_practice_score(key(1, 1), 90);
        let _ = snapshot.with_activity(entry(50));
        assert_eq!(snapshot, ProgressSnapshot::initial());
    }

    #[test]
    fn normalized_repairs_inconsistent_documents() {
        let mut broken = ProgressSnapshot::initial();
        broken.unlocked_years = vec![year(2), year(2), year(3)];
        broken.unlocked_practice_parts =
            BTreeMap::from([(year(2), 0), (year(3), 99), (year(9), 4)]);
        broken.completed_exams = vec![year(1), year(1)];
        broken.practice_scores = BTreeMap::from([(key(1, 1), 255)]);
        broken.highest_exam_score = 140;
        for _ in 0..30 {
            broken.recent_activities.push(entry(1));
        }

        let repaired = broken.normalized();
        // Year 1 is always present, duplicates collapse, unlock order survives.
        assert_eq!(repaired.unlocked_years(), &[year(1), year(2), year(3)]);
        assert_eq!(repaired.completed_exams(), &[year(1)]);
        // Counters snap into 1..=MAX, and orphans for locked years are dropped.
        assert_eq!(repaired.max_unlocked_part(year(1)), Some(1));
        assert_eq!(repaired.max_unlocked_part(year(2)), Some(1));
        assert_eq!(repaired.max_unlocked_part(year(3)), Some(MAX_PRACTICE_PARTS));
        assert_eq!(repaired.max_unlocked_part(year(9)), None);
        // Percentages clamp, the log truncates.
        assert_eq!(repaired.practice_score(key(1, 1)), Some(100));
        assert_eq!(repaired.highest_exam_score(), 100);
        assert_eq!(repaired.recent_activities().len(), RECENT_ACTIVITY_CAP);
    }

    #[test]
    fn normalized_is_a_no_op_on_well_formed_snapshots() {
        let snapshot = ProgressSnapshot::initial()
            .with_exam_passed(year(1), 80, 1000)
            .with_practice_score(key(2, 1), 75)
            .with_streak_updated(fixed_now());
        assert_eq!(snapshot.clone().normalized(), snapshot);
    }
}
