use std::fmt;

use chrono::{DateTime, Duration, Utc};
use cursus_core::model::{
    ActivityEntry, ActivityKind, MAX_PRACTICE_PARTS, PracticeKey, ProgressSnapshot, UserId, Year,
};
use storage::repository::{
    ActivityEventRecord, LeaderboardEntry, LeaderboardStore, ProgressStore, Storage,
};

const SAMPLE_USERS: [(&str, &str); 5] = [
    ("amelie", "physics"),
    ("bram", "statistics"),
    ("chidi", "medicine"),
    ("dara", "law"),
    ("emre", "economics"),
];

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    users: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUsers { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUsers { raw } => write!(f, "invalid --users value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("CURSUS_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut users = std::env::var("CURSUS_SEED_USERS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--users" => {
                    let value = require_value(&mut args, "--users")?;
                    users = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidUsers { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let max = u32::try_from(SAMPLE_USERS.len()).unwrap_or(u32::MAX);
        Ok(Self {
            db_url,
            users: users.clamp(1, max),
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --users <n>               Number of demo users to seed, 1-5 (default: 3)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  CURSUS_DB_URL, CURSUS_SEED_USERS");
}

/// Builds a snapshot for the sample user at `index`, each one a bit further
/// along than the previous: more streak days, more cleared parts, and from
/// the third user on a passed year-1 exam.
fn demo_snapshot(
    index: u32,
    now: DateTime<Utc>,
) -> Result<ProgressSnapshot, Box<dyn std::error::Error>> {
    let (_, department) = SAMPLE_USERS[index as usize];
    let year1 = Year::first();
    let mut snapshot = ProgressSnapshot::initial().with_department(department);

    // Consecutive daily logins ending today build the streak.
    for days_ago in (0..=i64::from(index)).rev() {
        snapshot = snapshot.with_streak_updated(now - Duration::days(days_ago));
    }

    let parts = u8::try_from(index + 1).unwrap_or(MAX_PRACTICE_PARTS);
    for part in 1..=parts.min(MAX_PRACTICE_PARTS) {
        let key = PracticeKey::new(year1, part)?;
        let score = 62 + 7 * part + 3 * u8::try_from(index).unwrap_or(0);
        let occurred = now - Duration::minutes(i64::from(MAX_PRACTICE_PARTS - part) * 30);
        snapshot = snapshot
            .with_practice_score(key, score)
            .with_next_part_unlocked(year1, part)
            .with_activity(ActivityEntry::new(
                ActivityKind::PracticeCompleted,
                format!("Completed practice {key}"),
                50,
                occurred,
            ));
    }

    if index >= 2 {
        let score = 80 + 3 * u8::try_from(index).unwrap_or(0);
        let elapsed = 1500 - 120 * index;
        snapshot = snapshot
            .with_exam_passed(year1, score, elapsed)
            .with_activity(ActivityEntry::new(
                ActivityKind::ExamPassed,
                format!("Passed the year {year1} exam"),
                200,
                now - Duration::minutes(10),
            ))
            .with_activity(ActivityEntry::new(
                ActivityKind::YearUnlocked,
                format!("Unlocked year {}", year1.next()),
                0,
                now - Duration::minutes(10),
            ));
    }

    if index == 0 {
        snapshot = snapshot
            .with_daily_challenge_completed(now)
            .with_activity(ActivityEntry::new(
                ActivityKind::DailyChallenge,
                "Completed the daily challenge",
                30,
                now,
            ));
    }

    Ok(snapshot)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let mut events = 0usize;
    for index in 0..args.users {
        let (name, _) = SAMPLE_USERS[index as usize];
        let user = UserId::new(name)?;
        let snapshot = demo_snapshot(index, now)?;

        storage.progress.upsert(&user, &snapshot, now).await?;
        storage
            .leaderboard
            .publish_entry(&LeaderboardEntry {
                user_id: user.clone(),
                department: snapshot.department().map(ToString::to_string),
                total_xp: snapshot.total_xp(),
                highest_exam_score: snapshot.highest_exam_score(),
                fastest_exam_time_secs: snapshot.fastest_exam_time_secs(),
                practice_parts_completed: snapshot.practice_parts_completed(),
                updated_at: now,
            })
            .await?;

        for entry in snapshot.recent_activities() {
            let record = ActivityEventRecord::from_entry(user.clone(), entry);
            storage.leaderboard.append_event(&record).await?;
            events += 1;
        }
    }

    println!(
        "Seeded {} users and {} activity events into {}",
        args.users, events, args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
