use std::fmt;
use std::time::Duration;

use cursus_core::model::{
    ActivityEntry, ActivityKind, PracticeKey, ProgressSnapshot, UserId, Year,
};
use services::{AppServices, Clock, FlushOutcome, RemoteConfig, SyncWorker};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Minimum percentage that passes a practice part or an exam.
const PASS_SCORE: u8 = 70;

const PRACTICE_XP: u32 = 50;
const EXAM_XP: u32 = 200;
const DAILY_CHALLENGE_XP: u32 = 30;
const STREAK_MILESTONE_XP: u32 = 25;
const STREAK_MILESTONE_DAYS: u32 = 7;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
    MissingUser,
    ResetNeedsYes,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => {
                write!(f, "invalid {flag} value: {raw}")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::MissingUser => write!(f, "no user given; pass --user or set CURSUS_USER"),
            ArgsError::ResetNeedsYes => {
                write!(f, "reset wipes local and remote progress; pass --yes to confirm")
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

fn parse_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn require_flag<T: Copy>(value: Option<T>, flag: &'static str) -> Result<T, ArgsError> {
    value.ok_or(ArgsError::MissingFlag { flag })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Show,
    Practice,
    Exam,
    Daily,
    Flush,
    Reset,
    Top,
    Feed,
    Watch,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "show" => Some(Self::Show),
            "practice" => Some(Self::Practice),
            "exam" => Some(Self::Exam),
            "daily" => Some(Self::Daily),
            "flush" => Some(Self::Flush),
            "reset" => Some(Self::Reset),
            "top" => Some(Self::Top),
            "feed" => Some(Self::Feed),
            "watch" => Some(Self::Watch),
            _ => None,
        }
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- show     [--user <id>]");
    eprintln!("  cargo run -p app -- practice --year <n> --part <n> --score <pct> [--user <id>]");
    eprintln!("  cargo run -p app -- exam     --year <n> --score <pct> --secs <n> [--user <id>]");
    eprintln!("  cargo run -p app -- daily    [--user <id>]");
    eprintln!("  cargo run -p app -- flush    [--user <id>]");
    eprintln!("  cargo run -p app -- reset    --yes [--user <id>]");
    eprintln!("  cargo run -p app -- top      [--limit <n>]");
    eprintln!("  cargo run -p app -- feed     [--limit <n>] [--user <id>]");
    eprintln!("  cargo run -p app -- watch    [--poll-secs <n>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://dev.sqlite3 (file created on first use)");
    eprintln!("  --cache-dir .cursus-cache");
    eprintln!("  --limit 10, --poll-secs 60");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CURSUS_DB_URL, CURSUS_CACHE_DIR, CURSUS_USER");
    eprintln!("  CURSUS_SYNC_URL, CURSUS_SYNC_API_KEY (switch to the HTTP backend)");
}

struct Args {
    db_url: String,
    cache_dir: String,
    user: Option<String>,
    year: Option<u16>,
    part: Option<u8>,
    score: Option<u8>,
    secs: Option<u32>,
    limit: u32,
    poll_secs: u64,
    yes: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("CURSUS_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://dev.sqlite3".into(), normalize_sqlite_url),
            cache_dir: std::env::var("CURSUS_CACHE_DIR")
                .unwrap_or_else(|_| ".cursus-cache".into()),
            user: std::env::var("CURSUS_USER").ok(),
            year: None,
            part: None,
            score: None,
            secs: None,
            limit: 10,
            poll_secs: 60,
            yes: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--cache-dir" => parsed.cache_dir = require_value(args, "--cache-dir")?,
                "--user" => parsed.user = Some(require_value(args, "--user")?),
                "--year" => parsed.year = Some(parse_number(args, "--year")?),
                "--part" => parsed.part = Some(parse_number(args, "--part")?),
                "--score" => parsed.score = Some(parse_number(args, "--score")?),
                "--secs" => parsed.secs = Some(parse_number(args, "--secs")?),
                "--limit" => parsed.limit = parse_number(args, "--limit")?,
                "--poll-secs" => parsed.poll_secs = parse_number(args, "--poll-secs")?,
                "--yes" => parsed.yes = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }
}

fn require_user(args: &Args) -> Result<UserId, ArgsError> {
    let raw = args.user.clone().ok_or(ArgsError::MissingUser)?;
    UserId::new(raw.as_str()).map_err(|_| ArgsError::InvalidUser { raw })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Pick the backend from the environment: an HTTP sync endpoint when
/// `CURSUS_SYNC_URL` is set, local SQLite otherwise. Both share the same
/// file cache, so switching backends keeps queued offline writes.
async fn build_services(args: &Args) -> Result<AppServices, Box<dyn std::error::Error>> {
    let clock = Clock::default_clock();
    if let Some(config) = RemoteConfig::from_env() {
        info!(base_url = %config.base_url, "using HTTP sync backend");
        return Ok(AppServices::new_remote(config, &args.cache_dir, clock)?);
    }
    prepare_sqlite_file(&args.db_url)?;
    Ok(AppServices::new_sqlite(&args.db_url, &args.cache_dir, clock).await?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Bare invocation or flags only: default to showing progress.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Show,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Show,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let args = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let app = build_services(&args).await?;

    match cmd {
        Command::Show => run_show(&app, &args).await,
        Command::Practice => run_practice(&app, &args).await,
        Command::Exam => run_exam(&app, &args).await,
        Command::Daily => run_daily(&app, &args).await,
        Command::Flush => run_flush(&app, &args).await,
        Command::Reset => run_reset(&app, &args).await,
        Command::Top => run_top(&app, &args).await,
        Command::Feed => run_feed(&app, &args).await,
        Command::Watch => run_watch(&app, &args).await,
    }
}

async fn run_show(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    let snapshot = app.sync().get_progress(&user).await;
    render_summary(&user, &snapshot);
    if app.sync().pending_users().contains(&user) {
        println!("  note: a local write is still waiting to reach the backend");
    }
    Ok(())
}

async fn run_practice(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    let year = Year::new(require_flag(args.year, "--year")?)?;
    let part = require_flag(args.part, "--part")?;
    let score = require_flag(args.score, "--score")?;
    let key = PracticeKey::new(year, part)?;

    let now = app.sync().now();
    let current = app.sync().get_progress(&user).await;
    let Some(frontier) = current.max_unlocked_part(year) else {
        println!("Year {year} is still locked for {user}.");
        return Ok(());
    };
    if part > frontier {
        println!("Part {part} of year {year} is locked; the frontier is part {frontier}.");
        return Ok(());
    }

    let mut next = current.with_streak_updated(now).with_practice_score(key, score);
    let mut events = Vec::new();
    if score >= PASS_SCORE {
        next = next.with_next_part_unlocked(year, part);
        let entry = ActivityEntry::new(
            ActivityKind::PracticeCompleted,
            format!("Completed practice part {part} of year {year} at {score}%"),
            PRACTICE_XP,
            now,
        );
        next = next.with_activity(entry.clone());
        events.push(entry);
    }
    if let Some(milestone) = streak_milestone(&current, &next) {
        next = next.with_activity(milestone.clone());
        events.push(milestone);
    }

    app.record_progress(&user, &next).await;
    for entry in &events {
        app.leaderboard().log_event(&user, entry).await;
    }

    if score >= PASS_SCORE {
        let new_frontier = next.max_unlocked_part(year).unwrap_or(frontier);
        println!(
            "Part {part} of year {year} passed at {score}% (+{PRACTICE_XP} XP). Frontier: part {new_frontier}."
        );
    } else {
        println!("Score {score}% recorded for part {part} of year {year}; {PASS_SCORE}% passes.");
    }
    Ok(())
}

async fn run_exam(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    let year = Year::new(require_flag(args.year, "--year")?)?;
    let score = require_flag(args.score, "--score")?;
    let secs = require_flag(args.secs, "--secs")?;

    let now = app.sync().now();
    let current = app.sync().get_progress(&user).await;
    if !current.is_year_unlocked(year) {
        println!("Year {year} is still locked for {user}.");
        return Ok(());
    }

    let mut next = current.with_streak_updated(now);
    let mut events = Vec::new();
    if score >= PASS_SCORE {
        let first_pass = !current.is_exam_completed(year);
        next = next.with_exam_passed(year, score, secs);
        let entry = ActivityEntry::new(
            ActivityKind::ExamPassed,
            format!("Passed the year {year} exam at {score}%"),
            EXAM_XP,
            now,
        );
        next = next.with_activity(entry.clone());
        events.push(entry);
        if first_pass {
            let unlocked = year.next();
            let entry = ActivityEntry::new(
                ActivityKind::YearUnlocked,
                format!("Unlocked year {unlocked}"),
                0,
                now,
            );
            next = next.with_activity(entry.clone());
            events.push(entry);
        }
    }
    if let Some(milestone) = streak_milestone(&current, &next) {
        next = next.with_activity(milestone.clone());
        events.push(milestone);
    }

    app.record_progress(&user, &next).await;
    for entry in &events {
        app.leaderboard().log_event(&user, entry).await;
    }

    if score >= PASS_SCORE {
        println!("Year {year} exam passed at {score}% in {secs}s (+{EXAM_XP} XP).");
    } else {
        println!(
            "Score {score}% is below the {PASS_SCORE}% pass mark; the year {year} exam stays open."
        );
    }
    Ok(())
}

async fn run_daily(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    let now = app.sync().now();
    let current = app.sync().get_progress(&user).await;
    if !current.daily_challenge_available(now) {
        println!("Today's challenge is already completed; it resets at midnight UTC.");
        return Ok(());
    }

    let entry = ActivityEntry::new(
        ActivityKind::DailyChallenge,
        "Completed the daily challenge",
        DAILY_CHALLENGE_XP,
        now,
    );
    let mut next = current
        .with_streak_updated(now)
        .with_daily_challenge_completed(now)
        .with_activity(entry.clone());
    let mut events = vec![entry];
    if let Some(milestone) = streak_milestone(&current, &next) {
        next = next.with_activity(milestone.clone());
        events.push(milestone);
    }

    app.record_progress(&user, &next).await;
    for entry in &events {
        app.leaderboard().log_event(&user, entry).await;
    }

    println!(
        "Daily challenge complete (+{DAILY_CHALLENGE_XP} XP). Streak: {} day(s).",
        next.streak()
    );
    Ok(())
}

async fn run_flush(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    match app.sync().flush_pending(&user).await {
        FlushOutcome::Flushed => println!("Queued write for {user} delivered."),
        FlushOutcome::Empty => println!("Nothing queued for {user}."),
        FlushOutcome::Deferred | FlushOutcome::Failed => {
            println!("Backend unreachable; the write for {user} stays queued.");
        }
    }
    Ok(())
}

async fn run_reset(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    if !args.yes {
        return Err(ArgsError::ResetNeedsYes.into());
    }
    let fresh = app.sync().reset_progress(&user).await;
    app.leaderboard().publish(&user, &fresh).await;
    println!("Progress for {user} reset to a fresh snapshot.");
    Ok(())
}

async fn run_top(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let rows = app.leaderboard().top(args.limit).await;
    if rows.is_empty() {
        println!("The leaderboard is empty.");
        return Ok(());
    }
    for (index, row) in rows.iter().enumerate() {
        let department = row.department.as_deref().unwrap_or("-");
        println!(
            "{:>2}. {:<24} {:>7} XP  best exam {:>3}%  {department}",
            index + 1,
            row.user_id.as_str(),
            row.total_xp,
            row.highest_exam_score,
        );
    }
    Ok(())
}

async fn run_feed(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let user = require_user(args)?;
    let events = app.leaderboard().recent(&user, args.limit).await;
    if events.is_empty() {
        println!("No recent activity for {user}.");
        return Ok(());
    }
    for event in &events {
        println!(
            "{}  {} (+{} XP)",
            event.occurred_at.format("%Y-%m-%d %H:%M"),
            event.label,
            event.xp
        );
    }
    Ok(())
}

async fn run_watch(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let poll = Duration::from_secs(args.poll_secs.max(1));
    let (worker, connectivity) = SyncWorker::new(app.sync());
    let worker = worker.with_poll_interval(poll);
    worker.start();
    // Treat startup as a connectivity-restored signal so writes queued by
    // an earlier offline run drain immediately.
    connectivity.set_online(true);

    let queued = app.sync().pending_users().len();
    println!(
        "Sync worker running (poll every {}s, {queued} write(s) queued). Ctrl-C to stop.",
        poll.as_secs()
    );
    tokio::signal::ctrl_c().await?;
    worker.stop();
    println!("Sync worker stopped.");
    Ok(())
}

fn render_summary(user: &UserId, snapshot: &ProgressSnapshot) {
    println!("Progress for {user}");
    if let Some(department) = snapshot.department() {
        println!("  department:     {department}");
    }
    println!("  total XP:       {}", snapshot.total_xp());
    println!("  streak:         {} day(s)", snapshot.streak());
    for year in snapshot.unlocked_years() {
        let frontier = snapshot.max_unlocked_part(*year).unwrap_or(1);
        let exam = if snapshot.is_exam_completed(*year) {
            ", exam passed"
        } else {
            ""
        };
        println!("  year {year}: parts 1..={frontier} unlocked{exam}");
    }
    if snapshot.highest_exam_score() > 0 {
        println!("  best exam:      {}%", snapshot.highest_exam_score());
    }
    if let Some(secs) = snapshot.fastest_exam_time_secs() {
        println!("  fastest exam:   {secs}s");
    }
    if !snapshot.recent_activities().is_empty() {
        println!("  recent activity:");
        for entry in snapshot.recent_activities().iter().take(5) {
            println!("    {} (+{} XP)", entry.label, entry.xp);
        }
    }
}

/// A milestone entry when this update pushed the streak onto a multiple of
/// [`STREAK_MILESTONE_DAYS`].
fn streak_milestone(
    before: &ProgressSnapshot,
    after: &ProgressSnapshot,
) -> Option<ActivityEntry> {
    let streak = after.streak();
    if streak <= before.streak() || streak % STREAK_MILESTONE_DAYS != 0 {
        return None;
    }
    let at = after.last_login_date()?;
    Some(ActivityEntry::new(
        ActivityKind::StreakMilestone,
        format!("{streak}-day streak"),
        STREAK_MILESTONE_XP,
        at,
    ))
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
