use std::path::Path;
use std::sync::Arc;

use cursus_core::model::{
    ActivityEntry, ActivityKind, PracticeKey, ProgressSnapshot, UserId, Year,
};
use cursus_core::time::{fixed_clock, fixed_now};
use services::{AppServices, FlushOutcome, ProgressSyncService};
use storage::cache::FileCache;
use storage::repository::{MemoryProgressStore, ProgressCache, ProgressStore};

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn engine_over(dir: &Path, store: &Arc<MemoryProgressStore>) -> ProgressSyncService {
    let cache: Arc<dyn ProgressCache> = Arc::new(FileCache::open(dir).unwrap());
    let remote = Arc::clone(store) as Arc<dyn ProgressStore>;
    ProgressSyncService::new(cache, remote).with_clock(fixed_clock())
}

#[tokio::test]
async fn offline_writes_survive_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryProgressStore::new());
    let alice = user("alice");
    let key = PracticeKey::new(Year::first(), 1).unwrap();
    let v1 = ProgressSnapshot::initial().with_department("physics");
    let v2 = v1.with_practice_score(key, 85);

    store.set_reachable(false);
    let first_run = engine_over(dir.path(), &store);
    first_run.update_progress(&alice, &v1).await;
    first_run.update_progress(&alice, &v2).await;
    drop(first_run);

    // A fresh engine over the same cache directory still serves the local
    // truth, before anything has reached the backend.
    let second_run = engine_over(dir.path(), &store);
    assert_eq!(second_run.get_progress(&alice).await, v2);
    assert_eq!(store.successful_upserts(), 0);

    // Connectivity returns: only the newest queued write goes out.
    store.set_reachable(true);
    assert_eq!(second_run.flush_pending(&alice).await, FlushOutcome::Flushed);
    assert_eq!(store.successful_upserts(), 1);
    assert_eq!(store.record(&alice).unwrap().snapshot, v2);

    let cache = FileCache::open(dir.path()).unwrap();
    assert!(cache.pending(&alice).is_none());
    assert_eq!(cache.read(&alice), Some(v2));
}

#[tokio::test]
async fn another_devices_push_refreshes_a_stale_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryProgressStore::new());
    let bram = user("bram");
    let v1 = ProgressSnapshot::initial().with_department("statistics");
    let v2 = v1.with_year_unlocked(Year::new(2).unwrap());

    let first_run = engine_over(dir.path(), &store);
    first_run.update_progress(&bram, &v1).await;
    drop(first_run);

    // Another device pushes a newer snapshot straight to the backend.
    store.upsert(&bram, &v2, fixed_now()).await.unwrap();

    let second_run = engine_over(dir.path(), &store);
    assert_eq!(second_run.get_progress(&bram).await, v2);

    let cache = FileCache::open(dir.path()).unwrap();
    assert_eq!(cache.read(&bram), Some(v2));
}

#[tokio::test]
async fn record_progress_feeds_the_leaderboard() {
    let app = AppServices::in_memory(fixed_clock());
    let chidi = user("chidi");
    let snapshot = ProgressSnapshot::initial()
        .with_department("medicine")
        .with_exam_passed(Year::first(), 88, 1500)
        .with_activity(ActivityEntry::new(
            ActivityKind::ExamPassed,
            "Passed the Year 1 exam",
            200,
            fixed_now(),
        ));

    app.record_progress(&chidi, &snapshot).await;

    assert_eq!(app.sync().get_progress(&chidi).await, snapshot);

    let top = app.leaderboard().top(5).await;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].user_id, chidi);
    assert_eq!(top[0].total_xp, 200);
    assert_eq!(top[0].highest_exam_score, 88);
    assert_eq!(top[0].practice_parts_completed, 0);
}
