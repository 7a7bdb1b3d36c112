use async_trait::async_trait;
use chrono::Utc;
use gopher_social::{
    AppError, InMemoryRepository,
    models::{Post, UpdatePostRequest, User},
    repository::{Repository, StoreError},
    versioning::{VersionedStore, apply_update, commit_update},
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn repo_with_post(version: i32) -> Arc<InMemoryRepository> {
    let repo = InMemoryRepository::new();
    repo.insert_user(User {
        id: 1,
        username: "author".to_string(),
        email: "author@example.com".to_string(),
        is_active: true,
        role: repo.role("user").expect("seeded role"),
        created_at: Utc::now(),
    });
    repo.insert_post(Post {
        id: 100,
        title: "original title".to_string(),
        content: "original content".to_string(),
        user_id: 1,
        version,
        created_at: Utc::now(),
    });
    Arc::new(repo)
}

fn retitle(title: &str) -> UpdatePostRequest {
    UpdatePostRequest {
        title: Some(title.to_string()),
        content: None,
        version: 0,
    }
}

#[tokio::test]
async fn test_matching_version_commits_and_increments() {
    let repo = repo_with_post(3);
    let change = retitle("new title");

    let updated: Post = apply_update(&*repo, 100, 3, |p: &mut Post| change.apply_to(p))
        .await
        .unwrap();

    assert_eq!(updated.version, 4);
    assert_eq!(updated.title, "new title");
    assert_eq!(updated.content, "original content");

    let stored = repo.get_post(100).await.unwrap().unwrap();
    assert_eq!(stored.version, 4);
    assert_eq!(stored.title, "new title");
    assert_eq!(stored, updated);
}

#[tokio::test]
async fn test_stale_version_is_conflict_and_leaves_row_untouched() {
    let repo = repo_with_post(5);
    let change = retitle("lost update");

    let result: Result<Post, AppError> =
        apply_update(&*repo, 100, 4, |p: &mut Post| change.apply_to(p)).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let stored = repo.get_post(100).await.unwrap().unwrap();
    assert_eq!(stored.version, 5);
    assert_eq!(stored.title, "original title");
}

#[tokio::test]
async fn test_missing_post_is_not_found() {
    let repo = repo_with_post(0);

    let result: Result<Post, AppError> = apply_update(&*repo, 999, 0, |_: &mut Post| {}).await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_with_same_version_exactly_one_wins() {
    let repo = repo_with_post(3);

    let tasks: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|title| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let change = retitle(title);
                apply_update::<Post, _, _>(&*repo, 100, 3, |p: &mut Post| change.apply_to(p)).await
            })
        })
        .collect();

    let mut wins = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        match task.await.expect("update task panicked") {
            Ok(post) => wins.push(post),
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(wins.len(), 1);
    assert_eq!(conflicts, 1);

    let stored = repo.get_post(100).await.unwrap().unwrap();
    assert_eq!(stored.version, 4);
    assert_eq!(stored.title, wins[0].title);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_writers_advance_version_by_successes() {
    let repo = repo_with_post(0);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let change = retitle(&format!("writer {i}"));
                apply_update::<Post, _, _>(&*repo, 100, 0, |p: &mut Post| change.apply_to(p)).await
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        if task.await.expect("update task panicked").is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(repo.get_post(100).await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn test_compare_and_swap_only_matches_current_version() {
    let repo = repo_with_post(2);
    let mut post = repo.load(100).await.unwrap().unwrap();

    post.version = 1;
    assert_eq!(repo.compare_and_swap(&post).await.unwrap(), None);

    post.version = 2;
    assert_eq!(repo.compare_and_swap(&post).await.unwrap(), Some(3));
    assert_eq!(repo.compare_and_swap(&post).await.unwrap(), None);
}

/// Delegates writes to an in-memory repository and counts reads.
struct CountingStore {
    inner: Arc<InMemoryRepository>,
    loads: AtomicUsize,
}

#[async_trait]
impl VersionedStore<Post> for CountingStore {
    async fn load(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_post(id).await
    }

    async fn compare_and_swap(&self, post: &Post) -> Result<Option<i32>, StoreError> {
        self.inner.compare_and_swap(post).await
    }
}

#[tokio::test]
async fn test_commit_update_writes_without_reloading() {
    let repo = repo_with_post(3);
    let loaded = repo.get_post(100).await.unwrap().unwrap();
    let store = CountingStore {
        inner: repo.clone(),
        loads: AtomicUsize::new(0),
    };
    let change = retitle("committed");

    let updated = commit_update(&store, loaded.clone(), 3, |p: &mut Post| change.apply_to(p))
        .await
        .unwrap();
    assert_eq!(updated.version, 4);
    assert_eq!(updated.title, "committed");

    // The same snapshot is now stale.
    let result = commit_update(&store, loaded, 3, |p: &mut Post| change.apply_to(p)).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    assert_eq!(repo.get_post(100).await.unwrap().unwrap().version, 4);
}

#[tokio::test]
async fn test_apply_update_reads_exactly_once() {
    let repo = repo_with_post(3);
    let store = CountingStore {
        inner: repo.clone(),
        loads: AtomicUsize::new(0),
    };
    let change = retitle("loaded once");

    let updated = apply_update(&store, 100, 3, |p: &mut Post| change.apply_to(p))
        .await
        .unwrap();

    assert_eq!(updated.version, 4);
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
}
