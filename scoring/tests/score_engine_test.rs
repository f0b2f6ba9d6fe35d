use std::sync::Arc;

use scoring::{ScoreEngine, ScoreError};
use storage::repo::SessionRepository;
use tempfile::tempdir;
use vibebuff_core::audit::{AuditOperation, AuditOutcome, InMemoryAuditSink};
use vibebuff_core::error::{ErrorCode, VibebuffError};
use vibebuff_core::model::{BuildSession, StackEdge, StackNode};

fn session(id: &str, code: &str) -> BuildSession {
    BuildSession {
        id: id.to_string(),
        name: "demo".to_string(),
        host_user_id: "host".to_string(),
        host_name: "Host".to_string(),
        host_avatar_url: None,
        share_code: code.to_string(),
        nodes: vec![
            StackNode::new("fe", "frontend", "React"),
            StackNode::new("be", "backend", "Node.js"),
            StackNode::new("db", "database", "PostgreSQL"),
        ],
        edges: vec![
            StackEdge::new("e1", "fe", "be"),
            StackEdge::new("e2", "be", "db"),
        ],
        score: None,
        is_active: true,
        max_participants: 10,
        created_at: 1,
        updated_at: 1,
    }
}

async fn open_repo(dir: &tempfile::TempDir, name: &str) -> Arc<SessionRepository> {
    Arc::new(SessionRepository::open(dir.path().join(name)).await.unwrap())
}

#[tokio::test]
async fn calculate_writes_score_back_to_session() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir, "score.wal").await;
    repo.insert_session(session("s1", "AAAAAA")).await.unwrap();

    let engine = ScoreEngine::new(repo.clone());
    let score = engine.calculate("s1").await.unwrap();
    assert_eq!(score.overall, 80);

    let stored = repo.get_session("s1").await.unwrap();
    let snapshot = stored.score.expect("score should be cached on the session");
    assert_eq!(snapshot.score, score);
    assert!(snapshot.last_updated > 0);
    assert_eq!(stored.updated_at, snapshot.last_updated);
}

#[tokio::test]
async fn calculate_is_idempotent_for_unchanged_graph() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir, "idempotent.wal").await;
    repo.insert_session(session("s1", "AAAAAA")).await.unwrap();

    let engine = ScoreEngine::new(repo);
    let first = engine.calculate("s1").await.unwrap();
    let second = engine.calculate("s1").await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir, "missing.wal").await;
    let engine = ScoreEngine::new(repo);

    let err = engine.calculate("nope").await.unwrap_err();

    assert!(matches!(err, ScoreError::SessionNotFound(ref id) if id == "nope"));
    assert_eq!(err.error_code(), ErrorCode::NotFound);
    assert_eq!(engine.metrics().not_found, 1);
}

#[tokio::test]
async fn inactive_session_is_not_found() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir, "inactive.wal").await;
    let mut ended = session("s1", "AAAAAA");
    ended.is_active = false;
    repo.insert_session(ended).await.unwrap();

    let sink = Arc::new(InMemoryAuditSink::default());
    let engine = ScoreEngine::new(repo.clone()).with_audit_sink(sink.clone());

    let err = engine.calculate("s1").await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotFound);
    assert!(repo.get_session("s1").await.unwrap().score.is_none());

    let events = sink.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, AuditOperation::ScoreSession);
    assert_eq!(events[0].outcome, AuditOutcome::Failed);
}

#[tokio::test]
async fn rescoring_reflects_latest_graph() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir, "rescore.wal").await;
    repo.insert_session(session("s1", "AAAAAA")).await.unwrap();
    let engine = ScoreEngine::new(repo.clone());

    let before = engine.calculate("s1").await.unwrap();

    repo.update_session("s1", |s| {
        s.nodes.push(StackNode::new("dep", "deployment", "Vercel"));
        s.edges.push(StackEdge::new("e3", "be", "dep"));
        Ok::<_, storage::RepoError>(())
    })
    .await
    .unwrap();

    let after = engine.calculate("s1").await.unwrap();
    assert!(after.scalability > before.scalability);
    assert_eq!(after.scalability, 100);
    assert_eq!(
        repo.get_session("s1").await.unwrap().score.unwrap().score,
        after
    );

    let metrics = engine.metrics();
    assert_eq!(metrics.total_scorings, 2);
    assert!(metrics.p99 >= metrics.p50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_calculations_last_write_wins() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir, "concurrent.wal").await;
    repo.insert_session(session("s1", "AAAAAA")).await.unwrap();
    let engine = Arc::new(ScoreEngine::new(repo.clone()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move { engine.calculate("s1").await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().overall, 80);
    }

    assert_eq!(
        repo.get_session("s1").await.unwrap().score.unwrap().score.overall,
        80
    );
}
