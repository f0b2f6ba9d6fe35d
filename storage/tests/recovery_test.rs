use storage::repo::{Mutation, SessionRepository};
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;
use vibebuff_core::model::{BuildSession, Participant, StackNode};

fn session(id: &str, code: &str) -> BuildSession {
    BuildSession {
        id: id.to_string(),
        name: "recovery".to_string(),
        host_user_id: "host".to_string(),
        host_name: "Host".to_string(),
        host_avatar_url: None,
        share_code: code.to_string(),
        nodes: vec![StackNode::new("fe", "frontend", "React")],
        edges: Vec::new(),
        score: None,
        is_active: true,
        max_participants: 10,
        created_at: 1,
        updated_at: 1,
    }
}

fn participant(session_id: &str, user_id: &str) -> Participant {
    Participant {
        id: format!("{session_id}-{user_id}"),
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        user_name: user_id.to_string(),
        user_avatar_url: None,
        cursor: None,
        cursor_color: "#ef4444".to_string(),
        is_active: true,
        last_seen: 1,
        joined_at: 1,
    }
}

#[tokio::test]
async fn repository_recovers_committed_state_after_torn_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.wal");

    {
        let repo = SessionRepository::open(&path).await.unwrap();
        repo.apply(vec![
            Mutation::PutSession(session("s1", "ABCDEF")),
            Mutation::PutParticipant(participant("s1", "host")),
        ])
        .await
        .unwrap();
        repo.update_session("s1", |s| {
            s.nodes.push(StackNode::new("db", "database", "PostgreSQL"));
            Ok::<_, storage::RepoError>(())
        })
        .await
        .unwrap();
    }

    // Simulate a crash halfway through the next record's header.
    {
        let mut raw = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        raw.write_all(&[0, 0, 0, 0, 0, 0, 0, 3, 0xde, 0xad]).await.unwrap();
        raw.flush().await.unwrap();
    }

    let repo = SessionRepository::open(&path).await.unwrap();
    assert_eq!(repo.current_lsn().await, 2);

    let restored = repo.get_session("s1").await.unwrap();
    assert_eq!(restored.nodes.len(), 2);
    assert_eq!(repo.participants("s1").await.len(), 1);
    assert_eq!(
        repo.session_by_share_code("ABCDEF").await.map(|s| s.id),
        Some("s1".to_string())
    );

    // The log keeps accepting writes after the tail was cut.
    repo.insert_session(session("s2", "GHJKLM")).await.unwrap();
    drop(repo);

    let reopened = SessionRepository::open(&path).await.unwrap();
    assert_eq!(reopened.current_lsn().await, 3);
    assert!(reopened.get_session("s2").await.is_ok());
}
