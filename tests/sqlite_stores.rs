//! SQLite store backends against an in-memory database

use chrono::{Duration, SubsecRound, Utc};
use ed25519_dalek::SigningKey;
use futures::future::join_all;
use gift_planner_auth::db::models::{CeremonyKind, Credential, SessionToken, DEFAULT_SESSION_TTL};
use gift_planner_auth::db::{
    self, ChallengeSessionStore, CredentialStore, IdentityStore, SqliteChallengeSessionStore,
    SqliteCredentialStore, SqliteIdentityStore,
};
use gift_planner_auth::webauthn::verifier::{DeviceAssertion, DeviceAttestation, DeviceKeyVerifier};
use gift_planner_auth::{CeremonyEngine, CeremonyError, ManualClock, SessionError, StoreError};
use rand::rngs::OsRng;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

struct Stores {
    pool: SqlitePool,
    identities: SqliteIdentityStore,
    credentials: SqliteCredentialStore,
    sessions: SqliteChallengeSessionStore,
    clock: ManualClock,
}

async fn stores() -> Stores {
    let pool = db::connect_in_memory().await.unwrap();
    // Stored timestamps keep microseconds
    let clock = ManualClock::new(Utc::now().trunc_subsecs(6));

    Stores {
        identities: SqliteIdentityStore::new(pool.clone()),
        credentials: SqliteCredentialStore::new(pool.clone()),
        sessions: SqliteChallengeSessionStore::new(pool.clone(), Arc::new(clock.clone())),
        pool,
        clock,
    }
}

#[tokio::test]
async fn identities_round_trip_and_addresses_are_unique() {
    let s = stores().await;

    let alice = s.identities.create("Alice", "  Alice@Example.com ").await.unwrap();
    assert_eq!(alice.contact_address, "alice@example.com");

    let by_id = s.identities.find_by_id(alice.id).await.unwrap();
    assert_eq!(by_id, alice);

    let by_address = s.identities.find_by_contact_address("ALICE@example.COM").await.unwrap();
    assert_eq!(by_address.id, alice.id);

    let duplicate = s.identities.create("Other Alice", "alice@EXAMPLE.com").await;
    assert!(matches!(duplicate, Err(StoreError::Conflict(_))));

    let missing = s.identities.find_by_id(Uuid::new_v4()).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn credentials_insert_find_and_conflict() {
    let s = stores().await;
    let alice = s.identities.create("Alice", "alice@example.com").await.unwrap();
    let bob = s.identities.create("Bob", "bob@example.com").await.unwrap();

    assert!(s.credentials.find_by_identity(alice.id).await.unwrap().is_empty());

    let first = Credential::new(vec![1; 16], alice.id, vec![0xaa; 32], 4);
    s.credentials.insert(&first).await.unwrap();

    let stolen = Credential::new(vec![1; 16], bob.id, vec![0xbb; 32], 0);
    let result = s.credentials.insert(&stolen).await;
    assert!(matches!(result, Err(StoreError::Conflict(_))));

    let stored = s.credentials.find_by_credential_id(&[1; 16]).await.unwrap();
    assert_eq!(stored.identity_id, alice.id);
    assert_eq!(stored.public_key, vec![0xaa; 32]);
    assert_eq!(stored.counter, 4);
    assert!(stored.last_used_at.is_none());

    assert_eq!(s.credentials.find_by_identity(alice.id).await.unwrap().len(), 1);
    assert!(s.credentials.find_by_identity(bob.id).await.unwrap().is_empty());

    let missing = s.credentials.find_by_credential_id(&[9; 16]).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn counter_updates() {
    let s = stores().await;
    let alice = s.identities.create("Alice", "alice@example.com").await.unwrap();
    let credential = Credential::new(vec![2; 16], alice.id, vec![0; 32], 5);
    s.credentials.insert(&credential).await.unwrap();

    s.credentials.update_counter(&[2; 16], 7).await.unwrap();
    let stored = s.credentials.find_by_credential_id(&[2; 16]).await.unwrap();
    assert_eq!(stored.counter, 7);
    assert!(stored.last_used_at.is_some());

    let lower = s.credentials.update_counter(&[2; 16], 6).await;
    assert!(matches!(lower, Err(StoreError::Conflict(_))));

    let missing = s.credentials.update_counter(&[3; 16], 1).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    assert!(!s.credentials.compare_and_swap_counter(&[2; 16], 5, 8).await.unwrap());
    assert!(s.credentials.compare_and_swap_counter(&[2; 16], 7, 8).await.unwrap());
    assert_eq!(s.credentials.find_by_credential_id(&[2; 16]).await.unwrap().counter, 8);

    let missing = s.credentials.compare_and_swap_counter(&[3; 16], 0, 1).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn public_key_can_be_refreshed() {
    let s = stores().await;
    let alice = s.identities.create("Alice", "alice@example.com").await.unwrap();
    s.credentials
        .insert(&Credential::new(vec![5; 16], alice.id, b"old".to_vec(), 2))
        .await
        .unwrap();

    s.credentials.update_public_key(&[5; 16], b"new").await.unwrap();
    let stored = s.credentials.find_by_credential_id(&[5; 16]).await.unwrap();
    assert_eq!(stored.public_key, b"new".to_vec());
    assert_eq!(stored.counter, 2);

    let missing = s.credentials.update_public_key(&[6; 16], b"new").await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn counters_above_i32_survive_storage() {
    let s = stores().await;
    let alice = s.identities.create("Alice", "alice@example.com").await.unwrap();
    let credential = Credential::new(vec![4; 16], alice.id, vec![0; 32], u32::MAX - 1);
    s.credentials.insert(&credential).await.unwrap();

    assert!(s
        .credentials
        .compare_and_swap_counter(&[4; 16], u32::MAX - 1, u32::MAX)
        .await
        .unwrap());
    let stored = s.credentials.find_by_credential_id(&[4; 16]).await.unwrap();
    assert_eq!(stored.counter, u32::MAX);
}

#[tokio::test]
async fn sessions_are_consumed_once() {
    let s = stores().await;
    let id = Uuid::new_v4();

    let token = s
        .sessions
        .create(
            CeremonyKind::Authentication,
            Some(id),
            vec![1, 2, 3],
            b"state".to_vec(),
            DEFAULT_SESSION_TTL,
        )
        .await
        .unwrap();

    let session = s.sessions.consume(&token).await.unwrap();
    assert_eq!(session.kind, CeremonyKind::Authentication);
    assert_eq!(session.identity_id, Some(id));
    assert_eq!(session.challenge, vec![1, 2, 3]);
    assert_eq!(session.ceremony_state, b"state".to_vec());
    assert_eq!(session.expires_at - session.created_at, DEFAULT_SESSION_TTL);

    let again = s.sessions.consume(&token).await;
    assert!(matches!(again, Err(SessionError::NotFound)));

    let unknown = s.sessions.consume(&SessionToken::from("no-such-token")).await;
    assert!(matches!(unknown, Err(SessionError::NotFound)));
}

#[tokio::test]
async fn expired_session_is_reported_then_gone() {
    let s = stores().await;
    let token = s
        .sessions
        .create(CeremonyKind::Registration, None, vec![1], vec![], DEFAULT_SESSION_TTL)
        .await
        .unwrap();

    s.clock.advance(Duration::minutes(5) + Duration::seconds(1));

    assert!(matches!(s.sessions.consume(&token).await, Err(SessionError::Expired)));
    assert!(matches!(s.sessions.consume(&token).await, Err(SessionError::NotFound)));
}

#[tokio::test]
async fn reaper_removes_only_expired_sessions() {
    let s = stores().await;
    let stale = s
        .sessions
        .create(CeremonyKind::Registration, None, vec![1], vec![], Duration::seconds(30))
        .await
        .unwrap();
    let fresh = s
        .sessions
        .create(CeremonyKind::Registration, None, vec![2], vec![], DEFAULT_SESSION_TTL)
        .await
        .unwrap();

    s.clock.advance(Duration::minutes(1));

    assert_eq!(s.sessions.reap_expired().await.unwrap(), 1);
    assert!(matches!(s.sessions.consume(&stale).await, Err(SessionError::NotFound)));
    assert!(s.sessions.consume(&fresh).await.is_ok());
}

#[tokio::test]
async fn concurrent_consumers_see_one_session() {
    let s = stores().await;
    let sessions = Arc::new(s.sessions.clone());
    let token = sessions
        .create(CeremonyKind::Registration, None, vec![1], vec![], DEFAULT_SESSION_TTL)
        .await
        .unwrap();

    let attempts = (0..6).map(|_| {
        let sessions = sessions.clone();
        let token = token.clone();
        async move { sessions.consume(&token).await }
    });
    let results = join_all(attempts).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(SessionError::NotFound)))
            .count(),
        5
    );
}

#[tokio::test]
async fn undecodable_session_row_is_corrupt() {
    let s = stores().await;
    let token = s
        .sessions
        .create(CeremonyKind::Registration, None, vec![1], vec![], DEFAULT_SESSION_TTL)
        .await
        .unwrap();
    // Timestamps are plain text to SQLite
    sqlx::query("UPDATE challenge_sessions SET expires_at = 'yesterday' WHERE token = ?")
        .bind(token.as_str())
        .execute(&s.pool)
        .await
        .unwrap();

    let result = s.sessions.consume(&token).await;
    assert!(matches!(result, Err(SessionError::Store(StoreError::Corrupt(_)))));
}

#[tokio::test]
async fn engine_runs_end_to_end_on_sqlite() {
    let s = stores().await;
    let engine = CeremonyEngine::new(
        DeviceKeyVerifier::new("gifts.example", "Gift Planner"),
        Arc::new(s.identities.clone()),
        Arc::new(s.credentials.clone()),
        Arc::new(s.sessions.clone()),
    );
    let key = SigningKey::generate(&mut OsRng);
    let cred = vec![0xee; 16];

    let u1 = engine.identities().create("U1", "u1@example.com").await.unwrap();

    let began = engine.begin_registration(u1.id).await.unwrap();
    let attestation = DeviceAttestation::sign(&key, &began.parameters, cred.clone(), 0).unwrap();
    engine
        .finish_registration(u1.id, &began.session_token, &attestation)
        .await
        .unwrap();

    let began = engine.begin_authentication("u1@example.com").await.unwrap();
    let assertion = DeviceAssertion::sign(&key, &began.parameters, cred.clone(), None, 1).unwrap();
    let identity = engine
        .finish_authentication(began.identity_id, &began.session_token, &assertion)
        .await
        .unwrap();
    assert_eq!(identity.id, u1.id);

    let stored = s.credentials.find_by_credential_id(&cred).await.unwrap();
    assert_eq!(stored.counter, 1);
    assert!(stored.last_used_at.is_some());

    let began = engine.begin_authentication("u1@example.com").await.unwrap();
    let assertion = DeviceAssertion::sign(&key, &began.parameters, cred.clone(), None, 1).unwrap();
    let result = engine
        .finish_authentication(began.identity_id, &began.session_token, &assertion)
        .await;
    assert!(matches!(result, Err(CeremonyError::PossibleCloneDetected { .. })));
}
