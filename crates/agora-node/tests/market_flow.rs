//! End-to-end marketplace scenarios over the full service stack with
//! in-memory coordination drivers and a temp-dir store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use agora_auth::{AuthHeaders, Authenticator};
use agora_coord::{DeadlineSet, MemoryDeadlineSet, MemoryNonceStore, NonceStore};
use agora_core::agent::{Agent, AgentStatus};
use agora_core::config::{AuthConfig, FeeConfig, SandboxConfig};
use agora_core::escrow::EscrowAction;
use agora_core::job::JobStatus;
use agora_core::{AgentId, Credits, MarketError};
use agora_crypto::{generate_nonce, sign_request, KeyPair};
use agora_jobs::{CounterOffer, JobService, ProposeJob};
use agora_ledger::{Ledger, LockManager};
use agora_sandbox::{SandboxResult, ScriptRunner, ScriptSpec};
use agora_store::MarketDb;

struct PassingRunner;

#[async_trait]
impl ScriptRunner for PassingRunner {
    async fn run(&self, _spec: &ScriptSpec, _d: &Value) -> Result<SandboxResult, MarketError> {
        Ok(SandboxResult {
            passed: true,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            error: None,
            elapsed_seconds: 0.1,
        })
    }
}

struct Stack {
    _dir: tempfile::TempDir,
    db: Arc<MarketDb>,
    ledger: Arc<Ledger>,
    jobs: JobService,
}

fn stack() -> Stack {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(MarketDb::open(dir.path()).expect("open db"));
    let ledger = Arc::new(Ledger::new(
        Arc::clone(&db),
        Arc::new(LockManager::new()),
        FeeConfig::default(),
    ));
    let deadlines: Arc<dyn DeadlineSet> = Arc::new(MemoryDeadlineSet::new());
    let jobs = JobService::new(
        Arc::clone(&db),
        Arc::clone(&ledger),
        Arc::new(PassingRunner),
        deadlines,
        SandboxConfig::default(),
    );
    Stack { _dir: dir, db, ledger, jobs }
}

fn register(db: &MarketDb, keypair: &KeyPair, name: &str) -> AgentId {
    let agent = Agent {
        id: AgentId::new(),
        public_key: keypair.public_key_hex(),
        display_name: name.into(),
        description: None,
        endpoint_url: format!("https://{name}.example.com"),
        capabilities: vec![],
        webhook_secret: "w".repeat(64),
        capability_card: None,
        reputation_seller: 0.0,
        reputation_client: 0.0,
        balance: Credits::ZERO,
        status: AgentStatus::Active,
        created_at: Utc::now(),
        last_seen: Utc::now(),
    };
    db.put_agent(&agent).unwrap();
    agent.id
}

fn balance(db: &MarketDb, id: AgentId) -> Credits {
    db.get_agent(id).unwrap().unwrap().balance
}

fn records(n: usize) -> Value {
    let items: Vec<Value> = (0..n).map(|i| json!({"id": i, "name": format!("row-{i}")})).collect();
    json!({ "records": items })
}

fn spec_suite() -> Value {
    json!({
        "pass_threshold": "all",
        "tests": [
            {"test_id": "shape", "type": "json_schema", "params": {"schema": {
                "type": "object", "required": ["records"],
                "properties": {"records": {"type": "array", "minItems": 1}}
            }}},
            {"test_id": "volume", "type": "count_gte",
             "params": {"path": "$.records", "min_count": 400}},
            {"test_id": "ids", "type": "assertion",
             "params": {"expression": "len(output['records']) >= 400 and output['records'][0]['id'] == 0"}}
        ]
    })
}

/// The full negotiated happy path with the literal scenario numbers:
/// deposit 500.00, counters 30.00 → 28.00, storage and verification fees,
/// release with the 1% base fee split — and exact reconciliation at the end.
#[tokio::test]
async fn happy_path_reconciles_exactly() {
    let s = stack();
    let client_kp = KeyPair::generate();
    let seller_kp = KeyPair::generate();
    let client = register(&s.db, &client_kp, "client");
    let seller = register(&s.db, &seller_kp, "seller");

    s.ledger.credit_balance(client, Credits::from_cents(50_000)).await.unwrap();
    s.ledger.credit_balance(seller, Credits::from_cents(1_000)).await.unwrap();

    let job = s
        .jobs
        .propose(client, ProposeJob {
            seller,
            listing_id: None,
            max_budget: Credits::from_cents(2_500),
            requirements: Some(json!({"rows": 400})),
            acceptance_criteria: Some(spec_suite()),
            delivery_deadline: None,
            max_rounds: Some(5),
        })
        .await
        .unwrap();
    let hash = job.acceptance_criteria_hash.clone().unwrap();

    // Seller counters 30.00, client counters 28.00, seller accepts.
    s.jobs
        .counter(job.id, seller, CounterOffer {
            proposed_price: Credits::from_cents(3_000),
            counter_terms: None,
            accepted_terms: None,
            message: None,
        })
        .await
        .unwrap();
    s.jobs
        .counter(job.id, client, CounterOffer {
            proposed_price: Credits::from_cents(2_800),
            counter_terms: None,
            accepted_terms: None,
            message: None,
        })
        .await
        .unwrap();
    s.jobs.accept(job.id, seller, Some(hash)).await.unwrap();

    s.jobs.fund(job.id, client).await.unwrap();
    assert_eq!(balance(&s.db, client), Credits::from_cents(47_200), "500.00 - 28.00 = 472.00");

    s.jobs.start(job.id, seller).await.unwrap();
    let (_, storage_fee) = s.jobs.deliver(job.id, seller, records(450)).await.unwrap();
    assert!(storage_fee >= Credits::from_cents(1));

    let outcome = s.jobs.verify(job.id, client).await.unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert!(outcome.verification.unwrap().passed);
    let verification_fee = outcome.fee_charged.unwrap();

    // 1% of 28.00 = 0.28, split 0.14 / 0.14.
    assert_eq!(
        balance(&s.db, client).cents(),
        50_000 - 2_800 - 14 - verification_fee.cents()
    );
    assert_eq!(
        balance(&s.db, seller).cents(),
        1_000 + 2_800 - 14 - storage_fee.cents()
    );

    // Conservation: party deltas equal platform fees exactly.
    let client_delta = 50_000 - balance(&s.db, client).cents();
    let seller_delta = balance(&s.db, seller).cents() - 1_000;
    assert_eq!(
        client_delta - seller_delta,
        28 + storage_fee.cents() + verification_fee.cents()
    );
}

/// Same setup, deliverable with only 165 records: the suite fails, the
/// client is charged the verification fee, escrow refunds, seller earns
/// nothing and is out the storage fee.
#[tokio::test]
async fn verification_failure_refunds() {
    let s = stack();
    let client = register(&s.db, &KeyPair::generate(), "client");
    let seller = register(&s.db, &KeyPair::generate(), "seller");
    s.ledger.credit_balance(client, Credits::from_cents(50_000)).await.unwrap();
    s.ledger.credit_balance(seller, Credits::from_cents(1_000)).await.unwrap();

    let job = s
        .jobs
        .propose(client, ProposeJob {
            seller,
            listing_id: None,
            max_budget: Credits::from_cents(2_800),
            requirements: None,
            acceptance_criteria: Some(spec_suite()),
            delivery_deadline: None,
            max_rounds: None,
        })
        .await
        .unwrap();
    let hash = job.acceptance_criteria_hash.clone().unwrap();
    s.jobs.accept(job.id, seller, Some(hash)).await.unwrap();
    s.jobs.fund(job.id, client).await.unwrap();
    s.jobs.start(job.id, seller).await.unwrap();
    let (_, storage_fee) = s.jobs.deliver(job.id, seller, records(165)).await.unwrap();

    let outcome = s.jobs.verify(job.id, client).await.unwrap();
    assert_eq!(outcome.job.status, JobStatus::Failed);
    let report = outcome.verification.unwrap();
    assert!(!report.passed);
    // shape passes; volume and ids fail.
    assert_eq!(report.results.iter().filter(|r| !r.passed).count(), 2);

    let verification_fee = outcome.fee_charged.unwrap();
    assert_eq!(balance(&s.db, client).cents(), 50_000 - verification_fee.cents());
    assert_eq!(balance(&s.db, seller).cents(), 1_000 - storage_fee.cents());
}

/// Two concurrent 60.00 withdrawals against a 100.00 balance: exactly one
/// succeeds and the final balance is 40.00.
#[tokio::test]
async fn concurrent_withdrawals_settle_once() {
    let s = stack();
    let agent = register(&s.db, &KeyPair::generate(), "holder");
    s.ledger.credit_balance(agent, Credits::from_cents(10_000)).await.unwrap();

    let l1 = Arc::clone(&s.ledger);
    let l2 = Arc::clone(&s.ledger);
    let h1 = tokio::spawn(async move { l1.reserve_withdrawal(agent, Credits::from_cents(6_000)).await });
    let h2 = tokio::spawn(async move { l2.reserve_withdrawal(agent, Credits::from_cents(6_000)).await });
    let outcomes = [h1.await.unwrap(), h2.await.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(MarketError::InsufficientBalance { .. }))));
    assert_eq!(balance(&s.db, agent), Credits::from_cents(4_000));
}

/// The same signed request replayed with the same nonce: first accepted,
/// second rejected with the nonce-reuse detail.
#[tokio::test]
async fn nonce_replay_is_rejected() {
    let s = stack();
    let keypair = KeyPair::generate();
    let agent = register(&s.db, &keypair, "signer");

    let nonces: Arc<dyn NonceStore> = Arc::new(MemoryNonceStore::new());
    let auth = Authenticator::new(Arc::clone(&s.db), nonces, AuthConfig::default());

    let timestamp = Utc::now().to_rfc3339();
    let signature = sign_request(&keypair, &timestamp, "POST", "/jobs", b"{}");
    let headers = AuthHeaders {
        authorization: Some(format!("AgentSig {agent}:{signature}")),
        timestamp: Some(timestamp),
        nonce: Some(generate_nonce()),
    };

    auth.verify(&headers, "POST", "/jobs", b"{}").await.unwrap();
    let err = auth.verify(&headers, "POST", "/jobs", b"{}").await.unwrap_err();
    assert_eq!(err.to_string(), "Nonce already used");
    assert_eq!(err.status(), 403);
}

/// The escrow audit log only ever grows, and the actions of a full
/// fund → release cycle land in order.
#[tokio::test]
async fn audit_log_is_append_only() {
    let s = stack();
    let client = register(&s.db, &KeyPair::generate(), "client");
    let seller = register(&s.db, &KeyPair::generate(), "seller");
    s.ledger.credit_balance(client, Credits::from_cents(50_000)).await.unwrap();
    s.ledger.credit_balance(seller, Credits::from_cents(1_000)).await.unwrap();

    let job = s
        .jobs
        .propose(client, ProposeJob {
            seller,
            listing_id: None,
            max_budget: Credits::from_cents(2_000),
            requirements: None,
            acceptance_criteria: None,
            delivery_deadline: None,
            max_rounds: None,
        })
        .await
        .unwrap();
    s.jobs.accept(job.id, seller, None).await.unwrap();

    let mut snapshots: Vec<Vec<String>> = Vec::new();
    let snapshot = |db: &MarketDb| {
        db.iter_all_audit()
            .unwrap()
            .iter()
            .map(|e| format!("{}:{:?}", e.escrow_id, e.action))
            .collect::<Vec<_>>()
    };

    snapshots.push(snapshot(&s.db));
    s.jobs.fund(job.id, client).await.unwrap();
    snapshots.push(snapshot(&s.db));
    s.jobs.start(job.id, seller).await.unwrap();
    s.jobs.deliver(job.id, seller, json!({"ok": true})).await.unwrap();
    snapshots.push(snapshot(&s.db));
    s.jobs.complete(job.id, client).await.unwrap();
    snapshots.push(snapshot(&s.db));

    // Every snapshot is a strict prefix of the next: purely additive.
    for pair in snapshots.windows(2) {
        assert!(pair[1].len() >= pair[0].len());
        assert_eq!(&pair[1][..pair[0].len()], &pair[0][..]);
    }

    let escrow = s.db.get_escrow_by_job(job.id).unwrap().unwrap();
    let actions: Vec<EscrowAction> =
        s.db.audit_for_escrow(escrow.id).unwrap().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![EscrowAction::Created, EscrowAction::Funded, EscrowAction::Released]
    );
}

/// A stale deadline for a settled job is a no-op thanks to the status
/// re-check; an overdue funded job fails and refunds.
#[tokio::test]
async fn deadline_consumer_waits_then_fires() {
    use agora_jobs::{DeadlineConsumer, StepOutcome};

    let s = stack();
    let client = register(&s.db, &KeyPair::generate(), "client");
    let seller = register(&s.db, &KeyPair::generate(), "seller");
    s.ledger.credit_balance(client, Credits::from_cents(10_000)).await.unwrap();

    let job = s
        .jobs
        .propose(client, ProposeJob {
            seller,
            listing_id: None,
            max_budget: Credits::from_cents(2_000),
            requirements: None,
            acceptance_criteria: None,
            delivery_deadline: Some(Utc::now() + chrono::Duration::hours(2)),
            max_rounds: None,
        })
        .await
        .unwrap();
    s.jobs.accept(job.id, seller, None).await.unwrap();
    s.jobs.fund(job.id, client).await.unwrap();

    let consumer = DeadlineConsumer::new(
        Arc::clone(&s.db),
        Arc::clone(&s.ledger),
        Arc::clone(s.jobs.deadlines()),
    );

    // Future deadline: the consumer waits, capped at 60s.
    match consumer.step().await.unwrap() {
        StepOutcome::Wait(wait) => assert!(wait <= Duration::from_secs(60)),
        other => panic!("expected wait, got {other:?}"),
    }

    // Make it overdue and step again.
    s.jobs.deadlines().add(job.id, Utc::now().timestamp() - 3_600).await.unwrap();
    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Processed(job.id));
    assert_eq!(s.db.get_job(job.id).unwrap().unwrap().status, JobStatus::Failed);
    assert_eq!(balance(&s.db, client), Credits::from_cents(10_000));
}
