//! Webhook outbox writer.
//!
//! Lifecycle events append a signed JSON-RPC 2.0 push-notification envelope
//! to the durable outbox; a delivery worker outside this repository drains
//! it. Nothing here retries or sends.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use agora_core::agent::Agent;
use agora_core::job::Job;
use agora_core::wallet::WebhookOutboxEntry;
use agora_core::MarketError;
use agora_store::MarketDb;

/// Build the push-notification envelope body for one recipient.
fn envelope(job: &Job, event: &str) -> String {
    let body = json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": "tasks/pushNotification",
        "params": {
            "taskId": job.id.to_string(),
            "contextId": job.id.to_string(),
            "status": {
                "message": {
                    "parts": [{
                        "data": {
                            "event": event,
                            "timestamp": Utc::now().to_rfc3339(),
                            "job": {
                                "job_id": job.id.to_string(),
                                "status": job.status.to_string(),
                                "agreed_price": job.agreed_price.to_string(),
                                "current_round": job.current_round,
                            }
                        }
                    }]
                }
            }
        }
    });
    body.to_string()
}

/// Append one outbox row per recipient. Failures are surfaced to the caller
/// but job mutations never roll back over a notification.
pub fn enqueue(db: &MarketDb, job: &Job, event: &str, recipients: &[&Agent]) -> Result<(), MarketError> {
    let timestamp = Utc::now().timestamp().to_string();
    for agent in recipients {
        let body = envelope(job, event);
        let signature = agora_crypto::sign_webhook(&agent.webhook_secret, &timestamp, &body);
        db.append_outbox(&WebhookOutboxEntry {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            body,
            signature,
            created_at: Utc::now(),
        })?;
    }
    Ok(())
}
