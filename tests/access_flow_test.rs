//! End-to-end lifecycle tests over the public API, using the in-memory
//! stores and mock clients.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use lockgate::access::{AccessType, ProtectionLevel, evaluate};
use lockgate::account::AccountRef;
use lockgate::billing::checkout::test::MockFullStripeClient;
use lockgate::billing::storage::test::InMemoryBillingStore;
use lockgate::billing::{
    BillingStore, CheckoutConfig, CheckoutManager, SubscriptionManager, WebhookHandler,
    WebhookOutcome,
};
use lockgate::provisioner::test::MockToolClient;
use lockgate::provisioner::{ToolAccountManager, ToolSyncOutcome};
use lockgate::trial::storage::test::InMemoryTrialStore;
use lockgate::trial::{TrialConfig, TrialManager, TrialStatus, TrialStore};

const WEBHOOK_SECRET: &str = "whsec_integration_secret";

struct Harness {
    billing: InMemoryBillingStore,
    trials: InMemoryTrialStore,
    stripe: MockFullStripeClient,
    tool: MockToolClient,
}

impl Harness {
    fn new() -> Self {
        Self {
            billing: InMemoryBillingStore::new(),
            trials: InMemoryTrialStore::new(),
            stripe: MockFullStripeClient::new(),
            tool: MockToolClient::new(),
        }
    }

    fn trial_manager(&self) -> TrialManager<InMemoryTrialStore> {
        TrialManager::new(self.trials.clone(), TrialConfig::new(7))
    }

    fn webhook_handler(&self) -> WebhookHandler<InMemoryBillingStore, InMemoryTrialStore> {
        WebhookHandler::new(
            self.billing.clone(),
            self.trials.clone(),
            WEBHOOK_SECRET.to_string(),
        )
    }

    /// Compute the verdict the way the handlers do: load both records,
    /// derive the returning flag, evaluate.
    async fn verdict(&self, account: &AccountRef) -> lockgate::AccessVerdict {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let subscription = self.billing.get_subscription(&account.id).await.unwrap();
        let trial = self.trials.get_trial(&account.id).await.unwrap();
        let returning = self.trials.was_email_deleted(&account.email).await.unwrap();

        let sub_snapshot = subscription.as_ref().map(|s| s.access_snapshot());
        let trial_snapshot = trial.as_ref().map(|t| t.access_snapshot(now));
        evaluate(sub_snapshot.as_ref(), trial_snapshot.as_ref(), returning)
    }
}

fn subscription_webhook_event(event_id: &str, account_id: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "customer.subscription.created",
        "created": 1_700_000_000u64,
        "data": {
            "object": {
                "id": "sub_integration",
                "customer": "cus_integration",
                "status": status,
                "current_period_start": 1_700_000_000u64,
                "current_period_end": 1_702_592_000u64,
                "cancel_at_period_end": false,
                "items": {"data": [{"price": {"id": "price_monthly"}}]},
                "metadata": {"account_id": account_id, "email": "dana@example.com"},
            }
        }
    }))
    .unwrap()
}

fn sign_payload(payload: &[u8]) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(signed.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    format!("t={},v1={}", timestamp, signature)
}

#[tokio::test]
async fn new_user_walks_trial_to_paid() {
    let harness = Harness::new();
    let dana = AccountRef::new("user-1", "dana@example.com");

    // Nothing known: denied.
    let verdict = harness.verdict(&dana).await;
    assert!(!verdict.has_access);
    assert_eq!(verdict.protection_level, ProtectionLevel::None);

    // Start the free trial.
    let record = harness.trial_manager().start_trial(&dana).await.unwrap();
    assert_eq!(record.status, TrialStatus::Active);

    let verdict = harness.verdict(&dana).await;
    assert!(verdict.has_access);
    assert_eq!(verdict.access_type, AccessType::FreeTrial);
    assert!(verdict.can_create_tool_account);

    // Tool account can be provisioned now.
    let tools = ToolAccountManager::new(harness.tool.clone());
    let tool_account = tools
        .ensure_account(&dana, &verdict, "workspace-pass")
        .await
        .unwrap();
    assert!(tool_account.active);

    // Checkout, then the webhook lands the active subscription.
    let checkout = CheckoutManager::new(
        harness.billing.clone(),
        harness.stripe.clone(),
        CheckoutConfig::new(
            "https://app.example.com/success",
            "https://app.example.com/cancel",
        ),
    );
    let session = checkout
        .create_subscription_checkout(&dana, "price_monthly")
        .await
        .unwrap();
    assert!(!session.url.is_empty());

    let payload = subscription_webhook_event("evt_1", "user-1", "active");
    let signature = sign_payload(&payload);
    let handler = harness.webhook_handler();
    let event = handler.verify_signature(&payload, &signature).unwrap();
    assert_eq!(
        handler.handle_event(event).await.unwrap(),
        WebhookOutcome::Processed
    );

    // Paid access now, and the trial record converted.
    let verdict = harness.verdict(&dana).await;
    assert_eq!(verdict.access_type, AccessType::PaidSubscription);
    assert_eq!(verdict.protection_level, ProtectionLevel::Protected);

    let trial = harness
        .trial_manager()
        .get_trial("user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trial.status, TrialStatus::ConvertedToPaid);
}

#[tokio::test]
async fn cancellation_keeps_access_until_period_end() {
    let harness = Harness::new();
    let dana = AccountRef::new("user-1", "dana@example.com");

    // Seed an active subscription via the webhook path.
    let payload = subscription_webhook_event("evt_1", "user-1", "active");
    let signature = sign_payload(&payload);
    let handler = harness.webhook_handler();
    let event = handler.verify_signature(&payload, &signature).unwrap();
    handler.handle_event(event).await.unwrap();

    harness
        .stripe
        .subscriptions
        .add_subscription(lockgate::billing::StripeSubscriptionData {
            id: "sub_integration".to_string(),
            customer_id: "cus_integration".to_string(),
            price_id: "price_monthly".to_string(),
            status: "active".to_string(),
            current_period_start: 1_700_000_000,
            current_period_end: 1_702_592_000,
            trial_end: None,
            cancel_at_period_end: false,
            metadata: Default::default(),
        });

    let subscriptions =
        SubscriptionManager::new(harness.billing.clone(), harness.stripe.clone());

    // Cancel at period end: access survives, tool account stays eligible.
    subscriptions
        .cancel_subscription("user-1", false)
        .await
        .unwrap();
    let verdict = harness.verdict(&dana).await;
    assert!(verdict.has_access);
    assert_eq!(verdict.access_type, AccessType::PaidSubscription);
    assert!(verdict.can_create_tool_account);

    // Reactivate: back to a plain active subscription.
    let sub = subscriptions
        .reactivate_subscription("user-1")
        .await
        .unwrap();
    assert!(!sub.cancel_at_period_end);

    // Immediate cancel: access gone.
    subscriptions
        .cancel_subscription("user-1", true)
        .await
        .unwrap();
    let verdict = harness.verdict(&dana).await;
    assert!(!verdict.has_access);
    assert_eq!(verdict.access_type, AccessType::NoAccess);
}

#[tokio::test]
async fn tool_account_follows_verdict() {
    let harness = Harness::new();
    let dana = AccountRef::new("user-1", "dana@example.com");

    harness.trial_manager().start_trial(&dana).await.unwrap();
    let verdict = harness.verdict(&dana).await;

    let tools = ToolAccountManager::new(harness.tool.clone());
    tools
        .ensure_account(&dana, &verdict, "workspace-pass")
        .await
        .unwrap();
    assert!(tools
        .verify_login("dana@example.com", "workspace-pass")
        .await
        .unwrap());

    // Trial data queued for deletion: access collapses, sync deactivates.
    harness
        .trial_manager()
        .schedule_deletion("user-1")
        .await
        .unwrap();
    let verdict = harness.verdict(&dana).await;
    assert!(!verdict.has_access);

    let outcome = tools.sync(&dana, &verdict).await.unwrap();
    assert_eq!(outcome, ToolSyncOutcome::Deactivated);
    assert!(!tools
        .verify_login("dana@example.com", "workspace-pass")
        .await
        .unwrap());

    // And provisioning is refused for the denied verdict.
    let err = tools
        .ensure_account(&dana, &verdict, "workspace-pass")
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn deleted_email_never_trials_again() {
    let harness = Harness::new();
    let dana = AccountRef::new("user-1", "dana@example.com");
    let trials = harness.trial_manager();

    trials.start_trial(&dana).await.unwrap();
    trials.schedule_deletion("user-1").await.unwrap();
    trials.mark_account_deleted(&dana).await.unwrap();

    // Same email, fresh account id.
    let rejoined = AccountRef::new("user-2", "dana@example.com");
    let result = trials.start_trial(&rejoined).await;
    assert!(result.is_err());

    let verdict = harness.verdict(&rejoined).await;
    assert!(!verdict.has_access);
    assert!(!verdict.can_create_tool_account);

    // A different email is unaffected.
    let sam = AccountRef::new("user-3", "sam@example.com");
    assert!(trials.start_trial(&sam).await.is_ok());
}

#[tokio::test]
async fn returning_user_with_lingering_expired_trial_reads_expired() {
    let harness = Harness::new();

    // An expired trial record still on file for a deleted email.
    let record = lockgate::trial::TrialRecord {
        account_id: "user-1".to_string(),
        email: "dana@example.com".to_string(),
        status: TrialStatus::Expired,
        started_at: 1_000,
        trial_end: 2_000,
        updated_at: 2_000,
    };
    harness.trials.save_trial(&record).await.unwrap();
    harness
        .trials
        .record_deleted_email("dana@example.com")
        .await
        .unwrap();

    let dana = AccountRef::new("user-1", "dana@example.com");
    let verdict = harness.verdict(&dana).await;

    assert!(!verdict.has_access);
    assert_eq!(verdict.access_type, AccessType::NoAccess);
    assert!(!verdict.can_create_tool_account);
    assert_eq!(verdict.protection_level, ProtectionLevel::Expired);
}

#[tokio::test]
async fn webhook_replays_are_idempotent() {
    let harness = Harness::new();
    let handler = harness.webhook_handler();

    let payload = subscription_webhook_event("evt_replay", "user-1", "active");
    let signature = sign_payload(&payload);

    let event = handler.verify_signature(&payload, &signature).unwrap();
    assert_eq!(
        handler.handle_event(event).await.unwrap(),
        WebhookOutcome::Processed
    );

    let event = handler.verify_signature(&payload, &signature).unwrap();
    assert_eq!(
        handler.handle_event(event).await.unwrap(),
        WebhookOutcome::AlreadyProcessed
    );
}

#[tokio::test]
async fn webhook_rejects_forged_signature() {
    let harness = Harness::new();
    let handler = harness.webhook_handler();

    let payload = subscription_webhook_event("evt_forged", "user-1", "active");
    let forged = "t=1700000000,v1=deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    assert!(handler.verify_signature(&payload, forged).is_err());
}
