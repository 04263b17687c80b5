//! Conversation driver
//!
//! Runs one user turn end to end: classify the text, call the right gateway,
//! feed results through the resolver, write to the ledger when asked, and keep
//! the timeline saved. Every failure ends up as a message in the timeline; the
//! driver itself never returns an error for a turn.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier::{Intent, IntentClassifier};
use crate::config::AppConfig;
use crate::confirmation::{Choice, ConversationState, Effect, Event, Stage};
use crate::error::ChatError;
use crate::gateway::{HttpGateway, QueryGateway, QueryRequest, TransactionParser};
use crate::ledger::{InMemoryLedger, JsonlLedger, Ledger, PgLedger, RECENT_LIMIT};
use crate::memory::{
    FileTimelineStore, InMemoryTimelineStore, Message, PgTimelineStore, TimelineStore,
};
use crate::models::UserContext;

/// The ports a conversation talks to
#[derive(Clone)]
pub struct Services {
    pub parser: Arc<dyn TransactionParser>,
    pub queries: Arc<dyn QueryGateway>,
    pub ledger: Arc<dyn Ledger>,
    pub timelines: Arc<dyn TimelineStore>,
    pub gateway_timeout: Duration,
}

impl Services {
    /// In-memory when asked for, Postgres when a database URL is configured,
    /// files under the data directory otherwise.
    pub fn from_config(config: &AppConfig) -> crate::Result<Self> {
        let gateway = Arc::new(HttpGateway::new(&config.parser_base_url, config.gateway_timeout)?);

        let (ledger, timelines): (Arc<dyn Ledger>, Arc<dyn TimelineStore>) = if config.in_memory {
            info!("Storage backend: memory");
            (
                Arc::new(InMemoryLedger::new()),
                Arc::new(InMemoryTimelineStore::new()),
            )
        } else {
            match build_pool(config) {
                Some(pool) => {
                    info!("Storage backend: postgres");
                    (
                        Arc::new(PgLedger::new(pool.clone())),
                        Arc::new(PgTimelineStore::new(pool)),
                    )
                }
                None => {
                    info!(dir = %config.data_dir.display(), "Storage backend: files");
                    (
                        Arc::new(JsonlLedger::new(config.data_dir.join("expenses.jsonl"))),
                        Arc::new(FileTimelineStore::new(config.data_dir.join("timelines"))),
                    )
                }
            }
        };

        Ok(Self {
            parser: gateway.clone(),
            queries: gateway,
            ledger,
            timelines,
            gateway_timeout: config.gateway_timeout,
        })
    }
}

fn build_pool(config: &AppConfig) -> Option<sqlx::PgPool> {
    let url = config.database_url.as_deref()?;

    match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(url)
    {
        Ok(pool) => Some(pool),
        Err(error) => {
            warn!("Failed to initialize postgres backend, falling back to files: {}", error);
            None
        }
    }
}

/// What one call appended, and where the resolver stands afterwards
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub messages: Vec<Message>,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<Uuid>,
    /// The choice referred to a batch that is no longer pending
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
}

/// One chat session
pub struct Conversation {
    session: String,
    state: ConversationState,
    services: Services,
}

impl Conversation {
    /// Load the session's timeline. A store failure starts an empty one.
    pub async fn open(session: &str, services: Services) -> Self {
        let timeline = match services.timelines.load(session).await {
            Ok(timeline) => timeline,
            Err(error) => {
                warn!(session, "Timeline load failed, starting empty: {}", error);
                Default::default()
            }
        };

        info!(session, messages = timeline.len(), "Conversation opened");

        Self {
            session: session.to_string(),
            state: ConversationState::new(timeline),
            services,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Handle one line of user text.
    pub async fn submit(&mut self, user: &UserContext, text: &str) -> Turn {
        let start = self.state.timeline.len();
        let text = text.trim();
        if text.is_empty() {
            return self.turn(start, None, false);
        }

        self.state.update(Event::UserText(text.to_string()));

        let intent = IntentClassifier::classify(text);
        info!(session = %self.session, ?intent, "User turn");

        match intent {
            Intent::Expense => {
                match self.with_timeout(self.services.parser.parse(text)).await {
                    Ok(result) => {
                        let effect = self.state.update(Event::Parsed(result));
                        self.run_effect(user, effect).await;
                    }
                    Err(e) => {
                        error!(session = %self.session, "Parse failed: {}", e);
                        self.state.update(Event::GatewayFailed);
                    }
                }
            }
            Intent::Query => {
                let rows = match self.services.ledger.recent(user, RECENT_LIMIT).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!("Could not load ledger rows for query, sending none: {}", e);
                        Vec::new()
                    }
                };
                let request = QueryRequest::new(text, user, rows);

                match self.with_timeout(self.services.queries.ask(&request)).await {
                    Ok(reply) => {
                        self.state.update(Event::QueryAnswered(reply));
                    }
                    Err(e) => {
                        error!(session = %self.session, "Query failed: {}", e);
                        self.state.update(Event::GatewayFailed);
                    }
                }
            }
        }

        self.persist_timeline().await;
        self.turn(start, Some(intent), false)
    }

    /// Answer the pending confirmation identified by `pending_id`.
    pub async fn choose(&mut self, user: &UserContext, pending_id: Uuid, choice: Choice) -> Turn {
        let start = self.state.timeline.len();

        let effect = self.state.update(Event::Chose { pending_id, choice });
        let ignored = effect == Effect::Ignored;
        self.run_effect(user, effect).await;

        if !ignored {
            self.persist_timeline().await;
        }
        self.turn(start, None, ignored)
    }

    /// Drop the timeline (and any pending batch) for this session.
    pub async fn clear(&mut self) -> crate::Result<()> {
        self.services.timelines.clear(&self.session).await?;
        self.state = ConversationState::default();
        info!(session = %self.session, "Timeline cleared");
        Ok(())
    }

    async fn run_effect(&mut self, user: &UserContext, effect: Effect) {
        let Effect::Persist(request) = effect else {
            return;
        };

        let event = match self.services.ledger.insert(user, &request.records).await {
            Ok(()) => {
                info!(session = %self.session, records = request.records.len(), "Saved to ledger");
                Event::Saved(request.success_message)
            }
            Err(e) => Event::SaveFailed(e.to_string()),
        };
        self.state.update(event);
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = crate::Result<T>>,
    ) -> crate::Result<T> {
        let limit = self.services.gateway_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ChatError::GatewayTimeout(limit))?
    }

    async fn persist_timeline(&self) {
        if let Err(error) = self
            .services
            .timelines
            .save(&self.session, &self.state.timeline)
            .await
        {
            warn!(session = %self.session, "Timeline save failed, turn still completes: {}", error);
        }
    }

    fn turn(&self, start: usize, intent: Option<Intent>, ignored: bool) -> Turn {
        Turn {
            intent,
            messages: self.state.timeline.since(start).to_vec(),
            stage: self.state.stage(),
            pending_id: self.state.pending.as_ref().map(|p| p.id),
            ignored,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::confirmation::{CategoryChoice, Direction, CANCELLED, GATEWAY_FAILED, SAVE_FAILED};
    use crate::ledger::LedgerEntry;
    use crate::memory::{Author, InMemoryTimelineStore};
    use crate::models::{Candidate, Category, FinalizedTransaction, ParseResult};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Parser and query gateway with canned answers
    pub(crate) struct ScriptedGateway {
        pub result: Option<ParseResult>,
        pub reply: Option<String>,
        pub delay: Duration,
        pub queries: Mutex<Vec<QueryRequest>>,
    }

    impl ScriptedGateway {
        pub(crate) fn parsing(candidates: Vec<Candidate>) -> Self {
            Self {
                result: Some(ParseResult {
                    expenses: candidates,
                    reply: "parsed".to_string(),
                }),
                reply: Some("You spent 250".to_string()),
                delay: Duration::ZERO,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                result: None,
                reply: None,
                ..Self::parsing(vec![])
            }
        }
    }

    #[async_trait]
    impl TransactionParser for ScriptedGateway {
        async fn parse(&self, _text: &str) -> crate::Result<ParseResult> {
            tokio::time::sleep(self.delay).await;
            self.result
                .clone()
                .ok_or_else(|| ChatError::GatewayError("connection refused".to_string()))
        }
    }

    #[async_trait]
    impl QueryGateway for ScriptedGateway {
        async fn ask(&self, request: &QueryRequest) -> crate::Result<String> {
            self.queries.lock().unwrap().push(request.clone());
            self.reply
                .clone()
                .ok_or_else(|| ChatError::GatewayError("connection refused".to_string()))
        }
    }

    /// Ledger that records calls and can be told to fail
    #[derive(Default)]
    pub(crate) struct RecordingLedger {
        pub inserts: Mutex<Vec<Vec<FinalizedTransaction>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Ledger for RecordingLedger {
        async fn insert(&self, _user: &UserContext, records: &[FinalizedTransaction]) -> crate::Result<()> {
            if self.fail {
                return Err(ChatError::LedgerError("disk full".to_string()));
            }
            self.inserts.lock().unwrap().push(records.to_vec());
            Ok(())
        }

        async fn recent(&self, _user: &UserContext, _limit: usize) -> crate::Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        gateway: Arc<ScriptedGateway>,
        ledger: Arc<RecordingLedger>,
        timelines: Arc<InMemoryTimelineStore>,
    }

    impl Harness {
        fn new(gateway: ScriptedGateway, ledger: RecordingLedger) -> Self {
            Self {
                gateway: Arc::new(gateway),
                ledger: Arc::new(ledger),
                timelines: Arc::new(InMemoryTimelineStore::new()),
            }
        }

        fn services(&self) -> Services {
            Services {
                parser: self.gateway.clone(),
                queries: self.gateway.clone(),
                ledger: self.ledger.clone(),
                timelines: self.timelines.clone(),
                gateway_timeout: Duration::from_millis(200),
            }
        }

        fn insert_count(&self) -> usize {
            self.ledger.inserts.lock().unwrap().len()
        }
    }

    fn ambiguous(remarks: &str) -> Candidate {
        Candidate::new(Decimal::from(500), "item", Category::Other, remarks)
    }

    #[tokio::test]
    async fn test_confident_expense_saved() {
        let harness = Harness::new(
            ScriptedGateway::parsing(vec![Candidate::new(Decimal::from(250), "lunch", Category::Food, "Lunch")]),
            RecordingLedger::default(),
        );
        let mut conversation = Conversation::open("s", harness.services()).await;

        let turn = conversation.submit(&UserContext::anonymous(), "lunch 250").await;

        assert_eq!(turn.intent, Some(Intent::Expense));
        let texts: Vec<&str> = turn.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["lunch 250", "parsed", "Saved"]);
        assert_eq!(harness.insert_count(), 1);
        assert_eq!(turn.stage, Stage::Idle);
    }

    #[tokio::test]
    async fn test_full_loan_flow() {
        let harness = Harness::new(
            ScriptedGateway::parsing(vec![ambiguous("paid Raj for lunch")]),
            RecordingLedger::default(),
        );
        let user = UserContext::anonymous();
        let mut conversation = Conversation::open("s", harness.services()).await;

        let turn = conversation.submit(&user, "paid Raj for lunch 500").await;
        assert_eq!(turn.stage, Stage::AwaitingCategory);
        let pending_id = turn.pending_id.unwrap();
        assert_eq!(turn.messages.last().unwrap().author, Author::Confirmation);

        let turn = conversation
            .choose(&user, pending_id, Choice::Category { category: CategoryChoice::Loan })
            .await;
        assert_eq!(turn.stage, Stage::AwaitingDirection);
        assert_eq!(harness.insert_count(), 0);

        let turn = conversation
            .choose(
                &user,
                pending_id,
                Choice::Direction { direction: Direction::LentTo, category: Category::Loan },
            )
            .await;
        assert_eq!(turn.stage, Stage::Idle);
        assert_eq!(turn.messages.last().unwrap().text, "Saved as LENT (Raj)");

        let inserts = harness.ledger.inserts.lock().unwrap();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0][0].remarks, "Lent to Raj");
        assert_eq!(inserts[0][0].amount, Decimal::from(500));
    }

    #[tokio::test]
    async fn test_cancel_never_touches_ledger() {
        let harness = Harness::new(
            ScriptedGateway::parsing(vec![ambiguous("thing")]),
            RecordingLedger::default(),
        );
        let user = UserContext::anonymous();
        let mut conversation = Conversation::open("s", harness.services()).await;

        let pending_id = conversation.submit(&user, "thing 500").await.pending_id.unwrap();
        let turn = conversation.choose(&user, pending_id, Choice::Cancel).await;

        assert_eq!(turn.stage, Stage::Idle);
        assert_eq!(turn.messages.len(), 1);
        assert_eq!(turn.messages[0].text, CANCELLED);
        assert_eq!(harness.insert_count(), 0);

        // The old buttons are dead
        let turn = conversation
            .choose(&user, pending_id, Choice::Category { category: CategoryChoice::Income })
            .await;
        assert!(turn.ignored);
        assert!(turn.messages.is_empty());
        assert_eq!(harness.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_failure_clears_pending() {
        let harness = Harness::new(
            ScriptedGateway::parsing(vec![ambiguous("thing")]),
            RecordingLedger { fail: true, ..Default::default() },
        );
        let user = UserContext::anonymous();
        let mut conversation = Conversation::open("s", harness.services()).await;

        let pending_id = conversation.submit(&user, "thing 500").await.pending_id.unwrap();
        let turn = conversation
            .choose(&user, pending_id, Choice::Category { category: CategoryChoice::Income })
            .await;

        assert_eq!(turn.stage, Stage::Idle);
        assert_eq!(turn.messages.last().unwrap().text, SAVE_FAILED);
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_pending() {
        let harness = Harness::new(
            ScriptedGateway::parsing(vec![ambiguous("thing")]),
            RecordingLedger::default(),
        );
        let user = UserContext::anonymous();
        let mut conversation = Conversation::open("s", harness.services()).await;
        conversation.submit(&user, "thing 500").await;

        let failing = Harness::new(ScriptedGateway::failing(), RecordingLedger::default());
        conversation.services = Services {
            timelines: harness.timelines.clone(),
            ..failing.services()
        };

        let turn = conversation.submit(&user, "tea 40").await;
        assert_eq!(turn.messages.last().unwrap().text, GATEWAY_FAILED);
        assert_eq!(turn.stage, Stage::AwaitingCategory);
    }

    #[tokio::test]
    async fn test_slow_parser_times_out() {
        let gateway = ScriptedGateway {
            delay: Duration::from_secs(5),
            ..ScriptedGateway::parsing(vec![])
        };
        let harness = Harness::new(gateway, RecordingLedger::default());
        let mut conversation = Conversation::open("s", harness.services()).await;

        let turn = conversation.submit(&UserContext::anonymous(), "lunch 250").await;
        assert_eq!(turn.messages.last().unwrap().text, GATEWAY_FAILED);

        let result = conversation
            .with_timeout(harness.gateway.parse("lunch 250"))
            .await;
        let error = assert_err!(result);
        assert!(matches!(error, ChatError::GatewayTimeout(limit) if limit == Duration::from_millis(200)));
        assert_eq!(error.to_string(), "Gateway timed out after 200ms");
    }

    #[tokio::test]
    async fn test_query_goes_to_chat_gateway() {
        let harness = Harness::new(ScriptedGateway::parsing(vec![]), RecordingLedger::default());
        let mut conversation = Conversation::open("s", harness.services()).await;

        let turn = conversation
            .submit(&UserContext::anonymous(), "how much did I spend 500")
            .await;

        assert_eq!(turn.intent, Some(Intent::Query));
        assert_eq!(turn.messages.last().unwrap().text, "You spent 250");
        let queries = harness.gateway.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].expenses_data.is_some());
    }

    #[tokio::test]
    async fn test_timeline_survives_reopen_and_clear() {
        let harness = Harness::new(
            ScriptedGateway::parsing(vec![Candidate::new(Decimal::from(90), "taxi", Category::Transport, "Taxi")]),
            RecordingLedger::default(),
        );
        let mut conversation = Conversation::open("s", harness.services()).await;
        conversation.submit(&UserContext::anonymous(), "taxi 90").await;
        let before: Vec<Message> = conversation.state().timeline.messages().cloned().collect();

        let mut reopened = Conversation::open("s", harness.services()).await;
        let after: Vec<Message> = reopened.state().timeline.messages().cloned().collect();
        assert_eq!(after, before);

        assert_ok!(reopened.clear().await);
        let fresh = Conversation::open("s", harness.services()).await;
        assert!(fresh.state().timeline.is_empty());
    }

    /// Timeline store that loads and saves but refuses to clear
    struct StickyTimelineStore(InMemoryTimelineStore);

    #[async_trait]
    impl TimelineStore for StickyTimelineStore {
        async fn load(&self, session: &str) -> crate::Result<crate::memory::Timeline> {
            self.0.load(session).await
        }

        async fn save(&self, session: &str, timeline: &crate::memory::Timeline) -> crate::Result<()> {
            self.0.save(session, timeline).await
        }

        async fn clear(&self, _session: &str) -> crate::Result<()> {
            Err(ChatError::StorageError("read-only volume".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_timeline() {
        let harness = Harness::new(ScriptedGateway::parsing(vec![]), RecordingLedger::default());
        let services = Services {
            timelines: Arc::new(StickyTimelineStore(InMemoryTimelineStore::new())),
            ..harness.services()
        };
        let mut conversation = Conversation::open("s", services.clone()).await;
        conversation.submit(&UserContext::anonymous(), "how much did I spend").await;

        assert!(matches!(conversation.clear().await, Err(ChatError::StorageError(_))));
        assert_eq!(conversation.state().timeline.len(), 2);

        let reopened = Conversation::open("s", services).await;
        assert_eq!(reopened.state().timeline, conversation.state().timeline);
    }

    #[tokio::test]
    async fn test_memory_storage_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().join("data"),
            in_memory: true,
            ..AppConfig::default()
        };
        let services = assert_ok!(Services::from_config(&config));
        let user = UserContext::anonymous();

        let record = FinalizedTransaction::from(Candidate::new(Decimal::from(60), "tea", Category::Food, "Tea"));
        assert_ok!(services.ledger.insert(&user, &[record]).await);
        assert_eq!(assert_ok!(services.ledger.recent(&user, RECENT_LIMIT).await).len(), 1);

        let mut timeline = crate::memory::Timeline::new();
        timeline.push(Message::user("tea 60"));
        assert_ok!(services.timelines.save("s", &timeline).await);
        assert_eq!(assert_ok!(services.timelines.load("s").await), timeline);

        assert!(!config.data_dir.exists());
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let harness = Harness::new(ScriptedGateway::parsing(vec![]), RecordingLedger::default());
        let mut conversation = Conversation::open("s", harness.services()).await;

        let turn = conversation.submit(&UserContext::anonymous(), "   ").await;
        assert!(turn.messages.is_empty());
        assert!(turn.intent.is_none());
    }
}
