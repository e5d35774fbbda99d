//! TorService: the application service for TOR documents.
//!
//! Takes port traits via `Arc<dyn PortTrait>` so the same logic runs against
//! Postgres or the in-memory store. Every call resolves the session into an
//! [`Actor`] first; every store call goes through the retry policy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::document::{numbering, NewTorDocument, Precondition, TorDocument};
use crate::engine::{self, TransitionCommit, TransitionPlan};
use crate::error::TorError;
use crate::history::{ApprovalHistoryEntry, NewHistoryEntry};
use crate::org::{Actor, UserRecord};
use crate::policy;
use crate::ports::{DirectoryStore, DocumentStore, HistoryStore, Notification, Notifier, WorkflowStore};
use crate::principal::Session;
use crate::proto::*;
use crate::retry::RetryPolicy;
use crate::types::{HistoryAction, PositionId, TorId, UnitId};
use crate::workflow::{WorkflowCatalog, WorkflowDefinition};

pub type Result<T> = std::result::Result<T, TorError>;

// ── TorService trait ──────────────────────────────────────────

/// All methods take `&Session` explicitly. Identity is never implicit.
#[async_trait]
pub trait TorService: Send + Sync {
    /// Load the user and position behind a session. Unknown or inactive
    /// users are unauthenticated.
    async fn resolve_actor(&self, session: &Session) -> Result<Actor>;

    async fn create_tor(&self, session: &Session, req: CreateTorRequest) -> Result<TorDocument>;

    /// Document with its full history and the caller's available actions.
    async fn get_tor(&self, session: &Session, id: TorId) -> Result<TorDetail>;

    async fn list_tors(&self, session: &Session, query: ListTorsQuery) -> Result<Vec<TorDocument>>;

    async fn update_tor(
        &self,
        session: &Session,
        id: TorId,
        req: UpdateTorRequest,
    ) -> Result<TorDocument>;

    async fn submit(&self, session: &Session, id: TorId) -> Result<TransitionResponse>;

    async fn approve(&self, session: &Session, id: TorId) -> Result<TransitionResponse>;

    async fn revise(
        &self,
        session: &Session,
        id: TorId,
        req: NoteRequest,
    ) -> Result<TransitionResponse>;

    async fn reject(
        &self,
        session: &Session,
        id: TorId,
        req: NoteRequest,
    ) -> Result<TransitionResponse>;

    /// Audit an export. Leaves the document state untouched.
    async fn record_export(&self, session: &Session, id: TorId) -> Result<ApprovalHistoryEntry>;

    async fn history(&self, session: &Session, id: TorId) -> Result<Vec<ApprovalHistoryEntry>>;

    async fn workflow_for_unit(&self, session: &Session, unit: UnitId) -> Result<WorkflowView>;
}

// ── TorServiceImpl ────────────────────────────────────────────

pub struct TorServiceImpl {
    pub directory: Arc<dyn DirectoryStore>,
    pub workflows: WorkflowCatalog,
    pub documents: Arc<dyn DocumentStore>,
    pub history: Arc<dyn HistoryStore>,
    pub notifier: Arc<dyn Notifier>,
    pub app_url: String,
    pub retry: RetryPolicy,
}

impl TorServiceImpl {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        workflows: Arc<dyn WorkflowStore>,
        documents: Arc<dyn DocumentStore>,
        history: Arc<dyn HistoryStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            directory,
            workflows: WorkflowCatalog::new(workflows),
            documents,
            history,
            notifier,
            app_url: "http://localhost:3000".into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = app_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn link(&self, id: TorId) -> String {
        format!("{}/tor/{id}", self.app_url)
    }

    async fn load_document(&self, id: TorId) -> Result<TorDocument> {
        self.retry
            .run("load_document", move || self.documents.load_document(id))
            .await?
            .ok_or_else(|| TorError::NotFound(format!("tor {id}")))
    }

    async fn load_workflow(&self, unit: UnitId) -> Result<WorkflowDefinition> {
        self.retry
            .run("load_workflow", move || self.workflows.load_for(unit))
            .await
    }

    async fn find_workflow(&self, unit: UnitId) -> Result<Option<WorkflowDefinition>> {
        self.retry
            .run("find_workflow", move || self.workflows.find_for(unit))
            .await
    }

    async fn holder_of(&self, position: PositionId) -> Result<Option<UserRecord>> {
        self.retry
            .run("first_active_holder", move || {
                self.directory.first_active_holder(position)
            })
            .await
    }

    /// Persist a plan atomically, then notify. Conflicts are not retried:
    /// deciding again on fresh state could apply an action nobody asked for.
    async fn apply(
        &self,
        actor: &Actor,
        doc: &TorDocument,
        plan: &TransitionPlan,
    ) -> Result<TransitionResponse> {
        let commit = plan.commit(actor, doc, Utc::now());
        let (commit, expected) = (&commit, &doc.precondition());
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let outcome = self
            .retry
            .run("commit_transition", move || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.documents.commit_transition(doc.id, expected, commit)
            })
            .await;

        let (updated, entry) = match outcome {
            // An earlier attempt may have committed before its reply was lost.
            Err(TorError::ConcurrentModification) if attempts.load(Ordering::Relaxed) > 1 => {
                match self.committed_earlier(doc.id, expected, commit).await? {
                    Some(found) => {
                        debug!(tor_id = doc.id.0, action = %plan.action, "retried commit had already applied");
                        found
                    }
                    None => {
                        warn!(tor_id = doc.id.0, action = %plan.action, "lost update race");
                        return Err(TorError::ConcurrentModification);
                    }
                }
            }
            other => other.inspect_err(|e| {
                if matches!(e, TorError::ConcurrentModification) {
                    warn!(tor_id = doc.id.0, action = %plan.action, "lost update race");
                }
            })?,
        };

        info!(
            tor_id = updated.id.0,
            action = %entry.action,
            step = entry.step_number,
            from = %entry.from_status_stage,
            to = %entry.to_status_stage,
            is_final = updated.state.is_final_approved,
            user_id = actor.user_id.0,
            "transition committed"
        );

        self.notify(actor, &updated, plan).await;
        Ok(TransitionResponse::from(&updated))
    }

    /// The stored row and ledger tail when they are exactly what `commit`
    /// would have produced from `expected`.
    async fn committed_earlier(
        &self,
        id: TorId,
        expected: &Precondition,
        commit: &TransitionCommit,
    ) -> Result<Option<(TorDocument, ApprovalHistoryEntry)>> {
        let stored = self.load_document(id).await?;
        if stored.state != commit.next || stored.revision != expected.revision + 1 {
            return Ok(None);
        }
        let mut history = self
            .retry
            .run("list_history", move || self.history.list_for(id))
            .await?;
        let wanted = &commit.entry;
        Ok(history
            .pop()
            .filter(|last| {
                last.action == wanted.action
                    && last.step_number == wanted.step_number
                    && last.from_status_stage == wanted.from_status_stage
                    && last.to_status_stage == wanted.to_status_stage
                    && last.acted_by_user_id == wanted.acted_by_user_id
                    && last.note == wanted.note
            })
            .map(|last| (stored, last)))
    }

    /// Never fails: lookup or delivery problems are logged and skipped.
    async fn notify(&self, actor: &Actor, doc: &TorDocument, plan: &TransitionPlan) {
        let link = self.link(doc.id);
        let step_label = plan
            .acted_step
            .as_ref()
            .map(|s| s.label.clone())
            .unwrap_or_default();
        let note = plan.note.clone().unwrap_or_default();

        let mut outbox = Vec::new();

        match plan.action {
            HistoryAction::Submit | HistoryAction::Approve => {
                if plan.action == HistoryAction::Approve {
                    if let Some(to) = self.creator_email(doc).await {
                        outbox.push(Notification::Approved {
                            to,
                            tor_id: doc.id,
                            number: doc.number.clone(),
                            title: doc.content.title.clone(),
                            step_label: step_label.clone(),
                            is_final: plan.is_final(),
                            approved_by: actor.name.clone(),
                            link: link.clone(),
                        });
                    }
                }
                if let Some(next) = &plan.awaiting_step {
                    match self.holder_of(next.position_id).await {
                        Ok(Some(UserRecord {
                            email: Some(to), ..
                        })) => outbox.push(Notification::AwaitingApproval {
                            to,
                            tor_id: doc.id,
                            number: doc.number.clone(),
                            title: doc.content.title.clone(),
                            step_label: next.label.clone(),
                            submitted_by: actor.name.clone(),
                            link: link.clone(),
                        }),
                        Ok(_) => warn!(
                            tor_id = doc.id.0,
                            position_id = next.position_id.0,
                            "no active holder with an email for next step"
                        ),
                        Err(e) => warn!(tor_id = doc.id.0, error = %e, "next holder lookup failed"),
                    }
                }
            }
            HistoryAction::Revise => {
                if let Some(to) = self.creator_email(doc).await {
                    outbox.push(Notification::RevisionRequested {
                        to,
                        tor_id: doc.id,
                        number: doc.number.clone(),
                        title: doc.content.title.clone(),
                        note,
                        requested_by: actor.name.clone(),
                        link,
                    });
                }
            }
            HistoryAction::Reject => {
                if let Some(to) = self.creator_email(doc).await {
                    outbox.push(Notification::Rejected {
                        to,
                        tor_id: doc.id,
                        number: doc.number.clone(),
                        title: doc.content.title.clone(),
                        note,
                        rejected_by: actor.name.clone(),
                        link,
                    });
                }
            }
            HistoryAction::Export => {}
        }

        for n in outbox {
            debug!(tor_id = doc.id.0, kind = n.kind(), "dispatching notification");
            self.notifier.dispatch(n);
        }
    }

    async fn creator_email(&self, doc: &TorDocument) -> Option<String> {
        let creator = doc.creator_user_id;
        match self
            .retry
            .run("load_user", move || self.directory.load_user(creator))
            .await
        {
            Ok(Some(UserRecord {
                email: Some(email), ..
            })) => Some(email),
            Ok(_) => {
                warn!(tor_id = doc.id.0, user_id = creator.0, "creator has no email");
                None
            }
            Err(e) => {
                warn!(tor_id = doc.id.0, error = %e, "creator lookup failed");
                None
            }
        }
    }

    /// Stage and finality first, then the workflow. Keeps the documented
    /// check order for approve, revise and reject.
    async fn in_approval(&self, id: TorId) -> Result<(TorDocument, WorkflowDefinition)> {
        let doc = self.load_document(id).await?;
        engine::precheck_in_approval(&doc)?;
        let workflow = self.load_workflow(doc.unit_id).await?;
        Ok((doc, workflow))
    }
}

#[async_trait]
impl TorService for TorServiceImpl {
    async fn resolve_actor(&self, session: &Session) -> Result<Actor> {
        let user_id = session.user_id;
        let user = self
            .retry
            .run("load_user", move || self.directory.load_user(user_id))
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| TorError::Unauthenticated("unknown or inactive user".into()))?;

        let position = match user.position_id {
            Some(pid) => {
                self.retry
                    .run("load_position", move || self.directory.load_position(pid))
                    .await?
            }
            None => None,
        };
        Ok(Actor::resolve(session, &user, position))
    }

    async fn create_tor(&self, session: &Session, req: CreateTorRequest) -> Result<TorDocument> {
        let actor = self.resolve_actor(session).await?;
        validate_content(&req.content)?;

        let unit_id = req
            .unit_id
            .or_else(|| actor.position.as_ref().and_then(|p| p.unit_id))
            .ok_or_else(|| TorError::invalid_field("unitId", "unit is required"))?;
        let unit = self
            .retry
            .run("load_unit", move || self.directory.load_unit(unit_id))
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| TorError::invalid_field("unitId", "unknown or inactive unit"))?;
        policy::require_create(&actor, unit.id)?;

        let now = Utc::now();
        let new_doc = NewTorDocument {
            number: numbering::generate_tor_number(&req.content.title, now),
            content: req.content,
            unit_id: unit.id,
            creator_user_id: actor.user_id,
            created_at: now,
        };
        let new_doc = &new_doc;
        let doc = self
            .retry
            .run("insert_document", move || {
                self.documents.insert_document(new_doc.clone())
            })
            .await?;
        info!(tor_id = doc.id.0, number = %doc.number, unit = %unit.code, "tor created");
        Ok(doc)
    }

    async fn get_tor(&self, session: &Session, id: TorId) -> Result<TorDetail> {
        let actor = self.resolve_actor(session).await?;
        let doc = self.load_document(id).await?;
        let workflow = self.find_workflow(doc.unit_id).await?;
        policy::require_view(&actor, &doc, workflow.as_ref())?;

        let history = self
            .retry
            .run("list_history", move || self.history.list_for(id))
            .await?;
        let available_actions = engine::available_actions(&actor, &doc, workflow.as_ref());
        Ok(TorDetail {
            document: doc,
            history,
            available_actions,
        })
    }

    async fn list_tors(&self, session: &Session, query: ListTorsQuery) -> Result<Vec<TorDocument>> {
        let actor = self.resolve_actor(session).await?;
        match query.view {
            ListView::Mine => {
                let creator = (!actor.is_override_authority).then_some(actor.user_id);
                self.retry
                    .run("list_by_creator", move || self.documents.list_by_creator(creator))
                    .await
            }
            ListView::Pending => match actor.position_id() {
                Some(pid) => {
                    self.retry
                        .run("list_awaiting", move || {
                            self.documents.list_awaiting_position(pid)
                        })
                        .await
                }
                None => Ok(Vec::new()),
            },
        }
    }

    async fn update_tor(
        &self,
        session: &Session,
        id: TorId,
        req: UpdateTorRequest,
    ) -> Result<TorDocument> {
        let actor = self.resolve_actor(session).await?;
        validate_content(&req.content)?;
        let doc = self.load_document(id).await?;
        engine::precheck_edit(&actor, &doc)?;

        let (expected, content) = (&doc.precondition(), &req.content);
        let updated = self
            .retry
            .run("update_content", move || {
                self.documents.update_content(id, expected, content)
            })
            .await?;
        info!(tor_id = id.0, user_id = actor.user_id.0, "tor content updated");
        Ok(updated)
    }

    async fn submit(&self, session: &Session, id: TorId) -> Result<TransitionResponse> {
        let actor = self.resolve_actor(session).await?;
        let doc = self.load_document(id).await?;
        engine::precheck_submit(&actor, &doc)?;
        let workflow = self.load_workflow(doc.unit_id).await?;
        let plan = engine::plan_submit(&actor, &doc, &workflow)?;
        self.apply(&actor, &doc, &plan).await
    }

    async fn approve(&self, session: &Session, id: TorId) -> Result<TransitionResponse> {
        let actor = self.resolve_actor(session).await?;
        let (doc, workflow) = self.in_approval(id).await?;
        let plan = engine::plan_approve(&actor, &doc, &workflow)?;
        self.apply(&actor, &doc, &plan).await
    }

    async fn revise(
        &self,
        session: &Session,
        id: TorId,
        req: NoteRequest,
    ) -> Result<TransitionResponse> {
        let actor = self.resolve_actor(session).await?;
        validate_note_len(req.note.as_deref())?;
        engine::require_note(req.note.as_deref(), HistoryAction::Revise)?;
        let (doc, workflow) = self.in_approval(id).await?;
        let plan = engine::plan_revise(&actor, &doc, &workflow, req.note.as_deref())?;
        self.apply(&actor, &doc, &plan).await
    }

    async fn reject(
        &self,
        session: &Session,
        id: TorId,
        req: NoteRequest,
    ) -> Result<TransitionResponse> {
        let actor = self.resolve_actor(session).await?;
        validate_note_len(req.note.as_deref())?;
        engine::require_note(req.note.as_deref(), HistoryAction::Reject)?;
        let (doc, workflow) = self.in_approval(id).await?;
        let plan = engine::plan_reject(&actor, &doc, &workflow, req.note.as_deref())?;
        self.apply(&actor, &doc, &plan).await
    }

    async fn record_export(&self, session: &Session, id: TorId) -> Result<ApprovalHistoryEntry> {
        let actor = self.resolve_actor(session).await?;
        let doc = self.load_document(id).await?;
        let workflow = self.find_workflow(doc.unit_id).await?;
        policy::require_view(&actor, &doc, workflow.as_ref())?;
        policy::require_export(&actor)?;

        let stage = doc.state.status_stage;
        let entry = NewHistoryEntry::by(
            &actor,
            doc.id,
            doc.state.current_step_number,
            HistoryAction::Export,
            stage,
            stage,
            None,
            Utc::now(),
        );
        let entry = &entry;
        let stored = self
            .retry
            .run("append_history", move || self.history.append(entry))
            .await?;
        info!(tor_id = id.0, user_id = actor.user_id.0, "tor exported");
        Ok(stored)
    }

    async fn history(&self, session: &Session, id: TorId) -> Result<Vec<ApprovalHistoryEntry>> {
        let actor = self.resolve_actor(session).await?;
        let doc = self.load_document(id).await?;
        let workflow = self.find_workflow(doc.unit_id).await?;
        policy::require_view(&actor, &doc, workflow.as_ref())?;
        self.retry
            .run("list_history", move || self.history.list_for(id))
            .await
    }

    async fn workflow_for_unit(&self, session: &Session, unit_id: UnitId) -> Result<WorkflowView> {
        self.resolve_actor(session).await?;
        let unit = self
            .retry
            .run("load_unit", move || self.directory.load_unit(unit_id))
            .await?
            .ok_or_else(|| TorError::NotFound(format!("unit {unit_id}")))?;
        let workflow = self.load_workflow(unit.id).await?;

        let mut steps = Vec::with_capacity(workflow.len());
        for step in workflow.steps() {
            let pid = step.position_id;
            let position = self
                .retry
                .run("load_position", move || self.directory.load_position(pid))
                .await?;
            let holder = self.holder_of(pid).await?;
            steps.push(WorkflowStepView {
                step_number: step.step_number,
                label: step.label.clone(),
                status_stage: step.status_stage,
                position_id: pid,
                position_name: position.map(|p| p.name),
                holder_user_id: holder.as_ref().map(|h| h.id),
                holder_name: holder.map(|h| h.name),
                can_revise: step.can_revise,
                is_last_step: step.is_last_step,
            });
        }
        Ok(WorkflowView {
            unit_id: unit.id,
            unit_code: unit.code,
            name: workflow.name,
            steps,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::document::{DocumentState, TorContent};
    use crate::engine::AvailableAction;
    use crate::memory::{MemoryNotifier, MemoryStore};
    use crate::seeds::SeedBundle;
    use crate::types::{StatusStage, UserId};

    const ADMIN: i64 = 1;
    const CREATOR: i64 = 2;
    const SUPERVISOR: i64 = 3;
    const MANAGER: i64 = 4;
    const DIRECTOR: i64 = 5;
    const K3_STAFF: i64 = 6;
    const INACTIVE: i64 = 7;

    /// Document store wrapper that injects latency and transient failures.
    #[derive(Default)]
    struct Faulty {
        inner: Arc<MemoryStore>,
        failing_commits: AtomicU32,
        /// Commits that land but still report a transient error.
        lost_replies: AtomicU32,
        /// Content another writer saves just before each commit.
        edit_before_commit: Option<TorContent>,
        yield_on_load: bool,
        load_delay: Option<Duration>,
    }

    #[async_trait]
    impl DocumentStore for Faulty {
        async fn insert_document(&self, doc: NewTorDocument) -> Result<TorDocument> {
            self.inner.insert_document(doc).await
        }

        async fn load_document(&self, id: TorId) -> Result<Option<TorDocument>> {
            if let Some(d) = self.load_delay {
                tokio::time::sleep(d).await;
            }
            let doc = self.inner.load_document(id).await;
            if self.yield_on_load {
                // let a concurrent caller read the same state
                tokio::task::yield_now().await;
            }
            doc
        }

        async fn list_by_creator(&self, creator: Option<UserId>) -> Result<Vec<TorDocument>> {
            self.inner.list_by_creator(creator).await
        }

        async fn list_awaiting_position(&self, position: PositionId) -> Result<Vec<TorDocument>> {
            self.inner.list_awaiting_position(position).await
        }

        async fn update_content(
            &self,
            id: TorId,
            expected: &Precondition,
            content: &TorContent,
        ) -> Result<TorDocument> {
            self.inner.update_content(id, expected, content).await
        }

        async fn commit_transition(
            &self,
            id: TorId,
            expected: &Precondition,
            commit: &TransitionCommit,
        ) -> Result<(TorDocument, ApprovalHistoryEntry)> {
            let left = self.failing_commits.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_commits.store(left - 1, Ordering::SeqCst);
                return Err(TorError::Transient("could not serialize access".into()));
            }
            if let Some(content) = &self.edit_before_commit {
                self.inner.update_content(id, expected, content).await?;
            }
            let committed = self.inner.commit_transition(id, expected, commit).await?;
            let lost = self.lost_replies.load(Ordering::SeqCst);
            if lost > 0 {
                self.lost_replies.store(lost - 1, Ordering::SeqCst);
                return Err(TorError::Transient("connection reset by peer".into()));
            }
            Ok(committed)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<MemoryNotifier>,
        svc: TorServiceImpl,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn harness_with(docs: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn DocumentStore>) -> Harness {
        let store = Arc::new(MemoryStore::from_seed(&SeedBundle::demo().unwrap()).unwrap());
        let notifier = Arc::new(MemoryNotifier::new());
        let svc = TorServiceImpl::new(
            store.clone(),
            store.clone(),
            docs(store.clone()),
            store.clone(),
            notifier.clone(),
        )
        .with_app_url("https://tor.example.com/")
        .with_retry(fast_retry());
        Harness {
            store,
            notifier,
            svc,
        }
    }

    fn harness() -> Harness {
        harness_with(|s| s as Arc<dyn DocumentStore>)
    }

    fn as_user(id: i64) -> Session {
        Session::in_process(UserId(id), None)
    }

    fn complete_request() -> CreateTorRequest {
        CreateTorRequest {
            unit_id: None,
            content: TorContent {
                title: "Overhaul Pompa Sirkulasi".into(),
                background: Some("Pompa sudah berumur 15 tahun".into()),
                objective: Some("Mengganti impeller dan seal".into()),
                ..Default::default()
            },
        }
    }

    async fn draft(h: &Harness) -> TorDocument {
        h.svc
            .create_tor(&as_user(CREATOR), complete_request())
            .await
            .unwrap()
    }

    /// Draft, submitted, and approved up to (but not past) `step`.
    async fn at_step(h: &Harness, step: i32) -> TorId {
        let id = draft(h).await.id;
        h.svc.submit(&as_user(CREATOR), id).await.unwrap();
        let approvers = [SUPERVISOR, MANAGER, DIRECTOR];
        for approver in approvers.iter().take((step - 1) as usize) {
            h.svc.approve(&as_user(*approver), id).await.unwrap();
        }
        id
    }

    async fn state_of(h: &Harness, id: TorId) -> DocumentState {
        h.store.load_document(id).await.unwrap().unwrap().state
    }

    // ── Scenarios ──────────────────────────────────────────────

    #[tokio::test]
    async fn scenario_a_submit_enters_first_step() {
        let h = harness();
        let doc = draft(&h).await;
        assert_eq!(doc.state, DocumentState::draft());

        let r = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap();
        assert_eq!(r.status_stage, StatusStage::Approval1);
        assert_eq!(r.current_step_number, 1);
        assert!(!r.is_final_approved);
        assert!(r.number.starts_with("overhaul-pompa-sirkulasi-"));

        let history = h.store.list_for(doc.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::Submit);
        assert_eq!(history[0].step_number, 0);
        assert_eq!(history[0].from_status_stage, StatusStage::Draft);
        assert_eq!(history[0].to_status_stage, StatusStage::Approval1);
        assert_eq!(history[0].acted_by_name_snapshot, "Rina Pratama");

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), "awaiting_approval");
        assert_eq!(sent[0].recipient(), "budi.santoso@example.com");
    }

    #[tokio::test]
    async fn scenario_b_approve_advances_one_step() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let before = h.store.list_for(id).await.unwrap().len();

        let r = h.svc.approve(&as_user(MANAGER), id).await.unwrap();
        assert_eq!(r.current_step_number, 3);
        assert_eq!(r.status_stage, StatusStage::Approval3);

        let history = h.store.list_for(id).await.unwrap();
        assert_eq!(history.len(), before + 1);
        let last = history.last().unwrap();
        assert_eq!(last.action, HistoryAction::Approve);
        assert_eq!(last.step_number, 2);
        assert_eq!(last.from_status_stage, StatusStage::Approval2);
        assert_eq!(last.acted_by_position_snapshot, "Manajer Pemeliharaan");

        let sent = h.notifier.sent();
        let tail = &sent[sent.len() - 2..];
        assert!(matches!(
            &tail[0],
            Notification::Approved { to, is_final: false, .. } if to == "rina.pratama@example.com"
        ));
        assert_eq!(tail[1].recipient(), "agus.hartono@example.com");
    }

    #[tokio::test]
    async fn scenario_c_final_approval_is_terminal() {
        let h = harness();
        let id = at_step(&h, 3).await;

        let r = h.svc.approve(&as_user(DIRECTOR), id).await.unwrap();
        assert!(r.is_final_approved);
        assert_eq!(r.status_stage, StatusStage::Approval3);
        assert_eq!(r.current_step_number, 3);
        let rows = h.store.list_for(id).await.unwrap().len();

        let err = h.svc.approve(&as_user(DIRECTOR), id).await.unwrap_err();
        assert!(matches!(err, TorError::AlreadyFinalApproved));
        assert_eq!(err.http_status(), 409);
        assert_eq!(h.store.list_for(id).await.unwrap().len(), rows);

        let last = h.notifier.sent().pop().unwrap();
        assert!(matches!(last, Notification::Approved { is_final: true, .. }));
    }

    #[tokio::test]
    async fn scenario_d_revise_resets_and_notifies_creator_once() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let sent_before = h.notifier.sent().len();

        let r = h
            .svc
            .revise(
                &as_user(MANAGER),
                id,
                NoteRequest {
                    note: Some("fix budget".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(r.status_stage, StatusStage::Revise);
        assert_eq!(r.current_step_number, 0);

        let last = h.store.list_for(id).await.unwrap().pop().unwrap();
        assert_eq!(last.action, HistoryAction::Revise);
        assert_eq!(last.note.as_deref(), Some("fix budget"));
        assert_eq!(last.to_status_stage, StatusStage::Revise);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), sent_before + 1);
        match sent.last().unwrap() {
            Notification::RevisionRequested { to, note, link, .. } => {
                assert_eq!(to, "rina.pratama@example.com");
                assert_eq!(note, "fix budget");
                assert_eq!(link, &format!("https://tor.example.com/tor/{id}"));
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_e_wrong_position_changes_nothing() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let state = state_of(&h, id).await;
        let rows = h.store.list_for(id).await.unwrap().len();

        let err = h.svc.approve(&as_user(DIRECTOR), id).await.unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
        assert_eq!(state_of(&h, id).await, state);
        assert_eq!(h.store.list_for(id).await.unwrap().len(), rows);
    }

    // ── Submit ─────────────────────────────────────────────────

    #[tokio::test]
    async fn second_submit_is_conflict_and_does_not_mutate() {
        let h = harness();
        let id = at_step(&h, 1).await;
        let state = state_of(&h, id).await;
        let err = h.svc.submit(&as_user(CREATOR), id).await.unwrap_err();
        assert!(matches!(err, TorError::NotSubmittable(StatusStage::Approval1)));
        assert_eq!(state_of(&h, id).await, state);
        assert_eq!(h.store.history_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_requires_fields() {
        let h = harness();
        let mut req = complete_request();
        req.content.background = None;
        let doc = h.svc.create_tor(&as_user(CREATOR), req).await.unwrap();
        let err = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap_err();
        assert_eq!(err.field(), Some("background"));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn submit_without_workflow_is_configuration_error() {
        let h = harness();
        let doc = h
            .svc
            .create_tor(&as_user(K3_STAFF), complete_request())
            .await
            .unwrap();
        assert_eq!(doc.unit_id, UnitId(2));
        let err = h.svc.submit(&as_user(K3_STAFF), doc.id).await.unwrap_err();
        assert!(matches!(err, TorError::WorkflowNotConfigured(_)));
        assert_eq!(err.http_status(), 500);
        assert_eq!(state_of(&h, doc.id).await, DocumentState::draft());
    }

    #[tokio::test]
    async fn reject_then_resubmit_restarts_chain() {
        let h = harness();
        let id = at_step(&h, 1).await;
        let r = h
            .svc
            .reject(
                &as_user(SUPERVISOR),
                id,
                NoteRequest {
                    note: Some("scope unclear".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(r.status_stage, StatusStage::Revise);
        assert!(matches!(
            h.notifier.sent().last().unwrap(),
            Notification::Rejected { .. }
        ));

        let r = h.svc.submit(&as_user(CREATOR), id).await.unwrap();
        assert_eq!(r.current_step_number, 1);
        let actions: Vec<HistoryAction> = h
            .store
            .list_for(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::Submit,
                HistoryAction::Reject,
                HistoryAction::Submit
            ]
        );
        let last = h.store.list_for(id).await.unwrap().pop().unwrap();
        assert_eq!(last.from_status_stage, StatusStage::Revise);
    }

    // ── Revise / reject guards ─────────────────────────────────

    #[tokio::test]
    async fn note_is_checked_before_anything_else() {
        let h = harness();
        let doc = draft(&h).await;
        let err = h
            .svc
            .revise(&as_user(MANAGER), doc.id, NoteRequest { note: None })
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::MissingNote(_)));
        let err = h
            .svc
            .reject(&as_user(MANAGER), TorId(999), NoteRequest { note: Some(" ".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::MissingNote(_)));
    }

    #[tokio::test]
    async fn revise_blocked_on_step_without_can_revise() {
        let h = harness();
        let id = at_step(&h, 1).await;
        let err = h
            .svc
            .revise(
                &as_user(SUPERVISOR),
                id,
                NoteRequest {
                    note: Some("x".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
        assert_eq!(state_of(&h, id).await.current_step_number, 1);
    }

    #[tokio::test]
    async fn revise_and_reject_require_the_step_position() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let state = state_of(&h, id).await;
        let rows = h.store.list_for(id).await.unwrap().len();
        let sent = h.notifier.sent().len();
        let note = || NoteRequest {
            note: Some("budget too high".into()),
        };

        let err = h.svc.revise(&as_user(DIRECTOR), id, note()).await.unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
        let err = h.svc.reject(&as_user(SUPERVISOR), id, note()).await.unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
        let err = h.svc.reject(&as_user(CREATOR), id, note()).await.unwrap_err();
        assert_eq!(err.http_status(), 403);

        assert_eq!(state_of(&h, id).await, state);
        assert_eq!(h.store.list_for(id).await.unwrap().len(), rows);
        assert_eq!(h.notifier.sent().len(), sent);
    }

    #[tokio::test]
    async fn override_authority_acts_on_any_step() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let r = h.svc.approve(&as_user(ADMIN), id).await.unwrap();
        assert_eq!(r.current_step_number, 3);
        let last = h.store.list_for(id).await.unwrap().pop().unwrap();
        assert_eq!(last.acted_by_position_snapshot, "Administrator");
    }

    // ── Identity ───────────────────────────────────────────────

    #[tokio::test]
    async fn inactive_or_unknown_user_is_unauthenticated() {
        let h = harness();
        let err = h.svc.resolve_actor(&as_user(INACTIVE)).await.unwrap_err();
        assert_eq!(err.http_status(), 401);
        let err = h.svc.resolve_actor(&as_user(404)).await.unwrap_err();
        assert!(matches!(err, TorError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn stale_override_claim_is_ignored() {
        let h = harness();
        let actor = h
            .svc
            .resolve_actor(&as_user(CREATOR).with_override())
            .await
            .unwrap();
        assert!(!actor.is_override_authority);
    }

    // ── Create / edit / list ───────────────────────────────────

    #[tokio::test]
    async fn create_is_scoped_to_unit() {
        let h = harness();
        let mut req = complete_request();
        req.unit_id = Some(UnitId(2));
        let err = h.svc.create_tor(&as_user(CREATOR), req).await.unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));

        let mut req = complete_request();
        req.unit_id = Some(UnitId(42));
        let err = h.svc.create_tor(&as_user(CREATOR), req).await.unwrap_err();
        assert_eq!(err.field(), Some("unitId"));

        let err = h
            .svc
            .create_tor(&as_user(SUPERVISOR), complete_request())
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
    }

    #[tokio::test]
    async fn edit_only_while_draft_or_revise() {
        let h = harness();
        let id = at_step(&h, 1).await;
        let req = UpdateTorRequest {
            content: TorContent {
                title: "Changed".into(),
                ..complete_request().content
            },
        };
        let err = h
            .svc
            .update_tor(&as_user(CREATOR), id, req.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::NotEditable(StatusStage::Approval1)));

        let updated = h.svc.update_tor(&as_user(ADMIN), id, req).await.unwrap();
        assert_eq!(updated.content.title, "Changed");
        assert_eq!(updated.state.status_stage, StatusStage::Approval1);
    }

    #[tokio::test]
    async fn list_views() {
        let h = harness();
        let a = at_step(&h, 1).await;
        let b = draft(&h).await.id;

        let mine = h
            .svc
            .list_tors(&as_user(CREATOR), ListTorsQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, b);

        let pending = h
            .svc
            .list_tors(
                &as_user(SUPERVISOR),
                ListTorsQuery {
                    view: ListView::Pending,
                },
            )
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|d| d.id).collect::<Vec<_>>(), vec![a]);

        let supervisor_mine = h
            .svc
            .list_tors(&as_user(SUPERVISOR), ListTorsQuery::default())
            .await
            .unwrap();
        assert!(supervisor_mine.is_empty());

        let admin_mine = h
            .svc
            .list_tors(&as_user(ADMIN), ListTorsQuery::default())
            .await
            .unwrap();
        assert_eq!(admin_mine.len(), 2);
    }

    // ── Detail / history / export ──────────────────────────────

    #[tokio::test]
    async fn detail_carries_history_and_actions() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let detail = h.svc.get_tor(&as_user(MANAGER), id).await.unwrap();
        assert_eq!(detail.history.len(), 2);
        assert_eq!(
            detail.available_actions,
            vec![
                AvailableAction::Approve,
                AvailableAction::Revise,
                AvailableAction::Reject,
                AvailableAction::Export
            ]
        );

        let err = h.svc.get_tor(&as_user(K3_STAFF), id).await.unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
        let err = h.svc.history(&as_user(K3_STAFF), id).await.unwrap_err();
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn export_is_audited_without_state_change() {
        let h = harness();
        let id = at_step(&h, 2).await;
        let state = state_of(&h, id).await;

        let entry = h.svc.record_export(&as_user(MANAGER), id).await.unwrap();
        assert_eq!(entry.action, HistoryAction::Export);
        assert_eq!(entry.from_status_stage, entry.to_status_stage);
        assert_eq!(state_of(&h, id).await, state);

        let err = h.svc.record_export(&as_user(CREATOR), id).await.unwrap_err();
        assert!(matches!(err, TorError::Forbidden(_)));
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let h = harness();
        let err = h.svc.approve(&as_user(MANAGER), TorId(31337)).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    // ── Workflow view ──────────────────────────────────────────

    #[tokio::test]
    async fn workflow_view_lists_steps_with_holders() {
        let h = harness();
        let view = h
            .svc
            .workflow_for_unit(&as_user(CREATOR), UnitId(1))
            .await
            .unwrap();
        assert_eq!(view.unit_code, "HAR_MEC");
        assert_eq!(view.steps.len(), 3);
        assert_eq!(view.steps[0].holder_name.as_deref(), Some("Budi Santoso"));
        assert_eq!(
            view.steps[2].position_name.as_deref(),
            Some("Direktur Operasi")
        );
        assert!(view.steps[2].is_last_step);

        let err = h
            .svc
            .workflow_for_unit(&as_user(CREATOR), UnitId(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::WorkflowNotConfigured(_)));
        let err = h
            .svc
            .workflow_for_unit(&as_user(CREATOR), UnitId(9))
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_stored_workflow_blocks_submit() {
        let h = harness();
        let mut wf = h
            .store
            .load_workflow_for_unit(UnitId(1))
            .await
            .unwrap()
            .unwrap();
        wf.steps[1].is_last_step = true;
        h.store.put_workflow(wf).unwrap();

        let doc = draft(&h).await;
        let err = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap_err();
        assert!(matches!(err, TorError::InvalidWorkflow(_)));
    }

    // ── Concurrency and retry ──────────────────────────────────

    #[tokio::test]
    async fn racing_approvals_commit_exactly_once() {
        let h = harness_with(|inner| {
            Arc::new(Faulty {
                inner,
                yield_on_load: true,
                ..Default::default()
            })
        });
        let id = at_step(&h, 2).await;
        let rows = h.store.history_len().unwrap();

        let s1 = as_user(MANAGER);
        let s2 = as_user(MANAGER);
        let (a, b) = tokio::join!(h.svc.approve(&s1, id), h.svc.approve(&s2, id));

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(TorError::ConcurrentModification))));
        assert_eq!(h.store.history_len().unwrap(), rows + 1);
        assert_eq!(state_of(&h, id).await.current_step_number, 3);
    }

    #[tokio::test]
    async fn transient_commit_failures_are_retried() {
        let h = harness_with(|inner| {
            Arc::new(Faulty {
                inner,
                failing_commits: AtomicU32::new(2),
                ..Default::default()
            })
        });
        let doc = draft(&h).await;
        let r = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap();
        assert_eq!(r.current_step_number, 1);
        assert_eq!(h.store.history_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_unavailable() {
        let h = harness_with(|inner| {
            Arc::new(Faulty {
                inner,
                failing_commits: AtomicU32::new(10),
                ..Default::default()
            })
        });
        let doc = draft(&h).await;
        let err = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(state_of(&h, doc.id).await, DocumentState::draft());
        assert_eq!(h.store.history_len().unwrap(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let h = harness_with(|inner| {
            Arc::new(Faulty {
                inner,
                load_delay: Some(Duration::from_secs(30)),
                ..Default::default()
            })
        });
        let doc = draft(&h).await;
        let err = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap_err();
        assert!(matches!(err, TorError::Transient(_)));
    }

    #[tokio::test]
    async fn content_edit_during_submit_is_not_committed_over() {
        let h = harness_with(|inner| {
            Arc::new(Faulty {
                inner,
                edit_before_commit: Some(TorContent {
                    title: "Overhaul Pompa Sirkulasi".into(),
                    ..Default::default()
                }),
                ..Default::default()
            })
        });
        let doc = draft(&h).await;
        let err = h.svc.submit(&as_user(CREATOR), doc.id).await.unwrap_err();
        assert!(matches!(err, TorError::ConcurrentModification));
        assert_eq!(err.http_status(), 409);

        let stored = h.store.load_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.state, DocumentState::draft());
        assert_eq!(stored.number, doc.number);
        assert_eq!(
            stored.content.missing_required_fields(),
            vec!["background", "objective"]
        );
        assert_eq!(h.store.history_len().unwrap(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn commit_applied_before_lost_reply_counts_once() {
        let h = harness_with(|inner| {
            Arc::new(Faulty {
                inner,
                lost_replies: AtomicU32::new(1),
                ..Default::default()
            })
        });
        let id = at_step(&h, 2).await;
        let rows = h.store.list_for(id).await.unwrap().len();
        let sent = h.notifier.sent().len();

        let r = h
            .svc
            .revise(
                &as_user(MANAGER),
                id,
                NoteRequest {
                    note: Some("fix budget".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(r.status_stage, StatusStage::Revise);
        assert_eq!(r.current_step_number, 0);

        let history = h.store.list_for(id).await.unwrap();
        assert_eq!(history.len(), rows + 1);
        assert_eq!(history.last().unwrap().action, HistoryAction::Revise);
        let new: Vec<_> = h.notifier.sent().into_iter().skip(sent).collect();
        assert_eq!(new.len(), 1);
        assert!(matches!(new[0], Notification::RevisionRequested { .. }));
    }
}
