//! In-memory implementation of every port. Backs demo mode and tests.
//!
//! A single mutex guards all state, so `commit_transition` is atomic: the
//! precondition check, the document update and the history append happen
//! under one lock and never partially apply.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use crate::document::{DocumentState, NewTorDocument, Precondition, TorContent, TorDocument};
use crate::engine::TransitionCommit;
use crate::error::TorError;
use crate::history::{ApprovalHistoryEntry, NewHistoryEntry};
use crate::org::{OrganizationalUnit, Position, UserRecord};
use crate::ports::{DirectoryStore, DocumentStore, HistoryStore, Notification, Notifier, WorkflowStore};
use crate::seeds::SeedBundle;
use crate::types::{HistoryEntryId, PositionId, TorId, UnitId, UserId};
use crate::workflow::WorkflowRecord;

#[derive(Default)]
struct State {
    units: BTreeMap<UnitId, OrganizationalUnit>,
    positions: BTreeMap<PositionId, Position>,
    users: BTreeMap<UserId, UserRecord>,
    workflows: BTreeMap<UnitId, WorkflowRecord>,
    documents: BTreeMap<TorId, TorDocument>,
    history: Vec<ApprovalHistoryEntry>,
    next_tor_id: i64,
    next_history_id: i64,
}

impl State {
    fn push_history(&mut self, entry: &NewHistoryEntry) -> ApprovalHistoryEntry {
        self.next_history_id += 1;
        let stored = entry.clone().into_entry(HistoryEntryId(self.next_history_id));
        self.history.push(stored.clone());
        stored
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(bundle: &SeedBundle) -> Result<Self, TorError> {
        bundle.validate()?;
        let store = Self::new();
        store.apply_seed(bundle)?;
        Ok(store)
    }

    /// Upsert every record in the bundle.
    pub fn apply_seed(&self, bundle: &SeedBundle) -> Result<(), TorError> {
        let mut s = self.lock()?;
        for u in &bundle.units {
            s.units.insert(u.id, u.clone());
        }
        for p in &bundle.positions {
            s.positions.insert(p.id, p.clone());
        }
        for u in &bundle.users {
            s.users.insert(u.id, u.clone());
        }
        for w in &bundle.workflows {
            s.workflows.insert(w.unit_id, w.clone());
        }
        Ok(())
    }

    pub fn put_user(&self, user: UserRecord) -> Result<(), TorError> {
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    pub fn put_workflow(&self, workflow: WorkflowRecord) -> Result<(), TorError> {
        self.lock()?.workflows.insert(workflow.unit_id, workflow);
        Ok(())
    }

    /// Overwrite a document's state directly. Test setup only; bypasses history.
    pub fn force_state(&self, id: TorId, state: DocumentState) -> Result<(), TorError> {
        let mut s = self.lock()?;
        let doc = s
            .documents
            .get_mut(&id)
            .ok_or_else(|| TorError::NotFound(format!("tor {id}")))?;
        doc.state = state;
        doc.revision += 1;
        Ok(())
    }

    pub fn history_len(&self) -> Result<usize, TorError> {
        Ok(self.lock()?.history.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, TorError> {
        self.state
            .lock()
            .map_err(|_| TorError::Internal(anyhow!("memory store lock poisoned")))
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn load_user(&self, id: UserId) -> Result<Option<UserRecord>, TorError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn load_position(&self, id: PositionId) -> Result<Option<Position>, TorError> {
        Ok(self.lock()?.positions.get(&id).cloned())
    }

    async fn load_unit(&self, id: UnitId) -> Result<Option<OrganizationalUnit>, TorError> {
        Ok(self.lock()?.units.get(&id).cloned())
    }

    async fn first_active_holder(
        &self,
        position: PositionId,
    ) -> Result<Option<UserRecord>, TorError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.is_active && u.position_id == Some(position))
            .cloned())
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_workflow_for_unit(
        &self,
        unit: UnitId,
    ) -> Result<Option<WorkflowRecord>, TorError> {
        Ok(self.lock()?.workflows.get(&unit).cloned())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, doc: NewTorDocument) -> Result<TorDocument, TorError> {
        let mut s = self.lock()?;
        if !s.units.contains_key(&doc.unit_id) {
            return Err(TorError::Conflict(format!("unit {} does not exist", doc.unit_id)));
        }
        s.next_tor_id += 1;
        let stored = TorDocument {
            id: TorId(s.next_tor_id),
            number: doc.number,
            content: doc.content,
            unit_id: doc.unit_id,
            creator_user_id: doc.creator_user_id,
            state: DocumentState::draft(),
            revision: 0,
            created_at: doc.created_at,
            updated_at: doc.created_at,
        };
        s.documents.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn load_document(&self, id: TorId) -> Result<Option<TorDocument>, TorError> {
        Ok(self.lock()?.documents.get(&id).cloned())
    }

    async fn list_by_creator(&self, creator: Option<UserId>) -> Result<Vec<TorDocument>, TorError> {
        let s = self.lock()?;
        let mut docs: Vec<TorDocument> = s
            .documents
            .values()
            .filter(|d| creator.map_or(true, |c| d.creator_user_id == c))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(docs)
    }

    async fn list_awaiting_position(
        &self,
        position: PositionId,
    ) -> Result<Vec<TorDocument>, TorError> {
        let s = self.lock()?;
        let mut docs: Vec<TorDocument> = s
            .documents
            .values()
            .filter(|d| d.state.status_stage.is_approval() && !d.state.is_final_approved)
            .filter(|d| {
                s.workflows.get(&d.unit_id).is_some_and(|wf| {
                    wf.is_active
                        && wf.steps.iter().any(|st| {
                            st.step_number == d.state.current_step_number
                                && st.position_id == position
                        })
                })
            })
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(docs)
    }

    async fn update_content(
        &self,
        id: TorId,
        expected: &Precondition,
        content: &TorContent,
    ) -> Result<TorDocument, TorError> {
        let mut s = self.lock()?;
        let doc = s
            .documents
            .get_mut(&id)
            .ok_or_else(|| TorError::NotFound(format!("tor {id}")))?;
        if !doc.satisfies(expected) {
            return Err(TorError::ConcurrentModification);
        }
        doc.content = content.clone();
        doc.revision += 1;
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn commit_transition(
        &self,
        id: TorId,
        expected: &Precondition,
        commit: &TransitionCommit,
    ) -> Result<(TorDocument, ApprovalHistoryEntry), TorError> {
        let mut s = self.lock()?;
        let doc = s
            .documents
            .get_mut(&id)
            .ok_or_else(|| TorError::NotFound(format!("tor {id}")))?;
        if !doc.satisfies(expected) {
            return Err(TorError::ConcurrentModification);
        }
        doc.state = commit.next;
        doc.revision += 1;
        if let Some(number) = &commit.number {
            doc.number = number.clone();
        }
        doc.updated_at = commit.entry.acted_at;
        let updated = doc.clone();
        let entry = s.push_history(&commit.entry);
        Ok((updated, entry))
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, entry: &NewHistoryEntry) -> Result<ApprovalHistoryEntry, TorError> {
        let mut s = self.lock()?;
        if !s.documents.contains_key(&entry.tor_id) {
            return Err(TorError::NotFound(format!("tor {}", entry.tor_id)));
        }
        Ok(s.push_history(entry))
    }

    async fn list_for(&self, tor: TorId) -> Result<Vec<ApprovalHistoryEntry>, TorError> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|h| h.tor_id == tor)
            .cloned()
            .collect())
    }
}

// ── Recording notifier ─────────────────────────────────────────

/// Keeps every dispatched notification for inspection.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn dispatch(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistoryAction, StatusStage};

    fn store() -> MemoryStore {
        MemoryStore::from_seed(&SeedBundle::demo().unwrap()).unwrap()
    }

    async fn insert(store: &MemoryStore) -> TorDocument {
        store
            .insert_document(NewTorDocument {
                number: "n-01012024-000001".into(),
                content: TorContent {
                    title: "Pompa".into(),
                    ..Default::default()
                },
                unit_id: UnitId(1),
                creator_user_id: UserId(2),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn submit_commit(tor: TorId) -> TransitionCommit {
        TransitionCommit {
            next: DocumentState {
                status_stage: StatusStage::Approval1,
                current_step_number: 1,
                is_final_approved: false,
            },
            number: Some("pompa-01012024-000002".into()),
            entry: NewHistoryEntry {
                tor_id: tor,
                step_number: 0,
                action: HistoryAction::Submit,
                from_status_stage: StatusStage::Draft,
                to_status_stage: StatusStage::Approval1,
                acted_by_user_id: UserId(2),
                acted_by_name_snapshot: "Rina Pratama".into(),
                acted_by_position_snapshot: "Staf Pemeliharaan Mesin".into(),
                note: None,
                acted_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn commit_applies_state_number_and_history_together() {
        let s = store();
        let doc = insert(&s).await;
        let (updated, entry) = s
            .commit_transition(doc.id, &doc.precondition(), &submit_commit(doc.id))
            .await
            .unwrap();
        assert_eq!(updated.state.current_step_number, 1);
        assert_eq!(updated.number, "pompa-01012024-000002");
        assert_eq!(entry.action, HistoryAction::Submit);
        assert_eq!(s.list_for(doc.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_precondition_changes_nothing() {
        let s = store();
        let doc = insert(&s).await;
        s.commit_transition(doc.id, &doc.precondition(), &submit_commit(doc.id))
            .await
            .unwrap();
        let err = s
            .commit_transition(doc.id, &doc.precondition(), &submit_commit(doc.id))
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::ConcurrentModification));
        assert_eq!(s.history_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn content_edit_invalidates_pending_transition() {
        let s = store();
        let doc = insert(&s).await;
        let seen = doc.precondition();
        let edited = s
            .update_content(doc.id, &seen, &TorContent::default())
            .await
            .unwrap();
        assert_eq!(edited.state, doc.state);
        assert_eq!(edited.revision, doc.revision + 1);

        let err = s
            .commit_transition(doc.id, &seen, &submit_commit(doc.id))
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::ConcurrentModification));
        assert_eq!(s.history_len().unwrap(), 0);
        let stored = s.load_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.state, DocumentState::draft());
    }

    #[tokio::test]
    async fn commit_on_missing_document_is_not_found() {
        let s = store();
        let err = s
            .commit_transition(
                TorId(77),
                &Precondition {
                    state: DocumentState::draft(),
                    revision: 0,
                },
                &submit_commit(TorId(77)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::NotFound(_)));
    }

    #[tokio::test]
    async fn first_active_holder_skips_inactive_users() {
        let s = store();
        let holder = s.first_active_holder(PositionId(11)).await.unwrap().unwrap();
        assert_eq!(holder.id, UserId(3));
        s.put_user(UserRecord {
            is_active: false,
            ..holder
        })
        .unwrap();
        assert!(s.first_active_holder(PositionId(11)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn awaiting_list_follows_current_step() {
        let s = store();
        let doc = insert(&s).await;
        assert!(s.list_awaiting_position(PositionId(11)).await.unwrap().is_empty());
        s.commit_transition(doc.id, &doc.precondition(), &submit_commit(doc.id))
            .await
            .unwrap();
        assert_eq!(s.list_awaiting_position(PositionId(11)).await.unwrap().len(), 1);
        assert!(s.list_awaiting_position(PositionId(12)).await.unwrap().is_empty());
    }

    #[test]
    fn notifier_records_dispatches() {
        let n = MemoryNotifier::new();
        n.dispatch(Notification::Rejected {
            to: "rina.pratama@example.com".into(),
            tor_id: TorId(1),
            number: "n".into(),
            title: "t".into(),
            note: "no budget".into(),
            rejected_by: "Budi".into(),
            link: "http://localhost:3000/tor/1".into(),
        });
        assert_eq!(n.sent().len(), 1);
        assert_eq!(n.sent()[0].recipient(), "rina.pratama@example.com");
    }
}
