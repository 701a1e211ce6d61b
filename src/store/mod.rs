pub mod reconcile;

use crate::api::{KnowledgeApi, WorkspaceApi};
use crate::errors::{AppError, AppResult};
use crate::live::{InvalidationHandler, InvalidationScope};
use crate::models::{
    AddMemberInput, CreateKnowledgeItemInput, CreateWorkspaceInput, KnowledgeItem, Page,
    PaginationParams, UpdateKnowledgeItemInput, UpdateMemberRoleInput, UpdateWorkspaceInput,
    Workspace, WorkspaceMember, WorkspaceRole,
};
use crate::notify::{Notice, Notifier};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const RECENT_ITEMS_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    Errored,
}

enum LoadOutcome {
    Applied,
    Discarded,
    Failed(String),
}

#[derive(Debug, Clone)]
struct Collection<T> {
    items: Vec<T>,
    /// Workspace the cached entries belong to; unused for the workspace list.
    scope: Option<String>,
    /// Status of the last settled load; pending loads live in [`LoadCounters`].
    settled: LoadStatus,
    last_error: Option<String>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            scope: None,
            settled: LoadStatus::Idle,
            last_error: None,
        }
    }
}

impl<T: Clone> Collection<T> {
    fn finish_load(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Applied => self.last_error = None,
            LoadOutcome::Failed(message) => self.last_error = Some(message),
            LoadOutcome::Discarded => {}
        }
        self.settled = if self.last_error.is_some() {
            LoadStatus::Errored
        } else if self.scope.is_some() || !self.items.is_empty() {
            LoadStatus::Loaded
        } else {
            LoadStatus::Idle
        };
    }

    fn clear(&mut self) {
        self.items.clear();
        self.scope = None;
        self.last_error = None;
        self.settled = LoadStatus::Idle;
    }

    fn in_scope(&self, workspace_id: &str) -> bool {
        self.scope.as_deref() == Some(workspace_id)
    }

    /// An unscoped cache adopts the workspace; a scoped one only accepts its own.
    fn accepts(&mut self, workspace_id: &str) -> bool {
        match self.scope.as_deref() {
            Some(scope) => scope == workspace_id,
            None => {
                self.scope = Some(workspace_id.to_string());
                true
            }
        }
    }

    fn view(&self, in_flight: &AtomicUsize) -> CollectionView<T> {
        CollectionView {
            items: self.items.clone(),
            scope: self.scope.clone(),
            status: if in_flight.load(Ordering::SeqCst) > 0 {
                LoadStatus::Loading
            } else {
                self.settled
            },
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionView<T> {
    pub items: Vec<T>,
    pub scope: Option<String>,
    pub status: LoadStatus,
    pub last_error: Option<String>,
}

impl<T> Default for CollectionView<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            scope: None,
            status: LoadStatus::Idle,
            last_error: None,
        }
    }
}

impl<T> CollectionView<T> {
    pub fn is_loading(&self) -> bool {
        self.status == LoadStatus::Loading
    }
}

/// Read-only copy of the store handed to consumers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub workspaces: CollectionView<Workspace>,
    pub current_workspace: Option<Workspace>,
    pub members: CollectionView<WorkspaceMember>,
    pub recent_items: CollectionView<KnowledgeItem>,
}

impl StoreSnapshot {
    pub fn is_loading(&self) -> bool {
        self.workspaces.is_loading() || self.members.is_loading() || self.recent_items.is_loading()
    }
}

/// Loads awaiting the server, per collection. Kept outside the state lock so
/// a dropped load future still releases its count.
#[derive(Default)]
struct LoadCounters {
    workspaces: AtomicUsize,
    members: AtomicUsize,
    recent_items: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn begin(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct StoreState {
    workspaces: Collection<Workspace>,
    current: Option<Workspace>,
    members: Collection<WorkspaceMember>,
    recent_items: Collection<KnowledgeItem>,
    /// Bumped on reset; results from an older generation are dropped.
    generation: u64,
}

impl StoreState {
    fn selection_differs(&self, workspace_id: &str) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.id != workspace_id)
    }

    /// Mutations for a workspace other than the selected one never seed the
    /// scoped caches.
    fn may_cache(&self, workspace_id: &str) -> bool {
        !self.selection_differs(workspace_id)
    }

    fn forget_workspace(&mut self, workspace_id: &str) {
        reconcile::remove_by_id(&mut self.workspaces.items, workspace_id);
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.id == workspace_id)
        {
            self.current = None;
        }
        if self.members.in_scope(workspace_id) {
            self.members.clear();
        }
        if self.recent_items.in_scope(workspace_id) {
            self.recent_items.clear();
        }
    }

    fn store_workspace(&mut self, workspace: Workspace) {
        let replaced = reconcile::replace_by_id(&mut self.workspaces.items, workspace.clone());
        if replaced
            && self
                .current
                .as_ref()
                .is_some_and(|current| current.id == workspace.id)
        {
            self.current = Some(workspace);
        }
    }

    fn prune_orphaned_scopes(&mut self) {
        let known = |scope: &Option<String>| match scope {
            Some(id) => self.workspaces.items.iter().any(|workspace| &workspace.id == id),
            None => true,
        };
        let members_known = known(&self.members.scope);
        let items_known = known(&self.recent_items.scope);
        if !members_known {
            self.members.clear();
        }
        if !items_known {
            self.recent_items.clear();
        }
    }
}

pub struct WorkspaceStore {
    workspaces_api: Arc<dyn WorkspaceApi>,
    knowledge_api: Arc<dyn KnowledgeApi>,
    notifier: Arc<dyn Notifier>,
    state: RwLock<StoreState>,
    loads: LoadCounters,
}

impl WorkspaceStore {
    pub fn new(
        workspaces_api: Arc<dyn WorkspaceApi>,
        knowledge_api: Arc<dyn KnowledgeApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            workspaces_api,
            knowledge_api,
            notifier,
            state: RwLock::new(StoreState::default()),
            loads: LoadCounters::default(),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            workspaces: state.workspaces.view(&self.loads.workspaces),
            current_workspace: state.current.clone(),
            members: state.members.view(&self.loads.members),
            recent_items: state.recent_items.view(&self.loads.recent_items),
        }
    }

    pub async fn workspaces(&self) -> Vec<Workspace> {
        self.state.read().await.workspaces.items.clone()
    }

    pub async fn current_workspace(&self) -> Option<Workspace> {
        self.state.read().await.current.clone()
    }

    pub async fn members(&self) -> Vec<WorkspaceMember> {
        self.state.read().await.members.items.clone()
    }

    pub async fn recent_items(&self) -> Vec<KnowledgeItem> {
        self.state.read().await.recent_items.items.clone()
    }

    /// Clears every collection and the selection, e.g. when the signed-in
    /// identity changes.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let generation = state.generation.wrapping_add(1);
        *state = StoreState {
            generation,
            ..StoreState::default()
        };
        tracing::debug!(generation, "workspace store reset");
    }

    pub async fn refresh_workspaces(&self) -> AppResult<Vec<Workspace>> {
        self.load_workspaces(true).await
    }

    pub async fn refresh_workspace(&self, workspace_id: &str) -> AppResult<Workspace> {
        let generation = self.generation().await;
        match self.workspaces_api.get_workspace(workspace_id).await {
            Ok(workspace) => {
                self.apply(generation, |state| state.store_workspace(workspace.clone()))
                    .await;
                Ok(workspace)
            }
            Err(error) => Err(self.report("Failed to load workspace", error)),
        }
    }

    pub async fn create_workspace(&self, input: &CreateWorkspaceInput) -> AppResult<Workspace> {
        let input = input.normalized()?;
        let generation = self.generation().await;
        match self.workspaces_api.create_workspace(&input).await {
            Ok(workspace) => {
                self.apply(generation, |state| {
                    reconcile::prepend(&mut state.workspaces.items, workspace.clone())
                })
                .await;
                self.notifier
                    .notify(Notice::success("Workspace created successfully"));
                Ok(workspace)
            }
            Err(error) => Err(self.report("Failed to create workspace", error)),
        }
    }

    pub async fn update_workspace(
        &self,
        workspace_id: &str,
        input: &UpdateWorkspaceInput,
    ) -> AppResult<Workspace> {
        let input = input.normalized()?;
        let generation = self.generation().await;
        match self
            .workspaces_api
            .update_workspace(workspace_id, &input)
            .await
        {
            Ok(workspace) => {
                self.apply(generation, |state| state.store_workspace(workspace.clone()))
                    .await;
                self.notifier
                    .notify(Notice::success("Workspace updated successfully"));
                Ok(workspace)
            }
            Err(error) => Err(self.report("Failed to update workspace", error)),
        }
    }

    pub async fn delete_workspace(&self, workspace_id: &str) -> AppResult<()> {
        let generation = self.generation().await;
        match self.workspaces_api.delete_workspace(workspace_id).await {
            Ok(()) => {
                self.apply(generation, |state| state.forget_workspace(workspace_id))
                    .await;
                self.notifier
                    .notify(Notice::success("Workspace deleted successfully"));
                Ok(())
            }
            Err(error) => Err(self.report("Failed to delete workspace", error)),
        }
    }

    pub async fn leave_workspace(&self, workspace_id: &str) -> AppResult<()> {
        let generation = self.generation().await;
        match self.workspaces_api.leave_workspace(workspace_id).await {
            Ok(()) => {
                self.apply(generation, |state| state.forget_workspace(workspace_id))
                    .await;
                self.notifier.notify(Notice::success("You left the workspace"));
                Ok(())
            }
            Err(error) => Err(self.report("Failed to leave workspace", error)),
        }
    }

    /// Points the selection at a loaded workspace, or clears it. Member and
    /// recent-item caches scoped to another workspace are dropped.
    pub async fn select_workspace(&self, workspace_id: Option<&str>) -> AppResult<Option<Workspace>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let selected = match workspace_id {
            Some(id) => Some(
                state
                    .workspaces
                    .items
                    .iter()
                    .find(|workspace| workspace.id == id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("Workspace {} is not loaded", id)))?,
            ),
            None => None,
        };

        let keep = |scope: &Option<String>| match (scope, workspace_id) {
            (Some(scope), Some(id)) => scope == id,
            (None, _) => true,
            (Some(_), None) => false,
        };
        if !keep(&state.members.scope) {
            state.members.clear();
        }
        if !keep(&state.recent_items.scope) {
            state.recent_items.clear();
        }

        state.current = selected.clone();
        Ok(selected)
    }

    /// Selects a workspace and loads its members and recent items.
    pub async fn switch_workspace(&self, workspace_id: &str) -> AppResult<Workspace> {
        let selected = self
            .select_workspace(Some(workspace_id))
            .await?
            .ok_or_else(|| AppError::Internal("Selection vanished during switch".to_string()))?;
        self.refresh_members(workspace_id).await?;
        self.refresh_recent_items(workspace_id).await;
        Ok(selected)
    }

    pub async fn refresh_members(&self, workspace_id: &str) -> AppResult<Vec<WorkspaceMember>> {
        self.load_members(workspace_id, true).await
    }

    pub async fn add_member(
        &self,
        workspace_id: &str,
        input: &AddMemberInput,
    ) -> AppResult<WorkspaceMember> {
        let input = input.normalized()?;
        let generation = self.generation().await;
        match self.workspaces_api.add_member(workspace_id, &input).await {
            Ok(member) => {
                self.apply(generation, |state| {
                    if state.may_cache(workspace_id) && state.members.accepts(workspace_id) {
                        reconcile::append(&mut state.members.items, member.clone());
                    }
                })
                .await;
                self.notifier.notify(Notice::success("Member added successfully"));
                Ok(member)
            }
            Err(error) => Err(self.report("Failed to add member", error)),
        }
    }

    pub async fn update_member_role(
        &self,
        workspace_id: &str,
        member_id: &str,
        role: WorkspaceRole,
    ) -> AppResult<WorkspaceMember> {
        let generation = self.generation().await;
        let input = UpdateMemberRoleInput { role };
        match self
            .workspaces_api
            .update_member_role(workspace_id, member_id, &input)
            .await
        {
            Ok(member) => {
                self.apply(generation, |state| {
                    if state.members.in_scope(workspace_id) {
                        reconcile::replace_by_id(&mut state.members.items, member.clone());
                    }
                })
                .await;
                self.notifier.notify(Notice::success("Member role updated"));
                Ok(member)
            }
            Err(error) => Err(self.report("Failed to update member role", error)),
        }
    }

    pub async fn remove_member(&self, workspace_id: &str, member_id: &str) -> AppResult<()> {
        let generation = self.generation().await;
        match self
            .workspaces_api
            .remove_member(workspace_id, member_id)
            .await
        {
            Ok(()) => {
                self.apply(generation, |state| {
                    if state.members.in_scope(workspace_id) {
                        reconcile::remove_by_id(&mut state.members.items, member_id);
                    }
                })
                .await;
                self.notifier
                    .notify(Notice::success("Member removed successfully"));
                Ok(())
            }
            Err(error) => Err(self.report("Failed to remove member", error)),
        }
    }

    /// Best-effort: failures are logged and the previous items stay in place.
    pub async fn refresh_recent_items(&self, workspace_id: &str) {
        let _load = InFlight::begin(&self.loads.recent_items);
        let generation = self.generation().await;

        let result = self
            .knowledge_api
            .recent_items(workspace_id, RECENT_ITEMS_LIMIT as u32)
            .await;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.generation != generation {
            return;
        }
        match result {
            Ok(mut items) => {
                if state.selection_differs(workspace_id) {
                    tracing::debug!(workspace_id, "discarding recent items for unselected workspace");
                    state.recent_items.finish_load(LoadOutcome::Discarded);
                    return;
                }
                items.truncate(RECENT_ITEMS_LIMIT);
                state.recent_items.items = items;
                state.recent_items.scope = Some(workspace_id.to_string());
                state.recent_items.finish_load(LoadOutcome::Applied);
            }
            Err(error) => {
                tracing::warn!(workspace_id, error = %error, "failed to refresh recent items");
                state
                    .recent_items
                    .finish_load(LoadOutcome::Failed(error.message().to_string()));
            }
        }
    }

    pub async fn create_knowledge_item(
        &self,
        workspace_id: &str,
        input: &CreateKnowledgeItemInput,
    ) -> AppResult<KnowledgeItem> {
        let input = input.normalized()?;
        let generation = self.generation().await;
        match self.knowledge_api.create_item(workspace_id, &input).await {
            Ok(item) => {
                self.apply(generation, |state| {
                    if state.may_cache(workspace_id)
                        && state.recent_items.accepts(workspace_id)
                    {
                        reconcile::push_bounded(
                            &mut state.recent_items.items,
                            item.clone(),
                            RECENT_ITEMS_LIMIT,
                        );
                    }
                })
                .await;
                self.notifier.notify(Notice::success("Link added successfully"));
                Ok(item)
            }
            Err(error) => Err(self.report("Failed to add link", error)),
        }
    }

    pub async fn update_knowledge_item(
        &self,
        workspace_id: &str,
        item_id: &str,
        input: &UpdateKnowledgeItemInput,
    ) -> AppResult<KnowledgeItem> {
        let input = input.normalized()?;
        let generation = self.generation().await;
        match self
            .knowledge_api
            .update_item(workspace_id, item_id, &input)
            .await
        {
            Ok(item) => {
                self.apply(generation, |state| {
                    if state.recent_items.in_scope(workspace_id) {
                        reconcile::replace_by_id(&mut state.recent_items.items, item.clone());
                    }
                })
                .await;
                self.notifier.notify(Notice::success("Item updated successfully"));
                Ok(item)
            }
            Err(error) => Err(self.report("Failed to update item", error)),
        }
    }

    pub async fn delete_knowledge_item(&self, workspace_id: &str, item_id: &str) -> AppResult<()> {
        let generation = self.generation().await;
        match self.knowledge_api.delete_item(workspace_id, item_id).await {
            Ok(()) => {
                self.apply(generation, |state| {
                    if state.recent_items.in_scope(workspace_id) {
                        reconcile::remove_by_id(&mut state.recent_items.items, item_id);
                    }
                })
                .await;
                self.notifier.notify(Notice::success("Item deleted successfully"));
                Ok(())
            }
            Err(error) => Err(self.report("Failed to delete item", error)),
        }
    }

    /// Paginated listing straight from the server; nothing is cached.
    pub async fn list_knowledge_items(
        &self,
        workspace_id: &str,
        params: PaginationParams,
    ) -> AppResult<Page<KnowledgeItem>> {
        self.knowledge_api.list_items(workspace_id, params).await
    }

    async fn load_workspaces(&self, announce: bool) -> AppResult<Vec<Workspace>> {
        let _load = InFlight::begin(&self.loads.workspaces);
        let generation = self.generation().await;

        let result = self.workspaces_api.list_workspaces().await;

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if state.generation == generation {
                match &result {
                    Ok(workspaces) => {
                        state.workspaces.items = workspaces.clone();
                        state.current =
                            reconcile::reconcile_selection(state.current.as_ref(), workspaces);
                        state.prune_orphaned_scopes();
                        state.workspaces.finish_load(LoadOutcome::Applied);
                    }
                    Err(error) => state
                        .workspaces
                        .finish_load(LoadOutcome::Failed(error.message().to_string())),
                }
            }
        }

        match result {
            Ok(workspaces) => Ok(workspaces),
            Err(error) if announce => Err(self.report("Failed to load workspaces", error)),
            Err(error) => Err(error),
        }
    }

    async fn load_members(
        &self,
        workspace_id: &str,
        announce: bool,
    ) -> AppResult<Vec<WorkspaceMember>> {
        let _load = InFlight::begin(&self.loads.members);
        let generation = self.generation().await;

        let result = self.workspaces_api.list_members(workspace_id).await;

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if state.generation == generation {
                match &result {
                    Ok(_) if state.selection_differs(workspace_id) => {
                        tracing::debug!(workspace_id, "discarding members for unselected workspace");
                        state.members.finish_load(LoadOutcome::Discarded);
                    }
                    Ok(members) => {
                        state.members.items = members.clone();
                        state.members.scope = Some(workspace_id.to_string());
                        state.members.finish_load(LoadOutcome::Applied);
                    }
                    Err(error) => state
                        .members
                        .finish_load(LoadOutcome::Failed(error.message().to_string())),
                }
            }
        }

        match result {
            Ok(members) => Ok(members),
            Err(error) if announce => Err(self.report("Failed to load members", error)),
            Err(error) => Err(error),
        }
    }

    async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Runs a transition unless the store was reset while the request was out.
    async fn apply<F>(&self, generation: u64, transition: F) -> bool
    where
        F: FnOnce(&mut StoreState),
    {
        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::debug!("dropping result from a previous session");
            return false;
        }
        transition(&mut *state);
        true
    }

    fn report(&self, message: &str, error: AppError) -> AppError {
        self.notifier.notify(Notice::failure(message, &error));
        error
    }
}

#[async_trait]
impl InvalidationHandler for WorkspaceStore {
    async fn invalidate(&self, scope: InvalidationScope) {
        if matches!(scope, InvalidationScope::All | InvalidationScope::Workspaces) {
            if let Err(error) = self.load_workspaces(false).await {
                tracing::warn!(error = %error, "workspace refresh after invalidation failed");
            }
        }

        let Some(current) = self.current_workspace().await else {
            return;
        };
        if matches!(scope, InvalidationScope::All | InvalidationScope::Members) {
            if let Err(error) = self.load_members(&current.id, false).await {
                tracing::warn!(workspace_id = %current.id, error = %error, "member refresh after invalidation failed");
            }
        }
        if matches!(scope, InvalidationScope::All | InvalidationScope::Knowledge) {
            self.refresh_recent_items(&current.id).await;
        }
    }
}
