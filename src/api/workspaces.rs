use super::segment;
use crate::errors::AppResult;
use crate::gateway::ApiGateway;
use crate::models::{
    AckEnvelope, AddMemberInput, ApiEnvelope, CreateWorkspaceInput, UpdateMemberRoleInput,
    UpdateWorkspaceInput, Workspace, WorkspaceMember,
};
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    async fn list_workspaces(&self) -> AppResult<Vec<Workspace>>;

    async fn get_workspace(&self, workspace_id: &str) -> AppResult<Workspace>;

    async fn create_workspace(&self, input: &CreateWorkspaceInput) -> AppResult<Workspace>;

    async fn update_workspace(
        &self,
        workspace_id: &str,
        input: &UpdateWorkspaceInput,
    ) -> AppResult<Workspace>;

    async fn delete_workspace(&self, workspace_id: &str) -> AppResult<()>;

    async fn list_members(&self, workspace_id: &str) -> AppResult<Vec<WorkspaceMember>>;

    async fn add_member(
        &self,
        workspace_id: &str,
        input: &AddMemberInput,
    ) -> AppResult<WorkspaceMember>;

    async fn update_member_role(
        &self,
        workspace_id: &str,
        member_id: &str,
        input: &UpdateMemberRoleInput,
    ) -> AppResult<WorkspaceMember>;

    async fn remove_member(&self, workspace_id: &str, member_id: &str) -> AppResult<()>;

    async fn leave_workspace(&self, workspace_id: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct HttpWorkspaceApi {
    gateway: ApiGateway,
}

impl HttpWorkspaceApi {
    pub fn new(gateway: ApiGateway) -> Self {
        Self { gateway }
    }
}

fn workspace_path(workspace_id: &str) -> String {
    format!("/api/v1/workspaces/{}", segment(workspace_id))
}

fn member_path(workspace_id: &str, member_id: &str) -> String {
    format!(
        "/api/v1/workspaces/{}/members/{}",
        segment(workspace_id),
        segment(member_id)
    )
}

#[async_trait]
impl WorkspaceApi for HttpWorkspaceApi {
    async fn list_workspaces(&self) -> AppResult<Vec<Workspace>> {
        self.gateway
            .get::<ApiEnvelope<Vec<Workspace>>>("/api/v1/users/me/workspaces")
            .await?
            .into_data()
    }

    async fn get_workspace(&self, workspace_id: &str) -> AppResult<Workspace> {
        self.gateway
            .get::<ApiEnvelope<Workspace>>(&workspace_path(workspace_id))
            .await?
            .into_data()
    }

    async fn create_workspace(&self, input: &CreateWorkspaceInput) -> AppResult<Workspace> {
        self.gateway
            .post::<ApiEnvelope<Workspace>>("/api/v1/workspaces", Some(serde_json::to_value(input)?))
            .await?
            .into_data()
    }

    async fn update_workspace(
        &self,
        workspace_id: &str,
        input: &UpdateWorkspaceInput,
    ) -> AppResult<Workspace> {
        self.gateway
            .patch::<ApiEnvelope<Workspace>>(
                &workspace_path(workspace_id),
                Some(serde_json::to_value(input)?),
            )
            .await?
            .into_data()
    }

    async fn delete_workspace(&self, workspace_id: &str) -> AppResult<()> {
        self.gateway
            .delete::<Option<AckEnvelope>>(&workspace_path(workspace_id))
            .await?
            .map_or(Ok(()), AckEnvelope::into_result)
    }

    async fn list_members(&self, workspace_id: &str) -> AppResult<Vec<WorkspaceMember>> {
        self.gateway
            .get::<ApiEnvelope<Vec<WorkspaceMember>>>(&format!(
                "{}/members",
                workspace_path(workspace_id)
            ))
            .await?
            .into_data()
    }

    async fn add_member(
        &self,
        workspace_id: &str,
        input: &AddMemberInput,
    ) -> AppResult<WorkspaceMember> {
        self.gateway
            .post::<ApiEnvelope<WorkspaceMember>>(
                &format!("{}/members", workspace_path(workspace_id)),
                Some(serde_json::to_value(input)?),
            )
            .await?
            .into_data()
    }

    async fn update_member_role(
        &self,
        workspace_id: &str,
        member_id: &str,
        input: &UpdateMemberRoleInput,
    ) -> AppResult<WorkspaceMember> {
        self.gateway
            .patch::<ApiEnvelope<WorkspaceMember>>(
                &member_path(workspace_id, member_id),
                Some(serde_json::to_value(input)?),
            )
            .await?
            .into_data()
    }

    async fn remove_member(&self, workspace_id: &str, member_id: &str) -> AppResult<()> {
        self.gateway
            .delete::<Option<AckEnvelope>>(&member_path(workspace_id, member_id))
            .await?
            .map_or(Ok(()), AckEnvelope::into_result)
    }

    async fn leave_workspace(&self, workspace_id: &str) -> AppResult<()> {
        self.gateway
            .post::<Option<AckEnvelope>>(&format!("{}/leave", workspace_path(workspace_id)), None)
            .await?
            .map_or(Ok(()), AckEnvelope::into_result)
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpWorkspaceApi, WorkspaceApi};
    use crate::errors::AppError;
    use crate::gateway::tests::serve_once;
    use crate::gateway::ApiGateway;
    use crate::models::{UpdateMemberRoleInput, WorkspaceRole};
    use crate::session::SessionManager;

    #[tokio::test]
    async fn list_workspaces_unwraps_envelope() {
        let (url, request) = serve_once(
            "200 OK",
            r#"{"success":true,"data":[{"id":"w1","name":"Research","role":"OWNER"}]}"#,
        )
        .await;
        let api = HttpWorkspaceApi::new(ApiGateway::new(url, SessionManager::new()));

        let workspaces = api.list_workspaces().await.expect("list");
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].name, "Research");

        let raw = request.await.expect("request");
        assert!(raw.starts_with("GET /api/v1/users/me/workspaces HTTP/1.1"));
    }

    #[tokio::test]
    async fn update_member_role_patches_member_path() {
        let (url, request) = serve_once(
            "200 OK",
            r#"{"success":true,"data":{"id":"m1","workspaceId":"w1","userId":"u2","role":"EDITOR"}}"#,
        )
        .await;
        let api = HttpWorkspaceApi::new(ApiGateway::new(url, SessionManager::new()));

        let member = api
            .update_member_role(
                "w1",
                "m1",
                &UpdateMemberRoleInput {
                    role: WorkspaceRole::Editor,
                },
            )
            .await
            .expect("update");
        assert_eq!(member.role, WorkspaceRole::Editor);

        let raw = request.await.expect("request");
        assert!(raw.starts_with("PATCH /api/v1/workspaces/w1/members/m1 HTTP/1.1"));
        assert!(raw.ends_with(r#"{"role":"EDITOR"}"#));
    }

    #[tokio::test]
    async fn delete_accepts_null_data_envelope() {
        let (url, request) = serve_once("200 OK", r#"{"success":true,"data":null}"#).await;
        let api = HttpWorkspaceApi::new(ApiGateway::new(url, SessionManager::new()));

        api.delete_workspace("w1").await.expect("delete");
        let raw = request.await.expect("request");
        assert!(raw.starts_with("DELETE /api/v1/workspaces/w1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn leave_reports_unsuccessful_envelope() {
        let (url, _request) = serve_once(
            "200 OK",
            r#"{"success":false,"message":"Owners cannot leave their own workspace"}"#,
        )
        .await;
        let api = HttpWorkspaceApi::new(ApiGateway::new(url, SessionManager::new()));

        match api.leave_workspace("w1").await {
            Err(AppError::Api(message)) => {
                assert_eq!(message, "Owners cannot leave their own workspace")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
