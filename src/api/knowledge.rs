use super::segment;
use crate::errors::AppResult;
use crate::gateway::ApiGateway;
use crate::models::{
    AckEnvelope, ApiEnvelope, CreateKnowledgeItemInput, KnowledgeItem, Page, PaginatedEnvelope,
    PaginationParams, UpdateKnowledgeItemInput,
};
use async_trait::async_trait;
use url::form_urlencoded;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KnowledgeApi: Send + Sync {
    async fn create_item(
        &self,
        workspace_id: &str,
        input: &CreateKnowledgeItemInput,
    ) -> AppResult<KnowledgeItem>;

    async fn list_items(
        &self,
        workspace_id: &str,
        params: PaginationParams,
    ) -> AppResult<Page<KnowledgeItem>>;

    async fn get_item(&self, workspace_id: &str, item_id: &str) -> AppResult<KnowledgeItem>;

    async fn update_item(
        &self,
        workspace_id: &str,
        item_id: &str,
        input: &UpdateKnowledgeItemInput,
    ) -> AppResult<KnowledgeItem>;

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> AppResult<()>;

    /// First page of the workspace's items, newest first.
    async fn recent_items(&self, workspace_id: &str, limit: u32) -> AppResult<Vec<KnowledgeItem>> {
        let page = self
            .list_items(
                workspace_id,
                PaginationParams {
                    page: Some(1),
                    limit: Some(limit),
                    ..PaginationParams::default()
                },
            )
            .await?;
        Ok(page.items)
    }
}

/// Serializes only the parameters that are present. Pages are 1-based, so
/// `page = 0` means unset; an explicit `limit = 0` is still sent.
pub fn query_string(params: &PaginationParams) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(page) = params.page.filter(|page| *page > 0) {
        query.append_pair("page", &page.to_string());
    }
    if let Some(limit) = params.limit {
        query.append_pair("limit", &limit.to_string());
    }
    if let Some(content_type) = params.content_type {
        query.append_pair("type", content_type.as_str());
    }
    if let Some(status) = params.status {
        query.append_pair("status", status.as_str());
    }
    query.finish()
}

#[derive(Clone)]
pub struct HttpKnowledgeApi {
    gateway: ApiGateway,
}

impl HttpKnowledgeApi {
    pub fn new(gateway: ApiGateway) -> Self {
        Self { gateway }
    }
}

fn collection_path(workspace_id: &str) -> String {
    format!("/api/v1/knowledge/{}", segment(workspace_id))
}

fn item_path(workspace_id: &str, item_id: &str) -> String {
    format!("{}/{}", collection_path(workspace_id), segment(item_id))
}

#[async_trait]
impl KnowledgeApi for HttpKnowledgeApi {
    async fn create_item(
        &self,
        workspace_id: &str,
        input: &CreateKnowledgeItemInput,
    ) -> AppResult<KnowledgeItem> {
        self.gateway
            .post::<ApiEnvelope<KnowledgeItem>>(
                &collection_path(workspace_id),
                Some(serde_json::to_value(input)?),
            )
            .await?
            .into_data()
    }

    async fn list_items(
        &self,
        workspace_id: &str,
        params: PaginationParams,
    ) -> AppResult<Page<KnowledgeItem>> {
        let query = query_string(&params);
        let path = if query.is_empty() {
            collection_path(workspace_id)
        } else {
            format!("{}?{}", collection_path(workspace_id), query)
        };
        self.gateway
            .get::<PaginatedEnvelope<KnowledgeItem>>(&path)
            .await?
            .into_page()
    }

    async fn get_item(&self, workspace_id: &str, item_id: &str) -> AppResult<KnowledgeItem> {
        self.gateway
            .get::<ApiEnvelope<KnowledgeItem>>(&item_path(workspace_id, item_id))
            .await?
            .into_data()
    }

    async fn update_item(
        &self,
        workspace_id: &str,
        item_id: &str,
        input: &UpdateKnowledgeItemInput,
    ) -> AppResult<KnowledgeItem> {
        self.gateway
            .patch::<ApiEnvelope<KnowledgeItem>>(
                &item_path(workspace_id, item_id),
                Some(serde_json::to_value(input)?),
            )
            .await?
            .into_data()
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> AppResult<()> {
        self.gateway
            .delete::<Option<AckEnvelope>>(&item_path(workspace_id, item_id))
            .await?
            .map_or(Ok(()), AckEnvelope::into_result)
    }
}

#[cfg(test)]
mod tests {
    use super::{query_string, HttpKnowledgeApi, KnowledgeApi};
    use crate::gateway::tests::serve_once;
    use crate::gateway::ApiGateway;
    use crate::models::{ContentType, PaginationParams, ProcessingStatus};
    use crate::session::SessionManager;

    #[test]
    fn query_omits_absent_parameters() {
        assert_eq!(query_string(&PaginationParams::default()), "");
        assert_eq!(
            query_string(&PaginationParams {
                page: Some(2),
                limit: Some(0),
                content_type: Some(ContentType::SocialPost),
                status: Some(ProcessingStatus::Completed),
            }),
            "page=2&limit=0&type=SOCIAL+POST&status=COMPLETED"
        );
        assert_eq!(
            query_string(&PaginationParams {
                page: Some(0),
                ..PaginationParams::default()
            }),
            ""
        );
    }

    #[tokio::test]
    async fn recent_items_requests_first_page() {
        let (url, request) = serve_once(
            "200 OK",
            r#"{"success":true,"data":[{"id":"k1","workspaceId":"w1","sourceUrl":"https://a.dev","contentType":"ARTICLE","createdAt":"2025-03-01T00:00:00Z"}],"pagination":{"page":1,"limit":10,"total":1,"totalPages":1}}"#,
        )
        .await;
        let api = HttpKnowledgeApi::new(ApiGateway::new(url, SessionManager::new()));

        let items = api.recent_items("w1", 10).await.expect("recent");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content_type, ContentType::Article);

        let raw = request.await.expect("request");
        assert!(raw.starts_with("GET /api/v1/knowledge/w1?page=1&limit=10 HTTP/1.1"));
    }
}
