//! HTTP adapter for the remote catalog.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use catbatch_engine::service::{
    column_parts, table_parts, CatalogService, GrantRequest, Page, ScheduleRequest,
    ScheduleSettings, TableMetadata,
};
use catbatch_types::{EntityKey, ServiceError, ServiceErrorKind};

/// Catalog reached over its REST API.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

/// Error body returned by the catalog.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ResourceBody<'a> {
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GrantBody<'a> {
    principal: &'a str,
    resource: ResourceBody<'a>,
    permissions: &'a [String],
    grantable: &'a [String],
}

impl HttpCatalogClient {
    /// Build a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP
    /// client cannot be constructed.
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid catalog endpoint: {endpoint}"))?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("Catalog endpoint cannot be used as a base URL: {endpoint}");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, label: &str) -> Result<Response, ServiceError> {
        let response = req.send().await.map_err(|e| transport_error(&e, label))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        label: &str,
    ) -> Result<T, ServiceError> {
        let response = self.send(self.request(Method::GET, url), label).await?;
        response.json().await.map_err(|e| {
            ServiceError::internal("InvalidResponse", format!("{label}: {e}"))
        })
    }

    async fn list(&self, mut url: Url, token: Option<&str>, label: &str) -> Result<Page, ServiceError> {
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("next_token", token);
        }
        self.get_json(url, label).await
    }
}

/// Map a failed HTTP status and body to a [`ServiceError`].
fn status_error(status: StatusCode, body: &str) -> ServiceError {
    let kind = match status {
        StatusCode::NOT_FOUND => ServiceErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ServiceErrorKind::Throttled,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceErrorKind::Timeout,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceErrorKind::AccessDenied,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ServiceErrorKind::InvalidInput
        }
        StatusCode::CONFLICT => ServiceErrorKind::Conflict,
        s if s.is_server_error() => ServiceErrorKind::Unavailable,
        _ => ServiceErrorKind::Internal,
    };
    let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => (parsed.code, parsed.message),
        Err(_) => (
            status
                .canonical_reason()
                .unwrap_or("HttpError")
                .replace(' ', ""),
            body.trim().to_string(),
        ),
    };
    ServiceError::new(kind, code, message).with_status(status.as_u16())
}

fn transport_error(err: &reqwest::Error, label: &str) -> ServiceError {
    if err.is_timeout() {
        ServiceError::timeout("RequestTimeout", format!("{label}: {err}"))
    } else if err.is_connect() || err.is_request() {
        ServiceError::unavailable("ConnectionFailed", format!("{label}: {err}"))
    } else {
        ServiceError::internal("TransportError", format!("{label}: {err}"))
    }
}

#[async_trait]
impl CatalogService for HttpCatalogClient {
    async fn list_databases(&self, next_token: Option<&str>) -> Result<Page, ServiceError> {
        self.list(self.url(&["databases"]), next_token, "list_databases")
            .await
    }

    async fn list_tables(
        &self,
        database: &str,
        next_token: Option<&str>,
    ) -> Result<Page, ServiceError> {
        self.list(
            self.url(&["databases", database, "tables"]),
            next_token,
            "list_tables",
        )
        .await
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<TableMetadata, ServiceError> {
        self.get_json(self.url(&["databases", database, "tables", table]), "get_table")
            .await
    }

    async fn get_schedule_settings(
        &self,
        database: &str,
        table: &str,
    ) -> Result<ScheduleSettings, ServiceError> {
        self.get_json(
            self.url(&["databases", database, "tables", table, "statistics-schedule"]),
            "get_schedule_settings",
        )
        .await
    }

    async fn grant_access(
        &self,
        resource: &EntityKey,
        grant: &GrantRequest,
    ) -> Result<(), ServiceError> {
        let body = GrantBody {
            principal: &grant.principal,
            resource: ResourceBody {
                database: resource.database_name(),
                table: resource.table_name(),
                column: resource.column_name(),
            },
            permissions: &grant.permissions,
            grantable: &grant.grantable,
        };
        let req = self
            .request(Method::POST, self.url(&["permissions", "grants"]))
            .json(&body);
        self.send(req, "grant_access").await.map(drop)
    }

    async fn create_or_update_schedule(
        &self,
        table: &EntityKey,
        request: &ScheduleRequest,
    ) -> Result<(), ServiceError> {
        let (db, t) = table_parts(table)?;
        let req = self
            .request(
                Method::PUT,
                self.url(&["databases", db, "tables", t, "statistics-schedule"]),
            )
            .json(request);
        self.send(req, "create_or_update_schedule").await.map(drop)
    }

    async fn stop_schedule(&self, table: &EntityKey) -> Result<(), ServiceError> {
        let (db, t) = table_parts(table)?;
        let req = self.request(
            Method::POST,
            self.url(&["databases", db, "tables", t, "statistics-schedule", "stop"]),
        );
        self.send(req, "stop_schedule").await.map(drop)
    }

    async fn delete_statistics(&self, column: &EntityKey) -> Result<(), ServiceError> {
        let (db, t, c) = column_parts(column)?;
        let req = self.request(
            Method::DELETE,
            self.url(&["databases", db, "tables", t, "columns", c, "statistics"]),
        );
        self.send(req, "delete_statistics").await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> HttpCatalogClient {
        HttpCatalogClient::new(
            &format!("{}/api/v1", server.url()),
            Some("secret".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn list_tables_follows_token_and_sends_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/databases/sales/tables")
            .match_header("Authorization", "Bearer secret")
            .match_query(Matcher::UrlEncoded("next_token".into(), "abc".into()))
            .with_status(200)
            .with_body(r#"{"names":["orders","refunds"],"next_token":"def"}"#)
            .create_async()
            .await;

        let page = client(&server)
            .list_tables("sales", Some("abc"))
            .await
            .unwrap();

        assert_eq!(page.names, vec!["orders", "refunds"]);
        assert_eq!(page.continuation(), Some("def"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn path_segments_are_escaped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/databases/my%20db/tables/t/statistics-schedule")
            .with_status(200)
            .with_body(r#"{"state":"SCHEDULED","cron":"cron(0 1 5 * ? *)"}"#)
            .create_async()
            .await;

        let settings = client(&server)
            .get_schedule_settings("my db", "t")
            .await
            .unwrap();

        assert!(settings.is_scheduled());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_body_is_carried_into_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/databases/db/tables/gone")
            .with_status(404)
            .with_body(r#"{"code":"EntityNotFoundException","message":"Table gone not found"}"#)
            .create_async()
            .await;

        let err = client(&server).get_table("db", "gone").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.code, "EntityNotFoundException");
        assert_eq!(err.message, "Table gone not found");
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn schedule_put_sends_request_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/v1/databases/db/tables/t/statistics-schedule")
            .match_body(Matcher::Json(serde_json::json!({
                "role": "arn:role",
                "cron": "cron(7 3 12 * ? *)",
                "catalog_id": "123",
            })))
            .with_status(200)
            .create_async()
            .await;

        client(&server)
            .create_or_update_schedule(
                &EntityKey::table("db", "t").unwrap(),
                &ScheduleRequest {
                    role: "arn:role".into(),
                    cron: "cron(7 3 12 * ? *)".into(),
                    catalog_id: Some("123".into()),
                },
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn grant_describes_column_resource() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/permissions/grants")
            .match_body(Matcher::Json(serde_json::json!({
                "principal": "arn:role",
                "resource": { "database": "db", "table": "t", "column": "c" },
                "permissions": ["SELECT"],
                "grantable": [],
            })))
            .with_status(204)
            .create_async()
            .await;

        client(&server)
            .grant_access(
                &EntityKey::column("db", "t", "c").unwrap(),
                &GrantRequest {
                    principal: "arn:role".into(),
                    permissions: vec!["SELECT".into()],
                    grantable: vec![],
                },
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_and_stop_hit_their_endpoints() {
        let mut server = Server::new_async().await;
        let delete = server
            .mock("DELETE", "/api/v1/databases/db/tables/t/columns/c/statistics")
            .with_status(200)
            .create_async()
            .await;
        let stop = server
            .mock("POST", "/api/v1/databases/db/tables/t/statistics-schedule/stop")
            .with_status(200)
            .create_async()
            .await;
        let client = client(&server);

        client
            .delete_statistics(&EntityKey::column("db", "t", "c").unwrap())
            .await
            .unwrap();
        client
            .stop_schedule(&EntityKey::table("db", "t").unwrap())
            .await
            .unwrap();
        delete.assert_async().await;
        stop.assert_async().await;
    }

    #[test]
    fn statuses_map_to_kinds() {
        let cases = [
            (StatusCode::NOT_FOUND, ServiceErrorKind::NotFound),
            (StatusCode::TOO_MANY_REQUESTS, ServiceErrorKind::Throttled),
            (StatusCode::REQUEST_TIMEOUT, ServiceErrorKind::Timeout),
            (StatusCode::GATEWAY_TIMEOUT, ServiceErrorKind::Timeout),
            (StatusCode::SERVICE_UNAVAILABLE, ServiceErrorKind::Unavailable),
            (StatusCode::INTERNAL_SERVER_ERROR, ServiceErrorKind::Unavailable),
            (StatusCode::UNAUTHORIZED, ServiceErrorKind::AccessDenied),
            (StatusCode::FORBIDDEN, ServiceErrorKind::AccessDenied),
            (StatusCode::BAD_REQUEST, ServiceErrorKind::InvalidInput),
            (StatusCode::UNPROCESSABLE_ENTITY, ServiceErrorKind::InvalidInput),
            (StatusCode::CONFLICT, ServiceErrorKind::Conflict),
            (StatusCode::IM_A_TEAPOT, ServiceErrorKind::Internal),
        ];
        for (status, kind) in cases {
            assert_eq!(status_error(status, "").kind, kind, "{status}");
        }
    }

    #[test]
    fn unstructured_body_becomes_message() {
        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "upstream down\n");
        assert_eq!(err.code, "ServiceUnavailable");
        assert_eq!(err.message, "upstream down");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        // Port 9 (discard) is closed on test hosts.
        let client =
            HttpCatalogClient::new("http://127.0.0.1:9/api", None, Duration::from_secs(2)).unwrap();
        let err = client.list_databases(None).await.unwrap_err();
        assert!(
            matches!(
                err.kind,
                ServiceErrorKind::Unavailable | ServiceErrorKind::Timeout
            ),
            "{err}"
        );
    }
}
