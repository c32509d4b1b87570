use serde_json::json;
use ts_connectors::testing::test_connector_config;
use ts_connectors::{
    AuthConfig, ConnectorError, DirectoryConnector, GraphConfig, GraphDirectoryConnector,
    MembershipChange, SecureString,
};
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn connector(server: &MockServer, max_retries: u32) -> GraphDirectoryConnector {
    let mut connector = test_connector_config("graph-test", &server.uri());
    connector.max_retries = max_retries;
    GraphDirectoryConnector::new(GraphConfig {
        connector,
        tenant_id: "tenant-1".into(),
        page_size: 2,
    })
    .unwrap()
}

#[tokio::test]
async fn get_user_maps_fields_and_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/jdoe%40contoso.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-1",
            "userPrincipalName": "jdoe@contoso.com",
            "displayName": "John Doe",
            "givenName": "John",
            "surname": "Doe",
            "mail": "john.doe@contoso.com",
            "accountEnabled": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/ghost%40contoso.com"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "Request_ResourceNotFound", "message": "missing" }
        })))
        .mount(&server)
        .await;

    let graph = connector(&server, 0);
    let user = graph.get_user("jdoe@contoso.com").await.unwrap();
    assert_eq!(user.id, "u-1");
    assert_eq!(user.surname.as_deref(), Some("Doe"));

    let err = graph.get_user("ghost@contoso.com").await.unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound(_)));
}

#[tokio::test]
async fn find_users_follows_next_link() {
    let server = MockServer::start().await;
    let next = format!("{}/users-page-2", server.uri());
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("$filter", "givenName eq 'Anne' and surname eq 'O''Neil'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "u-1", "userPrincipalName": "anne1@contoso.com" }],
            "@odata.nextLink": next
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users-page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "u-2", "userPrincipalName": "anne2@contoso.com" }]
        })))
        .mount(&server)
        .await;

    let users = connector(&server, 0)
        .find_users_by_name(" Anne ", "O'Neil")
        .await
        .unwrap();
    let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["u-1", "u-2"]);
}

#[tokio::test]
async fn add_member_skips_post_when_already_member() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g-1/members"))
        .and(header("ConsistencyLevel", "eventual"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "u-1" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/groups/g-1/members/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let change = connector(&server, 0)
        .add_group_member("g-1", "u-1")
        .await
        .unwrap();
    assert_eq!(change, MembershipChange::AlreadyMember);
}

#[tokio::test]
async fn add_member_posts_directory_object_ref() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g-1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/groups/g-1/members/$ref"))
        .and(body_string_contains("/directoryObjects/u-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let change = connector(&server, 0)
        .add_group_member("g-1", "u-9")
        .await
        .unwrap();
    assert_eq!(change, MembershipChange::Added);
}

#[tokio::test]
async fn throttled_request_honours_retry_after_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/u-1/revokeSignInSessions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/u-1/revokeSignInSessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": true })))
        .expect(1)
        .mount(&server)
        .await;

    connector(&server, 2).revoke_sessions("u-1").await.unwrap();
}

#[tokio::test]
async fn throttling_without_retries_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/users/u-1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let err = connector(&server, 0)
        .set_account_enabled("u-1", false)
        .await
        .unwrap_err();
    assert_eq!(err, ConnectorError::RateLimited(30));
}

#[tokio::test]
async fn client_credentials_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/organization"))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_connector_config("graph-test", &server.uri());
    config.auth = AuthConfig::OAuth2 {
        client_id: "app".into(),
        client_secret: SecureString::from("secret"),
        token_url: format!("{}/tenant-1/oauth2/v2.0/token", server.uri()),
        scopes: vec!["https://graph.microsoft.com/.default".into()],
    };
    let graph = GraphDirectoryConnector::new(GraphConfig {
        connector: config,
        tenant_id: "tenant-1".into(),
        page_size: 100,
    })
    .unwrap();

    use ts_connectors::Connector;
    assert!(graph.test_connection().await.unwrap());
    assert!(graph.test_connection().await.unwrap());
}

#[tokio::test]
async fn list_sites_excludes_personal_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/getAllSites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "s1", "webUrl": "https://contoso.sharepoint.com/sites/hr", "displayName": "HR" },
                { "id": "s2", "webUrl": "https://contoso-my.sharepoint.com/personal/jdoe_contoso_com" },
                { "id": "s3" }
            ]
        })))
        .mount(&server)
        .await;

    let graph = connector(&server, 0);
    let sites = graph.list_sites(false).await.unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].title.as_deref(), Some("HR"));

    let all = graph.list_sites(true).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[1].personal);
}
