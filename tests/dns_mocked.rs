/// DNS-over-HTTPS resolver tests against a mocked JSON endpoint.
use creator_profile_api::dns_client::{DohTxtResolver, TxtResolver};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver(server: &MockServer) -> DohTxtResolver {
    DohTxtResolver::new(format!("{}/dns-query", server.uri())).unwrap()
}

#[tokio::test]
async fn test_txt_answers_are_unquoted_and_filtered() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .and(query_param("name", "artist.com"))
        .and(query_param("type", "TXT"))
        .and(header("accept", "application/dns-json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": 0,
            "Answer": [
                { "name": "artist.com", "type": 16, "TTL": 300, "data": "\"profile-verification=abc123\"" },
                { "name": "artist.com", "type": 16, "TTL": 300, "data": "\"v=spf1 \" \"-all\"" },
                { "name": "artist.com", "type": 5, "TTL": 300, "data": "cname.example.net." }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let records = resolver(&mock_server).lookup_txt("artist.com").await.unwrap();
    assert_eq!(records, vec!["profile-verification=abc123", "v=spf1 -all"]);
}

#[tokio::test]
async fn test_nxdomain_is_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "Status": 3 })),
        )
        .mount(&mock_server)
        .await;

    let records = resolver(&mock_server).lookup_txt("missing.example").await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_servfail_is_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "Status": 2 })),
        )
        .mount(&mock_server)
        .await;

    assert!(resolver(&mock_server).lookup_txt("artist.com").await.is_err());
}

#[tokio::test]
async fn test_http_failure_is_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    assert!(resolver(&mock_server).lookup_txt("artist.com").await.is_err());
}

#[tokio::test]
async fn test_answers_are_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": 0,
            "Answer": [{ "name": "artist.com", "type": 16, "data": "\"hello\"" }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let resolver = resolver(&mock_server);
    assert_eq!(resolver.lookup_txt("artist.com").await.unwrap(), vec!["hello"]);
    assert_eq!(resolver.lookup_txt("Artist.com").await.unwrap(), vec!["hello"]);
}

#[tokio::test]
async fn test_empty_answers_are_not_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "Status": 0 })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": 0,
            "Answer": [{ "name": "artist.com", "type": 16, "data": "\"profile-verification=abc\"" }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let resolver = resolver(&mock_server);
    assert!(resolver.lookup_txt("artist.com").await.unwrap().is_empty());
    // Record published after the first miss is seen on the next click.
    assert_eq!(
        resolver.lookup_txt("artist.com").await.unwrap(),
        vec!["profile-verification=abc"]
    );
}

#[tokio::test]
async fn test_invalidate_forces_fresh_lookup() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": 0,
            "Answer": [{ "name": "artist.com", "type": 16, "data": "\"v=spf1 -all\"" }]
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let resolver = resolver(&mock_server);
    resolver.lookup_txt("artist.com").await.unwrap();
    resolver.invalidate("Artist.com").await;
    resolver.lookup_txt("artist.com").await.unwrap();
}
