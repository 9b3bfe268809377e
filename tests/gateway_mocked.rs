/// Integration tests for the Kommo client against a mocked API
/// Covers pagination, tag idempotence, moves and error mapping
use kommo_lead_scorer::errors::AppError;
use kommo_lead_scorer::kommo_client::{CrmGateway, KommoClient, LEADS_PAGE_SIZE};
use kommo_lead_scorer::models::TagWrite;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> KommoClient {
    KommoClient::new(server.uri(), "test-token".to_string()).unwrap()
}

fn leads_page(ids: std::ops::RangeInclusive<i64>) -> serde_json::Value {
    let leads: Vec<_> = ids.map(|id| json!({ "id": id, "name": format!("Lead {}", id) })).collect();
    json!({ "_embedded": { "leads": leads } })
}

#[tokio::test]
async fn test_pagination_stops_on_short_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(header("Authorization", "Bearer test-token"))
        .and(query_param("filter[pipeline_id]", "7"))
        .and(query_param("limit", "250"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_page(1..=250)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_page(251..=253)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(leads_page(254..=254)))
        .expect(0)
        .mount(&mock_server)
        .await;

    let leads = client_for(&mock_server).list_leads_by_pipeline(7).await.unwrap();

    assert_eq!(LEADS_PAGE_SIZE, 250);
    assert_eq!(leads.len(), 253);
    assert_eq!(leads.first().map(|l| l.id), Some(1));
    assert_eq!(leads.last().map(|l| l.id), Some(253));
}

#[tokio::test]
async fn test_empty_pipeline_returns_no_content() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let leads = client_for(&mock_server).list_leads_by_pipeline(3).await.unwrap();
    assert!(leads.is_empty());
}

#[tokio::test]
async fn test_list_all_leads_skips_failing_pipeline() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads/pipelines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": {
                "pipelines": [
                    {
                        "id": 1,
                        "name": "Sales",
                        "_embedded": { "statuses": [{ "id": 11, "name": "Incoming" }] }
                    },
                    { "id": 2, "name": "Broken" }
                ]
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("filter[pipeline_id]", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "leads": [
                { "id": 100, "name": "Acme", "pipeline_id": 1, "status_id": 11 },
                { "id": 101, "name": "Globex", "pipeline_id": 1 }
            ] }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("filter[pipeline_id]", "2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let leads = client_for(&mock_server).list_all_leads().await.unwrap();

    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0].pipeline_name(), "Sales");
    assert_eq!(leads[0].status_name(), "Incoming");
    assert_eq!(leads[1].current_pipeline_id(), Some(1));
    assert_eq!(leads[1].status_name(), "");
}

#[tokio::test]
async fn test_add_tag_appends_to_existing_tags() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads/55"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 55,
            "_embedded": { "tags": [{ "id": 1, "name": "vip" }] }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/leads/55"))
        .and(body_json(json!({
            "_embedded": { "tags": [{ "name": "vip" }, { "name": "AI_Score_8" }] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 55,
            "updated_at": 1700000000
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).add_tag(55, "AI_Score_8").await.unwrap();
    assert_eq!(result, TagWrite::Added);
}

#[tokio::test]
async fn test_add_tag_skips_write_when_present() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads/56"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 56,
            "_embedded": { "tags": [{ "name": "AI_Score_8" }] }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 56 })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).add_tag(56, "AI_Score_8").await.unwrap();
    assert_eq!(result, TagWrite::AlreadyPresent);
}

#[tokio::test]
async fn test_move_lead_patches_pipeline_and_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/leads/77"))
        .and(body_json(json!({ "pipeline_id": 9, "status_id": 90 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updated_at": 1 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    client_for(&mock_server).move_lead(77, 9, 90).await.unwrap();
}

#[tokio::test]
async fn test_statuses_are_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads/pipelines/9/statuses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "statuses": [
                { "id": 90, "name": "Incoming", "sort": 10 },
                { "id": 91, "name": "Qualified", "sort": 20 }
            ] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let first = client.list_pipeline_statuses(9).await.unwrap();
    let second = client.list_pipeline_statuses(9).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(first[0].name, "Incoming");
}

#[tokio::test]
async fn test_rate_limit_maps_to_rate_limited() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads/pipelines"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).list_pipelines().await.unwrap_err();
    assert!(matches!(err, AppError::RateLimited(_)));
}

#[tokio::test]
async fn test_missing_lead_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/leads/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get_lead(404).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_malformed_lead_does_not_end_pagination() {
    let mock_server = MockServer::start().await;

    let mut first_page: Vec<_> = (1..=249).map(|id| json!({ "id": id })).collect();
    first_page.push(json!({ "name": "no id" }));

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "leads": first_page }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/leads"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "leads": [{ "id": 500 }] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let leads = client_for(&mock_server).list_leads_by_pipeline(1).await.unwrap();

    assert_eq!(leads.len(), 250);
    assert_eq!(leads.last().map(|l| l.id), Some(500));
}
