//! End-to-end tests of the generated schema against a seeded SQLite database

mod common;

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use common::{CountingStore, NEWS_COUNT, counted_schema, execute, schema};

fn error_code(response: &Value) -> Option<&str> {
    response["errors"][0]["extensions"]["code"].as_str()
}

fn edge_uids(connection: &Value) -> Vec<i64> {
    connection["edges"]
        .as_array()
        .map(|edges| {
            edges
                .iter()
                .filter_map(|e| e["node"]["uid"].as_i64())
                .collect()
        })
        .unwrap_or_default()
}

/// `value -> (resultCount, selected, disabled)` for the facet labelled `label`
fn facet_options(connection: &Value, label: &str) -> BTreeMap<String, (i64, bool, bool)> {
    connection["facets"]
        .as_array()
        .and_then(|facets| facets.iter().find(|f| f["label"] == label))
        .and_then(|facet| facet["options"].as_array())
        .map(|options| {
            options
                .iter()
                .map(|o| {
                    (
                        o["value"].as_str().unwrap_or_default().to_string(),
                        (
                            o["resultCount"].as_i64().unwrap_or(-1),
                            o["selected"].as_bool().unwrap_or(false),
                            o["disabled"].as_bool().unwrap_or(false),
                        ),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_single_record_with_relations() {
    let schema = schema().await;
    let response = execute(
        &schema,
        r#"{
            news(uid: 1) {
                uid
                pid
                title
                color
                price
                datetime
                author { uid name }
                link { url target title external }
                image { fileUid title }
            }
        }"#,
    )
    .await;

    assert!(response["errors"].is_null(), "{response}");
    assert_eq!(
        response["data"]["news"],
        json!({
            "uid": 1,
            "pid": 1,
            "title": "News 01",
            "color": "RED",
            "price": 1.5,
            "datetime": "2023-11-14T22:13:20+00:00",
            "author": { "uid": 1, "name": "Ada" },
            "link": {
                "url": "https://example.com",
                "target": "_blank",
                "title": "Example",
                "external": true
            },
            "image": [
                { "fileUid": 42, "title": "Cover" },
                { "fileUid": 43, "title": "Detail" }
            ]
        })
    );
}

#[tokio::test]
async fn test_unset_values_are_null() {
    let schema = schema().await;
    let response = execute(&schema, "{ news(uid: 2) { datetime author { uid } link { url } image { uid } } }").await;

    assert!(response["errors"].is_null(), "{response}");
    assert_eq!(
        response["data"]["news"],
        json!({ "datetime": null, "author": null, "link": null, "image": [] })
    );
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let schema = schema().await;
    let response = execute(&schema, "{ news(uid: 999) { uid } }").await;

    assert_eq!(error_code(&response), Some("NOT_FOUND"));
    assert_eq!(
        response["errors"][0]["message"],
        "News with uid 999 not found in table `tx_news`"
    );
    assert!(response["data"]["news"].is_null());
}

#[tokio::test]
async fn test_cursor_pagination_walks_all_records() {
    let schema = schema().await;
    let first = execute(
        &schema,
        "{ newsList { totalCount edges { cursor node { uid } } pageInfo { hasNextPage hasPreviousPage endCursor } } }",
    )
    .await;
    assert!(first["errors"].is_null(), "{first}");

    let page = &first["data"]["newsList"];
    assert_eq!(page["totalCount"], NEWS_COUNT);
    assert_eq!(edge_uids(page), (1..=25).collect::<Vec<_>>());
    assert_eq!(page["pageInfo"]["hasNextPage"], true);
    assert_eq!(page["pageInfo"]["hasPreviousPage"], false);
    let end_cursor = page["pageInfo"]["endCursor"].as_str().unwrap().to_string();
    assert_eq!(page["edges"][24]["cursor"], end_cursor);

    let second = execute(
        &schema,
        &format!(
            r#"{{ newsList(first: 25, after: "{end_cursor}") {{ totalCount edges {{ node {{ uid }} }} pageInfo {{ hasNextPage hasPreviousPage }} }} }}"#
        ),
    )
    .await;
    let page = &second["data"]["newsList"];
    assert_eq!(edge_uids(page), (26..=30).collect::<Vec<_>>());
    assert_eq!(page["pageInfo"]["hasNextPage"], false);
    assert_eq!(page["pageInfo"]["hasPreviousPage"], true);
}

#[tokio::test]
async fn test_first_is_capped() {
    let schema = schema().await;
    let response = execute(&schema, "{ newsList(first: 1000) { edges { node { uid } } } }").await;
    assert_eq!(edge_uids(&response["data"]["newsList"]).len(), NEWS_COUNT as usize);
}

#[tokio::test]
async fn test_invalid_cursor_is_bad_input() {
    let schema = schema().await;
    let response = execute(&schema, r#"{ newsList(after: "not a cursor!") { totalCount } }"#).await;
    assert_eq!(error_code(&response), Some("BAD_INPUT"));
}

#[tokio::test]
async fn test_order_by() {
    let schema = schema().await;
    let response = execute(
        &schema,
        "{ newsList(first: 3, orderBy: [{ field: TITLE, direction: DESC }]) { edges { node { uid } } } }",
    )
    .await;
    assert!(response["errors"].is_null(), "{response}");
    assert_eq!(edge_uids(&response["data"]["newsList"]), vec![30, 29, 28]);
}

#[tokio::test]
async fn test_discrete_filter_and_facets() {
    let schema = schema().await;
    let response = execute(
        &schema,
        r#"{
            newsList(first: 50, filters: { discreteFilters: [{ path: "categories.title", options: ["Sports"] }] }) {
                totalCount
                edges { node { uid } }
                facets { label path type options { value label resultCount selected disabled } }
            }
        }"#,
    )
    .await;
    assert!(response["errors"].is_null(), "{response}");

    let page = &response["data"]["newsList"];
    assert_eq!(page["totalCount"], 10);
    assert_eq!(edge_uids(page), (1..=10).collect::<Vec<_>>());

    // A facet ignores its own selection
    let categories = facet_options(page, "Category");
    assert_eq!(categories["Sports"], (10, true, false));
    assert_eq!(categories["Politics"], (11, false, false));
    assert_eq!(categories["Empty"], (0, false, true));

    // Other facets are narrowed by the category selection
    let colors = facet_options(page, "Color");
    assert_eq!(colors["red"], (5, false, false));
    assert_eq!(colors["green"], (5, false, false));
    assert_eq!(colors["sky_blue"], (0, false, true));

    // Declared items keep their order and labels
    let color_facet = page["facets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["label"] == "Color")
        .unwrap();
    let labels: Vec<&str> = color_facet["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["Red", "Sky blue", "Green"]);
}

#[tokio::test]
async fn test_combined_filters() {
    let schema = schema().await;
    let response = execute(
        &schema,
        r#"{
            newsList(filters: {
                discreteFilters: [
                    { path: "categories.title", options: ["Sports", "Politics"] },
                    { path: "color", options: ["red"] }
                ]
            }) {
                totalCount
                edges { node { uid } }
            }
        }"#,
    )
    .await;
    assert!(response["errors"].is_null(), "{response}");

    // Records in either category, counted once even when in both
    let page = &response["data"]["newsList"];
    assert_eq!(page["totalCount"], 8);
    assert_eq!(edge_uids(page), vec![1, 3, 5, 7, 9, 11, 13, 15]);
}

#[tokio::test]
async fn test_range_filter_and_bounds() {
    let schema = schema().await;
    let response = execute(
        &schema,
        r#"{
            newsList(filters: { rangeFilters: [{ path: "price", range: { min: 3, max: 6 } }] }) {
                totalCount
                edges { node { uid } }
                facets { label unit range { min max } }
            }
        }"#,
    )
    .await;
    assert!(response["errors"].is_null(), "{response}");

    let page = &response["data"]["newsList"];
    assert_eq!(page["totalCount"], 3);
    assert_eq!(edge_uids(page), vec![2, 3, 4]);

    let price = page["facets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["label"] == "Price")
        .unwrap();
    assert_eq!(price["unit"], "EUR");
    assert_eq!(price["range"], json!({ "min": 1.5, "max": 45.0 }));
}

#[tokio::test]
async fn test_undeclared_filter_is_not_found() {
    let schema = schema().await;
    let response = execute(
        &schema,
        r#"{ newsList(filters: { discreteFilters: [{ path: "title", options: ["x"] }] }) { totalCount } }"#,
    )
    .await;
    assert_eq!(error_code(&response), Some("NOT_FOUND"));
}

#[tokio::test]
async fn test_filter_kind_mismatch_is_bad_input() {
    let schema = schema().await;
    let response = execute(
        &schema,
        r#"{ newsList(filters: { rangeFilters: [{ path: "color", range: { min: 1 } }] }) { totalCount } }"#,
    )
    .await;
    assert_eq!(error_code(&response), Some("BAD_INPUT"));
}

#[tokio::test]
async fn test_unfiltered_content_type_has_no_facets() {
    let schema = schema().await;
    let sdl = schema.sdl();
    assert!(sdl.contains("type AuthorConnection"));
    assert!(!sdl.contains("authors(filters"));

    let response = execute(&schema, "{ authors { totalCount edges { node { name } } } }").await;
    assert!(response["errors"].is_null(), "{response}");
    assert_eq!(response["data"]["authors"]["totalCount"], 1);
    assert_eq!(response["data"]["authors"]["edges"][0]["node"]["name"], "Ada");
}

#[tokio::test]
async fn test_facets_only_computed_when_selected() {
    let (schema, store) = counted_schema().await;

    let response = execute(&schema, "{ newsList(first: 1) { totalCount } }").await;
    assert!(response["errors"].is_null(), "{response}");
    assert_eq!(CountingStore::count(&store.grouped), 0);

    let response = execute(&schema, "{ newsList(first: 1) { facets { label } } }").await;
    assert!(response["errors"].is_null(), "{response}");
    // One per declared filter: two discrete, one range
    assert_eq!(CountingStore::count(&store.grouped), 3);
}

#[tokio::test]
async fn test_relations_batched_per_page() {
    let (schema, store) = counted_schema().await;

    let response = execute(
        &schema,
        "{ newsList(first: 30) { edges { node { uid author { name } image { title } } } } }",
    )
    .await;
    assert!(response["errors"].is_null(), "{response}");

    let edges = response["data"]["newsList"]["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 30);
    assert_eq!(edges[0]["node"]["author"]["name"], "Ada");
    assert_eq!(edges[0]["node"]["image"].as_array().unwrap().len(), 2);
    assert!(edges[1]["node"]["author"].is_null());

    // The page, one batch of authors, one batch of file references
    assert_eq!(CountingStore::count(&store.by_id), 0);
    assert_eq!(CountingStore::count(&store.fetches), 3);
}
