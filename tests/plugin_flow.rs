use std::sync::Arc;

use codap_channel::mock_host::MockHost;
use codap_channel::{Action, ConnectionState, ResourcePath};
use codap_movies::catalog::CatalogRecord;
use codap_movies::config::PluginConfig;
use codap_movies::dataset::{DatasetDescriptor, DatasetHandle};
use codap_movies::forwarder::RecordForwarder;
use codap_movies::session::SessionManager;
use codap_movies::{MoviePlugin, PluginError};
use serde_json::{Value, json};

async fn start(host: &MockHost) -> MoviePlugin {
    MoviePlugin::start(Arc::new(host.clone()), &PluginConfig::default())
        .await
        .expect("plugin should start")
}

fn indices(host: &MockHost) -> Vec<u64> {
    host.items("Movies")
        .iter()
        .map(|i| i["movie_set_index"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn fresh_document_gets_dataset_and_table() {
    let host = MockHost::new();
    let plugin = start(&host).await;
    assert!(plugin.dataset().created);

    assert_eq!(host.count(Action::Create, ResourcePath::DataContextRoot), 1);
    let ctx = host.data_context("Movies").unwrap();
    assert_eq!(ctx, serde_json::to_value(DatasetDescriptor::movies()).unwrap());

    plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap();
    assert_eq!(
        host.items("Movies"),
        vec![json!({"movie_set_index": 0, "title": "Dune", "popularity": 88.1})]
    );
    assert_eq!(host.count(Action::Create, ResourcePath::Component), 1);
}

#[tokio::test]
async fn handshake_announces_manifest_first() {
    let host = MockHost::new();
    let _plugin = start(&host).await;

    let requests = host.requests();
    assert_eq!(requests[0].action, Action::Update);
    assert_eq!(requests[0].resource, "interactiveFrame");
    let frame = host.frame().unwrap();
    assert_eq!(frame["name"], json!("Movie Finder"));
    assert_eq!(frame["dimensions"], json!({"width": 400, "height": 600}));
}

#[tokio::test]
async fn indices_strictly_increase() {
    let host = MockHost::new();
    let plugin = start(&host).await;

    for title in ["Dune", "Arrival", "Heat", "Alien"] {
        plugin.add_record(&CatalogRecord::new(title, 1.0)).await.unwrap();
    }
    assert_eq!(indices(&host), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn second_start_reuses_dataset() {
    let host = MockHost::new();
    let first = start(&host).await;
    first.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap();

    let reopened = host.reopen();
    let second = start(&reopened).await;
    assert!(!second.dataset().created);
    assert_eq!(reopened.count(Action::Create, ResourcePath::DataContextRoot), 0);
}

#[tokio::test]
async fn saved_sample_number_is_continued() {
    let host = MockHost::new().with_saved_state(json!({"sampleNumber": 3}));
    let plugin = start(&host).await;

    plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap();
    assert_eq!(
        host.items("Movies"),
        vec![json!({"movie_set_index": 3, "title": "Dune", "popularity": 88.1})]
    );
    assert_eq!(plugin.session().interactive_state().unwrap().sample_number(), 4);
}

#[tokio::test]
async fn state_survives_save_and_reopen() {
    let host = MockHost::new().with_saved_state(json!({"sampleNumber": 7}));
    let plugin = start(&host).await;
    plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap();

    let saved = host.save_document().await.unwrap();
    assert!(saved.success);
    assert_eq!(host.saved_state(), Some(json!({"sampleNumber": 8})));

    let reopened = host.reopen();
    let plugin = start(&reopened).await;
    plugin.add_record(&CatalogRecord::new("Heat", 40.0)).await.unwrap();
    assert_eq!(indices(&reopened), vec![7, 8]);
}

#[tokio::test]
async fn exhausted_index_sends_nothing() {
    let host = MockHost::new().with_saved_state(json!({"sampleNumber": 1e20}));
    let plugin = start(&host).await;

    let err = plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap_err();
    assert!(matches!(err, PluginError::SampleIndexExhausted));
    assert_eq!(host.count(Action::Create, ResourcePath::items("Movies")), 0);
    assert!(host.items("Movies").is_empty());
}

#[tokio::test]
async fn forwarding_requires_active_session() {
    let host = MockHost::new();
    let session = SessionManager::new(Arc::new(host.clone()));
    let forwarder = RecordForwarder::new(
        Arc::clone(&session),
        DatasetHandle::new("Movies", Arc::new(DatasetDescriptor::movies())),
    );

    let err = forwarder.forward(&CatalogRecord::new("Dune", 1.0)).await.unwrap_err();
    assert!(matches!(err, PluginError::NotConnected { state: ConnectionState::Uninitialized }));
    assert!(host.requests().is_empty());
}

#[tokio::test]
async fn failed_handshake_blocks_forwarding() {
    let host = MockHost::new();
    host.reject(Action::Update, ResourcePath::InteractiveFrame, "plugin not allowed");
    let session = SessionManager::new(Arc::new(host.clone()));

    let err = session.init(&PluginConfig::default().manifest()).await.unwrap_err();
    assert!(matches!(err, PluginError::HandshakeFailed(ref m) if m == "plugin not allowed"));
    assert_eq!(session.connection_state(), ConnectionState::Failed);

    let sent = host.requests().len();
    let forwarder = RecordForwarder::new(
        Arc::clone(&session),
        DatasetHandle::new("Movies", Arc::new(DatasetDescriptor::movies())),
    );
    let err = forwarder.forward(&CatalogRecord::new("Dune", 1.0)).await.unwrap_err();
    assert!(matches!(err, PluginError::NotConnected { state: ConnectionState::Failed }));
    assert_eq!(host.requests().len(), sent);
}

#[tokio::test]
async fn start_fails_when_handshake_fails() {
    let host = MockHost::new();
    host.fail(Action::Update, ResourcePath::InteractiveFrame);

    let err = MoviePlugin::start(Arc::new(host.clone()), &PluginConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::HandshakeFailed(_)));
    assert_eq!(host.count(Action::Create, ResourcePath::DataContextRoot), 0);
}

#[tokio::test]
async fn one_table_across_forwards() {
    let host = MockHost::new();
    let plugin = start(&host).await;

    plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap();
    plugin.add_record(&CatalogRecord::new("Heat", 40.0)).await.unwrap();

    assert_eq!(host.count(Action::Create, ResourcePath::Component), 1);
    assert_eq!(host.count(Action::Get, ResourcePath::ComponentList), 2);
}

#[tokio::test]
async fn rejected_item_leaves_a_gap() {
    let host = MockHost::new();
    let plugin = start(&host).await;

    host.reject(Action::Create, ResourcePath::items("Movies"), "dataset locked");
    let err = plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::HostRejected { ref message, .. } if message == "dataset locked"
    ));

    host.clear_faults();
    plugin.add_record(&CatalogRecord::new("Heat", 40.0)).await.unwrap();
    assert_eq!(indices(&host), vec![1]);
}

#[tokio::test]
async fn table_failure_does_not_fail_forward() {
    let host = MockHost::new();
    let plugin = start(&host).await;
    host.reject(Action::Create, ResourcePath::Component, "no room");

    plugin.add_record(&CatalogRecord::new("Dune", 88.1)).await.unwrap();
    assert_eq!(host.items("Movies").len(), 1);
    assert!(host.components().is_empty());
}

#[tokio::test]
async fn host_pushed_state_does_not_rewind() {
    let host = MockHost::new().with_saved_state(json!({"sampleNumber": 5}));
    let plugin = start(&host).await;

    host.push_state(json!({"sampleNumber": 2, "lastCategory": "trending"})).await.unwrap();
    let state = plugin.session().interactive_state().unwrap();
    assert_eq!(state.sample_number(), 5);
    assert_eq!(state.get("lastCategory"), Some(&Value::from("trending")));
}

#[tokio::test]
async fn disconnect_ends_the_session() {
    let host = MockHost::new();
    let plugin = start(&host).await;

    host.disconnect().await;
    assert_eq!(plugin.run_until_closed().await, ConnectionState::Closed);

    let err = plugin.add_record(&CatalogRecord::new("Dune", 1.0)).await.unwrap_err();
    assert!(matches!(err, PluginError::NotConnected { state: ConnectionState::Closed }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_forwards_get_distinct_indices() {
    let host = MockHost::new();
    let plugin = Arc::new(start(&host).await);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let p = Arc::clone(&plugin);
        tasks.push(tokio::spawn(async move {
            p.add_record(&CatalogRecord::new(format!("movie {i}"), i as f64)).await.unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let mut seen = indices(&host);
    seen.sort_unstable();
    assert_eq!(seen, (0..16).collect::<Vec<_>>());
    assert_eq!(host.count(Action::Create, ResourcePath::Component), 1);
}
