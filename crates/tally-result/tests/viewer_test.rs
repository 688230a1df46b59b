//! End-to-end: real HTTP listener, WebSocket viewers, live pipeline.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tally::{normalize, Establisher, Hub, LinkState, RawRow, RestBackend, RetryPolicy, Tally};
use tally_result::pipeline::{run_pipeline, PollOptions};
use tally_result::server::{router, AppState};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(hub: Hub, link: watch::Receiver<LinkState>) -> (String, CancellationToken) {
    let shutdown = CancellationToken::new();
    let state = AppState {
        hub,
        link,
        backend: "test",
        views_dir: PathBuf::from("views"),
        shutdown: shutdown.clone(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    let stop = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stop.cancelled_owned())
            .await
            .unwrap();
    });
    (format!("ws://{}/ws", addr), shutdown)
}

async fn next_frame(viewer: &mut Viewer) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), viewer.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn next_scores(viewer: &mut Viewer) -> Value {
    loop {
        let frame = next_frame(viewer).await;
        if frame["event"] == "scores" {
            let payload = frame["data"].as_str().expect("scores payload is a string");
            return serde_json::from_str(payload).unwrap();
        }
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn tally(a: u64, b: u64) -> Tally {
    normalize(&[RawRow::new("a", a), RawRow::new("b", b)])
}

#[tokio::test]
async fn test_viewer_gets_welcome_then_scores() {
    let hub = Hub::new();
    let (_tx, link) = watch::channel(LinkState::Connected);
    let (url, shutdown) = start_server(hub.clone(), link).await;

    let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();

    let welcome = next_frame(&mut viewer).await;
    assert_eq!(welcome["event"], "message");
    assert_eq!(welcome["data"]["text"], "Welcome!");

    hub.publish(&tally(4, 2));
    let scores = next_scores(&mut viewer).await;
    assert_eq!(scores, serde_json::json!({"a": 4, "b": 2}));

    shutdown.cancel();
}

#[tokio::test]
async fn test_all_viewers_receive_scores_regardless_of_channel() {
    let hub = Hub::new();
    let (_tx, link) = watch::channel(LinkState::Connected);
    let (url, shutdown) = start_server(hub.clone(), link).await;

    let (mut subscribed, _) = connect_async(url.as_str()).await.unwrap();
    let (mut other, _) = connect_async(url.as_str()).await.unwrap();
    next_frame(&mut subscribed).await;
    next_frame(&mut other).await;

    subscribed
        .send(Message::Text(
            r#"{"event":"subscribe","data":{"channel":"X"}}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for(|| hub.channel_members("X").len() == 1).await;

    hub.publish(&tally(7, 3));

    for viewer in [&mut subscribed, &mut other] {
        assert_eq!(
            next_scores(viewer).await,
            serde_json::json!({"a": 7, "b": 3})
        );
    }

    shutdown.cancel();
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let hub = Hub::new();
    let (_tx, link) = watch::channel(LinkState::Connected);
    let (url, shutdown) = start_server(hub.clone(), link).await;

    let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();
    next_frame(&mut viewer).await;
    viewer
        .send(Message::Text(
            r#"{"event":"subscribe","data":{"channel":"X"}}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for(|| hub.channel_members("X").len() == 1).await;

    viewer.close(None).await.unwrap();

    wait_for(|| hub.session_count() == 0).await;
    assert!(hub.channel_members("X").is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn test_rest_backend_end_to_end() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/votes"))
        .and(basic_auth("db2inst1", "passw0rd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": r#"{"ResultSet Output":[{"VOTE":"a","COUNT":1}],"StatusCode":200}"#
        })))
        .mount(&mock_server)
        .await;

    let backend = RestBackend::new(
        &format!("{}/votes", mock_server.uri()),
        "db2inst1",
        "passw0rd",
    )
    .unwrap();

    let hub = Hub::new();
    let establisher = Establisher::new(RetryPolicy::default());
    let link = establisher.state();
    let (url, shutdown) = start_server(hub.clone(), link.clone()).await;

    let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();
    next_frame(&mut viewer).await;

    let options = PollOptions {
        interval: Some(Duration::from_millis(200)),
        fetch_timeout: Duration::from_secs(5),
    };
    let pipeline = tokio::spawn(run_pipeline(
        backend,
        establisher,
        hub.clone(),
        options,
        shutdown.clone(),
    ));

    assert_eq!(next_scores(&mut viewer).await, serde_json::json!({"a": 1, "b": 0}));
    assert_eq!(*link.borrow(), LinkState::Connected);

    shutdown.cancel();
    let stats = pipeline.await.unwrap().unwrap();
    assert!(stats.published >= 1);
}
