//! Tests for metrics exporter.

use assert_matches::assert_matches;
use http_body_util::BodyExt as _;
use hyper::{
    body::{Bytes, Incoming},
    HeaderMap, Uri,
};
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioIo},
};
use tokio::sync::mpsc;
use tracing::subscriber::Subscriber;
use tracing_capture::{CaptureLayer, SharedStorage};
use tracing_subscriber::layer::SubscriberExt;

use std::{
    net::Ipv4Addr,
    str,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use super::*;
use crate::{GroupingKey, PublishError, PushGateway};
use cimetrics::{LabelSet, MetricDefinition};

const TEST_TIMEOUT: Duration = Duration::from_secs(3);

fn test_registry() -> (Arc<Registry>, MetricDefinition, MetricDefinition) {
    let up = MetricDefinition::gauge("exporter_up", "Whether upstream is reachable.", &[]).unwrap();
    let bugs = MetricDefinition::gauge("quality_bugs", "SonarQube metric: bugs", &["project"])
        .unwrap();
    let registry = Registry::new([up.clone(), bugs.clone()]).unwrap();
    (Arc::new(registry), up, bugs)
}

fn report_metrics(registry: &Registry, up: &MetricDefinition, bugs: &MetricDefinition) {
    registry.set(up, LabelSet::empty(), 1.0).unwrap();
    registry
        .set(bugs, bugs.labels(["backend"]).unwrap(), 7.0)
        .unwrap();
}

fn assert_scraped_payload_is_valid(payload: &[u8]) {
    let payload = str::from_utf8(payload).unwrap();
    let payload_lines: Vec<_> = payload.lines().collect();

    assert!(payload_lines.iter().all(|line| !line.is_empty()));

    let expected_lines = [
        "# TYPE exporter_up gauge",
        "exporter_up 1.0",
        "# TYPE quality_bugs gauge",
        r#"quality_bugs{project="backend"} 7.0"#,
    ];
    for line in expected_lines {
        assert!(payload_lines.contains(&line), "{payload_lines:#?}");
    }
    assert!(!payload_lines.contains(&"# EOF"), "{payload_lines:#?}");
}

async fn get(uri: Uri) -> (StatusCode, HeaderMap, Bytes) {
    let client = Client::builder(TokioExecutor::new()).build_http::<String>();
    let response = tokio::time::timeout(TEST_TIMEOUT, client.get(uri))
        .await
        .expect("timed out waiting for response")
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

#[test]
fn rendering_scrape_responses() {
    let (registry, up, bugs) = test_registry();
    report_metrics(&registry, &up, &bugs);
    let inner = MetricsExporterInner {
        registry,
        format: Format::Prometheus,
    };

    let request = Request::get(METRICS_PATH).body(()).unwrap();
    let response = inner.render(&request);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        Format::PROMETHEUS_CONTENT_TYPE
    );
    assert_scraped_payload_is_valid(response.body().as_bytes());

    let request = Request::get("/").body(()).unwrap();
    assert_eq!(inner.render(&request).status(), StatusCode::NOT_FOUND);
    let request = Request::post(METRICS_PATH).body(()).unwrap();
    assert_eq!(inner.render(&request).status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn serving_metrics() {
    let (registry, up, bugs) = test_registry();
    let (stop_sender, mut stop_receiver) = watch::channel(());
    let server = MetricsExporter::new(Arc::clone(&registry))
        .with_graceful_shutdown(async move {
            stop_receiver.changed().await.ok();
        })
        .bind((Ipv4Addr::LOCALHOST, 0).into())
        .await
        .unwrap();
    let local_addr = server.local_addr();
    let server_task = tokio::spawn(server.start());

    // Declared metrics are served even before any values are reported.
    let uri: Uri = format!("http://{local_addr}{METRICS_PATH}").parse().unwrap();
    let (status, _, body) = get(uri.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let body = str::from_utf8(&body).unwrap();
    assert!(body.contains("# TYPE exporter_up gauge"), "{body}");

    report_metrics(&registry, &up, &bugs);
    let (status, headers, body) = get(uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_TYPE],
        Format::PROMETHEUS_CONTENT_TYPE
    );
    assert_scraped_payload_is_valid(&body);

    stop_sender.send_replace(());
    tokio::time::timeout(TEST_TIMEOUT, server_task)
        .await
        .expect("server didn't shut down")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn serving_open_metrics() {
    let (registry, up, bugs) = test_registry();
    report_metrics(&registry, &up, &bugs);
    let server = MetricsExporter::new(registry)
        .with_format(Format::OpenMetrics)
        .bind((Ipv4Addr::LOCALHOST, 0).into())
        .await
        .unwrap();
    let local_addr = server.local_addr();
    tokio::spawn(server.start());

    let uri = format!("http://{local_addr}{METRICS_PATH}").parse().unwrap();
    let (status, headers, body) = get(uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_TYPE],
        Format::OPEN_METRICS_CONTENT_TYPE
    );
    let body = str::from_utf8(&body).unwrap();
    assert!(body.ends_with("# EOF\n"), "{body}");
}

#[derive(Debug)]
enum MockServerBehavior {
    Ok,
    Error,
}

impl MockServerBehavior {
    fn from_counter(counter: &AtomicU32) -> Self {
        match counter.fetch_add(1, Ordering::SeqCst) % 2 {
            1 => Self::Error,
            _ => Self::Ok,
        }
    }

    fn response(self) -> Response<String> {
        match self {
            Self::Ok => Response::builder()
                .status(StatusCode::ACCEPTED)
                .body(String::new())
                .unwrap(),
            Self::Error => Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body("Mistake!".to_owned())
                .unwrap(),
        }
    }
}

type PushedRequest = (Method, String, HeaderMap, Bytes);

/// Binds a mock push gateway to a random free port.
async fn start_mock_gateway(
    counter: &'static AtomicU32,
) -> (SocketAddr, mpsc::UnboundedReceiver<PushedRequest>) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    let (req_sender, req_receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let req_sender = req_sender.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let req_sender = req_sender.clone();
                    let behavior = MockServerBehavior::from_counter(counter);
                    async move {
                        let method = req.method().clone();
                        let path = req.uri().path().to_owned();
                        let headers = req.headers().clone();
                        let body = req.into_body().collect().await?.to_bytes();
                        req_sender.send((method, path, headers, body)).ok();
                        Ok::<_, hyper::Error>(behavior.response())
                    }
                });
                http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                    .ok();
            });
        }
    });
    (local_addr, req_receiver)
}

fn tracing_subscriber(storage: &SharedStorage) -> impl Subscriber {
    tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .finish()
        .with(CaptureLayer::new(storage))
}

#[tokio::test]
async fn using_push_gateway() {
    static REQUEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    let tracing_storage = SharedStorage::default();
    let _subscriber_guard = tracing::subscriber::set_default(tracing_subscriber(&tracing_storage));
    // ^ **NB.** `set_default()` only works because tests use a single-threaded Tokio runtime

    let (local_addr, mut req_receiver) = start_mock_gateway(&REQUEST_COUNTER).await;
    let (registry, up, bugs) = test_registry();
    report_metrics(&registry, &up, &bugs);

    let key = GroupingKey::new("sonarqube_exporter").unwrap();
    let gateway = PushGateway::new(&format!("http://{local_addr}"), &key).unwrap();

    // The gateway fails every other push; failures must not affect subsequent pushes.
    for i in 0..4 {
        let result = gateway.push(&registry).await;
        if i % 2 == 0 {
            result.unwrap();
        } else {
            let err = result.unwrap_err();
            assert_matches!(
                &err,
                PublishError::Status { status, body, .. }
                    if *status == StatusCode::SERVICE_UNAVAILABLE && body == "Mistake!"
            );
        }

        let (method, path, headers, body) = tokio::time::timeout(TEST_TIMEOUT, req_receiver.recv())
            .await
            .expect("timed out waiting for metrics push")
            .unwrap();
        assert_eq!(method, Method::PUT);
        assert_eq!(path, "/metrics/job/sonarqube_exporter");
        assert_eq!(
            headers[header::CONTENT_TYPE],
            Format::PROMETHEUS_CONTENT_TYPE
        );
        assert_scraped_payload_is_valid(&body);
    }

    assert_logs(&tracing_storage.lock());
}

fn assert_logs(tracing_storage: &tracing_capture::Storage) {
    let warnings = tracing_storage.all_events().filter(|event| {
        event
            .metadata()
            .target()
            .starts_with(env!("CARGO_CRATE_NAME"))
            && *event.metadata().level() <= tracing::Level::WARN
    });
    let warnings: Vec<_> = warnings.collect();
    assert_eq!(warnings.len(), 2);

    let warning: &tracing_capture::CapturedEvent = &warnings[0];
    assert!(warning
        .message()
        .unwrap()
        .contains("Error pushing metrics to push gateway"));
    assert_eq!(
        warning["status"].as_debug_str().unwrap(),
        StatusCode::SERVICE_UNAVAILABLE.to_string()
    );
    assert_eq!(warning["body"].as_debug_str().unwrap(), "Mistake!");
    assert!(warning["endpoint"]
        .as_debug_str()
        .unwrap()
        .starts_with("http://127.0.0.1:"));
}

#[tokio::test]
async fn unreachable_push_gateway() {
    // Bind and immediately drop a listener to get a port nobody listens on.
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    drop(listener);

    let (registry, ..) = test_registry();
    let key = GroupingKey::new("sonarqube_exporter").unwrap();
    let gateway = PushGateway::new(&format!("http://{local_addr}"), &key)
        .unwrap()
        .with_timeout(TEST_TIMEOUT);
    let err = gateway.push(&registry).await.unwrap_err();
    assert_matches!(err, PublishError::Request { .. } | PublishError::Timeout { .. });
}

#[tokio::test]
async fn stalled_error_response_times_out() {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = [0_u8; 4_096];
        let read = stream.read(&mut buffer).await.unwrap();
        assert!(read > 0);
        let head = "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 1024\r\n\r\nMistake";
        stream.write_all(head.as_bytes()).await.unwrap();
        // The rest of the body never arrives.
        std::future::pending::<()>().await;
    });

    let push_timeout = Duration::from_millis(200);
    let (registry, ..) = test_registry();
    let key = GroupingKey::new("sonarqube_exporter").unwrap();
    let gateway = PushGateway::new(&format!("http://{local_addr}"), &key)
        .unwrap()
        .with_timeout(push_timeout);
    let err = tokio::time::timeout(TEST_TIMEOUT, gateway.push(&registry))
        .await
        .expect("push outlived its timeout")
        .unwrap_err();
    assert_matches!(err, PublishError::Timeout { timeout, .. } if timeout == push_timeout);
}
