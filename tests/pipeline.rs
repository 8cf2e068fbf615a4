// End-to-end: HTTP provider (wiremock) -> pipeline -> file on disk.
use std::collections::HashMap;

use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quotepipe_rs::config::{AuthSettings, Secret, Settings};
use quotepipe_rs::error::PipelineError;
use quotepipe_rs::persist::{read_records, OutputFormat};
use quotepipe_rs::pipeline::{InstrumentOutcome, Pipeline};

fn settings(base_url: String, output: std::path::PathBuf) -> Settings {
    let mut settings = Settings::default();
    settings.run.symbols = vec!["AAPL".into(), "NYSE:IBM".into()];
    settings.run.start = Some("2025-12-16T14:30:00Z".into());
    settings.run.end = Some("2025-12-16T14:34:00Z".into());
    settings.run.workers = 2;
    settings.output.path = output;
    settings.provider.base_url = base_url;
    settings.provider.records_field = "bars".into();
    settings.provider.fields = HashMap::from([
        ("timestamp".to_string(), "t".to_string()),
        ("price".to_string(), "c".to_string()),
        ("volume".to_string(), "v".to_string()),
    ]);
    settings.provider.auth = Some(AuthSettings { header: "X-Api-Key".into(), value: Secret::new("test-key") });
    settings.retry.base_delay_ms = 10;
    settings.retry.max_delay_ms = 50;
    settings.rate_limit.requests_per_second = 100.0;
    settings.rate_limit.burst = 10;
    settings
}

async fn mount_history(server: &MockServer, ticker: &str, page: Option<&str>, body: serde_json::Value) {
    let mut mock = Mock::given(method("GET"))
        .and(path("/v1/history"))
        .and(query_param("symbol", ticker))
        .and(header("X-Api-Key", "test-key"));
    mock = match page {
        Some(cursor) => mock.and(query_param("page", cursor)),
        None => mock.and(query_param_is_missing("page")),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(body)).mount(server).await;
}

#[tokio::test]
async fn paged_history_lands_in_csv_with_partial_and_failed_instruments() {
    let server = MockServer::start().await;
    // AAPL: two pages, overlapping at 14:31, 14:33 missing
    mount_history(
        &server,
        "AAPL",
        None,
        json!({"bars": [
            {"t": 1765895400, "c": "178.5", "v": 100},
            {"t": 1765895460, "c": "178.6", "v": 110},
        ], "next_page": "p2"}),
    )
    .await;
    mount_history(
        &server,
        "AAPL",
        Some("p2"),
        json!({"bars": [
            {"t": 1765895460, "c": "178.65", "v": 120},
            {"t": 1765895520, "c": "178.4"},
        ]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v1/history"))
        .and(query_param("symbol", "IBM"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("quotes.csv");
    let (pipeline, plan) = Pipeline::from_settings(&settings(server.uri(), out.clone()), CancellationToken::new()).unwrap();
    let report = pipeline.run(&plan).await.unwrap();

    assert_eq!(report.partial(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.gaps, 1);
    let aapl = plan.instruments.iter().find(|i| i.ticker() == "AAPL").unwrap();
    assert!(matches!(report.outcomes[aapl], InstrumentOutcome::Partial { rows: 3, gaps: 1 }));

    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        text,
        "timestamp,symbol,price,volume\n\
         2025-12-16T14:30:00Z,NASDAQ:AAPL,178.5,100\n\
         2025-12-16T14:31:00Z,NASDAQ:AAPL,178.65,120\n\
         2025-12-16T14:32:00Z,NASDAQ:AAPL,178.4,\n"
    );
}

#[tokio::test]
async fn transient_errors_are_retried_then_written_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/history"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bars": [
            {"t": 1765895400, "c": 10}, {"t": 1765895460, "c": 11},
            {"t": 1765895520, "c": 12}, {"t": 1765895580, "c": 13},
        ]})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("quotes.json");
    let mut settings = settings(server.uri(), out.clone());
    settings.run.symbols = vec!["MSFT".into()];
    settings.output.format = OutputFormat::Json;

    let (pipeline, plan) = Pipeline::from_settings(&settings, CancellationToken::new()).unwrap();
    let report = pipeline.run(&plan).await.unwrap();
    assert_eq!(report.succeeded(), 1);

    let rows = read_records(&out, OutputFormat::Json).unwrap();
    let prices: Vec<Decimal> = rows.iter().map(|r| r.price).collect();
    assert_eq!(prices, [10, 11, 12, 13].map(Decimal::from));
    assert!(rows.iter().all(|r| r.symbol == "NASDAQ:MSFT" && r.volume.is_none()));
}

#[tokio::test]
async fn all_instruments_failing_leaves_previous_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/history"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("quotes.csv");
    std::fs::write(&out, "yesterday\n").unwrap();

    let (pipeline, plan) = Pipeline::from_settings(&settings(server.uri(), out.clone()), CancellationToken::new()).unwrap();
    let err = pipeline.run(&plan).await.unwrap_err();
    assert!(matches!(err, PipelineError::AllFailed { instruments: 2 }));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "yesterday\n");
}

#[tokio::test]
async fn latest_mode_hits_latest_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/latest"))
        .and(query_param("symbol", "AAPL"))
        .and(query_param("exchange", "NASDAQ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bars": {"t": 1765895400, "c": "178.5"}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("latest.csv");
    let mut settings = settings(server.uri(), out.clone());
    settings.run.symbols = vec!["AAPL".into()];
    settings.run.latest = true;
    settings.run.start = None;
    settings.run.end = None;

    let (pipeline, plan) = Pipeline::from_settings(&settings, CancellationToken::new()).unwrap();
    let report = pipeline.run(&plan).await.unwrap();
    assert_eq!(report.rows_written, 1);
    assert_eq!(read_records(&out, OutputFormat::Csv).unwrap()[0].symbol, "NASDAQ:AAPL");
}

#[tokio::test]
async fn invalid_schema_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(server.uri(), dir.path().join("x.csv"));
    settings.provider.fields.insert("open".into(), "o".into());

    assert!(Pipeline::from_settings(&settings, CancellationToken::new()).is_err());
}
