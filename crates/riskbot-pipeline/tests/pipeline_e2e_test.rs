//! End-to-end pipeline runs: real staging directory, real workbook parsing,
//! and either a mock HTTP endpoint or a scripted backend.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use riskbot_core::{AnalysisRequest, FailureKind, PipelineStage, PipelineState};
use riskbot_inference::mock::ScriptedBackend;
use riskbot_inference::{OpenAIBackend, OpenAIConfig, RetryPolicy};
use riskbot_pipeline::{
    failure_message, ExtractionLimits, Pipeline, PipelineConfig, SpreadsheetExtractor,
    StagingConfig, TempFileStore,
};
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_PATH: &str = "/v1/chat/completions";

// =============================================================================
// FIXTURES
// =============================================================================

fn cell_ref(col: usize, row: usize) -> String {
    format!("{}{}", riskbot_pipeline::column_letter(col), row)
}

/// Minimal single-sheet xlsx: a header row followed by `rows`.
fn workbook(header: &[&str], rows: &[Vec<String>]) -> Vec<u8> {
    let mut sheet = String::from("<row r=\"1\">");
    for (col, name) in header.iter().enumerate() {
        sheet.push_str(&format!(
            "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
            cell_ref(col, 1),
            name
        ));
    }
    sheet.push_str("</row>");
    for (idx, row) in rows.iter().enumerate() {
        let r = idx + 2;
        sheet.push_str(&format!("<row r=\"{}\">", r));
        for (col, value) in row.iter().enumerate() {
            if value.parse::<f64>().is_ok() {
                sheet.push_str(&format!("<c r=\"{}\"><v>{}</v></c>", cell_ref(col, r), value));
            } else {
                sheet.push_str(&format!(
                    "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                    cell_ref(col, r),
                    value
                ));
            }
        }
        sheet.push_str("</row>");
    }
    xlsx_package(None, &sheet)
}

/// Single-sheet xlsx with a declared `<dimension>` and the given rows XML.
fn xlsx_package(dimension: Option<&str>, rows_xml: &str) -> Vec<u8> {
    let dimension = dimension
        .map(|d| format!("<dimension ref=\"{}\"/>", d))
        .unwrap_or_default();
    let sheet = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
         {}<sheetData>{}</sheetData></worksheet>",
        dimension, rows_xml
    );

    let parts = [
        (
            "[Content_Types].xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
             <Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>\
             </Types>"
                .to_string(),
        ),
        (
            "_rels/.rels",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             <Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>\
             </Relationships>"
                .to_string(),
        ),
        (
            "xl/workbook.xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
             <sheets><sheet name=\"Sheet1\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>"
                .to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             <Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet1.xml\"/>\
             </Relationships>"
                .to_string(),
        ),
        ("xl/worksheets/sheet1.xml", sheet),
    ];

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in parts {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn project_rows(n: usize) -> Vec<Vec<String>> {
    (1..=n)
        .map(|i| {
            vec![
                format!("Project {}", i),
                (i * 100).to_string(),
                format!("0.{}", i),
            ]
        })
        .collect()
}

fn project_workbook(n: usize) -> Vec<u8> {
    workbook(&["project", "capex", "irr"], &project_rows(n))
}

fn chat_response(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

fn http_backend(uri: &str, max_attempts: u32) -> Arc<OpenAIBackend> {
    let config = OpenAIConfig {
        endpoint_url: format!("{}{}", uri, CHAT_PATH),
        api_key: Some("test-key".to_string()),
        model: "test-model".to_string(),
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            rate_limit_retries: 1,
        },
        ..Default::default()
    };
    Arc::new(OpenAIBackend::new(config).expect("Failed to create backend"))
}

fn pipeline_with(
    root: &Path,
    backend: Arc<dyn riskbot_core::AnalysisBackend>,
    limits: ExtractionLimits,
    config: PipelineConfig,
) -> Pipeline {
    Pipeline::new(
        TempFileStore::new(StagingConfig::with_root(root)),
        SpreadsheetExtractor::new(limits),
        backend,
        config,
    )
}

fn pipeline(root: &Path, backend: Arc<dyn riskbot_core::AnalysisBackend>) -> Pipeline {
    let config = PipelineConfig {
        ai_timeout: Duration::from_secs(5),
        overall_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    pipeline_with(root, backend, ExtractionLimits::default(), config)
}

fn staged_file_count(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_ten_row_sheet_is_delivered() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chat_response("Moderate risk overall.")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(dir.path(), http_backend(&server.uri(), 3));
    let outcome = pipeline
        .run(AnalysisRequest::new("portfolio.xlsx", project_workbook(10)))
        .await;

    assert!(outcome.is_delivered(), "state: {}", outcome.state);
    assert_eq!(
        outcome.history,
        vec![
            PipelineStage::Received,
            PipelineStage::Staged,
            PipelineStage::Extracted,
            PipelineStage::Analyzed,
            PipelineStage::Delivered,
        ]
    );
    assert!(!outcome.truncated);
    assert_eq!(outcome.analysis_text.as_deref(), Some("Moderate risk overall."));
    assert_eq!(outcome.messages, vec!["Moderate risk overall.".to_string()]);
    assert_eq!(staged_file_count(dir.path()), 0);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("Records: 10\n"), "content: {}", user);
    assert!(user.contains("[Sheet1 #11] project: Project 10; capex: 1000; irr: 0.1"));
    assert!(outcome.report.is_none(), "plain-text answers carry no workbook");
}

#[tokio::test]
async fn test_corrupt_file_fails_extraction_and_is_removed() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let pipeline = pipeline(dir.path(), Arc::new(backend.clone()));

    let outcome = pipeline
        .run(AnalysisRequest::new("broken.xlsx", b"definitely not a workbook".to_vec()))
        .await;

    match &outcome.state {
        PipelineState::Failed { stage, kind, .. } => {
            assert_eq!(*stage, PipelineStage::Extracted);
            assert_eq!(*kind, FailureKind::Extraction);
        }
        other => panic!("expected failure, got {}", other),
    }
    assert_eq!(
        outcome.messages,
        vec!["Error: could not read the file. Make sure it is not damaged.".to_string()]
    );
    assert_eq!(staged_file_count(dir.path()), 0);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_server_errors_then_success_is_delivered() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Low risk.")))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(dir.path(), http_backend(&server.uri(), 3));
    let outcome = pipeline
        .run(AnalysisRequest::new("model.xlsx", project_workbook(3)))
        .await;

    assert!(outcome.is_delivered(), "state: {}", outcome.state);
    assert_eq!(outcome.analysis_text.as_deref(), Some("Low risk."));
}

#[tokio::test]
async fn test_unauthorized_fails_at_analysis_after_one_attempt() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(dir.path(), http_backend(&server.uri(), 3));
    let outcome = pipeline
        .run(AnalysisRequest::new("model.xlsx", project_workbook(3)))
        .await;

    match &outcome.state {
        PipelineState::Failed { stage, kind, .. } => {
            assert_eq!(*stage, PipelineStage::Analyzed);
            assert_eq!(*kind, FailureKind::Unauthorized);
        }
        other => panic!("expected failure, got {}", other),
    }
    assert_eq!(
        outcome.messages,
        vec![failure_message(FailureKind::Unauthorized, None).to_string()]
    );
    assert_eq!(staged_file_count(dir.path()), 0);
}

// =============================================================================
// EDGE CASES
// =============================================================================

#[tokio::test]
async fn test_large_sheet_is_truncated_to_earliest_rows() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new().with_success("ok");
    let limits = ExtractionLimits {
        max_rows: 5,
        max_content_bytes: usize::MAX,
    };
    let pipeline = pipeline_with(
        dir.path(),
        Arc::new(backend.clone()),
        limits,
        PipelineConfig::default(),
    );

    let outcome = pipeline
        .run(AnalysisRequest::new("big.xlsx", project_workbook(20)))
        .await;

    assert!(outcome.is_delivered());
    assert!(outcome.truncated);
    assert!(outcome.messages.last().unwrap().contains("earliest rows"));

    let content = &backend.calls()[0].content;
    assert!(content.contains("Records: 5 of 20"));
    assert!(content.contains("Project 5;"));
    assert!(!content.contains("Project 6;"));
}

#[tokio::test]
async fn test_unsupported_extension_fails_extraction() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(dir.path(), Arc::new(ScriptedBackend::new()));

    let outcome = pipeline
        .run(AnalysisRequest::new("notes.txt", b"hello".to_vec()))
        .await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Extraction));
    assert!(outcome.messages[0].contains("only spreadsheet files"));
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn test_duplicate_request_fails_at_staging() {
    let dir = TempDir::new().unwrap();
    let store = TempFileStore::new(StagingConfig::with_root(dir.path()));
    let request_id = Uuid::now_v7();
    std::fs::create_dir_all(store.request_dir(request_id)).unwrap();
    std::fs::write(store.path_for(request_id, Some("csv")), b"in flight").unwrap();

    let pipeline = pipeline(dir.path(), Arc::new(ScriptedBackend::new()));
    let outcome = pipeline
        .run(AnalysisRequest::with_id(request_id, "model.xlsx", project_workbook(2)))
        .await;

    match &outcome.state {
        PipelineState::Failed { stage, kind, .. } => {
            assert_eq!(*stage, PipelineStage::Staged);
            assert_eq!(*kind, FailureKind::Storage);
        }
        other => panic!("expected failure, got {}", other),
    }
    // The in-flight file belongs to the other run and is left alone.
    assert_eq!(staged_file_count(dir.path()), 1);
}

#[tokio::test]
async fn test_overall_deadline_bounds_slow_analysis() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new().with_latency_ms(10_000);
    let config = PipelineConfig {
        ai_timeout: Duration::from_secs(60),
        overall_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    let pipeline = pipeline_with(
        dir.path(),
        Arc::new(backend),
        ExtractionLimits::default(),
        config,
    );

    let outcome = pipeline
        .run(AnalysisRequest::new("model.xlsx", project_workbook(2)))
        .await;

    match &outcome.state {
        PipelineState::Failed { stage, kind, .. } => {
            assert_eq!(*stage, PipelineStage::Analyzed);
            assert_eq!(*kind, FailureKind::Timeout);
        }
        other => panic!("expected failure, got {}", other),
    }
    assert!(outcome.elapsed < Duration::from_secs(5), "took {:?}", outcome.elapsed);
    assert_eq!(outcome.messages[0], "Processing error: the request timed out.");
}

#[tokio::test]
async fn test_submit_invokes_callback_with_outcome() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new().with_success(
        r#"{"risk_level": "Low", "business_score": 85, "critical_factors": ["Stable demand"]}"#,
    );
    let pipeline = pipeline(dir.path(), Arc::new(backend));

    let (tx, rx) = std::sync::mpsc::channel();
    let handle = pipeline.submit(
        AnalysisRequest::new("model.xlsx", project_workbook(4)),
        move |outcome| {
            tx.send((outcome.request_id, outcome.messages.clone())).unwrap();
        },
    );
    let outcome = handle.await.unwrap();

    let (id, messages) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(id, outcome.request_id);
    assert_eq!(messages, outcome.messages);
    assert!(messages[0].contains("Risk level: Low"));
    assert!(messages[0].contains("(Excellent)"));

    let report = outcome.report.expect("assessment should produce a workbook");
    assert_eq!(report.filename, "model_analysis.xlsx");
    assert!(report.bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new().with_latency_ms(20);
    let pipeline = pipeline(dir.path(), Arc::new(backend.clone()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let bytes = if i == 2 {
                b"corrupt".to_vec()
            } else {
                project_workbook(i + 1)
            };
            pipeline.submit(AnalysisRequest::new("model.xlsx", bytes), |_| {})
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_delivered()).count(), 3);
    assert_eq!(outcomes[2].failure_kind(), Some(FailureKind::Extraction));
    assert_eq!(backend.call_count(), 3);
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn test_far_cell_in_declared_max_range_is_streamed() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new().with_success("ok");
    let pipeline = pipeline(dir.path(), Arc::new(backend.clone()));

    let rows = "<row r=\"1\"><c r=\"A1\" t=\"inlineStr\"><is><t>item</t></is></c></row>\
                <row r=\"2\"><c r=\"A2\" t=\"inlineStr\"><is><t>bridge</t></is></c></row>\
                <row r=\"1048576\"><c r=\"XFD1048576\"><v>1</v></c></row>";
    let bytes = xlsx_package(Some("A1:XFD1048576"), rows);

    let outcome = pipeline
        .run(AnalysisRequest::new("sparse.xlsx", bytes))
        .await;

    assert!(outcome.is_delivered(), "state: {}", outcome.state);
    let content = &backend.calls()[0].content;
    assert!(content.contains("[Sheet1 #2] item: bridge"), "content: {}", content);
    assert!(content.contains("[Sheet1 #1048576] XFD: 1"), "content: {}", content);
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn test_same_request_id_is_analysed_once() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new().with_latency_ms(200);
    let pipeline = pipeline(dir.path(), Arc::new(backend.clone()));
    let request = AnalysisRequest::new("model.xlsx", project_workbook(2));

    let first = pipeline.submit(request.clone(), |_| {});
    let second = pipeline.submit(request.clone(), |_| {});
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_delivered()).count(), 1);
    let rejected = outcomes.iter().find(|o| !o.is_delivered()).unwrap();
    assert_eq!(
        rejected.state,
        PipelineState::Failed {
            stage: PipelineStage::Staged,
            kind: FailureKind::Storage,
            detail: format!("Storage error: request {} was already submitted", request.request_id),
        }
    );

    // A later re-run under another extension is refused the same way.
    let rerun = pipeline
        .run(AnalysisRequest::with_id(
            request.request_id,
            "model.csv",
            b"item,value\nfuel,12\n".to_vec(),
        ))
        .await;
    assert_eq!(rerun.failure_kind(), Some(FailureKind::Storage));
    assert_eq!(rerun.history, vec![PipelineStage::Received]);

    assert_eq!(backend.call_count(), 1);
    assert_eq!(staged_file_count(dir.path()), 0);
}
