use chrono::{Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use logsift::config::{load_config, parse_config, Config};
use logsift::runtime::LogSift;
use logsift_core::models::{RetrievalMethod, TimeWindow};

const LINE_A: &str = "2024-01-01 10:00:00 ERROR: Connection failed to 192.168.1.1:8080";
const LINE_B: &str = "2024-01-01 10:00:01 ERROR: Connection failed to 192.168.1.2:8080";

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/logsift.sqlite"

[tree]
max_depth = 4
similarity_threshold = 0.5

[retrieval]
default_top_k = 5
default_window_minutes = 1440
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("logsift.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

async fn open(config_path: &Path) -> LogSift {
    let config = load_config(config_path).unwrap();
    LogSift::open(config).await.unwrap()
}

fn day() -> TimeWindow {
    TimeWindow::last(Duration::hours(24))
}

#[tokio::test]
async fn test_open_creates_database() {
    let (tmp, config_path) = setup_test_env("");
    let sift = open(&config_path).await;
    assert!(tmp.path().join("data/logsift.sqlite").exists());

    let stats = sift.stats().await.unwrap();
    assert_eq!(stats.stored_entries, 0);
    assert_eq!(stats.catalog.template_count, 0);
    assert!(stats.embedding_model.is_none());
    sift.close().await;
}

#[tokio::test]
async fn test_similar_errors_collapse_to_one_template() {
    let (_tmp, config_path) = setup_test_env("");
    let sift = open(&config_path).await;

    let a = sift.ingest_line(LINE_A, Utc::now()).await.unwrap().unwrap();
    let b = sift.ingest_line(LINE_B, Utc::now()).await.unwrap().unwrap();
    assert!(a.entry.template_id.is_some());
    assert_eq!(a.entry.template_id, b.entry.template_id);

    let templates = sift.templates();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].frequency, 2);
    assert!(templates[0].canonical_pattern.iter().any(|t| t == "<IP>"));
    assert!(!templates[0].pattern_string().contains("192.168"));
    sift.close().await;
}

#[tokio::test]
async fn test_keyword_fallback_without_embedder() {
    let (_tmp, config_path) = setup_test_env("");
    let sift = open(&config_path).await;

    let a = sift.ingest_line(LINE_A, Utc::now()).await.unwrap().unwrap();
    let b = sift.ingest_line(LINE_B, Utc::now()).await.unwrap().unwrap();

    let results = sift.retrieve("connection failed", &day(), 5, None).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.method == RetrievalMethod::Keyword));
    assert!(results.iter().all(|r| (r.score - 0.5).abs() < 1e-9));

    let mut ids: Vec<_> = results.iter().map(|r| r.log_entry_id).collect();
    ids.sort();
    assert_eq!(ids, vec![a.entry.id, b.entry.id]);
    sift.close().await;
}

#[tokio::test]
async fn test_template_retrieval_excludes_source() {
    let (_tmp, config_path) = setup_test_env("");
    let sift = open(&config_path).await;

    let a = sift.ingest_line(LINE_A, Utc::now()).await.unwrap().unwrap();
    let b = sift.ingest_line(LINE_B, Utc::now()).await.unwrap().unwrap();
    sift.ingest_line("user admin logged in", Utc::now())
        .await
        .unwrap();

    let results = sift.retrieve_default(LINE_B, Some(b.entry.id)).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].log_entry_id, a.entry.id);
    assert_eq!(results[0].method, RetrievalMethod::Template);

    let hydrated = sift.hydrate(&results).await;
    assert_eq!(hydrated[0].raw_text, LINE_A);
    assert_eq!(hydrated[0].template_id, a.entry.template_id);
    sift.close().await;
}

#[tokio::test]
async fn test_empty_and_oversized_lines() {
    let (_tmp, config_path) = setup_test_env("\n[ingest]\nmax_line_bytes = 32\n");
    let sift = open(&config_path).await;

    assert!(sift.ingest_line("   \r\n", Utc::now()).await.unwrap().is_none());
    assert!(sift.ingest_line(&"x".repeat(64), Utc::now()).await.is_err());
    assert_eq!(sift.stats().await.unwrap().stored_entries, 0);
    sift.close().await;
}

#[tokio::test]
async fn test_template_ids_survive_reopen() {
    let (_tmp, config_path) = setup_test_env("");
    let line = |n: u8| format!("ERROR: Connection failed to 10.0.0.{}:8080", n);

    let first_id = {
        let sift = open(&config_path).await;
        let a = sift.ingest_line(&line(1), Utc::now()).await.unwrap().unwrap();
        sift.ingest_line(&line(2), Utc::now()).await.unwrap();
        sift.close().await;
        a.entry.template_id.unwrap()
    };

    let sift = open(&config_path).await;
    // Recent entries are replayed into the keyword index on open.
    let stats = sift.stats().await.unwrap();
    assert_eq!(stats.stored_entries, 2);
    assert_eq!(stats.lexical_entries, 2);
    assert_eq!(stats.catalog.total_frequency, 2);

    let c = sift.ingest_line(&line(3), Utc::now()).await.unwrap().unwrap();
    assert_eq!(c.entry.template_id, Some(first_id));
    assert_eq!(sift.templates()[0].frequency, 3);
    sift.close().await;
}

#[tokio::test]
async fn test_file_source_ingests_appended_lines() {
    let (tmp, _) = setup_test_env("");
    let log_path = tmp.path().join("logs").join("app.log");
    let (_tmp2, config_path) = setup_test_env(&format!(
        "\n[[ingest.sources]]\ntype = \"file\"\npath = \"{}\"\nfrom_start = true\npoll_interval_ms = 10\n",
        log_path.display()
    ));
    fs::create_dir_all(log_path.parent().unwrap()).unwrap();
    fs::write(&log_path, format!("{}\n\n{}\n", LINE_A, LINE_B)).unwrap();

    let sift = open(&config_path).await;
    let handle = sift.start_ingestion().unwrap();

    let mut ingested = 0;
    for _ in 0..500 {
        ingested = handle.stats().ingested;
        if ingested >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(ingested, 2);

    let stats = handle.shutdown().await;
    assert_eq!(stats.read, 3);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 0);

    let results = sift.retrieve_default("connection failed", None).await;
    assert_eq!(results.len(), 2);
    assert_eq!(sift.templates().len(), 1);
    sift.close().await;
}

#[tokio::test]
async fn test_anomalies_are_flagged_and_persisted() {
    let (_tmp, config_path) = setup_test_env("");
    let old = Utc::now() - Duration::hours(2);
    let (error_id, timeout_id) = {
        let sift = open(&config_path).await;
        let a = sift.ingest_line(LINE_A, Utc::now()).await.unwrap().unwrap();
        let b = sift
            .ingest_line("upstream request Timeout after 30s", old)
            .await
            .unwrap()
            .unwrap();
        let plain = sift.ingest_line("user admin logged in", Utc::now()).await.unwrap().unwrap();
        assert!(a.entry.is_anomaly);
        assert!(b.entry.is_anomaly);
        assert!(!plain.entry.is_anomaly);
        sift.close().await;
        (a.entry.id, b.entry.id)
    };

    let sift = open(&config_path).await;
    let ids: Vec<_> = sift.anomalies(&day()).await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![error_id, timeout_id]);

    let last_hour = TimeWindow::last(Duration::hours(1));
    let recent = sift.anomalies(&last_hour).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].raw_text, LINE_A);
    sift.close().await;
}

#[tokio::test]
async fn test_start_ingestion_requires_sources() {
    let (_tmp, config_path) = setup_test_env("");
    let sift = open(&config_path).await;
    assert!(sift.start_ingestion().is_err());
    sift.close().await;
}

#[test]
fn test_config_file_defaults() {
    let (_tmp, config_path) = setup_test_env("");
    let config: Config = load_config(&config_path).unwrap();
    assert_eq!(config.retrieval.default_top_k, 5);
    assert_eq!(config.tree.max_children, 100);
    assert!(config.embedding.inline);
    assert!(parse_config("[db]\npath = \"x\"\n[tree]\nmax_depth = 0\n").is_err());
}
