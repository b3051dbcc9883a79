use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use das_engine::{ClientConfig, LocalProvider, LocalProviders, Pipeline, PipelineError, unique_sorted};
use das_registry::ServiceMaps;
use das_types::{ErrorCode, RecordBody, StructuredQuery};
use das_util::{FetchError, Fetcher};
use serde_json::{Value, json};

const MAPS: &str = include_str!("data/maps.json");
const FILES: &str = include_str!("data/files.json");
const FILE_LUMIS: &str = include_str!("data/file_lumis.json");

const FILES_URL: &str = "https://cmsweb.cern.ch/dbs/prod/global/DBSReader/files?dataset=%2FA%2FB%2FC";
const FILE_LUMIS_URL: &str = "https://cmsweb.cern.ch/dbs/prod/global/DBSReader/filelumis?dataset=%2FA%2FB%2FC&validFileOnly=1";
const RUNS_URL: &str = "http://runregistry.web.cern.ch:8080/runregistry/api/runs";
const DBS_SITES_URL: &str = "https://cmsweb.cern.ch/dbs/prod/global/DBSReader/blockorigin?dataset=%2FA%2FB%2FC";
const PHEDEX_SITES_URL: &str = "https://cmsweb.cern.ch/phedex/datasvc/json/prod/blockreplicas?dataset=%2FA%2FB%2FC";

/// Serves canned payloads by URL and records every call.
#[derive(Default)]
struct FakeFetcher {
    responses: HashMap<String, Result<String, FetchError>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl FakeFetcher {
    fn with(mut self, url: &str, body: &str) -> Self {
        self.responses.insert(url.to_string(), Ok(body.to_string()));
        self
    }

    fn failing(mut self, url: &str, status: u16, body: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            Err(FetchError::Status {
                url: url.to_string(),
                status,
                body: body.to_string(),
            }),
        );
        self
    }

    fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, args: Option<&Value>) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push((url.to_string(), args.cloned()));
        self.responses.get(url).cloned().unwrap_or_else(|| {
            Err(FetchError::Network {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
        })
    }
}

#[derive(Debug)]
struct PhedexFiles;

impl LocalProvider for PhedexFiles {
    fn provide(&self, _query: &StructuredQuery) -> Result<Vec<RecordBody>, String> {
        let row = json!({"file": [{"name": "/store/data/Z.root"}]});
        Ok(vec![row.as_object().cloned().unwrap_or_default()])
    }
}

fn pipeline(fetcher: Arc<FakeFetcher>) -> Pipeline {
    let maps = ServiceMaps::from_json_str(MAPS).unwrap();
    let mut providers = LocalProviders::with_builtins(maps.das_keys()).unwrap();
    providers.register("phedex", "file4dataset", PhedexFiles).unwrap();
    providers.validate(&maps.services).unwrap();
    Pipeline::new(Arc::new(maps), fetcher, providers, ClientConfig::default())
}

fn file_query() -> StructuredQuery {
    StructuredQuery::new(["file"]).unwrap().with_spec("dataset", "/A/B/C")
}

#[tokio::test]
async fn file_query_uses_preferred_network_service() {
    let fetcher = Arc::new(FakeFetcher::default().with(FILES_URL, FILES));
    let outcome = pipeline(fetcher.clone()).run(&file_query()).await.unwrap();

    assert_eq!(fetcher.calls(), vec![(FILES_URL.to_string(), None)]);
    assert_eq!(outcome.records.len(), 5);
    assert!(outcome.records.iter().all(|record| record.das.primary_key == "file.name"));
    assert!(outcome.records.iter().all(|record| record.das.services == vec!["dbs3:files"]));
    assert_eq!(
        outcome.lines(&file_query(), " "),
        vec!["/store/data/A.root", "/store/data/B.root", "/store/data/C.root", "/store/data/D.root"]
    );
    assert!(outcome.status.is_ok());
}

#[tokio::test]
async fn detail_mode_keeps_every_record_in_merge_order() {
    let fetcher = Arc::new(FakeFetcher::default().with(FILES_URL, FILES));
    let query = file_query().with_detail(true);
    let outcome = pipeline(fetcher).run(&query).await.unwrap();
    let lines = outcome.lines(&query, " ");
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "/store/data/B.root");
    assert_eq!(lines.iter().filter(|line| line.ends_with("A.root")).count(), 2);
}

#[tokio::test]
async fn file_lumi_records_are_grouped_per_file() {
    let fetcher = Arc::new(FakeFetcher::default().with(FILE_LUMIS_URL, FILE_LUMIS));
    let query = StructuredQuery::new(["file", "lumi"]).unwrap().with_spec("dataset", "/A/B/C");
    let outcome = pipeline(fetcher).run(&query).await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    let record = &outcome.records[0];
    assert_eq!(record.get("file"), Some(&json!([{"name": "F1"}])));
    assert_eq!(record.get("lumi"), Some(&json!([{"number": [10, 20]}])));
    assert!(record.get("run").is_none());
    assert!(record.get("events").is_none());
    assert_eq!(outcome.lines(&query, " "), vec!["F1 [10,20]"]);
}

#[tokio::test]
async fn cardinality_violation_aborts_the_query() {
    let payload = r#"[{"logical_file_name": "F1", "lumi_section_num": 1}, {"logical_file_name": "F2"}]"#;
    let fetcher = Arc::new(FakeFetcher::default().with(FILE_LUMIS_URL, payload));
    let query = StructuredQuery::new(["file", "lumi"]).unwrap().with_spec("dataset", "/A/B/C");
    let error = pipeline(fetcher).run(&query).await.unwrap_err();
    assert!(matches!(error, PipelineError::Aggregation(_)), "{error}");
    assert_eq!(error.code(), ErrorCode::Aggregation);
    assert_eq!(error.code().code(), 16);
}

#[tokio::test]
async fn aggregators_emit_summaries_in_declared_order() {
    let fetcher = Arc::new(FakeFetcher::default().with(FILES_URL, FILES));
    let query = file_query().with_aggregator("count", "file").with_aggregator("sum", "file.size");
    let outcome = pipeline(fetcher).run(&query).await.unwrap();

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.records[0].get("function"), Some(&json!("count")));
    assert_eq!(outcome.records[0].get("key"), Some(&json!("file")));
    assert_eq!(outcome.records[0].get("result"), Some(&json!({"value": 5})));
    assert_eq!(outcome.records[1].get("function"), Some(&json!("sum")));
    assert_eq!(outcome.records[1].get("result"), Some(&json!({"value": 15})));
    assert_eq!(outcome.lines(&query, " "), vec!["count file 5", "sum file.size 15"]);
}

#[tokio::test]
async fn run_registry_receives_range_filter() {
    let fetcher = Arc::new(FakeFetcher::default().with(RUNS_URL, r#"[{"number": 150}, {"number": 100}]"#));
    let query = StructuredQuery::new(["run"]).unwrap().with_spec("run", vec![100_i64, 200]);
    let outcome = pipeline(fetcher.clone()).run(&query).await.unwrap();

    assert_eq!(
        fetcher.calls(),
        vec![(RUNS_URL.to_string(), Some(json!({"filter": {"number": ">= 100 and <= 200"}})))]
    );
    assert_eq!(outcome.lines(&query, " "), vec!["100", "150"]);
}

#[tokio::test]
async fn first_error_sets_status_and_is_hidden_from_lines() {
    let fetcher = Arc::new(
        FakeFetcher::default()
            .with(DBS_SITES_URL, r#"[{"origin_site_name": "T2_CH_CERN"}]"#)
            .failing(PHEDEX_SITES_URL, 503, r#"{"error": "phedex unavailable", "code": 3}"#),
    );
    let query = StructuredQuery::new(["site"]).unwrap().with_spec("dataset", "/A/B/C");
    let outcome = pipeline(fetcher.clone()).run(&query).await.unwrap();

    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.status.code, 3);
    assert_eq!(outcome.status.message.as_deref(), Some("phedex unavailable"));
    assert_eq!(outcome.lines(&query, " "), vec!["T2_CH_CERN"]);

    let envelope = outcome.envelope(&query);
    assert_eq!(envelope["status"], "fail");
    assert_eq!(envelope["nresults"], 2);
    assert_eq!(envelope["mongo_query"]["fields"], json!(["site"]));
    assert_eq!(envelope["data"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn unreachable_services_yield_no_records() {
    let fetcher = Arc::new(FakeFetcher::default());
    let outcome = pipeline(fetcher).run(&file_query()).await.unwrap();
    assert!(outcome.records.is_empty());
    assert!(outcome.status.is_ok());
    assert!(outcome.lines(&file_query(), " ").is_empty());
}

#[tokio::test]
async fn local_providers_answer_without_network() {
    let fetcher = Arc::new(FakeFetcher::default());
    let query = StructuredQuery::new(["key"]).unwrap();
    let outcome = pipeline(fetcher.clone()).run(&query).await.unwrap();
    assert!(fetcher.calls().is_empty());
    let lines = outcome.lines(&query, " ");
    assert!(lines.contains(&"dataset".to_string()));
    assert!(lines.contains(&"run".to_string()));
    assert!(outcome.records.iter().all(|record| record.das.services == vec!["das:keys"]));
}

#[tokio::test]
async fn explicit_system_reaches_local_provider() {
    let fetcher = Arc::new(FakeFetcher::default().with(FILES_URL, FILES));
    let query = file_query().with_system("phedex");
    let outcome = pipeline(fetcher.clone()).run(&query).await.unwrap();
    assert!(fetcher.calls().is_empty());
    assert_eq!(outcome.lines(&query, " "), vec!["/store/data/Z.root"]);
}

#[tokio::test]
async fn unanswerable_queries_return_nothing() {
    let fetcher = Arc::new(FakeFetcher::default());
    let query = StructuredQuery::new(["release"]).unwrap();
    let outcome = pipeline(fetcher).run(&query).await.unwrap();
    assert!(outcome.records.is_empty());
    assert!(outcome.status.is_ok());
}

#[test]
fn blocking_entry_point_runs_outside_a_runtime() {
    let fetcher = Arc::new(FakeFetcher::default().with(FILES_URL, FILES));
    let outcome = pipeline(fetcher).run_blocking(&file_query()).unwrap();
    assert_eq!(outcome.records.len(), 5);
}

#[test]
fn uniqueness_is_idempotent() {
    let lines = vec!["b".to_string(), "a".to_string(), "b".to_string()];
    let once = unique_sorted(lines);
    assert_eq!(unique_sorted(once.clone()), once);
}
