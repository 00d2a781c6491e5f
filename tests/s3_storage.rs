use std::fs;

use tempfile::TempDir;
use tokio::runtime::Runtime;
use tripdata_pipeline::error::PipelineError;
use tripdata_pipeline::period::{Category, Period};
use tripdata_pipeline::storage::{RemoteStorage, S3Bucket, S3Config};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OBJECT_PATH: &str = "/trips/raw/yellow/yellow_tripdata_2019-01.parquet";

fn object_store(rt: &Runtime, verb: &str, response: ResponseTemplate) -> MockServer {
    rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method(verb))
            .and(path(OBJECT_PATH))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    })
}

fn bucket(server: &MockServer) -> S3Bucket {
    let config = S3Config {
        endpoint: Some(server.uri()),
        region: "us-east-1".to_string(),
        bucket: "trips".to_string(),
        access_key: "minio".to_string(),
        secret_key: "minio-secret".to_string(),
        path_style: true,
    };
    S3Bucket::new(config, "raw").unwrap()
}

fn s3_error(status: u16, code: &str) -> ResponseTemplate {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Error><Code>{code}</Code><Message>{code}</Message><RequestId>r1</RequestId></Error>"
    );
    ResponseTemplate::new(status).set_body_raw(body, "application/xml")
}

fn january() -> Period {
    Period::new(2019, 1, Category::Yellow).unwrap()
}

#[test]
fn missing_object_is_not_found_and_writes_nothing() {
    let rt = Runtime::new().unwrap();
    let server = object_store(&rt, "GET", s3_error(404, "NoSuchKey"));
    let dir = TempDir::new().unwrap();
    let dest = january().artifact().local_path(dir.path());

    let err = bucket(&server).download(&january().artifact(), &dest).unwrap_err();

    assert!(matches!(err, PipelineError::NotFound { .. }), "got {err:?}");
    assert!(!dest.exists());
}

#[test]
fn other_download_errors_are_extract_errors() {
    let rt = Runtime::new().unwrap();
    let server = object_store(&rt, "GET", s3_error(403, "AccessDenied"));
    let dir = TempDir::new().unwrap();
    let dest = january().artifact().local_path(dir.path());

    let err = bucket(&server).download(&january().artifact(), &dest).unwrap_err();

    assert!(matches!(err, PipelineError::Extract { .. }), "got {err:?}");
    assert!(err.is_transient());
    assert!(!dest.exists());
}

#[test]
fn downloaded_object_lands_at_the_local_path() {
    let rt = Runtime::new().unwrap();
    let payload = b"PAR1 not really parquet PAR1".to_vec();
    let server = object_store(&rt, "GET", ResponseTemplate::new(200).set_body_bytes(payload.clone()));
    let dir = TempDir::new().unwrap();
    let dest = january().artifact().local_path(dir.path());

    bucket(&server).download(&january().artifact(), &dest).unwrap();

    assert_eq!(fs::read(&dest).unwrap(), payload);
}

#[test]
fn upload_puts_under_the_prefixed_key() {
    let rt = Runtime::new().unwrap();
    let server = object_store(&rt, "PUT", ResponseTemplate::new(200));
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("part.parquet");
    fs::write(&local, b"PAR1").unwrap();

    bucket(&server).upload(&local, &january().artifact()).unwrap();

    let requests = rt.block_on(server.received_requests()).unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), OBJECT_PATH);
}

#[test]
fn rejected_upload_is_a_publish_error() {
    let rt = Runtime::new().unwrap();
    let server = object_store(&rt, "PUT", s3_error(403, "AccessDenied"));
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("part.parquet");
    fs::write(&local, b"PAR1").unwrap();

    let err = bucket(&server).upload(&local, &january().artifact()).unwrap_err();

    assert!(matches!(err, PipelineError::Publish { ref backend, .. } if backend == "object_storage"));
}
