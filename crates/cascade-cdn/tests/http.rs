//! HTTP behavior against a local mock CDN: ranges, retry, failover.

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cascade_cdn::{ByteRange, CdnClient, CdnHosts, Error, PatchServer, Region, RetryPolicy};

const HASH: &str = "0017a402f556fbece46c38dc431a2c9b";

fn fast_client() -> CdnClient {
    CdnClient::new()
        .expect("client")
        .with_policy(RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 1.0,
            jitter: 0.0,
        })
}

fn hosts_for(servers: &[&MockServer]) -> CdnHosts {
    CdnHosts::new(
        fast_client(),
        servers.iter().map(|s| s.uri()).collect(),
        "tpr/wow",
    )
}

#[tokio::test]
async fn range_requests_carry_the_byte_range_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/tpr/wow/data/00/17/{HASH}")))
        .and(header("range", "bytes=1024-1123"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7u8; 100]))
        .expect(1)
        .mount(&server)
        .await;

    let hosts = hosts_for(&[&server]);
    let bytes = hosts
        .data_range(HASH, ByteRange::at(1024, 100))
        .await
        .unwrap();
    assert_eq!(bytes.len(), 100);
}

#[tokio::test]
async fn server_errors_retry_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/tpr/wow/config/00/17/{HASH}")))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/tpr/wow/config/00/17/{HASH}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"root = abc".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let hosts = hosts_for(&[&server]);
    let bytes = hosts.config(HASH).await.unwrap();
    assert_eq!(&bytes[..], b"root = abc");
}

#[tokio::test]
async fn not_found_fails_fast_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/tpr/wow/data/00/17/{HASH}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let hosts = hosts_for(&[&server]);
    let err = hosts.data(HASH).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { hash } if hash == HASH));
}

#[tokio::test]
async fn failing_host_falls_through_to_the_next() {
    let bad = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&bad)
        .await;

    let good = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/tpr/wow/data/00/17/{HASH}.index")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"index-bytes".to_vec()))
        .expect(1)
        .mount(&good)
        .await;

    let hosts = hosts_for(&[&bad, &good]);
    let bytes = hosts.index(HASH).await.unwrap();
    assert_eq!(&bytes[..], b"index-bytes");
}

#[tokio::test]
async fn exhausted_hosts_surface_a_network_error() {
    let bad = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&bad)
        .await;

    let hosts = hosts_for(&[&bad]);
    let err = hosts.data(HASH).await.unwrap_err();
    assert!(matches!(err, Error::AllHostsFailed { hosts: 1, .. }));
}

#[tokio::test]
async fn empty_host_list_is_its_own_error() {
    let hosts = CdnHosts::new(fast_client(), Vec::new(), "tpr/wow");
    assert!(matches!(hosts.data(HASH).await, Err(Error::NoHosts)));
}

#[tokio::test]
async fn patch_server_parses_versions_and_cdns() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wow/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|KeyRing!HEX:16|BuildId!DEC:4|VersionsName!String:0|ProductConfig!HEX:16\n\
             us|be2bb98dc28aeb90da2e333a12467724|0e87b87f5e93df28ba97d1b1f4f83a89||53262|11.0.7.53262|\n\
             eu|be2bb98dc28aeb90da2e333a12467724|0e87b87f5e93df28ba97d1b1f4f83a89||53262|11.0.7.53262|\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wow/cdns"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "Name!STRING:0|Path!STRING:0|Hosts!STRING:0|Servers!STRING:0|ConfigPath!STRING:0\n\
             eu|tpr/wow|eu.cdn.example level3.example||tpr/configs/data\n",
        ))
        .mount(&server)
        .await;

    let patch = PatchServer::with_base(fast_client(), server.uri());
    let version = patch.version_for("wow", Region::Eu).await.unwrap();
    assert_eq!(version.build_config, "be2bb98dc28aeb90da2e333a12467724");
    assert_eq!(version.build_id, 53262);

    let cdn = patch.cdn_for("wow", Region::Eu).await.unwrap();
    assert_eq!(cdn.path, "tpr/wow");
    assert_eq!(cdn.hosts, ["eu.cdn.example", "level3.example"]);

    let missing = patch.version_for("wow", Region::Kr).await.unwrap_err();
    assert!(matches!(missing, Error::RegionMissing { .. }));
}
