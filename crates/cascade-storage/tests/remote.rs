//! End-to-end resolution against a mock CDN.

mod common;

use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cascade_cache::{CachedCdn, DiskCache};
use cascade_cdn::{CdnClient, CdnHosts};
use cascade_storage::{Storage, StorageOptions};
use cascade_tact::jenkins3;

use common::{archive_index, blte_raw, blte_zlib, ckey_of, ekey_of, encoding_table, root_table, RootBlock};

const BUILD_KEY: &str = "1234567890abcdef1234567890abcdef";
const CDN_KEY: &str = "fedcba0987654321fedcba0987654321";
const ARCHIVE: &str = "aaccee00112233445566778899aabbcc";
const LOCALE_EN_US: u32 = 0x2;

const FILE_ID: u32 = 53_188;
const FILE_NAME: &str = "character/human/male/humanmale.m2";
const FILE_CONTENT: &[u8] = b"MD21 fixture payload, not a real model";

const MISSING_ID: u32 = 60_000;

struct Fixture {
    build_config: String,
    cdn_config: String,
    index: Vec<u8>,
    archive: Vec<u8>,
    root_range: (u64, usize),
    content_range: (u64, usize),
    encoding_blte: Vec<u8>,
    encoding_ekey_hex: String,
    missing_ekey_hex: String,
}

/// One archived root, one archived content file, a loose encoding
/// table, and a second file whose blob exists nowhere.
fn build_fixture() -> Fixture {
    let content_blte = blte_zlib(FILE_CONTENT);
    let content_ckey = ckey_of(FILE_CONTENT);
    let content_ekey = ekey_of(&content_blte);

    let missing_content = b"this blob is published nowhere";
    let missing_ckey = ckey_of(missing_content);
    let missing_ekey = ekey_of(missing_content);

    let root_bytes = root_table(&[RootBlock {
        content: 0,
        locale: LOCALE_EN_US,
        records: vec![
            (FILE_ID, content_ckey, jenkins3::hash_path(FILE_NAME)),
            (MISSING_ID, missing_ckey, jenkins3::hash_path("missing/file.blp")),
        ],
    }]);
    let root_blte = blte_raw(&root_bytes);
    let root_ckey = ckey_of(&root_bytes);
    let root_ekey = ekey_of(&root_blte);

    let encoding_bytes = encoding_table(&[
        (content_ckey, vec![content_ekey], FILE_CONTENT.len() as u64),
        (missing_ckey, vec![missing_ekey], missing_content.len() as u64),
        (root_ckey, vec![root_ekey], root_bytes.len() as u64),
    ]);
    let encoding_blte = blte_raw(&encoding_bytes);
    let encoding_ckey = ckey_of(&encoding_bytes);
    let encoding_ekey = ekey_of(&encoding_blte);

    let mut archive = Vec::new();
    let root_range = (0u64, root_blte.len());
    archive.extend_from_slice(&root_blte);
    let content_range = (archive.len() as u64, content_blte.len());
    archive.extend_from_slice(&content_blte);

    let index = archive_index(&[
        (root_ekey, root_blte.len() as u32, root_range.0),
        (content_ekey, content_blte.len() as u32, content_range.0),
    ]);

    Fixture {
        build_config: format!("root = {root_ckey}\nencoding = {encoding_ckey} {encoding_ekey}\n"),
        cdn_config: format!("archives = {ARCHIVE}\n"),
        index,
        archive,
        root_range,
        content_range,
        encoding_blte,
        encoding_ekey_hex: encoding_ekey.to_string(),
        missing_ekey_hex: missing_ekey.to_string(),
    }
}

fn hash_path_of(kind: &str, hash: &str) -> String {
    format!("/tpr/wow/{}/{}/{}/{}", kind, &hash[0..2], &hash[2..4], hash)
}

async fn mount_cdn(server: &MockServer, fixture: &Fixture) {
    Mock::given(method("GET"))
        .and(path(hash_path_of("config", BUILD_KEY)))
        .respond_with(ResponseTemplate::new(200).set_body_string(fixture.build_config.clone()))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(hash_path_of("config", CDN_KEY)))
        .respond_with(ResponseTemplate::new(200).set_body_string(fixture.cdn_config.clone()))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}.index", hash_path_of("data", ARCHIVE))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture.index.clone()))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(hash_path_of("data", &fixture.encoding_ekey_hex)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture.encoding_blte.clone()))
        .expect(1)
        .mount(server)
        .await;

    // Archive slices, one mock per expected range.
    for (start, len) in [fixture.root_range, fixture.content_range] {
        let end = start + len as u64 - 1;
        let body = fixture.archive[start as usize..=end as usize].to_vec();
        Mock::given(method("GET"))
            .and(path(hash_path_of("data", ARCHIVE)))
            .and(header("range", format!("bytes={start}-{end}").as_str()))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
            .expect(1)
            .mount(server)
            .await;
    }
}

fn storage_for(server_uri: String, cache: DiskCache) -> Storage {
    let client = CdnClient::new().expect("client");
    let cached = CachedCdn::new(CdnHosts::new(client, vec![server_uri], "tpr/wow"), cache);
    Storage::remote(cached, BUILD_KEY, CDN_KEY, StorageOptions::default())
}

#[tokio::test]
async fn loads_a_build_and_reads_archived_content() {
    let fixture = build_fixture();
    let server = MockServer::start().await;
    mount_cdn(&server, &fixture).await;

    let cache_dir = TempDir::new().expect("cache dir");
    let cache = DiskCache::open_at(cache_dir.path()).await.expect("cache");
    let storage = storage_for(server.uri(), cache);

    storage.load().await.expect("load");

    let bytes = storage.read_by_id(FILE_ID).await.expect("read");
    assert_eq!(&bytes[..], FILE_CONTENT);

    let by_name = storage.read_by_name(FILE_NAME).await.expect("by name");
    assert_eq!(by_name, bytes);

    // Each mock's expect(1) verifies on drop: the second read was
    // served without another network request.
}

#[tokio::test]
async fn a_warm_cache_serves_a_build_with_no_network() {
    let fixture = build_fixture();
    let cache_dir = TempDir::new().expect("cache dir");

    {
        let server = MockServer::start().await;
        mount_cdn(&server, &fixture).await;
        let cache = DiskCache::open_at(cache_dir.path()).await.expect("cache");
        let storage = storage_for(server.uri(), cache);
        storage.load().await.expect("cold load");
        storage.read_by_id(FILE_ID).await.expect("cold read");
    }

    // A server with no mocks rejects every request; success means the
    // whole pipeline ran from the disk cache.
    let silent = MockServer::start().await;
    let cache = DiskCache::open_at(cache_dir.path()).await.expect("cache");
    let storage = storage_for(silent.uri(), cache);
    storage.load().await.expect("warm load");
    let bytes = storage.read_by_id(FILE_ID).await.expect("warm read");
    assert_eq!(&bytes[..], FILE_CONTENT);
}

#[tokio::test]
async fn unpublished_blobs_surface_as_not_found() {
    let fixture = build_fixture();
    let server = MockServer::start().await;
    mount_cdn(&server, &fixture).await;
    // No mock serves the missing blob's loose URL; the mock server
    // answers 404 like a CDN would.
    let _ = &fixture.missing_ekey_hex;

    let cache_dir = TempDir::new().expect("cache dir");
    let cache = DiskCache::open_at(cache_dir.path()).await.expect("cache");
    let storage = storage_for(server.uri(), cache);
    storage.load().await.expect("load");

    let err = storage.read_by_id(MISSING_ID).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}
