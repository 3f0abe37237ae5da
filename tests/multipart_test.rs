//! Multipart upload lifecycle tests: initiate, upload parts, complete +
//! merge, abort, and validation failures.

mod common;

use common::TestServer;
use std::time::Duration;
use tokio::time::sleep;

async fn initiate(
    client: &reqwest::Client,
    server: &TestServer,
    bucket: &str,
    key: &str,
    size: u64,
    part_size: u64,
) -> serde_json::Value {
    let response = client
        .post(format!(
            "{}/files/{}/{}?uploads&size={}&partSize={}",
            server.endpoint(),
            bucket,
            key,
            size,
            part_size
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

async fn upload_part(
    client: &reqwest::Client,
    server: &TestServer,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u64,
    body: Vec<u8>,
) -> reqwest::Response {
    client
        .put(format!(
            "{}/files/{}/{}?uploadId={}&partNumber={}",
            server.endpoint(),
            bucket,
            key,
            upload_id,
            part_number
        ))
        .body(body)
        .send()
        .await
        .unwrap()
}

/// Poll until the merged object becomes visible (the merge runs on the
/// background queue).
async fn wait_for_object(
    client: &reqwest::Client,
    server: &TestServer,
    bucket: &str,
    key: &str,
) -> reqwest::Response {
    for _ in 0..100 {
        let response = client
            .get(format!("{}/files/{}/{}", server.endpoint(), bucket, key))
            .send()
            .await
            .unwrap();
        if response.status() == 200 {
            return response;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("merged object never appeared for {bucket}/{key}");
}

#[tokio::test]
async fn test_multipart_happy_path() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    // 11 bytes in 6-byte parts: part 0 is 6 bytes, part 1 is 5.
    let upload = initiate(&client, &server, &bucket, "big", 11, 6).await;
    assert_eq!(upload["part_size"], 6);
    assert_eq!(upload["last_part_number"], 1);
    assert_eq!(upload["last_part_size"], 5);
    assert_eq!(upload["completed"], false);
    let upload_id = upload["id"].as_str().unwrap();

    let part = upload_part(
        &client,
        &server,
        &bucket,
        "big",
        upload_id,
        0,
        b"AAAAAA".to_vec(),
    )
    .await;
    assert_eq!(part.status(), 200);
    let part = upload_part(
        &client,
        &server,
        &bucket,
        "big",
        upload_id,
        1,
        b"BBBBB".to_vec(),
    )
    .await;
    assert_eq!(part.status(), 200);

    // Complete and wait for the merge.
    let complete = client
        .post(format!(
            "{}/files/{}/big?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(complete.status(), 200);
    let completed: serde_json::Value = complete.json().await.unwrap();
    assert_eq!(completed["completed"], true);

    let get = wait_for_object(&client, &server, &bucket, "big").await;
    let etag = get.headers()["etag"].to_str().unwrap().to_string();
    let body = get.bytes().await.unwrap();
    assert_eq!(body.as_ref(), b"AAAAAABBBBB");

    // ETag matches the checksum of the assembled content.
    // md5("AAAAAABBBBB")
    assert_eq!(etag, "\"md5:3452fea26f7664ab359cfc760ae44499\"");
}

#[tokio::test]
async fn test_multipart_out_of_order_parts() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "ooo", 10, 5).await;
    let upload_id = upload["id"].as_str().unwrap();

    // Last part first.
    assert_eq!(
        upload_part(&client, &server, &bucket, "ooo", upload_id, 1, b"22222".to_vec())
            .await
            .status(),
        200
    );
    assert_eq!(
        upload_part(&client, &server, &bucket, "ooo", upload_id, 0, b"11111".to_vec())
            .await
            .status(),
        200
    );

    client
        .post(format!(
            "{}/files/{}/ooo?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap();

    let get = wait_for_object(&client, &server, &bucket, "ooo").await;
    assert_eq!(get.bytes().await.unwrap().as_ref(), b"1111122222");
}

#[tokio::test]
async fn test_multipart_exact_multiple_layout() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    // Size an exact multiple of the part size: the last part is full-sized.
    let upload = initiate(&client, &server, &bucket, "even", 12, 6).await;
    assert_eq!(upload["last_part_number"], 1);
    assert_eq!(upload["last_part_size"], 6);

    // Part size equal to total size: exactly one part.
    let upload = initiate(&client, &server, &bucket, "single", 6, 6).await;
    assert_eq!(upload["last_part_number"], 0);
    assert_eq!(upload["last_part_size"], 6);
}

#[tokio::test]
async fn test_multipart_invalid_chunk_size() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "bad", 11, 6).await;
    let upload_id = upload["id"].as_str().unwrap();

    // Part 0 must be exactly 6 bytes.
    let part = upload_part(
        &client,
        &server,
        &bucket,
        "bad",
        upload_id,
        0,
        b"AAAAA".to_vec(),
    )
    .await;
    assert_eq!(part.status(), 400);

    // Out-of-range part number.
    let part = upload_part(
        &client,
        &server,
        &bucket,
        "bad",
        upload_id,
        5,
        b"AAAAAA".to_vec(),
    )
    .await;
    assert_eq!(part.status(), 400);
}

#[tokio::test]
async fn test_multipart_complete_with_missing_parts() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "partial", 11, 6).await;
    let upload_id = upload["id"].as_str().unwrap();
    upload_part(&client, &server, &bucket, "partial", upload_id, 0, b"AAAAAA".to_vec()).await;

    let complete = client
        .post(format!(
            "{}/files/{}/partial?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(complete.status(), 400);
}

#[tokio::test]
async fn test_multipart_part_after_complete_conflicts() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "done", 6, 6).await;
    let upload_id = upload["id"].as_str().unwrap();
    upload_part(&client, &server, &bucket, "done", upload_id, 0, b"ABCDEF".to_vec()).await;

    let complete = client
        .post(format!(
            "{}/files/{}/done?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(complete.status(), 200);

    // A late part upload is refused; the merge may have already removed the
    // upload, so both 409 (still completed) and 404 (merged) are valid.
    let late = upload_part(&client, &server, &bucket, "done", upload_id, 0, b"ABCDEF".to_vec())
        .await;
    assert!(
        late.status() == 409 || late.status() == 404,
        "unexpected status {}",
        late.status()
    );
}

#[tokio::test]
async fn test_multipart_list_parts_and_uploads() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "listed", 11, 6).await;
    let upload_id = upload["id"].as_str().unwrap();
    upload_part(&client, &server, &bucket, "listed", upload_id, 1, b"BBBBB".to_vec()).await;

    // ?uploads on the bucket lists the in-progress upload.
    let uploads: serde_json::Value = client
        .get(format!("{}/files/{}?uploads", server.endpoint(), bucket))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let uploads = uploads.as_array().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0]["id"].as_str().unwrap(), upload_id);

    // ?uploadId on the object lists its parts with byte ranges.
    let parts: serde_json::Value = client
        .get(format!(
            "{}/files/{}/listed?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let parts = parts.as_array().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0]["part_number"], 1);
    assert_eq!(parts[0]["start_byte"], 6);
    assert_eq!(parts[0]["end_byte"], 10);
}

#[tokio::test]
async fn test_multipart_part_replacement() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "re", 6, 6).await;
    let upload_id = upload["id"].as_str().unwrap();

    upload_part(&client, &server, &bucket, "re", upload_id, 0, b"XXXXXX".to_vec()).await;
    // Re-upload replaces the part wholesale.
    upload_part(&client, &server, &bucket, "re", upload_id, 0, b"YYYYYY".to_vec()).await;

    client
        .post(format!(
            "{}/files/{}/re?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap();

    let get = wait_for_object(&client, &server, &bucket, "re").await;
    assert_eq!(get.bytes().await.unwrap().as_ref(), b"YYYYYY");
}

#[tokio::test]
async fn test_multipart_abort() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    let upload = initiate(&client, &server, &bucket, "aborted", 11, 6).await;
    let upload_id = upload["id"].as_str().unwrap();
    upload_part(&client, &server, &bucket, "aborted", upload_id, 0, b"AAAAAA".to_vec()).await;

    let abort = client
        .delete(format!(
            "{}/files/{}/aborted?uploadId={}",
            server.endpoint(),
            bucket,
            upload_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(abort.status(), 204);

    // The upload is gone …
    let part = upload_part(&client, &server, &bucket, "aborted", upload_id, 1, b"BBBBB".to_vec())
        .await;
    assert_eq!(part.status(), 404);

    // … and no object ever appears.
    let get = client
        .get(format!("{}/files/{}/aborted", server.endpoint(), bucket))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), 404);
}

#[tokio::test]
async fn test_multipart_initiate_validation() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let bucket = server.create_bucket(&client).await;

    // Missing partSize.
    let response = client
        .post(format!(
            "{}/files/{}/x?uploads&size=10",
            server.endpoint(),
            bucket
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Zero size.
    let response = client
        .post(format!(
            "{}/files/{}/x?uploads&size=0&partSize=5",
            server.endpoint(),
            bucket
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
