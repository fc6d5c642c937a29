use futures_util::StreamExt;
use picframe_drive::{ApiErrorClass, DriveClient, DriveError};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_about_includes_bearer_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/about"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {
                "displayName": "Frame",
                "emailAddress": "frame@example.com"
            }
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let about = client.get_about().await.unwrap();

    let user = about.user.expect("user should be present");
    assert_eq!(user.display_name.as_deref(), Some("Frame"));
    assert_eq!(user.email_address.as_deref(), Some("frame@example.com"));
}

#[tokio::test]
async fn list_folder_images_follows_page_tokens() {
    let server = MockServer::start().await;
    let query = "'folder-1' in parents and mimeType contains 'image/' and trashed = false";

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", query))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nextPageToken": "page-2",
            "files": [
                {
                    "id": "a",
                    "name": "A.jpg",
                    "mimeType": "image/jpeg",
                    "size": "1024",
                    "modifiedTime": "2024-01-01T00:00:00.000Z"
                }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", query))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                {
                    "id": "b",
                    "name": "B.png",
                    "mimeType": "image/png"
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let files = client.list_folder_images("folder-1").await.unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "A.jpg");
    assert_eq!(files[0].size_bytes(), Some(1024));
    assert_eq!(files[1].id, "b");
    assert_eq!(files[1].size_bytes(), None);
}

#[tokio::test]
async fn download_streams_media_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .and(query_param("alt", "media"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"image-bytes".to_vec()))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let mut stream = client.download("file-1").await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }

    assert_eq!(body, b"image-bytes");
}

#[tokio::test]
async fn unauthorized_response_is_classified_as_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/about"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "stale").unwrap();
    let err = client.get_about().await.unwrap_err();

    assert!(matches!(err, DriveError::Api { ref body, .. } if body == "expired"));
    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn download_failure_surfaces_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/missing"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = DriveClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = match client.download("missing").await {
        Ok(_) => panic!("expected download to fail"),
        Err(err) => err,
    };

    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
    assert!(err.is_retryable());
}
