//! Part Transport Integration Tests
//!
//! PUTs part bodies to presigned URLs served by a mock store and checks how
//! responses are classified.

mod common;

#[cfg(test)]
mod tests {
    use super::common::{fast_config, payload, writer, FakeGateway, MIB};
    use bytes::Bytes;
    use chrono::{Duration as ChronoDuration, Utc};
    use kura_uploadr::s3::PartAuthorization;
    use kura_uploadr::upload::{
        HttpPartTransport, MultipartUploader, PartTransport, SessionStatus, TransferError,
        UploadRequest,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn authorization(server: &MockServer, part_number: u32) -> PartAuthorization {
        PartAuthorization {
            part_number,
            url: format!(
                "{}/org-7f3a/big.bin?partNumber={}&uploadId=u-1",
                server.uri(),
                part_number
            ),
            expires_at: Utc::now() + ChronoDuration::minutes(15),
        }
    }

    fn transport() -> HttpPartTransport {
        HttpPartTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_put_part_returns_unquoted_etag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/org-7f3a/big.bin"))
            .and(query_param("partNumber", "1"))
            .and(query_param("uploadId", "u-1"))
            .and(header("content-type", "application/octet-stream"))
            .and(body_bytes(b"part one".to_vec()))
            .respond_with(
                ResponseTemplate::new(200).insert_header("ETag", "\"5d41402abc4b2a76b9719d911017c592\""),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let etag = transport()
            .put_part(&authorization(&mock_server, 1), Bytes::from("part one"))
            .await
            .unwrap();

        assert_eq!(etag, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_missing_etag_is_an_integrity_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let err = transport()
            .put_part(&authorization(&mock_server, 2), Bytes::from("data"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Integrity(_)), "got {:?}", err);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<Error><Code>SlowDown</Code></Error>"))
            .mount(&mock_server)
            .await;

        let err = transport()
            .put_part(&authorization(&mock_server, 1), Bytes::from("data"))
            .await
            .unwrap_err();

        match &err {
            TransferError::Status { status, message } => {
                assert_eq!(*status, 503);
                assert!(message.contains("SlowDown"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
        assert!(err.is_transient());
        assert!(!err.requires_fresh_authorization());
    }

    #[tokio::test]
    async fn test_bad_request_is_fatal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&mock_server)
            .await;

        let err = transport()
            .put_part(&authorization(&mock_server, 1), Bytes::from("data"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TransferError::Status {
                status: 400,
                message: "Bad Request".into()
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_expired_signature_requires_fresh_authorization() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Request has expired"))
            .mount(&mock_server)
            .await;

        let err = transport()
            .put_part(&authorization(&mock_server, 1), Bytes::from("data"))
            .await
            .unwrap_err();

        assert!(err.requires_fresh_authorization());
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_a_network_error() {
        // Nothing listens on port 1
        let auth = PartAuthorization {
            part_number: 1,
            url: "http://127.0.0.1:1/org-7f3a/big.bin?partNumber=1".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(15),
        };

        let err = transport()
            .put_part(&auth, Bytes::from("data"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Network(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_full_upload_through_http_transport() {
        let mock_server = MockServer::start().await;

        for part_number in 1..=3 {
            Mock::given(method("PUT"))
                .and(path("/org-7f3a/media/big.bin"))
                .and(query_param("partNumber", part_number.to_string()))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("ETag", format!("\"etag-{}\"", part_number).as_str()),
                )
                .expect(1)
                .mount(&mock_server)
                .await;
        }

        let gateway = Arc::new(FakeGateway::with_part_base_url(mock_server.uri()));
        let uploader =
            MultipartUploader::new(gateway.clone(), Arc::new(transport()), fast_config()).unwrap();

        let report = uploader
            .upload(
                &writer(),
                UploadRequest {
                    path: "media/big.bin".into(),
                    content_type: "application/octet-stream".into(),
                    source: Arc::new(payload(12 * MIB)),
                },
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        let calls = gateway.calls.lock();
        let etags: Vec<_> = calls.completed[0].iter().map(|p| p.etag.as_str()).collect();
        assert_eq!(etags, vec!["etag-1", "etag-2", "etag-3"]);
    }
}
