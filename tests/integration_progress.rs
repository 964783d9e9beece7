use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fetchx::prelude::*;
use futures_util::StreamExt;
use http::header::HeaderValue;
use http::{HeaderMap, StatusCode};

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn chunked_reply(status: u16, chunks: &'static [&'static [u8]], content_length: bool) -> TransportReply {
    let mut headers = HeaderMap::new();
    if content_length {
        let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        headers.insert(
            "content-length",
            HeaderValue::from_str(&total.to_string()).expect("length header"),
        );
    }
    let stream = futures_util::stream::iter(
        chunks
            .iter()
            .copied()
            .map(|chunk| Ok::<_, fetchx::BoxError>(Bytes::from_static(chunk))),
    )
    .boxed();
    TransportReply::new(
        StatusCode::from_u16(status).expect("status should be valid"),
        headers,
        Some(stream),
    )
}

fn recording_progress(
    records: Arc<Mutex<Vec<Progress>>>,
) -> impl Fn(Progress) + Send + Sync + 'static {
    move |progress| lock_unpoisoned(&records).push(progress)
}

fn client_over(transport: impl Transport + 'static) -> Client {
    Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .try_build()
        .expect("client should build")
}

#[tokio::test]
async fn two_chunk_body_reports_exact_records_and_round_trips() {
    let transport =
        transport_fn(|_request| async { Ok(chunked_reply(200, &[b"ab", b"cd"], true)) });
    let client = client_over(transport);

    let records = Arc::new(Mutex::new(Vec::new()));
    let response = client
        .get("download")
        .on_download_progress(recording_progress(Arc::clone(&records)))
        .send()
        .await
        .expect("call should succeed");

    // The zero record is reported before the first pull.
    assert_eq!(lock_unpoisoned(&records).len(), 1);

    let body = response.bytes().await.expect("body should drain");
    assert_eq!(body.as_ref(), b"abcd");

    let records = lock_unpoisoned(&records).clone();
    assert_eq!(
        records,
        vec![
            Progress {
                percent: 0.0,
                transferred: 0,
                total: Some(4)
            },
            Progress {
                percent: 0.5,
                transferred: 2,
                total: Some(4)
            },
            Progress {
                percent: 1.0,
                transferred: 4,
                total: Some(4)
            },
        ]
    );
}

#[tokio::test]
async fn no_content_response_reports_single_completed_record() {
    let transport = transport_fn(|_request| async {
        Ok(TransportReply::new(
            StatusCode::NO_CONTENT,
            HeaderMap::new(),
            None,
        ))
    });
    let client = client_over(transport);

    let records = Arc::new(Mutex::new(Vec::new()));
    let response = client
        .get("empty")
        .on_download_progress(recording_progress(Arc::clone(&records)))
        .send()
        .await
        .expect("call should succeed");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!response.has_body());
    let body = response.bytes().await.expect("no body drains to empty");
    assert!(body.is_empty());

    assert_eq!(
        *lock_unpoisoned(&records),
        vec![Progress {
            percent: 1.0,
            transferred: 0,
            total: Some(0)
        }]
    );
}

#[tokio::test]
async fn unknown_total_reports_zero_percent() {
    let transport =
        transport_fn(|_request| async { Ok(chunked_reply(200, &[b"abc", b"de"], false)) });
    let client = client_over(transport);

    let records = Arc::new(Mutex::new(Vec::new()));
    let response = client
        .get("unsized")
        .on_download_progress(recording_progress(Arc::clone(&records)))
        .send()
        .await
        .expect("call should succeed");

    let body = response.bytes().await.expect("body should drain");
    assert_eq!(body.as_ref(), b"abcde");

    let records = lock_unpoisoned(&records).clone();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|record| record.percent == 0.0));
    assert!(records.iter().all(|record| record.total.is_none()));
    assert_eq!(records[2].transferred, 5);
}

#[tokio::test]
async fn progress_callback_from_client_defaults_applies_to_calls() {
    let transport = transport_fn(|_request| async { Ok(chunked_reply(200, &[b"xy"], true)) });

    let records = Arc::new(Mutex::new(Vec::new()));
    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .on_download_progress(recording_progress(Arc::clone(&records)))
        .try_build()
        .expect("client should build");

    let response = client.get("small").send().await.expect("call should succeed");
    let body = response.bytes().await.expect("body should drain");
    assert_eq!(body.as_ref(), b"xy");
    assert_eq!(lock_unpoisoned(&records).len(), 2);
}

#[tokio::test]
async fn cancellation_mid_stream_propagates_without_further_records() {
    let transport = transport_fn(|_request| async {
        let stream = futures_util::stream::iter([Ok::<_, fetchx::BoxError>(Bytes::from_static(
            b"first",
        ))])
        .chain(futures_util::stream::pending())
        .boxed();
        Ok(TransportReply::new(
            StatusCode::OK,
            HeaderMap::new(),
            Some(stream),
        ))
    });
    let client = client_over(transport);

    let token = CancelToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel_with_reason("stream abandoned");
    });

    let records = Arc::new(Mutex::new(Vec::new()));
    let response = client
        .get("stalling")
        .cancel_token(token)
        .on_download_progress(recording_progress(Arc::clone(&records)))
        .send()
        .await
        .expect("headers should arrive before cancellation");

    let error = response
        .bytes()
        .await
        .expect_err("stalled body should observe cancellation");
    assert!(error.is_aborted());
    assert_eq!(error.abort_reason(), Some("stream abandoned"));

    // Zero record plus the first chunk; nothing after the cancellation.
    let records = lock_unpoisoned(&records).clone();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].transferred, 5);
}

#[tokio::test]
async fn upstream_body_error_propagates_without_a_record() {
    let transport = transport_fn(|_request| async {
        let stream = futures_util::stream::iter([
            Ok::<_, fetchx::BoxError>(Bytes::from_static(b"good")),
            Err::<Bytes, fetchx::BoxError>("connection reset".into()),
        ])
        .boxed();
        Ok(TransportReply::new(
            StatusCode::OK,
            HeaderMap::new(),
            Some(stream),
        ))
    });
    let client = client_over(transport);

    let records = Arc::new(Mutex::new(Vec::new()));
    let response = client
        .get("flaky-body")
        .on_download_progress(recording_progress(Arc::clone(&records)))
        .send()
        .await
        .expect("headers should arrive");

    let error = response
        .bytes()
        .await
        .expect_err("body error should surface");
    assert_eq!(error.code(), ErrorCode::ReadBody);
    assert_eq!(lock_unpoisoned(&records).len(), 2);
}
