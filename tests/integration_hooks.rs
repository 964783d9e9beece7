use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fetchx::prelude::*;
use fetchx::{BeforeRequestAction, BeforeRetryAction, EffectiveOptions};
use futures_util::StreamExt;
use http::header::HeaderValue;
use http::{HeaderMap, StatusCode};

fn reply(status: u16, body: &'static [u8]) -> TransportReply {
    let stream = futures_util::stream::iter([Ok::<_, fetchx::BoxError>(Bytes::from_static(body))])
        .boxed();
    TransportReply::new(
        StatusCode::from_u16(status).expect("status should be valid"),
        HeaderMap::new(),
        Some(stream),
    )
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[tokio::test]
async fn before_request_mutations_reach_the_transport() {
    let observed = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&observed);
    let transport = transport_fn(move |request| {
        let seen = Arc::clone(&seen);
        async move {
            *lock_unpoisoned(&seen) = request
                .headers()
                .get("x-trace")
                .map(|value| value.as_bytes().to_vec());
            Ok(reply(200, b"ok"))
        }
    });

    let stamp = move |request: &mut Request,
                      _: &EffectiveOptions|
          -> fetchx::Result<BeforeRequestAction> {
        request
            .headers_mut()
            .insert("x-trace", HeaderValue::from_static("stamped"));
        Ok(BeforeRequestAction::Continue)
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .before_request(stamp)
        .try_build()
        .expect("client should build");

    client
        .get("traced")
        .send()
        .await
        .expect("call should succeed");
    assert_eq!(
        lock_unpoisoned(&observed).as_deref(),
        Some(b"stamped".as_slice())
    );
}

#[tokio::test]
async fn before_request_short_circuit_skips_the_transport() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let transport = transport_fn(move |_request| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(reply(200, b"from transport"))
        }
    });

    let answer = |request: &mut Request,
                  _: &EffectiveOptions|
          -> fetchx::Result<BeforeRequestAction> {
        Ok(BeforeRequestAction::Respond(Response::from_bytes(
            StatusCode::OK,
            HeaderMap::new(),
            request.url_str().to_owned(),
            Bytes::from_static(b"from cache"),
        )))
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .try_build()
        .expect("client should build");

    let response = client
        .get("cached")
        .before_request(answer)
        .send()
        .await
        .expect("hook response should be returned");

    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    let body = response.bytes().await.expect("body should drain");
    assert_eq!(body.as_ref(), b"from cache");
}

#[tokio::test]
async fn after_response_may_replace_the_response() {
    let transport = transport_fn(|_request| async { Ok(reply(200, b"raw")) });

    let rewrite = |_: &Request,
                   _: &EffectiveOptions,
                   response: Response|
          -> fetchx::Result<Response> {
        Ok(Response::from_bytes(
            StatusCode::CREATED,
            HeaderMap::new(),
            response.url().to_owned(),
            Bytes::from_static(b"patched"),
        ))
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .after_response(rewrite)
        .try_build()
        .expect("client should build");

    let response = client
        .get("rewritten")
        .send()
        .await
        .expect("call should succeed");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response.bytes().await.expect("body should drain");
    assert_eq!(body.as_ref(), b"patched");
}

#[tokio::test]
async fn before_error_replacement_is_what_the_caller_sees() {
    let transport = transport_fn(|_request| async { Ok(reply(500, b"boom")) });

    let soften = |error: Error| -> Error {
        Error::Validation {
            message: format!("wrapped: {}", error.code().as_str()),
        }
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .before_error(soften)
        .try_build()
        .expect("client should build");

    let error = client
        .get("broken")
        .retry_policy(RetryPolicy::disabled())
        .send()
        .await
        .expect_err("call should fail");

    assert_eq!(error.code(), ErrorCode::Validation);
    assert!(error.to_string().contains("wrapped: http_status"));
}

#[tokio::test]
async fn hook_errors_funnel_through_before_error() {
    let transport = transport_fn(|_request| async { Ok(reply(200, b"fine")) });

    let explode = |_: &Request, _: &EffectiveOptions, response: Response| -> fetchx::Result<Response> {
        let _ = response;
        Err(Error::ReadBody {
            source: "inspection failed".into(),
        })
    };
    let mark = |error: Error| -> Error {
        Error::Validation {
            message: format!("seen by before-error: {}", error.code().as_str()),
        }
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .after_response(explode)
        .before_error(mark)
        .try_build()
        .expect("client should build");

    let error = client.get("a").send().await.expect_err("hook error should surface");
    assert_eq!(error.code(), ErrorCode::Validation);
    assert!(error.to_string().contains("read_body"));
}

#[tokio::test]
async fn before_retry_observes_attempt_index_and_can_stop() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let transport = transport_fn(move |_request| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(reply(503, b"still down"))
        }
    });

    let next_attempts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&next_attempts);
    let stop_late = move |_: &mut Request,
                          _: &EffectiveOptions,
                          error: &Error,
                          next_attempt: usize|
          -> fetchx::Result<BeforeRetryAction> {
        assert_eq!(error.status(), Some(503));
        lock_unpoisoned(&recorded).push(next_attempt);
        if next_attempt >= 3 {
            Ok(BeforeRetryAction::Stop)
        } else {
            Ok(BeforeRetryAction::Continue)
        }
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .before_retry(stop_late)
        .try_build()
        .expect("client should build");

    let error = client
        .get("unstable")
        .retry_policy(
            RetryPolicy::standard()
                .max_attempts(5)
                .base_backoff(Duration::from_millis(1))
                .jitter_ratio(0.0),
        )
        .send()
        .await
        .expect_err("stopped call should fail");

    // Attempt 1 and 2 run; the hook vetoes the third.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(*lock_unpoisoned(&next_attempts), vec![2, 3]);
    assert_eq!(error.status(), Some(503));
}

#[tokio::test]
async fn hooks_run_in_registration_order_across_layers() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let transport = transport_fn(|_request| async { Ok(reply(200, b"ok")) });

    let recorded = Arc::clone(&order);
    let client_hook = move |_: &mut Request,
                            _: &EffectiveOptions|
          -> fetchx::Result<BeforeRequestAction> {
        lock_unpoisoned(&recorded).push("client");
        Ok(BeforeRequestAction::Continue)
    };

    let client = Client::builder()
        .transport(transport)
        .prefix_url("https://api.example.com")
        .before_request(client_hook)
        .try_build()
        .expect("client should build");

    let recorded = Arc::clone(&order);
    let call_hook = move |_: &mut Request,
                          _: &EffectiveOptions|
          -> fetchx::Result<BeforeRequestAction> {
        lock_unpoisoned(&recorded).push("call");
        Ok(BeforeRequestAction::Continue)
    };

    client
        .get("ordered")
        .before_request(call_hook)
        .send()
        .await
        .expect("call should succeed");

    assert_eq!(*lock_unpoisoned(&order), vec!["client", "call"]);
}
