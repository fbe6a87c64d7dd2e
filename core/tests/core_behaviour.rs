//! Pipeline behaviour tests against a scripted in-memory implementer.
//!
//! No network is involved: `ScriptedImplementer` replays canned responses,
//! counts transport calls and keeps cache entries in a plain map, so ordering,
//! caching and error routing can be asserted exactly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use request_core::{
    cache_key, ApiConfig, Clock, HttpMethod, ManualClock, ModelCreator, RequestApiError, RequestApiErrorType,
    RequestApiResult, RequestCacheConfig, RequestCacheStorage, RequestCoreConfig, RequestCoreInstance,
    RequestImplementer, RequestOptions, RequestResponse, ResponseBody, TransportError,
};
use serde::Deserialize;
use serde_json::{json, Value};

const BASE: &str = "https://api.test";

#[derive(Default)]
struct ScriptedImplementer {
    responses: Mutex<VecDeque<Result<(u16, Value), TransportError>>>,
    calls: Mutex<Vec<(String, RequestOptions, Duration)>>,
    storage: Mutex<HashMap<String, RequestCacheStorage>>,
}

impl ScriptedImplementer {
    fn replying(responses: impl IntoIterator<Item = Result<(u16, Value), TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_call(&self) -> (String, RequestOptions, Duration) {
        self.calls.lock().unwrap().last().cloned().unwrap()
    }

    fn stored(&self, key: &str) -> Option<RequestCacheStorage> {
        self.storage.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl RequestImplementer for ScriptedImplementer {
    async fn get_cache(&self, key: &str) -> Option<RequestCacheStorage> {
        self.storage.lock().unwrap().get(key).cloned()
    }

    async fn set_cache(&self, key: &str, entry: &RequestCacheStorage) {
        self.storage.lock().unwrap().insert(key.to_string(), entry.clone());
    }

    async fn do_request(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RequestResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone(), timeout));
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response left".into())));
        let (status, body) = next?;
        Ok(RequestResponse::new(
            url,
            status,
            "",
            Default::default(),
            ResponseBody::Json(body),
        ))
    }
}

fn envelope(data: Value) -> Result<(u16, Value), TransportError> {
    Ok((200, json!({"code": 0, "message": "ok", "data": data})))
}

fn build(
    implementer: &Arc<ScriptedImplementer>,
    configure: impl FnOnce(RequestCoreConfig) -> RequestCoreConfig,
) -> (RequestCoreInstance, Arc<ManualClock>) {
    let api_config = Arc::new(ApiConfig {
        base_url: BASE.to_string(),
        ..ApiConfig::default()
    });
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let config = configure(RequestCoreConfig::new(&api_config));
    let instance = RequestCoreInstance::with_config(Arc::clone(implementer) as Arc<dyn RequestImplementer>, api_config, config)
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
    (instance, clock)
}

fn ttl(secs: u64) -> Option<RequestCacheConfig> {
    Some(RequestCacheConfig::enabled(Duration::from_secs(secs)))
}

// --- cache ---

#[tokio::test]
async fn cache_hit_skips_transport() {
    let implementer = ScriptedImplementer::replying([envelope(json!({"n": 1})), envelope(json!({"n": 2}))]);
    let (core, _) = build(&implementer, |c| c);

    let first = core.get("/users", "users", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();
    let second = core.get("/users", "users", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();

    assert_eq!(implementer.call_count(), 1);
    assert_eq!(first, second);
    assert_eq!(second.data, Some(json!({"n": 1})));
}

#[tokio::test]
async fn cache_entry_expires_and_is_overwritten() {
    let implementer = ScriptedImplementer::replying([envelope(json!({"n": 1})), envelope(json!({"n": 2}))]);
    let (core, clock) = build(&implementer, |c| c);
    let key = cache_key(&format!("{BASE}/users"), HttpMethod::Get);

    core.get("/users", "users", None, &ModelCreator::raw(), ttl(5), None).await.unwrap();
    let written = implementer.stored(&key).unwrap();
    assert_eq!(written.time, clock.now_millis() + 5_000);

    clock.advance(Duration::from_secs(5));
    let refreshed = core.get("/users", "users", None, &ModelCreator::raw(), ttl(5), None).await.unwrap();

    assert_eq!(implementer.call_count(), 2);
    assert_eq!(refreshed.data, Some(json!({"n": 2})));
    let rewritten = implementer.stored(&key).unwrap();
    assert_eq!(rewritten.time, clock.now_millis() + 5_000);
    assert_eq!(rewritten.data.data, Some(json!({"n": 2})));
}

#[tokio::test]
async fn disabled_or_zero_cache_always_fetches() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1)), envelope(json!(2)), envelope(json!(3))]);
    let (core, _) = build(&implementer, |c| c);
    let disabled = Some(RequestCacheConfig {
        cache_time: Duration::from_secs(60),
        cache_enable: false,
    });

    core.get("/a", "a", None, &ModelCreator::raw(), disabled, None).await.unwrap();
    core.get("/a", "a", None, &ModelCreator::raw(), disabled, None).await.unwrap();
    core.get("/a", "a", None, &ModelCreator::raw(), ttl(0), None).await.unwrap();

    assert_eq!(implementer.call_count(), 3);
    assert!(implementer.storage.lock().unwrap().is_empty());
}

#[tokio::test]
async fn only_get_requests_are_cached() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1)), envelope(json!(2))]);
    let (core, _) = build(&implementer, |c| c);

    core.post("/a", json!({}), "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();
    core.post("/a", json!({}), "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();

    assert_eq!(implementer.call_count(), 2);
    assert!(implementer.storage.lock().unwrap().is_empty());
}

#[tokio::test]
async fn errors_are_never_cached() {
    let implementer = ScriptedImplementer::replying([
        Ok((500, json!({"code": 500, "message": "down"}))),
        envelope(json!("up")),
    ]);
    let (core, _) = build(&implementer, |c| c);

    let err = core.get("/a", "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::StatusError);
    let ok = core.get("/a", "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();
    assert_eq!(ok.data, Some(json!("up")));
    assert_eq!(implementer.call_count(), 2);
}

#[tokio::test]
async fn cache_hit_bypasses_response_interceptor() {
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);
    let implementer = ScriptedImplementer::replying([envelope(json!(1))]);
    let (core, _) = build(&implementer, move |c| {
        c.with_response_interceptor(move |response| {
            *counter.lock().unwrap() += 1;
            response
        })
    });

    core.get("/a", "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();
    core.get("/a", "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), 1);
}

#[tokio::test]
async fn uncached_calls_are_independent() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1)), envelope(json!(1))]);
    let (core, _) = build(&implementer, |c| c);

    let a = core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap();
    let b = core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(implementer.call_count(), 2);
}

// --- interceptors and options ---

#[tokio::test]
async fn request_interceptor_rewrites_url_and_headers() {
    let implementer = ScriptedImplementer::replying([envelope(json!(null))]);
    let (core, _) = build(&implementer, |c| {
        c.with_default_header("X-App", "demo").with_request_interceptor(|url, mut options| {
            options.headers.insert("Authorization".into(), "Bearer t".into());
            (format!("{url}&signed=1"), options)
        })
    });
    let query = json!({"page": 1});

    core.get("/list", "list", query.as_object(), &ModelCreator::raw(), None, None)
        .await
        .unwrap();

    let (url, options, _) = implementer.last_call();
    assert_eq!(url, format!("{BASE}/list?page=1&signed=1"));
    assert_eq!(options.header("authorization"), Some("Bearer t"));
    assert_eq!(options.header("x-app"), Some("demo"));
    assert_eq!(options.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn interceptor_content_type_is_kept() {
    let implementer = ScriptedImplementer::replying([envelope(json!(null))]);
    let (core, _) = build(&implementer, |c| {
        c.with_request_interceptor(|url, mut options| {
            options.headers.insert("content-type".into(), "text/plain".into());
            (url, options)
        })
    });

    core.post("/a", json!({"x": 1}), "a", None, &ModelCreator::raw(), None, None)
        .await
        .unwrap();
    let (_, options, _) = implementer.last_call();
    assert_eq!(options.headers.len(), 1);
    assert_eq!(options.header("Content-Type"), Some("text/plain"));
}

#[tokio::test]
async fn response_interceptor_sees_raw_response() {
    let implementer = ScriptedImplementer::replying([Ok((500, json!({"code": 500})))]);
    let (core, _) = build(&implementer, |c| {
        c.with_response_interceptor(|response| {
            RequestResponse::new(
                &response.url,
                200,
                "OK",
                response.headers,
                ResponseBody::Json(json!({"code": 0, "message": "patched", "data": 7})),
            )
        })
    });

    let result = core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap();
    assert_eq!(result.message, "patched");
    assert_eq!(result.data, Some(json!(7)));
}

#[tokio::test]
async fn timeout_defaults_to_instance_and_can_be_overridden() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1)), envelope(json!(2))]);
    let (core, _) = build(&implementer, |c| c.with_timeout(Duration::from_secs(3)));

    core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap();
    assert_eq!(implementer.last_call().2, Duration::from_secs(3));

    let options = RequestOptions::new(HttpMethod::Get).with_timeout(Duration::from_millis(250));
    core.request(&core.make_url("/a", None), options, "a", &ModelCreator::raw(), None)
        .await
        .unwrap();
    assert_eq!(implementer.last_call().2, Duration::from_millis(250));
}

// --- error routing ---

#[tokio::test]
async fn transport_failure_goes_to_error_handler() {
    let implementer = ScriptedImplementer::replying([Err(TransportError::Timeout(Duration::from_secs(1)))]);
    let (core, _) = build(&implementer, |c| c);

    let err = core.get("/a", "load", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::Unknown);
    assert_eq!(err.error_type.as_str(), "unknow");
    assert_eq!(err.api_name, "load");
    assert!(err.message.contains("timed out"));
    assert_eq!(err.api_url, format!("{BASE}/a"));
    assert_eq!(err.raw_request.unwrap().method, HttpMethod::Get);
}

#[tokio::test]
async fn custom_error_handler_context_is_kept() {
    let implementer = ScriptedImplementer::replying([Err(TransportError::Network("refused".into()))]);
    let (core, _) = build(&implementer, |c| {
        c.with_response_error_handler(|_, _, api_name| {
            RequestApiError::new(RequestApiErrorType::NetworkError, "offline").with_api(api_name, "https://elsewhere/x")
        })
    });

    let err = core.get("/a", "load", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    assert_eq!(err.api_url, "https://elsewhere/x");
    assert!(err.raw_request.is_some());
}

#[tokio::test]
async fn custom_error_handler_decides_the_error() {
    let implementer = ScriptedImplementer::replying([Err(TransportError::Network("refused".into()))]);
    let (core, _) = build(&implementer, |c| {
        c.with_response_error_handler(|err, _, api_name| {
            RequestApiError::new(RequestApiErrorType::NetworkError, format!("offline: {err}")).with_api(api_name, "")
        })
    });

    let err = core.get("/a", "load", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::NetworkError);
    assert!(err.message.starts_with("offline: "));
}

#[tokio::test]
async fn status_errors_are_reported_unless_suppressed() {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let implementer = ScriptedImplementer::replying([
        Ok((401, json!({"code": 401, "message": "login"}))),
        Ok((403, json!({"code": 1001, "message": "forbidden"}))),
    ]);
    let (core, _) = build(&implementer, move |c| {
        c.with_report_error_interceptor(|_, err| err.code == 401)
            .with_report_error(move |_, err| sink.lock().unwrap().push(err.code))
    });

    let unauthorized = core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    let forbidden = core.get("/b", "b", None, &ModelCreator::raw(), None, None).await.unwrap_err();

    assert_eq!(unauthorized.code, 401);
    assert_eq!(forbidden.code, 1001);
    assert_eq!(forbidden.message, "forbidden");
    assert_eq!(*reported.lock().unwrap(), vec![1001]);
}

#[tokio::test]
async fn handler_panic_becomes_script_error() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1))]);
    let (core, _) = build(&implementer, |c| {
        c.with_response_data_handler(|_, _| -> Result<RequestApiResult, RequestApiError> { panic!("bad shape") })
    });

    let err = core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::ScriptError);
    assert_eq!(err.code, -1);
    assert!(err.message.contains("bad shape"));
    assert_eq!(err.api_url, format!("{BASE}/a"));
}

#[tokio::test]
async fn custom_data_handler_can_reject_business_codes() {
    let implementer = ScriptedImplementer::replying([Ok((200, json!({"code": 2001, "message": "no stock"})))]);
    let (core, _) = build(&implementer, |c| {
        c.with_response_data_handler(|ctx, response| {
            let json = response.json().map_err(|e| RequestApiError::new(RequestApiErrorType::ScriptError, e.to_string()))?;
            match json["code"].as_i64() {
                Some(0) => Ok(RequestApiResult::new(0, "", json.get("data").cloned(), json)),
                code => Err(RequestApiError::new(
                    RequestApiErrorType::BusinessError,
                    json["message"].as_str().unwrap_or_default(),
                )
                .with_code(code.unwrap_or(-1), "")
                .with_api(ctx.api_name, &response.url)),
            }
        })
    });

    let err = core.get("/a", "order", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::BusinessError);
    assert_eq!(err.code, 2001);
    assert_eq!(err.message, "no stock");
}

#[tokio::test]
async fn request_interceptor_panic_becomes_script_error() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1))]);
    let (core, _) = build(&implementer, |c| {
        c.with_request_interceptor(|_, _| -> (String, RequestOptions) { panic!("cannot sign") })
    });

    let err = core.get("/a", "a", None, &ModelCreator::raw(), None, None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::ScriptError);
    assert!(err.message.contains("cannot sign"));
    assert_eq!(err.api_url, format!("{BASE}/a"));
    assert_eq!(implementer.call_count(), 0);
}

#[tokio::test]
async fn response_interceptor_panic_becomes_script_error() {
    let implementer = ScriptedImplementer::replying([envelope(json!(1))]);
    let (core, _) = build(&implementer, |c| {
        c.with_response_interceptor(|_| -> RequestResponse { panic!("bad response hook") })
    });

    let err = core.get("/a", "a", None, &ModelCreator::raw(), ttl(60), None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::ScriptError);
    assert_eq!(err.code, -1);
    assert!(err.message.contains("bad response hook"));
    assert!(implementer.storage.lock().unwrap().is_empty());
}

// --- models ---

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u32,
    name: String,
}

#[tokio::test]
async fn model_is_applied_to_data() {
    let implementer = ScriptedImplementer::replying([envelope(json!({"id": 3, "name": "ada"}))]);
    let (core, _) = build(&implementer, |c| c);

    let result = core
        .get("/u/3", "user", None, &ModelCreator::<User>::deserialize(), ttl(60), None)
        .await
        .unwrap();
    assert_eq!(result.data, Some(User { id: 3, name: "ada".into() }));
    assert_eq!(result.raw["data"]["id"], 3);

    let cached = core
        .get("/u/3", "user", None, &ModelCreator::<User>::deserialize(), ttl(60), None)
        .await
        .unwrap();
    assert_eq!(cached.data, Some(User { id: 3, name: "ada".into() }));
    assert_eq!(implementer.call_count(), 1);
}

#[tokio::test]
async fn model_failure_is_a_script_error() {
    let implementer = ScriptedImplementer::replying([envelope(json!({"id": "x"}))]);
    let (core, _) = build(&implementer, |c| c);

    let err = core
        .get("/u/x", "user", None, &ModelCreator::<User>::deserialize(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::ScriptError);
    assert_eq!(err.code_message, "script exception");
}

#[tokio::test]
async fn model_receives_raw_when_data_is_missing() {
    let implementer = ScriptedImplementer::replying([Ok((200, json!({"code": 0, "total": 9})))]);
    let (core, _) = build(&implementer, |c| c);
    let total = ModelCreator::new(|raw: Value| raw["total"].as_u64().ok_or_else(|| "no total".to_string()));

    let result = core.get("/count", "count", None, &total, None, None).await.unwrap();
    assert_eq!(result.data, Some(9));
}

#[tokio::test]
async fn model_panic_becomes_script_error() {
    let implementer = ScriptedImplementer::replying([envelope(json!({"id": 1}))]);
    let (core, _) = build(&implementer, |c| c);
    let exploding = ModelCreator::new(|_: Value| -> Result<u32, String> { panic!("model blew up") });

    let err = core.get("/u/1", "user", None, &exploding, ttl(60), None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::ScriptError);
    assert!(err.message.contains("model blew up"));

    // served from cache this time
    let err = core.get("/u/1", "user", None, &exploding, ttl(60), None).await.unwrap_err();
    assert_eq!(err.error_type, RequestApiErrorType::ScriptError);
    assert_eq!(implementer.call_count(), 1);
}
