use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub done: bool,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Deserialize)]
pub struct UpdateItem {
    pub name: Option<String>,
    pub done: Option<bool>,
}

#[derive(Default)]
pub struct AppState {
    items: RwLock<HashMap<Uuid, Item>>,
    hits: AtomicU64,
}

pub type Db = Arc<AppState>;

type Envelope = (StatusCode, Json<Value>);

fn ok(message: &str, data: Value) -> Envelope {
    (StatusCode::OK, Json(json!({"code": 0, "message": message, "data": data})))
}

fn not_found() -> Envelope {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"code": 404, "message": "item not found"})),
    )
}

pub fn app() -> Router {
    let db: Db = Arc::new(AppState::default());
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", get(get_item).put(update_item).delete(delete_item))
        .route("/echo", any(echo))
        .route("/counter", get(counter))
        .route("/status/{code}", get(status))
        .route("/raw/{code}", get(raw))
        .route("/slow/{ms}", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_items(State(db): State<Db>) -> Envelope {
    let items = db.items.read().await;
    let mut list: Vec<Item> = items.values().cloned().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    ok("ok", json!(list))
}

async fn create_item(State(db): State<Db>, Json(input): Json<CreateItem>) -> Envelope {
    let item = Item {
        id: Uuid::new_v4(),
        name: input.name,
        done: input.done,
    };
    db.items.write().await.insert(item.id, item.clone());
    ok("created", json!(item))
}

async fn get_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Envelope {
    match db.items.read().await.get(&id) {
        Some(item) => ok("ok", json!(item)),
        None => not_found(),
    }
}

async fn update_item(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateItem>,
) -> Envelope {
    let mut items = db.items.write().await;
    let Some(item) = items.get_mut(&id) else {
        return not_found();
    };
    if let Some(name) = input.name {
        item.name = name;
    }
    if let Some(done) = input.done {
        item.done = done;
    }
    ok("updated", json!(item))
}

async fn delete_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Envelope {
    match db.items.write().await.remove(&id) {
        Some(_) => ok("deleted", Value::Null),
        None => not_found(),
    }
}

/// Reflects method, query string, headers and body back to the caller.
async fn echo(method: Method, RawQuery(query): RawQuery, headers: HeaderMap, body: String) -> Envelope {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    ok(
        "echo",
        json!({
            "method": method.as_str(),
            "query": query,
            "headers": headers,
            "body": body,
        }),
    )
}

/// Counts how many requests actually reached the server.
async fn counter(State(db): State<Db>) -> Envelope {
    let hits = db.hits.fetch_add(1, Ordering::SeqCst) + 1;
    ok("ok", json!({ "hits": hits }))
}

/// Responds with the requested status and a JSON envelope.
async fn status(Path(code): Path<u16>) -> Envelope {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        Json(json!({"code": code, "message": format!("status {code}")})),
    )
}

/// Responds with the requested status and a body that is not JSON.
async fn raw(Path(code): Path<u16>) -> (StatusCode, &'static str) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, "<html><body>not json</body></html>")
}

async fn slow(Path(ms): Path<u64>) -> Envelope {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    ok("ok", json!({ "slept": ms }))
}
