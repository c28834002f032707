#![allow(dead_code)]

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use shopsync::notify::{ChannelNotifier, Notification};
use shopsync::{Cursor, ErrorCode, GatewayError, Page, QueryClient, QueryKey, RefetchWorker, RemoteGateway};

type Answer = Result<Value, GatewayError>;

enum Reply {
  Now(Answer),
  Deferred(oneshot::Receiver<Answer>),
}

impl Reply {
  async fn resolve(self) -> Answer {
    match self {
      Reply::Now(answer) => answer,
      Reply::Deferred(rx) => rx
        .await
        .unwrap_or_else(|_| Err(GatewayError::network("deferred reply dropped"))),
    }
  }
}

#[derive(Default)]
struct Script {
  queries: HashMap<QueryKey, VecDeque<Reply>>,
  served: HashMap<QueryKey, Value>,
  mutations: HashMap<String, VecDeque<Reply>>,
  pages: HashMap<Option<Cursor>, Page<Value>>,
  query_calls: HashMap<QueryKey, usize>,
  mutate_calls: Vec<(String, Value)>,
  page_calls: Vec<(Option<Cursor>, usize)>,
}

/// Gateway whose answers are scripted per key and operation. Deferred
/// answers are released by the test through a oneshot sender, which is how
/// tests force a specific interleaving.
#[derive(Default)]
pub struct ScriptedGateway {
  script: Mutex<Script>,
}

impl ScriptedGateway {
  fn script(&self) -> std::sync::MutexGuard<'_, Script> {
    self.script.lock().unwrap()
  }

  /// Answer the next read of `key`.
  pub fn on_query(&self, key: &QueryKey, answer: Answer) {
    self.script().queries.entry(key.clone()).or_default().push_back(Reply::Now(answer));
  }

  /// Hold the next read of `key` until the returned sender fires.
  pub fn defer_query(&self, key: &QueryKey) -> oneshot::Sender<Answer> {
    let (tx, rx) = oneshot::channel();
    self.script().queries.entry(key.clone()).or_default().push_back(Reply::Deferred(rx));
    tx
  }

  /// Answer every unscripted read of `key` with `value`.
  pub fn serve(&self, key: &QueryKey, value: Value) {
    self.script().served.insert(key.clone(), value);
  }

  pub fn on_mutate(&self, operation: &str, answer: Answer) {
    self
      .script()
      .mutations
      .entry(operation.to_string())
      .or_default()
      .push_back(Reply::Now(answer));
  }

  pub fn defer_mutate(&self, operation: &str) -> oneshot::Sender<Answer> {
    let (tx, rx) = oneshot::channel();
    self
      .script()
      .mutations
      .entry(operation.to_string())
      .or_default()
      .push_back(Reply::Deferred(rx));
    tx
  }

  pub fn on_page(&self, cursor: Option<&str>, items: Vec<Value>, next_cursor: Option<&str>) {
    self.script().pages.insert(
      cursor.map(str::to_string),
      Page {
        items,
        next_cursor: next_cursor.map(str::to_string),
      },
    );
  }

  pub fn query_calls(&self, key: &QueryKey) -> usize {
    self.script().query_calls.get(key).copied().unwrap_or(0)
  }

  pub fn mutate_calls(&self, operation: &str) -> usize {
    self
      .script()
      .mutate_calls
      .iter()
      .filter(|(op, _)| op == operation)
      .count()
  }

  pub fn mutate_payloads(&self, operation: &str) -> Vec<Value> {
    self
      .script()
      .mutate_calls
      .iter()
      .filter(|(op, _)| op == operation)
      .map(|(_, payload)| payload.clone())
      .collect()
  }

  pub fn page_calls(&self) -> Vec<(Option<Cursor>, usize)> {
    self.script().page_calls.clone()
  }
}

impl RemoteGateway for ScriptedGateway {
  fn query<'a>(&'a self, key: &'a QueryKey) -> BoxFuture<'a, Result<Value, GatewayError>> {
    let reply = {
      let mut script = self.script();
      *script.query_calls.entry(key.clone()).or_default() += 1;
      let scripted = script.queries.get_mut(key).and_then(VecDeque::pop_front);
      scripted.unwrap_or_else(|| match script.served.get(key) {
        Some(value) => Reply::Now(Ok(value.clone())),
        None => Reply::Now(Err(GatewayError::new(
          ErrorCode::Internal,
          format!("no answer scripted for {}", key),
        ))),
      })
    };
    Box::pin(reply.resolve())
  }

  fn mutate<'a>(&'a self, operation: &'a str, payload: &'a Value) -> BoxFuture<'a, Result<Value, GatewayError>> {
    let reply = {
      let mut script = self.script();
      script.mutate_calls.push((operation.to_string(), payload.clone()));
      script
        .mutations
        .get_mut(operation)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| Reply::Now(Ok(Value::Null)))
    };
    Box::pin(reply.resolve())
  }

  fn fetch_page<'a>(
    &'a self,
    _key: &'a QueryKey,
    cursor: Option<&'a str>,
    limit: usize,
  ) -> BoxFuture<'a, Result<Page<Value>, GatewayError>> {
    let page = {
      let mut script = self.script();
      let cursor = cursor.map(str::to_string);
      script.page_calls.push((cursor.clone(), limit));
      script.pages.get(&cursor).cloned()
    };
    Box::pin(async move {
      page.ok_or_else(|| GatewayError::new(ErrorCode::NotFound, "no page scripted for cursor"))
    })
  }
}

pub struct Harness {
  pub gateway: Arc<ScriptedGateway>,
  pub client: QueryClient,
  pub worker: RefetchWorker,
  pub notifications: mpsc::UnboundedReceiver<Notification>,
}

pub fn harness() -> Harness {
  let gateway = Arc::new(ScriptedGateway::default());
  let (notifier, notifications) = ChannelNotifier::new();
  let remote: Arc<dyn RemoteGateway> = gateway.clone();
  let (client, worker) = QueryClient::new(remote, Arc::new(notifier));
  Harness {
    gateway,
    client,
    worker,
    notifications,
  }
}

impl Harness {
  /// Messages notified so far, in order.
  pub fn messages(&mut self) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(notification) = self.notifications.try_recv() {
      messages.push(notification.message);
    }
    messages
  }
}

/// Yield to other tasks until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !condition() {
      tokio::task::yield_now().await;
    }
  })
  .await
  .expect("condition not reached in time");
}
