//! Shared test helpers for the sync engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindloom_cloud::api_client::MapApiClient;
use mindloom_cloud::auth::AuthProvider;
use mindloom_cloud::config::CloudConfig;
use mindloom_types::{MapNode, MindMap, ROOT_NODE_ID};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Switchable auth double: starts anonymous or signed in, and can flip
/// mid-test to model login/logout.
pub struct StaticAuth {
    user: Mutex<Option<String>>,
}

impl StaticAuth {
    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(None),
        })
    }

    pub fn signed_in(user: &str) -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(Some(user.to_string())),
        })
    }

    pub fn login(&self, user: &str) {
        *self.user.lock().unwrap() = Some(user.to_string());
    }

    pub fn logout(&self) {
        *self.user.lock().unwrap() = None;
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn authorization_header(&self) -> Option<String> {
        self.user
            .lock()
            .unwrap()
            .as_ref()
            .map(|u| format!("Bearer test-token-{u}"))
    }

    fn current_user(&self) -> Option<String> {
        self.user.lock().unwrap().clone()
    }
}

/// Config pointed at a mock server, with timings short enough for tests.
pub fn test_config(api_base_url: &str) -> CloudConfig {
    CloudConfig {
        api_base_url: api_base_url.to_string(),
        init_timeout_ms: 2_000,
        sync_interval_secs: 1,
        sync_backoff_cap_secs: 60,
        poll_interval_ms: 1_000,
        poll_jitter_ms: 0,
        cache_ttl_days: 30,
        cache_max_entries: 100,
        janitor_min_interval_hours: 24,
    }
}

pub fn test_client(server: &MockServer, auth: Arc<dyn AuthProvider>) -> Arc<MapApiClient> {
    Arc::new(MapApiClient::new(test_config(&server.uri()), auth))
}

/// A small map with a fixed id, one child node, and a pinned timestamp
/// so server/mirror copies compare equal.
pub fn make_map(id: &str, title: &str) -> MindMap {
    let mut map = MindMap::new(title);
    map.id = id.to_string();
    map.created_at = fixed_time(0);
    map.updated_at = fixed_time(0);
    map.root.children.push(MapNode::new(format!("{id}-n1"), "first idea"));
    assert_eq!(map.root.id, ROOT_NODE_ID);
    map
}

/// Deterministic timestamps, `offset_secs` apart.
pub fn fixed_time(offset_secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + chrono::Duration::seconds(offset_secs)
}

pub async fn mount_health(server: &MockServer, healthy: bool) {
    let status = if healthy { 200 } else { 503 };
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

pub async fn mount_list(server: &MockServer, maps: &[MindMap]) {
    Mock::given(method("GET"))
        .and(path("/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(maps))
        .mount(server)
        .await;
}

pub async fn mount_update_ok(server: &MockServer, map: &MindMap) {
    Mock::given(method("PUT"))
        .and(path(format!("/documents/{}", map.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(map))
        .mount(server)
        .await;
}
