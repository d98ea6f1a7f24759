use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use clipcast_core::clip::testing::{failing_fetcher, fixed_prober};
use clipcast_core::{
    CatalogClient, CatalogError, CatalogPool, CatalogResult, CatalogService, CatalogSettings,
    Clip, ClipsPage, GetClipsParams, Pagination,
};

fn clip(id: &str, game_id: &str) -> Clip {
    Clip {
        id: id.to_string(),
        url: format!("https://clips.example.com/{id}"),
        broadcaster_name: "caster".into(),
        title: "a title".into(),
        game_id: game_id.to_string(),
        duration: 20.0,
    }
}

fn page(clips: Vec<Clip>, cursor: Option<&str>) -> ClipsPage {
    ClipsPage {
        data: clips,
        pagination: Pagination {
            cursor: cursor.map(str::to_string),
        },
    }
}

#[derive(Clone)]
enum Scripted {
    Page(ClipsPage),
    Error,
}

/// Catalog stub that replays a fixed script of responses, then keeps
/// serving the fallback entry.
struct ScriptedCatalog {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    requests: Mutex<Vec<GetClipsParams>>,
}

impl ScriptedCatalog {
    fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Scripted::Page(page(vec![], None)),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Scripted::Error,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GetClipsParams> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn get_clips(&self, params: &GetClipsParams) -> CatalogResult<ClipsPage> {
        self.requests.lock().unwrap().push(params.clone());
        let entry = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match entry {
            Scripted::Page(page) => Ok(page),
            Scripted::Error => Err(CatalogError::Api {
                status: 500,
                body: "scripted failure".into(),
            }),
        }
    }
}

fn min_date_days_ago(days: i64) -> String {
    (Utc::now() - chrono::Duration::days(days))
        .format("%B %d, %Y")
        .to_string()
}

fn settings(broadcasters: &[&str], min_date_days: i64) -> CatalogSettings {
    CatalogSettings {
        broadcaster_ids: broadcasters.iter().map(|s| s.to_string()).collect(),
        game_id: "509658".into(),
        min_date: min_date_days_ago(min_date_days),
        data_dir: "data".into(),
    }
}

fn service(
    settings: CatalogSettings,
    client: Arc<dyn CatalogClient>,
    pool: Arc<CatalogPool>,
) -> CatalogService {
    CatalogService::new(settings, client, failing_fetcher(), fixed_prober(1.0), pool)
}

fn drain_ids(pool: &CatalogPool) -> HashSet<String> {
    let mut ids = HashSet::new();
    while let Some(handle) = pool.remove_random() {
        ids.insert(handle.clip().id.clone());
    }
    ids
}

#[tokio::test(start_paused = true)]
async fn pagination_filters_and_dedupes() {
    let client = ScriptedCatalog::new(vec![
        Scripted::Page(page(
            vec![
                clip("a", "509658"),
                clip("b", "32982"), // wrong game, dropped
                clip("c", "509658"),
            ],
            Some("cursor-1"),
        )),
        Scripted::Page(page(
            vec![
                clip("a", "509658"), // duplicate from an overlapping window
                clip("d", "509658"),
            ],
            None,
        )),
    ]);
    let pool = Arc::new(CatalogPool::new());
    // one window: the second iteration would already be past the min date
    let service = service(settings(&["chan"], 100), client.clone(), pool.clone());
    let cancel = CancellationToken::new();

    service.init(&cancel).await.unwrap();
    // let the background sweep finish its paced requests
    tokio::time::sleep(Duration::from_secs(60)).await;

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].after, None);
    assert_eq!(requests[0].broadcaster_id, "chan");
    assert_eq!(requests[1].after.as_deref(), Some("cursor-1"));
    assert!(requests[0].started_at.unwrap() < requests[0].ended_at.unwrap());

    let ids = drain_ids(&pool);
    assert_eq!(
        ids,
        HashSet::from(["a".to_string(), "c".to_string(), "d".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn request_errors_retry_with_the_same_cursor() {
    let client = ScriptedCatalog::new(vec![
        Scripted::Error,
        Scripted::Page(page(vec![clip("a", "509658")], None)),
    ]);
    let pool = Arc::new(CatalogPool::new());
    let service = service(settings(&["chan"], 100), client.clone(), pool.clone());
    let cancel = CancellationToken::new();

    service.init(&cancel).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    // the failed request is repeated from the same position
    assert_eq!(requests[0].after, None);
    assert_eq!(requests[1].after, None);
    assert_eq!(pool.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn windows_walk_back_to_the_min_date() {
    let client = ScriptedCatalog::new(vec![]);
    let pool = Arc::new(CatalogPool::new());
    // 1400 days of history at 150 days per window: ten requests
    let service = service(settings(&["chan"], 1400), client.clone(), pool.clone());
    let cancel = CancellationToken::new();

    let start = tokio::time::Instant::now();
    service.init(&cancel).await.unwrap();

    let requests = client.requests();
    assert_eq!(requests.len(), 10);
    // every request slot after the first waited on the shared rate gate
    assert!(start.elapsed() >= Duration::from_secs(27));

    // consecutive windows abut: one window's start is the next window's end
    for pair in requests.windows(2) {
        assert_eq!(pair[0].started_at, pair[1].ended_at);
    }
}

#[tokio::test(start_paused = true)]
async fn empty_catalog_still_completes_init() {
    let client = ScriptedCatalog::new(vec![]);
    let pool = Arc::new(CatalogPool::new());
    let service = service(settings(&["chan-a", "chan-b"], 100), client, pool.clone());
    let cancel = CancellationToken::new();

    service.init(&cancel).await.unwrap();
    assert!(pool.is_empty());
}

#[tokio::test(start_paused = true)]
async fn init_returns_cancelled_when_shut_down_early() {
    let client = ScriptedCatalog::always_failing();
    let pool = Arc::new(CatalogPool::new());
    let service = service(settings(&["chan"], 100), client, pool);
    let cancel = CancellationToken::new();

    let init = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.init(&cancel).await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();

    let result = init.await.unwrap();
    assert!(matches!(result, Err(CatalogError::Cancelled)));
}
