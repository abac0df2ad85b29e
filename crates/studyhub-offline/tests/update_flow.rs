//! Full update hand-off over HTTP: install v1, publish v2 on the server,
//! and let the page coordinator and synchronizer negotiate the switch.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use studyhub_core::traits::BankSource;
use studyhub_offline::fetch::ResponseSource;
use studyhub_offline::page::{PageEvent, PageHost, UpdatePrompt};
use studyhub_offline::worker::WorkerState;
use studyhub_offline::{
    CachedBankSource, FetchRequest, HttpFetcher, SyncConfig, Synchronizer, UpdateCoordinator,
};

#[derive(Clone, Default)]
struct Host {
    consent: Arc<AtomicBool>,
    reloads: Arc<AtomicU32>,
}

#[async_trait]
impl PageHost for Host {
    async fn confirm_update(&self, _prompt: &UpdatePrompt) -> bool {
        self.consent.load(Ordering::SeqCst)
    }
    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
    fn has_unsaved_progress(&self) -> bool {
        false
    }
}

async fn mount(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn config(server: &MockServer) -> SyncConfig {
    SyncConfig {
        base_url: server.uri(),
        version: "v1".into(),
        static_assets: vec!["/".into(), "/static/style.css".into()],
        quiz_data: vec!["/modules/Renal.json".into()],
        revalidate_on_hit: false,
        check_interval_secs: 3600,
        force_refresh_delay_secs: 3600,
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn consented_update_activates_and_reloads_once() {
    let server = MockServer::start().await;
    mount(&server, "/", "<html>v1</html>").await;
    mount(&server, "/static/style.css", "body {}").await;
    mount(
        &server,
        "/modules/Renal.json",
        r#"[{"id": "r1", "question": "BUN?", "answer": "7-20", "type": "fill_blank"}]"#,
    )
    .await;
    mount(&server, "/version.json", r#"{"version": "v2"}"#).await;

    let cfg = config(&server);
    let fetcher = Arc::new(HttpFetcher::new(&cfg.base_url, Some(5)).unwrap());
    let (sync, from_worker) = Synchronizer::new(cfg.clone(), fetcher);
    let sync = Arc::new(sync);

    sync.register().await.unwrap();
    assert_eq!(sync.active_version().as_deref(), Some("v1"));

    let host = Host::default();
    host.consent.store(true, Ordering::SeqCst);
    let (to_worker, worker_rx) = mpsc::channel(8);
    let (page_tx, page_rx) = mpsc::channel(8);

    let worker = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run(worker_rx).await })
    };
    let coordinator = UpdateCoordinator::new(host.clone(), to_worker, &cfg);
    let page = tokio::spawn(coordinator.run(from_worker, page_rx));

    // Coming back to the tab triggers a version check.
    page_tx
        .send(PageEvent::VisibilityChanged { visible: false })
        .await
        .unwrap();
    page_tx
        .send(PageEvent::VisibilityChanged { visible: true })
        .await
        .unwrap();

    wait_for(|| host.reloads.load(Ordering::SeqCst) == 1).await;
    assert_eq!(sync.active_version().as_deref(), Some("v2"));
    assert_eq!(sync.worker_state("v1"), Some(WorkerState::Redundant));
    assert_eq!(sync.caches().keys(), vec!["studyhub-v2"]);

    // Banks keep working from the new generation.
    let bank = CachedBankSource::new(Arc::clone(&sync))
        .load_bank("Renal")
        .await
        .unwrap();
    assert_eq!(bank.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host.reloads.load(Ordering::SeqCst), 1);

    worker.abort();
    page.abort();
}

#[tokio::test]
async fn declined_update_keeps_serving_old_generation() {
    let server = MockServer::start().await;
    mount(&server, "/", "<html>v1</html>").await;
    mount(&server, "/static/style.css", "body {}").await;
    mount(&server, "/modules/Renal.json", "[]").await;
    mount(&server, "/version.json", r#"{"version": "v2"}"#).await;

    let cfg = config(&server);
    let fetcher = Arc::new(HttpFetcher::new(&cfg.base_url, Some(5)).unwrap());
    let (sync, from_worker) = Synchronizer::new(cfg.clone(), fetcher);
    let sync = Arc::new(sync);
    sync.register().await.unwrap();

    let host = Host::default();
    let (to_worker, worker_rx) = mpsc::channel(8);
    let (page_tx, page_rx) = mpsc::channel(8);
    let worker = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run(worker_rx).await })
    };
    let page = tokio::spawn(UpdateCoordinator::new(host.clone(), to_worker, &cfg).run(from_worker, page_rx));

    page_tx
        .send(PageEvent::PageShow { persisted: true })
        .await
        .unwrap();

    wait_for(|| sync.waiting_version().as_deref() == Some("v2")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Nothing switched: v1 still serves, v2 waits.
    assert_eq!(sync.active_version().as_deref(), Some("v1"));
    assert_eq!(host.reloads.load(Ordering::SeqCst), 0);
    let home = sync.serve(&FetchRequest::get("/static/style.css")).await.unwrap();
    assert_eq!(home.source, ResponseSource::Cache);

    // Applying later goes through.
    page_tx.send(PageEvent::ApplyPendingUpdate).await.unwrap();
    wait_for(|| host.reloads.load(Ordering::SeqCst) == 1).await;
    assert_eq!(sync.active_version().as_deref(), Some("v2"));

    worker.abort();
    page.abort();
}
