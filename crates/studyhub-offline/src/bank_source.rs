//! Question banks served through the offline cache.

use std::sync::Arc;

use async_trait::async_trait;

use studyhub_core::bank::{parse_bank_str, BankPolicy};
use studyhub_core::error::QuizError;
use studyhub_core::model::QuestionBank;
use studyhub_core::traits::BankSource;

use crate::fetch::{FetchRequest, ResponseSource};
use crate::worker::Synchronizer;

/// Loads `/modules/{module}.json` via the synchronizer's fetch policy, so a
/// bank seen once stays available offline.
pub struct CachedBankSource {
    sync: Arc<Synchronizer>,
    policy: BankPolicy,
}

impl CachedBankSource {
    pub fn new(sync: Arc<Synchronizer>) -> Self {
        Self {
            sync,
            policy: BankPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BankPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn url_for(module: &str) -> String {
        format!("/modules/{module}.json")
    }
}

#[async_trait]
impl BankSource for CachedBankSource {
    async fn load_bank(&self, module: &str) -> Result<QuestionBank, QuizError> {
        let url = Self::url_for(module);
        let response = self.sync.serve(&FetchRequest::get(url.clone())).await?;

        if response.source == ResponseSource::Fallback {
            return Err(QuizError::Network(format!(
                "{module} is not available offline"
            )));
        }
        if !response.is_success() {
            return Err(QuizError::Network(format!(
                "HTTP {} loading {url}",
                response.status
            )));
        }

        parse_bank_str(&response.text(), module, self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::mock::MockFetcher;
    use studyhub_core::error::Recovery;

    const RENAL: &str = r#"[{"id": "r1", "question": "Normal BUN?", "answer": "7-20", "type": "fill_blank"}]"#;

    async fn setup() -> (Arc<MockFetcher>, CachedBankSource) {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_route("/", "<html>home</html>")
                .with_route("/modules/Renal.json", RENAL),
        );
        let config = SyncConfig {
            static_assets: vec!["/".into()],
            quiz_data: vec!["/modules/Renal.json".into()],
            revalidate_on_hit: false,
            ..SyncConfig::default()
        };
        let (sync, _rx) = Synchronizer::new(config, fetcher.clone());
        sync.register().await.unwrap();
        (fetcher, CachedBankSource::new(Arc::new(sync)))
    }

    #[tokio::test]
    async fn precached_bank_loads_offline() {
        let (fetcher, source) = setup().await;
        fetcher.set_offline(true);

        let bank = source.load_bank("Renal").await.unwrap();
        assert_eq!(bank.module, "Renal");
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.questions[0].blank_answers, vec!["7-20"]);
    }

    #[tokio::test]
    async fn uncached_bank_offline_is_retryable() {
        let (fetcher, source) = setup().await;
        fetcher.set_offline(true);

        let err = source.load_bank("Cardiac").await.unwrap_err();
        assert!(matches!(err, QuizError::Network(_)));
        assert_eq!(err.recovery(), Recovery::Retry);
    }

    #[tokio::test]
    async fn missing_bank_is_network_error() {
        let (_fetcher, source) = setup().await;
        let err = source.load_bank("Cardiac").await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn malformed_json_is_data_format_error() {
        let (fetcher, source) = setup().await;
        fetcher.route("/modules/Broken.json", 200, "{not json");
        let err = source.load_bank("Broken").await.unwrap_err();
        assert!(matches!(err, QuizError::DataFormat(_)));
    }
}
