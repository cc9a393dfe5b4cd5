//! Prompt enrichment: embedded links are fetched and turned into a dated
//! context block, and the prompt itself is rewritten to cite them by number.

mod block;
mod fetch;
mod links;

pub use block::{BlockSettings, TRUNCATION_MARKER, build_enrichment_block};
pub use fetch::{FetchMode, FetchedReference, PageFetcher};
pub use links::{extract_links, rewrite_prompt};

use chrono::NaiveDate;
use tracing::{debug, instrument};

use promptbatch_shared::{Link, Result, RunConfig};

/// Everything enrichment produced for one prompt.
#[derive(Debug, Clone)]
pub struct Enrichment {
    /// Prompt with `[text](url)` replaced by `text[n]`.
    pub rewritten_prompt: String,
    /// Dated context block with numbered references.
    pub block: String,
    /// Links in reference-number order.
    pub links: Vec<Link>,
    /// One entry per link, same order.
    pub references: Vec<FetchedReference>,
}

impl Enrichment {
    /// The block followed by the rewritten prompt, as sent to the backend.
    pub fn assembled_prompt(&self) -> String {
        format!("{}\n\n{}", self.block, self.rewritten_prompt)
    }
}

/// Link extraction, fetching and block rendering for a batch run.
#[derive(Debug, Clone)]
pub struct Enricher {
    fetcher: PageFetcher,
    settings: BlockSettings,
}

impl Enricher {
    pub fn new(fetcher: PageFetcher, settings: BlockSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Build an enricher from the run configuration.
    pub fn from_run_config(config: &RunConfig) -> Result<Self> {
        let fetcher = PageFetcher::new(
            config.fetch_timeout,
            FetchMode::from_strict(config.strict_fetch),
        )?;
        let settings = BlockSettings {
            max_reference_chars: config.max_reference_chars,
            locale_note: config.locale_note.clone(),
        };
        Ok(Self::new(fetcher, settings))
    }

    /// Enrich a prompt using today's local date.
    pub async fn enrich(&self, prompt: &str) -> Result<Enrichment> {
        self.enrich_on(prompt, chrono::Local::now().date_naive()).await
    }

    /// Enrich a prompt for a fixed date.
    #[instrument(skip_all, fields(prompt_len = prompt.len(), today = %today))]
    pub async fn enrich_on(&self, prompt: &str, today: NaiveDate) -> Result<Enrichment> {
        let links = extract_links(prompt);
        let urls: Vec<String> = links.iter().map(|l| l.url.clone()).collect();

        let references = if urls.is_empty() {
            Vec::new()
        } else {
            self.fetcher.fetch_all(&urls).await?
        };

        let fetched = references.iter().filter(|r| r.content.is_some()).count();
        debug!(links = links.len(), fetched, "references resolved");

        Ok(Enrichment {
            rewritten_prompt: rewrite_prompt(prompt, &links),
            block: build_enrichment_block(&references, &links, today, &self.settings),
            links,
            references,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn enricher(mode: FetchMode) -> Enricher {
        let fetcher = PageFetcher::new(Duration::from_secs(5), mode).unwrap();
        Enricher::new(fetcher, BlockSettings::default())
    }

    #[tokio::test]
    async fn prompt_without_links_needs_no_network() {
        let prompt = "Write a haiku about autumn.";
        let enrichment = enricher(FetchMode::Strict).enrich(prompt).await.unwrap();

        assert_eq!(enrichment.rewritten_prompt, prompt);
        assert!(enrichment.links.is_empty());
        assert!(!enrichment.block.contains("Reference ["));
        assert!(enrichment.assembled_prompt().ends_with(prompt));
    }

    #[tokio::test]
    async fn links_fetched_and_cited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Example content."))
            .mount(&server)
            .await;

        let url = format!("{}/x", server.uri());
        let prompt = format!("Summarize [x]({url})");
        let today = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        let enrichment = enricher(FetchMode::Lenient)
            .enrich_on(&prompt, today)
            .await
            .unwrap();

        assert_eq!(enrichment.rewritten_prompt, "Summarize x[1]");
        assert!(enrichment.block.contains("Current date: January 09, 2025"));
        assert!(
            enrichment
                .block
                .contains(&format!("Reference [1]: {url}\nExample content."))
        );
    }

    #[tokio::test]
    async fn strict_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let prompt = format!("Read [this]({}/down)", server.uri());
        let err = enricher(FetchMode::Strict).enrich(&prompt).await.unwrap_err();
        assert!(matches!(
            err,
            promptbatch_shared::PromptBatchError::ContextFetchFailed { .. }
        ));
    }

    #[test]
    fn from_run_config_honours_strict_switch() {
        let mut app = promptbatch_shared::AppConfig::default();
        app.fetch.strict = true;
        let run = RunConfig::from(&app);
        let enricher = Enricher::from_run_config(&run).unwrap();
        assert_eq!(enricher.fetcher.mode(), FetchMode::Strict);
        assert_eq!(enricher.settings.max_reference_chars, 1500);
    }
}
