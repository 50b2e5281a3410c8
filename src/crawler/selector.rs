//! Configuration-driven search page scraper
//!
//! A [`SelectorSpider`] fills a target's search URL with the keyword, fetches
//! the result page and turns every entry matched by the item selector into a
//! pending result. Entries whose title does not mention the keyword are
//! dropped.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::{form_urlencoded, Url};

use super::fetcher::Fetcher;
use crate::config::TargetConfig;
use crate::error::Result;
use crate::models::NewPendingItem;
use crate::scheduler::work::{WorkParameters, WorkUnit};
use crate::utils::error::CrawlerError;
use crate::utils::normalize_whitespace;

fn date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(\d{4})\s*[.\-/年]\s*(\d{1,2})\s*[.\-/月]\s*(\d{1,2})\s*日?(?:\s*(\d{1,2})\s*[:点时](?:\s*(\d{1,2})\s*[:分]?(?:\s*(\d{1,2}))?)?)?",
            )
            .ok()
        })
        .as_ref()
}

/// Find and parse the first date in `text`.
///
/// Handles dotted, dashed and CJK forms such as `2025.04.27 15:08:45`,
/// `2025年05月20日14点30分` or `2025年05月15日09时`. Missing time parts
/// default to zero.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = date_pattern()?.captures(text)?;
    let number = |i: usize| -> Option<u32> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };

    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, number(2)?, number(3)?)?;
    let datetime = date.and_hms_opt(number(4)?, number(5)?, number(6)?)?;
    Some(DateTime::from_naive_utc_and_offset(datetime, Utc))
}

fn parse_selector(selector: &str) -> std::result::Result<Selector, CrawlerError> {
    Selector::parse(selector).map_err(|e| CrawlerError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn parse_optional(selector: Option<&str>) -> std::result::Result<Option<Selector>, CrawlerError> {
    selector.map(parse_selector).transpose()
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Work unit scraping one target through CSS selectors
pub struct SelectorSpider {
    name: String,
    search_url: String,
    fetcher: Arc<Fetcher>,
    item: Selector,
    title: Option<Selector>,
    link: Selector,
    date: Option<Selector>,
    publisher: Option<Selector>,
}

impl SelectorSpider {
    /// Compile the target's selectors
    ///
    /// # Errors
    ///
    /// Returns `CrawlerError::InvalidSelector` for a selector that does not
    /// parse and `CrawlerError::InvalidSearchUrl` when the URL template lacks
    /// the keyword placeholder.
    pub fn new(target: &TargetConfig, fetcher: Arc<Fetcher>) -> std::result::Result<Self, CrawlerError> {
        if !target.search_url.contains("{keyword}") {
            return Err(CrawlerError::InvalidSearchUrl {
                target: target.name.clone(),
                reason: "missing {keyword} placeholder".to_string(),
            });
        }

        Ok(Self {
            name: target.name.clone(),
            search_url: target.search_url.clone(),
            fetcher,
            item: parse_selector(&target.item_selector)?,
            title: parse_optional(target.title_selector.as_deref())?,
            link: parse_selector(target.link_selector.as_deref().unwrap_or("a[href]"))?,
            date: parse_optional(target.date_selector.as_deref())?,
            publisher: parse_optional(target.publisher_selector.as_deref())?,
        })
    }

    /// Search URL for `keyword`, with the keyword form-encoded
    pub fn search_url(&self, keyword: &str) -> std::result::Result<Url, CrawlerError> {
        let encoded: String = form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        let raw = self.search_url.replace("{keyword}", &encoded);
        Url::parse(&raw).map_err(|e| CrawlerError::InvalidSearchUrl {
            target: self.name.clone(),
            reason: e.to_string(),
        })
    }

    fn link_of(&self, entry: ElementRef<'_>, page_url: &Url) -> Option<Url> {
        let href = entry
            .select(&self.link)
            .find_map(|a| a.value().attr("href"))
            .or_else(|| entry.value().attr("href"))?;
        page_url.join(href.trim()).ok()
    }

    fn title_of(&self, entry: ElementRef<'_>) -> String {
        match &self.title {
            Some(selector) => entry.select(selector).next().map(element_text).unwrap_or_default(),
            None => element_text(entry),
        }
    }

    fn optional_text(entry: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
        let text = element_text(entry.select(selector?).next()?);
        (!text.is_empty()).then_some(text)
    }

    /// Turn a result page into pending items for `params`
    pub fn parse_results(
        &self,
        html: &str,
        page_url: &Url,
        params: &WorkParameters,
        crawled_at: DateTime<Utc>,
    ) -> Vec<NewPendingItem> {
        let document = Html::parse_document(html);
        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::new();

        for entry in document.select(&self.item) {
            let title = self.title_of(entry);
            if title.is_empty() || !title.contains(params.keyword.as_str()) {
                continue;
            }

            let Some(link) = self.link_of(entry, page_url) else {
                debug!(target_name = %self.name, %title, "Entry without link skipped");
                continue;
            };
            if !seen.insert(link.to_string()) {
                continue;
            }

            let published_at = Self::optional_text(entry, self.date.as_ref())
                .as_deref()
                .and_then(parse_date);

            items.push(NewPendingItem {
                category: params.category.clone(),
                definitions: params.definitions.clone(),
                keyword: params.keyword.clone(),
                target: params.target.clone(),
                title,
                detail_url: link.to_string(),
                published_at,
                publisher: Self::optional_text(entry, self.publisher.as_ref()),
                crawled_at,
            });
        }

        items
    }
}

#[async_trait]
impl WorkUnit for SelectorSpider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, params: &WorkParameters) -> Result<Vec<NewPendingItem>> {
        let url = self.search_url(&params.keyword)?;
        let html = self
            .fetcher
            .fetch(url.as_str(), None)
            .await
            .map_err(CrawlerError::from)?;

        let items = self.parse_results(&html, &url, params, Utc::now());
        info!(
            target_name = %self.name,
            keyword = %params.keyword,
            found = items.len(),
            "Search page scraped"
        );
        Ok(items)
    }
}
