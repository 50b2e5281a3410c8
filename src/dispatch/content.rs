//! Notification rendering with the Handlebars template engine

use handlebars::Handlebars;
use serde::Serialize;

use super::transport::OutgoingMessage;
use crate::error::{Error, Result};
use crate::models::{PendingItem, Recipient};

const NOTIFICATION_TEMPLATE: &str = include_str!("../../templates/notification.hbs");

#[derive(Debug, Serialize)]
struct ItemTemplateData {
    title: String,
    category: String,
    definitions: String,
    keyword: String,
    target: String,
    published_at: String,
    publisher: Option<String>,
    url: String,
}

impl From<&PendingItem> for ItemTemplateData {
    fn from(item: &PendingItem) -> Self {
        Self {
            title: item.title.clone(),
            category: item.category.clone(),
            definitions: item.definitions.join(", "),
            keyword: item.keyword.clone(),
            target: item.target.clone(),
            published_at: item
                .published_at
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            publisher: item.publisher.clone().filter(|p| !p.is_empty()),
            url: item.detail_url.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NotificationTemplateData {
    recipient: String,
    count: usize,
    items: Vec<ItemTemplateData>,
}

/// Turns a recipient and their matched items into one message
pub struct NotificationRenderer {
    handlebars: Handlebars<'static>,
}

impl NotificationRenderer {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string("notification", NOTIFICATION_TEMPLATE)
            .map_err(|e| Error::with_source("Failed to register notification template", e))?;
        Ok(Self { handlebars })
    }

    pub fn subject(recipient: &Recipient) -> String {
        format!("\"{}\", new items are available", recipient.identity)
    }

    pub fn render(&self, recipient: &Recipient, items: &[PendingItem]) -> Result<OutgoingMessage> {
        let data = NotificationTemplateData {
            recipient: recipient.identity.clone(),
            count: items.len(),
            items: items.iter().map(ItemTemplateData::from).collect(),
        };
        let html_body = self.handlebars.render("notification", &data)?;

        Ok(OutgoingMessage {
            to: recipient.address.clone(),
            subject: Self::subject(recipient),
            html_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn recipient() -> Recipient {
        Recipient {
            identity: "alice".into(),
            address: "alice@example.com".into(),
            categories: ["tender".to_string()].into_iter().collect(),
            enabled: true,
        }
    }

    fn item(title: &str, published: bool) -> PendingItem {
        PendingItem {
            id: 1,
            category: "tender".into(),
            definitions: vec!["d1".into(), "d2".into()],
            keyword: "steel".into(),
            target: "siteA".into(),
            title: title.into(),
            detail_url: "https://example.com/a/1".into(),
            published_at: published.then(|| Utc.with_ymd_and_hms(2025, 4, 27, 15, 8, 45).unwrap()),
            publisher: Some("Example Daily".into()),
            crawled_at: Utc::now(),
            delivered: false,
        }
    }

    #[test]
    fn test_subject_names_the_recipient() {
        assert_eq!(
            NotificationRenderer::subject(&recipient()),
            "\"alice\", new items are available"
        );
    }

    #[test]
    fn test_render_lists_every_item() {
        let renderer = NotificationRenderer::new().unwrap();
        let message = renderer
            .render(&recipient(), &[item("Steel tender A", true), item("Steel tender B", false)])
            .unwrap();

        assert_eq!(message.to, "alice@example.com");
        assert!(message.html_body.contains("Hello alice"));
        assert!(message.html_body.contains("Steel tender A"));
        assert!(message.html_body.contains("Steel tender B"));
        assert!(message.html_body.contains("2025-04-27 15:08:45"));
        assert!(message.html_body.contains("unknown"));
        assert!(message.html_body.contains("d1, d2"));
        assert!(message.html_body.contains("by Example Daily"));
    }

    #[test]
    fn test_titles_are_escaped() {
        let renderer = NotificationRenderer::new().unwrap();
        let message = renderer
            .render(&recipient(), &[item("<b>steel</b>", true)])
            .unwrap();
        assert!(message.html_body.contains("&lt;b&gt;steel&lt;/b&gt;"));
    }
}
