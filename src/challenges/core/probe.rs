//! Shared page probes built on the fixed script vocabulary.

use serde_json::Value;

use crate::session::{scripts, PageSession};

use super::markers::TOKEN_FIELD_SELECTORS;

/// Read the first non-empty value among the page's token response fields.
///
/// The token is read back from the DOM itself; return values of widget APIs
/// are never trusted directly.
pub async fn read_page_token(page: &dyn PageSession) -> Option<String> {
    for selector in TOKEN_FIELD_SELECTORS {
        let result = page.eval(&scripts::read_value(selector)).await;
        if let Ok(Value::String(value)) = result {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Whether any of the given selectors matches a rendered element.
pub async fn any_visible(page: &dyn PageSession, selectors: &[&str]) -> bool {
    for selector in selectors {
        if let Ok(Value::Bool(true)) = page.eval(&scripts::visible(selector)).await {
            return true;
        }
    }
    false
}

/// Whether any of the given selectors matches at all, rendered or not.
pub async fn any_present(page: &dyn PageSession, selectors: &[&str]) -> bool {
    for selector in selectors {
        if let Ok(Value::Bool(true)) = page.eval(&scripts::exists(selector)).await {
            return true;
        }
    }
    false
}
