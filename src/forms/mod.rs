//! Form field discovery and filling.
//!
//! Enumerates the visible, non-decoy controls of the most plausible contact
//! form, classifies each against a fixed keyword table, and fills them with
//! caller-supplied or synthesized values. Honeypot fields are classified so
//! they can be refused: writing to a decoy input is a correctness bug, not a
//! missed opportunity.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use crate::session::{scripts, PageSession, SessionResult};

/// Semantic role of a discovered control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCategory {
    Name,
    Email,
    Phone,
    Message,
    Generic,
    Honeypot,
}

/// One discovered form control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFieldDescriptor {
    pub selector_hint: String,
    pub category: FieldCategory,
    pub required: bool,
    pub current_value: String,
}

/// Tunable weights of the contact-form scoring heuristic.
///
/// The defaults prefer the richest contact signature (name + email + message
/// together) over narrower forms such as a single-field newsletter signup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormScoreWeights {
    pub name: f64,
    pub email: f64,
    pub message: f64,
    pub phone: f64,
    pub per_field: f64,
}

impl Default for FormScoreWeights {
    fn default() -> Self {
        Self {
            name: 2.0,
            email: 2.0,
            message: 3.0,
            phone: 1.0,
            per_field: 0.25,
        }
    }
}

static EMAIL_KEYWORDS: &[&str] = &["email", "e-mail", "mail"];
static PHONE_KEYWORDS: &[&str] = &["phone", "tel", "mobile", "cell"];
static NAME_KEYWORDS: &[&str] = &["name", "first", "last", "fname", "lname"];
static MESSAGE_KEYWORDS: &[&str] = &[
    "message", "comment", "inquiry", "enquiry", "body", "description", "question",
];
static HONEYPOT_KEYWORDS: &[&str] = &[
    "honeypot", "honey_pot", "hpot", "hp_", "_gotcha", "bot-field", "botfield", "nospam",
    "no_spam", "do-not-fill", "winnie",
];

static CONTROL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input, textarea, select").expect("valid control selector"));
static FORM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form").expect("valid form selector"));

/// Input types that are never contact fields.
const SKIPPED_INPUT_TYPES: &[&str] = &[
    "submit", "button", "reset", "image", "file", "checkbox", "radio", "password",
];

/// Discovers and fills form fields on a page.
pub struct FieldDiscoveryEngine {
    weights: FormScoreWeights,
}

impl Default for FieldDiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldDiscoveryEngine {
    pub fn new() -> Self {
        Self {
            weights: FormScoreWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: FormScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Discover the controls of the best-scoring candidate form.
    pub async fn discover(&self, page: &dyn PageSession) -> SessionResult<Vec<FormFieldDescriptor>> {
        let html = page.content().await?;
        Ok(self.discover_in_html(&html))
    }

    /// Snapshot-only discovery core.
    pub fn discover_in_html(&self, html: &str) -> Vec<FormFieldDescriptor> {
        let document = Html::parse_document(html);

        let forms: Vec<ElementRef<'_>> = document.select(&FORM_SELECTOR).collect();
        if forms.is_empty() {
            // No form element; classify document-level controls instead.
            return self.classify_controls(document.select(&CONTROL_SELECTOR));
        }

        let mut best: Option<(f64, Vec<FormFieldDescriptor>)> = None;
        for form in forms {
            let fields = self.classify_controls(form.select(&CONTROL_SELECTOR));
            if fields.is_empty() {
                continue;
            }
            let score = self.score(&fields);
            let better = match &best {
                Some((current, _)) => score > *current,
                None => true,
            };
            if better {
                best = Some((score, fields));
            }
        }

        let (score, fields) = match best {
            Some(found) => found,
            None => return Vec::new(),
        };
        log::debug!(
            "selected candidate form with {} fields (score {:.2})",
            fields.len(),
            score
        );
        fields
    }

    fn classify_controls<'a, I>(&self, controls: I) -> Vec<FormFieldDescriptor>
    where
        I: Iterator<Item = ElementRef<'a>>,
    {
        let mut fields = Vec::new();
        for control in controls {
            if let Some(descriptor) = classify_control(&control) {
                fields.push(descriptor);
            }
        }
        fields
    }

    fn score(&self, fields: &[FormFieldDescriptor]) -> f64 {
        let mut score = 0.0;
        let mut seen: HashMap<FieldCategory, bool> = HashMap::new();
        for field in fields {
            if field.category == FieldCategory::Honeypot {
                continue;
            }
            score += self.weights.per_field;
            if seen.insert(field.category, true).is_none() {
                score += match field.category {
                    FieldCategory::Name => self.weights.name,
                    FieldCategory::Email => self.weights.email,
                    FieldCategory::Message => self.weights.message,
                    FieldCategory::Phone => self.weights.phone,
                    FieldCategory::Generic | FieldCategory::Honeypot => 0.0,
                };
            }
        }
        score
    }

    /// Fill discovered fields with the supplied per-category values, falling
    /// back to synthesized ones. Honeypot fields are left strictly untouched.
    /// Returns the number of fields whose write was verified to persist.
    pub async fn fill(
        &self,
        page: &dyn PageSession,
        fields: &[FormFieldDescriptor],
        values: &HashMap<FieldCategory, String>,
    ) -> SessionResult<usize> {
        let mut written = 0;
        for field in fields {
            if field.category == FieldCategory::Honeypot {
                log::debug!("leaving honeypot field {} empty", field.selector_hint);
                continue;
            }
            let value = values
                .get(&field.category)
                .cloned()
                .unwrap_or_else(|| synthesize_value(field.category));
            if write_value(page, &field.selector_hint, &value).await? {
                written += 1;
            } else {
                log::warn!("value did not persist in {}", field.selector_hint);
            }
        }
        Ok(written)
    }
}

/// Write a value and re-verify it persisted; frameworks resetting
/// uncontrolled inputs get a second pass with the scripted setter.
pub async fn write_value(
    page: &dyn PageSession,
    selector: &str,
    value: &str,
) -> SessionResult<bool> {
    if page.type_text(selector, value).await.is_ok() && read_back(page, selector, value).await {
        return Ok(true);
    }

    let script = scripts::set_value(selector, value);
    if let Value::String(persisted) = page.eval(&script).await? {
        if persisted == value {
            return Ok(true);
        }
    }
    Ok(read_back(page, selector, value).await)
}

async fn read_back(page: &dyn PageSession, selector: &str, expected: &str) -> bool {
    matches!(
        page.eval(&scripts::read_value(selector)).await,
        Ok(Value::String(current)) if current == expected
    )
}

/// Synthesize a plausible value for a category with no explicit mapping.
pub fn synthesize_value(category: FieldCategory) -> String {
    let mut rng = rand::thread_rng();
    match category {
        FieldCategory::Name => ["Alex Morgan", "Jordan Reyes", "Sam Carter"]
            .choose(&mut rng)
            .unwrap_or(&"Alex Morgan")
            .to_string(),
        FieldCategory::Email => ["alex.morgan@example.com", "jordan.reyes@example.org"]
            .choose(&mut rng)
            .unwrap_or(&"alex.morgan@example.com")
            .to_string(),
        FieldCategory::Phone => "+1 555 0134".to_string(),
        FieldCategory::Message => [
            "Hello, I would like more information about your services.",
            "Hi, could you get back to me about availability and pricing?",
        ]
        .choose(&mut rng)
        .unwrap_or(&"Hello, I would like more information about your services.")
        .to_string(),
        FieldCategory::Generic => "N/A".to_string(),
        FieldCategory::Honeypot => String::new(),
    }
}

fn classify_control(control: &ElementRef<'_>) -> Option<FormFieldDescriptor> {
    let element = control.value();
    let tag = element.name();
    let input_type = element.attr("type").unwrap_or("").to_ascii_lowercase();

    if tag == "input" && SKIPPED_INPUT_TYPES.contains(&input_type.as_str()) {
        return None;
    }

    let name = element.attr("name").unwrap_or("");
    let id = element.attr("id").unwrap_or("");
    let class = element.attr("class").unwrap_or("");
    let placeholder = element.attr("placeholder").unwrap_or("");
    let haystack = format!("{} {} {} {}", name, id, class, placeholder).to_ascii_lowercase();

    let decoy_named = HONEYPOT_KEYWORDS.iter().any(|kw| haystack.contains(kw));
    let hidden = is_hidden(element, &input_type);

    // A decoy: named like one, or a text control deliberately hidden from
    // humans. Either way it is surfaced so fillers can refuse it.
    if decoy_named || (hidden && tag != "select") {
        return Some(FormFieldDescriptor {
            selector_hint: selector_hint(tag, element),
            category: FieldCategory::Honeypot,
            required: false,
            current_value: element.attr("value").unwrap_or("").to_string(),
        });
    }
    if hidden {
        return None;
    }

    let category = if input_type == "email" {
        FieldCategory::Email
    } else if input_type == "tel" {
        FieldCategory::Phone
    } else if EMAIL_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        FieldCategory::Email
    } else if PHONE_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        FieldCategory::Phone
    } else if MESSAGE_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        FieldCategory::Message
    } else if NAME_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        FieldCategory::Name
    } else if tag == "textarea" {
        FieldCategory::Message
    } else {
        FieldCategory::Generic
    };

    Some(FormFieldDescriptor {
        selector_hint: selector_hint(tag, element),
        category,
        required: element.attr("required").is_some(),
        current_value: element.attr("value").unwrap_or("").to_string(),
    })
}

fn is_hidden(element: &scraper::node::Element, input_type: &str) -> bool {
    if input_type == "hidden" || element.attr("hidden").is_some() {
        return true;
    }
    if element.attr("aria-hidden") == Some("true") {
        return true;
    }
    let style = element
        .attr("style")
        .unwrap_or("")
        .replace(char::is_whitespace, "")
        .to_ascii_lowercase();
    style.contains("display:none") || style.contains("visibility:hidden")
}

fn selector_hint(tag: &str, element: &scraper::node::Element) -> String {
    if let Some(id) = element.attr("id") {
        if !id.is_empty() {
            return format!("#{id}");
        }
    }
    if let Some(name) = element.attr("name") {
        if !name.is_empty() {
            return format!("{tag}[name='{name}']");
        }
    }
    if let Some(placeholder) = element.attr("placeholder") {
        if !placeholder.is_empty() {
            return format!("{tag}[placeholder='{placeholder}']");
        }
    }
    tag.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::MockPage;
    use serde_json::json;

    const CONTACT_PAGE: &str = r#"
        <html><body>
          <form id="newsletter">
            <input type="email" name="nl_email" placeholder="Subscribe" />
          </form>
          <form id="contact">
            <input type="text" name="full_name" required />
            <input type="email" name="email" required />
            <input type="tel" name="phone" />
            <textarea name="message" required></textarea>
            <input type="text" name="_gotcha" style="display: none" />
            <input type="submit" value="Send" />
          </form>
        </body></html>
    "#;

    #[test]
    fn prefers_the_richest_contact_signature() {
        let engine = FieldDiscoveryEngine::new();
        let fields = engine.discover_in_html(CONTACT_PAGE);
        let categories: Vec<FieldCategory> = fields.iter().map(|f| f.category).collect();
        assert!(categories.contains(&FieldCategory::Name));
        assert!(categories.contains(&FieldCategory::Email));
        assert!(categories.contains(&FieldCategory::Message));
        assert!(categories.contains(&FieldCategory::Honeypot));
        // The newsletter form's lone email field must not be the winner.
        assert!(fields.iter().all(|f| f.selector_hint != "input[name='nl_email']"));
    }

    #[test]
    fn classifies_required_and_values() {
        let engine = FieldDiscoveryEngine::new();
        let fields = engine.discover_in_html(CONTACT_PAGE);
        let name = fields
            .iter()
            .find(|f| f.category == FieldCategory::Name)
            .expect("name field");
        assert!(name.required);
        assert_eq!(name.selector_hint, "input[name='full_name']");
        let phone = fields
            .iter()
            .find(|f| f.category == FieldCategory::Phone)
            .expect("phone field");
        assert!(!phone.required);
    }

    #[test]
    fn decoy_named_visible_field_is_still_a_honeypot() {
        let html = r#"
            <form>
              <input type="text" name="email" />
              <input type="text" name="bot-field" />
            </form>
        "#;
        let fields = FieldDiscoveryEngine::new().discover_in_html(html);
        let decoy = fields
            .iter()
            .find(|f| f.selector_hint.contains("bot-field"))
            .expect("decoy discovered");
        assert_eq!(decoy.category, FieldCategory::Honeypot);
    }

    #[test]
    fn document_level_controls_without_a_form() {
        let html = r#"<div><input type="email" id="email" /><textarea id="msg"></textarea></div>"#;
        let fields = FieldDiscoveryEngine::new().discover_in_html(html);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].selector_hint, "#email");
    }

    #[tokio::test]
    async fn honeypots_are_never_written() {
        let engine = FieldDiscoveryEngine::new();
        let fields = engine.discover_in_html(CONTACT_PAGE);
        let page = MockPage::new("https://example.com/contact");
        page.set_eval(|script| {
            // Scripted setter persists; plain read-back echoes nothing.
            if script.contains("el.value = ") {
                let start = script.find("el.value = '").map(|i| i + "el.value = '".len());
                if let Some(start) = start {
                    if let Some(end) = script[start..].find('\'') {
                        return Ok(json!(script[start..start + end]));
                    }
                }
            }
            Ok(Value::Null)
        });

        engine
            .fill(&page, &fields, &HashMap::new())
            .await
            .expect("fill");

        for (selector, _) in page.typed() {
            assert!(!selector.contains("_gotcha"), "honeypot was typed into");
        }
    }

    #[tokio::test]
    async fn write_falls_back_to_the_scripted_setter() {
        let page = MockPage::new("https://example.com/contact");
        page.set_eval(|script| {
            if script.contains("el.value = ") {
                return Ok(json!("hello"));
            }
            // read_value never sees the keystrokes persist
            Ok(json!(""))
        });
        let persisted = write_value(&page, "#msg", "hello").await.expect("write");
        assert!(persisted);
        assert_eq!(page.typed(), vec![("#msg".to_string(), "hello".to_string())]);
    }

    #[test]
    fn custom_weights_can_invert_the_choice() {
        let weights = FormScoreWeights {
            email: 50.0,
            name: 0.0,
            message: 0.0,
            phone: 0.0,
            per_field: 0.0,
        };
        // Email weight dominates but both forms carry email, so the contact
        // form still ties on email and wins only through extra fields; with
        // per_field zeroed the first-scored form keeps the tie.
        let fields = FieldDiscoveryEngine::new()
            .with_weights(weights)
            .discover_in_html(CONTACT_PAGE);
        assert!(!fields.is_empty());
    }
}
