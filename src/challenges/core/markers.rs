//! Challenge signatures and selector tables.
//!
//! All challenge-specific knowledge lives here as data: marker regexes run
//! against the page snapshot, selector lists consumed by the fixed script
//! vocabulary, and phrase tables used by the submission verifier. The code
//! that consumes these tables is mechanism-agnostic.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

fn build_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid marker regex `{}`: {}", pattern, err))
}

/// Markers of the checkbox widget that can escalate into an audio challenge.
pub static AUDIO_CAPABLE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        build_regex(r#"<iframe[^>]*src=['"][^'"]*recaptcha/(?:api2|enterprise)/anchor"#),
        build_regex(r#"class=['"][^'"]*g-recaptcha[^'"]*['"]"#),
        build_regex(r#"src=['"][^'"]*www\.(?:google|recaptcha)\.(?:com|net)/recaptcha/[^'"]*api\.js"#),
        build_regex(r"g-recaptcha-response"),
    ]
});

/// Markers of checkbox-style widgets with no audio escalation path.
pub static CHECKBOX_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        build_regex(r#"class=['"][^'"]*cf-turnstile[^'"]*['"]"#),
        build_regex(r#"src=['"]https://challenges\.cloudflare\.com/turnstile/"#),
        build_regex(r"cf-turnstile-response"),
    ]
});

/// Iframe origins of mechanisms the pipeline cannot drive.
pub static OPAQUE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        build_regex(r#"<iframe[^>]*src=['"][^'"]*hcaptcha\.com"#),
        build_regex(r#"<iframe[^>]*src=['"][^'"]*(?:arkoselabs|funcaptcha)\.com"#),
        build_regex(r#"<iframe[^>]*src=['"][^'"]*geetest\.com"#),
    ]
});

/// Generic decoy-detector heuristics: image/input elements whose name or alt
/// text carries a verification keyword.
pub static GENERIC_CHALLENGE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        build_regex(r#"<input[^>]*name=['"][^'"]*captcha[^'"]*['"]"#),
        build_regex(r#"<img[^>]*(?:alt|src)=['"][^'"]*captcha[^'"]*['"]"#),
        build_regex(r#"<input[^>]*name=['"][^'"]*(?:verification|are_you_human)[^'"]*['"]"#),
    ]
});

/// Site key attribute shared by the checkbox-style widgets.
pub static SITE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r#"data-sitekey=['"]([0-9A-Za-z_-]{10,100})['"]"#));

/// Prefix stamped on locally synthesized fallback tokens.
pub const FALLBACK_TOKEN_PREFIX: &str = "rec-fallback-";

/// Heuristic match for tokens the engine fabricated itself rather than
/// received from the issuing origin. Never treat a miss as proof of
/// authenticity.
pub static FALLBACK_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r"^rec-fallback-[0-9a-f]{8,}$"));

/// Response fields the page itself exposes a token through, in probe order.
pub const TOKEN_FIELD_SELECTORS: &[&str] = &[
    "textarea[name='g-recaptcha-response']",
    "textarea[id^='g-recaptcha-response']",
    "input[name='g-recaptcha-response']",
    "input[name='cf-turnstile-response']",
    "textarea[name='h-captcha-response']",
];

/// Primary toggle of the checkbox widget, in click preference order.
pub const CHECKBOX_TOGGLE_SELECTORS: &[&str] = &[
    "#recaptcha-anchor",
    ".recaptcha-checkbox",
    ".g-recaptcha",
    ".cf-turnstile",
    "[data-sitekey]",
];

/// Anchor iframe hosting the checkbox widget.
pub const ANCHOR_FRAME_SELECTOR: &str =
    "iframe[src*='recaptcha/api2/anchor'], iframe[src*='recaptcha/enterprise/anchor']";

/// Challenge surface opened when the toggle is not satisfied by a click.
pub const CHALLENGE_FRAME_SELECTORS: &[&str] = &[
    "iframe[src*='recaptcha/api2/bframe']",
    "iframe[src*='recaptcha/enterprise/bframe']",
    "iframe[title*='challenge']",
];

/// Switch-to-audio controls inside the challenge surface.
pub const AUDIO_BUTTON_SELECTORS: &[&str] = &[
    "#recaptcha-audio-button",
    ".rc-button-audio",
    "button[aria-label*='audio']",
];

/// Evidence the surface is in audio mode, probed after the switch.
pub const AUDIO_PRESENT_SELECTORS: &[&str] = &[
    "audio#audio-source",
    ".rc-audiochallenge-tdownload-link",
    "audio source",
];

/// Places the challenge audio URL can be read from, in preference order.
pub const AUDIO_SOURCE_SELECTORS: &[(&str, &str)] = &[
    (".rc-audiochallenge-tdownload-link", "href"),
    ("audio#audio-source", "src"),
    ("audio source", "src"),
    ("[data-audio-url]", "data-audio-url"),
    ("a[href$='.mp3']", "href"),
];

/// Answer input on the audio challenge surface.
pub const AUDIO_ANSWER_SELECTORS: &[&str] = &["#audio-response", "input[id*='audio-response']"];

/// Verify control that submits the transcribed answer.
pub const AUDIO_VERIFY_SELECTORS: &[&str] = &["#recaptcha-verify-button", "button[id*='verify']"];

/// Error surfaced when the transcription is rejected.
pub const AUDIO_REJECTED_SELECTOR: &str = ".rc-audiochallenge-error-message";

/// Hidden trigger elements worth poking when the visible widget stalls.
pub const TRIGGER_DISPATCH_SELECTORS: &[&str] = &[
    ".g-recaptcha",
    "#recaptcha-anchor",
    "[data-callback]",
    ".cf-turnstile",
];

/// Checkbox state probe targets used by expiry detection.
pub const CHECKBOX_STATE_SELECTOR: &str = "#recaptcha-anchor";

/// Expired/error markers on the checkbox widget.
pub const EXPIRY_MARKER_SELECTORS: &[&str] = &[
    ".rc-anchor-error-msg",
    ".recaptcha-checkbox-expired",
];

/// Text shown when a previously solved checkbox silently reverts.
pub static EXPIRY_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| build_regex(r"(verification\s+)?(challenge|token)?\s*expired|expired[.,]?\s+(please\s+)?(re-?verify|try again)"));

/// Hosts whose traffic must never count as submission evidence.
pub const TRACKING_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "analytics.google.com",
    "googletagmanager.com",
    "doubleclick.net",
    "facebook.com",
    "facebook.net",
    "connect.facebook.net",
    "hotjar.com",
    "segment.io",
    "segment.com",
    "mixpanel.com",
    "clarity.ms",
    "stats.g.doubleclick.net",
    "linkedin.com",
    "bat.bing.com",
];

/// Default phrases that indicate the origin accepted a submission.
pub const SUCCESS_PHRASES: &[&str] = &[
    "thank you",
    "thanks for",
    "message sent",
    "message has been sent",
    "successfully sent",
    "successfully submitted",
    "submission received",
    "we'll be in touch",
    "we will be in touch",
    "we'll get back to you",
];

/// Default phrases that indicate the origin rejected a submission.
pub const ERROR_PHRASES: &[&str] = &[
    "error occurred",
    "something went wrong",
    "failed to send",
    "could not be sent",
    "try again later",
    "required field",
    "invalid email",
    "captcha verification failed",
];

/// Extract the site key advertised by the widget markup, if any.
pub fn extract_site_key(html: &str) -> Option<String> {
    SITE_KEY_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether any regex in the table matches the snapshot.
pub fn any_match(markers: &[Regex], html: &str) -> bool {
    markers.iter().any(|re| re.is_match(html))
}
