//! Fixed vocabulary of page scripts.
//!
//! Every script the engine evaluates is built here from a small set of
//! templates parameterised with selector data. Challenge- and form-specific
//! behaviour lives in selector tables, not in bespoke script strings at call
//! sites.

/// Escape arbitrary text into a single-quoted JS string literal.
pub fn literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\x3c"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Read the value (or text content) of the first match; `null` when absent.
pub fn read_value(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return null; \
         return el.value !== undefined ? el.value : (el.textContent || ''); }})()",
        sel = literal(selector)
    )
}

/// Read an attribute of the first match; `null` when absent.
pub fn read_attribute(selector: &str, attribute: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         return el ? el.getAttribute({attr}) : null; }})()",
        sel = literal(selector),
        attr = literal(attribute)
    )
}

/// Whether any element matches the selector.
pub fn exists(selector: &str) -> String {
    format!(
        "!!document.querySelector({sel})",
        sel = literal(selector)
    )
}

/// Whether the first match is rendered (has layout boxes).
pub fn visible(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         return !!(el && el.getClientRects().length > 0); }})()",
        sel = literal(selector)
    )
}

/// Scripted write: set the value property and fire the framework events an
/// uncontrolled-input reset would otherwise swallow. Returns the value the
/// element holds afterwards, or `null` when the element is missing.
pub fn set_value(selector: &str, value: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return null; \
         el.focus(); el.value = {val}; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return el.value; }})()",
        sel = literal(selector),
        val = literal(value)
    )
}

/// Programmatic `.click()` on the first match; returns whether it was found.
pub fn click(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return false; el.click(); return true; }})()",
        sel = literal(selector)
    )
}

/// Full synthesized mouse sequence for handlers that ignore plain `.click()`.
pub fn dispatch_mouse_events(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return false; \
         for (const type of ['mouseover', 'mousedown', 'mouseup', 'click']) {{ \
           el.dispatchEvent(new MouseEvent(type, {{ bubbles: true, cancelable: true, view: window }})); \
         }} \
         return true; }})()",
        sel = literal(selector)
    )
}

/// Click a selector inside a same-origin iframe's document.
pub fn frame_click(frame_selector: &str, inner_selector: &str) -> String {
    format!(
        "(() => {{ const frame = document.querySelector({frame}); \
         if (!frame) return false; \
         let doc = null; \
         try {{ doc = frame.contentDocument || frame.contentWindow.document; }} catch (e) {{ return false; }} \
         if (!doc) return false; \
         const el = doc.querySelector({inner}); \
         if (!el) return false; el.click(); return true; }})()",
        frame = literal(frame_selector),
        inner = literal(inner_selector)
    )
}

/// Visible text of the whole page, for phrase scanning.
pub fn page_text() -> String {
    "(() => document.body ? document.body.innerText : '')()".to_string()
}

/// Snapshot of checkbox-widget health, for expiry detection. Reads the
/// toggle's ARIA state (reaching into its frame when same-origin allows),
/// visibility of the error markers, and whether a challenge surface is open.
/// Returns `{ checked, errorVisible, surfaceOpen }`.
pub fn widget_state_probe(
    anchor_frame_selector: &str,
    state_selector: &str,
    error_selectors: &[&str],
    surface_selectors: &[&str],
) -> String {
    let error_list = selector_array(error_selectors);
    let surface_list = selector_array(surface_selectors);
    format!(
        "(() => {{ \
         const docs = [document]; \
         const frame = document.querySelector({frame}); \
         if (frame) {{ try {{ const d = frame.contentDocument || frame.contentWindow.document; if (d) docs.push(d); }} catch (e) {{}} }} \
         let checked = null; \
         for (const doc of docs) {{ \
           const el = doc.querySelector({state}); \
           if (el) {{ checked = el.getAttribute('aria-checked') === 'true'; break; }} \
         }} \
         let errorVisible = false; \
         for (const doc of docs) {{ \
           for (const sel of {errors}) {{ \
             const el = doc.querySelector(sel); \
             if (el && el.getClientRects().length > 0) {{ errorVisible = true; break; }} \
           }} \
         }} \
         let surfaceOpen = false; \
         for (const sel of {surfaces}) {{ \
           const el = document.querySelector(sel); \
           if (el && el.getClientRects().length > 0) {{ surfaceOpen = true; break; }} \
         }} \
         return {{ checked, errorVisible, surfaceOpen }}; }})()",
        frame = literal(anchor_frame_selector),
        state = literal(state_selector),
        errors = error_list,
        surfaces = surface_list,
    )
}

fn selector_array(selectors: &[&str]) -> String {
    let mut out = String::from("[");
    for (idx, sel) in selectors.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&literal(sel));
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_escapes_quotes_and_newlines() {
        assert_eq!(literal("a'b"), "'a\\'b'");
        assert_eq!(literal("a\nb"), "'a\\nb'");
        assert_eq!(literal("</script>"), "'\\x3c/script>'");
    }

    #[test]
    fn read_value_embeds_selector_once() {
        let script = read_value("#email");
        assert!(script.contains("'#email'"));
        assert!(script.contains("querySelector"));
    }

    #[test]
    fn set_value_fires_input_and_change() {
        let script = set_value("input[name='msg']", "hello");
        assert!(script.contains("\\'msg\\'"));
        assert!(script.contains("new Event('input'"));
        assert!(script.contains("new Event('change'"));
    }
}
