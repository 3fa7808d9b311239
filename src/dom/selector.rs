//! CSS selector synthesis for re-locating extracted elements.
//!
//! Pure string work: given an element's attributes and xpath, produce the
//! most stable selector available. The rules are ordered; the first one
//! that applies wins.

use crate::dom::node::ElementData;

/// Attributes safe to bake into a selector regardless of site.
const ATTRIBUTE_ALLOW_LIST: &[&str] = &["aria-label", "role", "type", "placeholder", "title", "alt"];

/// Test hooks honored only when dynamic attributes are enabled.
const TEST_ATTRIBUTES: &[&str] = &["data-testid", "data-qa", "data-cy"];

/// Tags whose `name` attribute is a reliable form-control handle.
const NAMED_FORM_TAGS: &[&str] = &["input", "textarea", "select", "button"];

const MAX_STABLE_CLASSES: usize = 2;
const MAX_CLASS_LENGTH: usize = 20;

/// Synthesize a selector for `element`.
///
/// Never fails: when nothing usable can be built, the result is the
/// sentinel from [`sentinel_selector`], which callers must treat as a
/// locate failure (it does not match anything in a live document).
pub fn css_selector_for(element: &ElementData, include_dynamic_attributes: bool) -> String {
    match try_synthesize(element, include_dynamic_attributes) {
        Some(selector) => selector,
        None => sentinel_selector(element),
    }
}

/// Non-queryable placeholder emitted when synthesis fails. Its shape is
/// deliberately not valid against any document: emission signals failure.
pub fn sentinel_selector(element: &ElementData) -> String {
    format!(
        "{}[highlight-index='{}']",
        element.tag_name.as_deref().unwrap_or("unknown"),
        element.highlight_index.unwrap_or(0)
    )
}

/// True for selectors produced by [`sentinel_selector`].
pub fn is_sentinel_selector(selector: &str) -> bool {
    selector.contains("[highlight-index=")
}

fn try_synthesize(element: &ElementData, include_dynamic_attributes: bool) -> Option<String> {
    let tag = element.tag_name.as_deref()?;
    let tag = tag.to_ascii_lowercase();

    // 1. id, when it is plain enough to use with `#`.
    if let Some(id) = element.get_attribute("id") {
        if is_identifier(id) {
            return Some(format!("{tag}#{id}"));
        }
    }

    // 2. Explicit test hooks, gated on dynamic attributes.
    if include_dynamic_attributes {
        for attr in TEST_ATTRIBUTES {
            if let Some(value) = element.get_attribute(attr) {
                if let Some(part) = attribute_selector(attr, value) {
                    return Some(format!("{tag}{part}"));
                }
            }
        }
    }

    // 3. name, but only on form controls where it is meaningful.
    if NAMED_FORM_TAGS.contains(&tag.as_str()) {
        if let Some(name) = element.get_attribute("name") {
            if let Some(part) = attribute_selector("name", name) {
                return Some(format!("{tag}{part}"));
            }
        }
    }

    // 4. Stable classes plus allow-listed attributes.
    let mut selector = tag.clone();
    if include_dynamic_attributes {
        for class in stable_classes(element) {
            selector.push('.');
            selector.push_str(&class);
        }
    }
    for attr in ATTRIBUTE_ALLOW_LIST {
        if let Some(value) = element.get_attribute(attr) {
            if let Some(part) = attribute_selector(attr, value) {
                selector.push_str(&part);
            }
        }
    }
    if selector != tag {
        return Some(selector);
    }

    // 5. Bare tag: fall back to the xpath-derived positional selector.
    xpath_to_css(&element.xpath)
}

/// `[a-zA-Z_][a-zA-Z0-9_-]*`
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Build an attribute test, switching to substring match when the value
/// carries characters that would break (or escape) a quoted exact match.
fn attribute_selector(attr: &str, value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    if needs_substring_match(value) {
        let safe: String = value
            .chars()
            .filter(|c| !is_unsafe_attribute_char(*c))
            .collect();
        if safe.is_empty() {
            return None;
        }
        Some(format!("[{attr}*=\"{safe}\"]"))
    } else {
        Some(format!("[{attr}=\"{value}\"]"))
    }
}

fn needs_substring_match(value: &str) -> bool {
    value.chars().any(is_unsafe_attribute_char)
}

fn is_unsafe_attribute_char(c: char) -> bool {
    matches!(c, '"' | '\'' | '<' | '>' | '`') || c.is_control()
}

/// Classes that look hand-written rather than generated: short, no long
/// digit runs, valid CSS ident characters. At most two are kept.
fn stable_classes(element: &ElementData) -> Vec<String> {
    let Some(class_attr) = element.get_attribute("class") else {
        return Vec::new();
    };
    class_attr
        .split_whitespace()
        .filter(|class| is_stable_class(class))
        .take(MAX_STABLE_CLASSES)
        .map(str::to_string)
        .collect()
}

fn is_stable_class(class: &str) -> bool {
    if class.is_empty() || class.len() > MAX_CLASS_LENGTH {
        return false;
    }
    if has_digit_run(class, 3) {
        return false;
    }
    let mut chars = class.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '-' => {}
        _ => return false,
    }
    class
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn has_digit_run(value: &str, run: usize) -> bool {
    let mut count = 0;
    for c in value.chars() {
        if c.is_ascii_digit() {
            count += 1;
            if count >= run {
                return true;
            }
        } else {
            count = 0;
        }
    }
    false
}

/// Convert a simple positional xpath (`div/ul/li[2]`) into a CSS chain
/// (`div > ul > li:nth-of-type(2)`). Only the positional predicates the
/// extraction script emits are understood; anything else aborts.
pub fn xpath_to_css(xpath: &str) -> Option<String> {
    let trimmed = xpath.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    for segment in trimmed.split('/') {
        parts.push(xpath_segment_to_css(segment)?);
    }
    Some(parts.join(" > "))
}

fn xpath_segment_to_css(segment: &str) -> Option<String> {
    let Some(open) = segment.find('[') else {
        return valid_tag(segment).map(str::to_string);
    };
    let tag = valid_tag(&segment[..open])?;
    let predicate = segment[open..].strip_prefix('[')?.strip_suffix(']')?;

    if predicate == "last()" {
        return Some(format!("{tag}:last-of-type"));
    }
    if predicate == "position()>1" {
        return Some(format!("{tag}:nth-of-type(n+2)"));
    }
    if let Ok(n) = predicate.parse::<usize>() {
        if n >= 1 {
            return Some(format!("{tag}:nth-of-type({n})"));
        }
    }
    None
}

fn valid_tag(tag: &str) -> Option<&str> {
    if !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        && tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
    {
        Some(tag)
    } else {
        None
    }
}
