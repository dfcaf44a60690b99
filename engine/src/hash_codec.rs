// ============================================================================
// HASH CODEC — URL fragment <-> HashState
// ============================================================================
//
// The widget shares the URL fragment with its host page. Everything before the
// `#!/` marker belongs to the host and is carried through untouched; everything
// after it is ours:
//
//   [userHash]#!/[catalogId/]productSlug&k=v&.../~/cart
//   [userHash]#!/[catalogId][?k=v&...]/~/cart
//
// Decoding order:
//   1. trailing `/~/cart` or `~/cart`          -> cart_open
//   2. leading `catalog-<N>` / `emb_<alnum>`   -> catalog_id
//   3. first `&` segment without `=`           -> product slug (unless reserved)
//   4. remaining `key=value` segments          -> params
//
// Parsing never fails. Anything we cannot make sense of degrades to the list
// view so the router never hands out an unrenderable state.
//
// ============================================================================

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::DEFAULT_RESERVED_ROUTES;

/// Marker separating the host page's fragment from ours.
pub const HASH_MARKER: &str = "#!/";

const CART_SUFFIX: &str = "/~/cart";
const CART_SUFFIX_BARE: &str = "~/cart";

/// Filter and page parameters. Ordered so serialization is deterministic.
pub type Params = BTreeMap<String, String>;

// ── HashState ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum View {
    #[default]
    List,
    Product { slug: String },
}

impl View {
    pub fn product(slug: impl Into<String>) -> Self {
        View::Product { slug: slug.into() }
    }

    pub fn is_product(&self) -> bool {
        matches!(self, View::Product { .. })
    }
}

/// Everything the widget keeps in the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashState {
    #[serde(flatten)]
    pub view: View,
    pub cart_open: bool,
    pub params: Params,
    pub catalog_id: Option<String>,
}

impl HashState {
    pub fn product_slug(&self) -> Option<&str> {
        match &self.view {
            View::Product { slug } => Some(slug),
            View::List => None,
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Whether the change from `previous` is visible to the widget. Catalog
    /// identity is deliberately not part of the comparison.
    pub fn differs_from(&self, previous: &HashState) -> bool {
        self.view != previous.view
            || self.cart_open != previous.cart_open
            || self.params != previous.params
    }

    /// True when nothing of ours needs to be in the URL.
    pub fn is_blank(&self) -> bool {
        self.view == View::List && !self.cart_open && self.params.is_empty() && self.catalog_id.is_none()
    }
}

// ── Reserved routes ────────────────────────────────────────────────────────

/// First-segment keywords that are routes rather than product slugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedRoutes {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl ReservedRoutes {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = Vec::new();
        let mut prefixes = Vec::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            if token.ends_with('/') {
                prefixes.push(token.to_string());
            } else {
                exact.push(token.to_string());
            }
        }
        Self { exact, prefixes }
    }

    pub fn matches(&self, segment: &str) -> bool {
        self.exact.iter().any(|t| t == segment) || self.prefixes.iter().any(|p| segment.starts_with(p.as_str()))
    }
}

impl Default for ReservedRoutes {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVED_ROUTES)
    }
}

// ── HashCodec ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct HashCodec {
    reserved: ReservedRoutes,
}

impl HashCodec {
    pub fn new(reserved: ReservedRoutes) -> Self {
        Self { reserved }
    }

    /// Decode a fragment (`location.hash`, with or without the leading `#`).
    pub fn parse(&self, fragment: &str) -> HashState {
        let fragment = normalize(fragment);
        let mut state = HashState::default();

        let ours = match fragment.find(HASH_MARKER) {
            Some(pos) => &fragment[pos + HASH_MARKER.len()..],
            None => return state,
        };

        let ours = if let Some(rest) = ours.strip_suffix(CART_SUFFIX) {
            state.cart_open = true;
            rest
        } else if let Some(rest) = ours.strip_suffix(CART_SUFFIX_BARE) {
            state.cart_open = true;
            rest
        } else {
            ours
        };

        let (catalog_id, rest) = split_catalog_id(ours);
        state.catalog_id = catalog_id.map(str::to_string);
        let rest = rest.strip_prefix('?').unwrap_or(rest);

        let mut segments = rest.split('&').filter(|s| !s.is_empty()).peekable();
        if let Some(first) = segments.peek() {
            if !first.contains('=') {
                let slug = decode(first);
                if self.reserved.matches(&slug) {
                    tracing::debug!(segment = %slug, "reserved route in fragment, using list view");
                } else {
                    state.view = View::Product { slug };
                }
                segments.next();
            }
        }

        for segment in segments {
            match segment.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    state.params.insert(decode(key), decode(value));
                }
                _ => tracing::debug!(segment, "ignoring malformed fragment segment"),
            }
        }

        state
    }

    /// Encode `state`, keeping the host-owned part of `existing` verbatim.
    ///
    /// Returns the empty string when neither the host nor the widget has
    /// anything to put in the fragment; the router then drops the `#`
    /// entirely instead of leaving a bare one behind.
    pub fn serialize(&self, state: &HashState, existing: &str) -> String {
        let prefix = user_prefix(existing);
        let mut ours = String::new();

        if let Some(catalog_id) = &state.catalog_id {
            ours.push_str(catalog_id);
        }

        let params: Vec<String> = state
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();

        match &state.view {
            View::Product { slug } => {
                if !ours.is_empty() {
                    ours.push('/');
                }
                ours.push_str(&urlencoding::encode(slug));
                for param in &params {
                    ours.push('&');
                    ours.push_str(param);
                }
            }
            View::List => {
                if !params.is_empty() {
                    ours.push('?');
                    ours.push_str(&params.join("&"));
                }
            }
        }

        if state.cart_open {
            ours.push_str(if ours.is_empty() { CART_SUFFIX_BARE } else { CART_SUFFIX });
        }

        if ours.is_empty() {
            return prefix;
        }
        format!("{}{}{}", prefix, HASH_MARKER, ours)
    }
}

/// The host page's part of a fragment, always `#`-prefixed or empty.
pub fn user_prefix(fragment: &str) -> String {
    let fragment = normalize(fragment);
    let prefix = match fragment.find(HASH_MARKER) {
        Some(pos) => &fragment[..pos],
        None => &fragment[..],
    };
    if prefix == "#" {
        String::new()
    } else {
        prefix.to_string()
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn normalize(fragment: &str) -> Cow<'_, str> {
    let fragment = fragment.trim();
    if fragment.is_empty() || fragment.starts_with('#') {
        Cow::Borrowed(fragment)
    } else {
        Cow::Owned(format!("#{}", fragment))
    }
}

/// Split a leading `catalog-<digits>` or `emb_<alnum>` identifier off `ours`.
/// The identifier must be followed by `/`, `?` or the end of the string; a
/// `/` separator is consumed, a `?` is left for the parameter parser.
fn split_catalog_id(ours: &str) -> (Option<&str>, &str) {
    let id_len = if let Some(rest) = ours.strip_prefix("catalog-") {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        (digits > 0).then(|| "catalog-".len() + digits)
    } else if let Some(rest) = ours.strip_prefix("emb_") {
        let alnum = rest.bytes().take_while(u8::is_ascii_alphanumeric).count();
        (alnum > 0).then(|| "emb_".len() + alnum)
    } else {
        None
    };

    let Some(len) = id_len else {
        return (None, ours);
    };
    let (id, rest) = ours.split_at(len);
    match rest.as_bytes().first() {
        None => (Some(id), rest),
        Some(b'/') => (Some(id), &rest[1..]),
        Some(b'?') => (Some(id), rest),
        Some(_) => (None, ours),
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}
