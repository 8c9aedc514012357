//! Cookie header parsing plus a staged Set-Cookie jar.
//!
//! Reads only ever see the incoming snapshot; `set`/`delete` accumulate
//! outgoing operations that are rendered once with `to_header_values`.

use std::collections::HashMap;
use std::fmt;

use time::OffsetDateTime;
use time::macros::format_description;

pub const SESSION_COOKIE_NAME: &str = "__gau-session-token";
pub const CSRF_COOKIE_NAME: &str = "__gau-csrf-token";
pub const PKCE_COOKIE_NAME: &str = "__gau-pkce-verifier";
pub const CALLBACK_URI_COOKIE_NAME: &str = "__gau-callback-uri";
pub const LINKING_TOKEN_COOKIE_NAME: &str = "__gau-linking-token";

/// Transaction cookie lifetime in seconds.
pub const CSRF_MAX_AGE: i64 = 60 * 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        };
        f.write_str(value)
    }
}

/// Serialization attributes for an outgoing cookie. Unset fields fall back
/// to the jar defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub expires: Option<OffsetDateTime>,
    pub http_only: Option<bool>,
    pub secure: Option<bool>,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    /// Merge these overrides over a set of defaults, field by field.
    pub fn merged_over(&self, defaults: &CookieOptions) -> CookieOptions {
        CookieOptions {
            path: self.path.clone().or_else(|| defaults.path.clone()),
            domain: self.domain.clone().or_else(|| defaults.domain.clone()),
            max_age: self.max_age.or(defaults.max_age),
            expires: self.expires.or(defaults.expires),
            http_only: self.http_only.or(defaults.http_only),
            secure: self.secure.or(defaults.secure),
            same_site: self.same_site.or(defaults.same_site),
        }
    }
}

/// Parse a `Cookie` request header into a name/value map.
pub fn parse_cookies(header: Option<&str>) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(header) = header else {
        return cookies;
    };
    for pair in header.split(';') {
        let pair = pair.trim();
        if let Some((name, value)) = pair.split_once('=')
            && !name.is_empty()
        {
            cookies.insert(name.to_string(), value.to_string());
        }
    }
    cookies
}

struct StagedCookie {
    name: String,
    value: String,
    options: CookieOptions,
}

/// Incoming cookie snapshot plus staged outgoing operations.
pub struct Cookies {
    incoming: HashMap<String, String>,
    defaults: CookieOptions,
    staged: Vec<StagedCookie>,
}

impl Cookies {
    pub fn new(incoming: HashMap<String, String>, defaults: CookieOptions) -> Self {
        Self {
            incoming,
            defaults,
            staged: Vec::new(),
        }
    }

    /// Read from the incoming snapshot. Staged operations are never visible.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.incoming.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str, overrides: CookieOptions) {
        self.staged.push(StagedCookie {
            name: name.to_string(),
            value: value.to_string(),
            options: overrides.merged_over(&self.defaults),
        });
    }

    /// Stage a deletion: empty value, `Max-Age=0`, `Expires` in the past.
    pub fn delete(&mut self, name: &str, overrides: CookieOptions) {
        let options = CookieOptions {
            max_age: Some(0),
            expires: Some(OffsetDateTime::UNIX_EPOCH),
            ..overrides
        };
        self.set(name, "", options);
    }

    /// Render one `Set-Cookie` header value per staged operation.
    pub fn to_header_values(&self) -> Vec<String> {
        self.staged.iter().map(render_cookie).collect()
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }
}

fn render_cookie(cookie: &StagedCookie) -> String {
    let mut rendered = format!("{}={}", cookie.name, cookie.value);
    let options = &cookie.options;
    if let Some(path) = &options.path {
        rendered.push_str("; Path=");
        rendered.push_str(path);
    }
    if let Some(domain) = &options.domain {
        rendered.push_str("; Domain=");
        rendered.push_str(domain);
    }
    if let Some(max_age) = options.max_age {
        rendered.push_str("; Max-Age=");
        rendered.push_str(&max_age.to_string());
    }
    if let Some(expires) = options.expires
        && let Some(formatted) = format_http_date(expires)
    {
        rendered.push_str("; Expires=");
        rendered.push_str(&formatted);
    }
    if options.http_only == Some(true) {
        rendered.push_str("; HttpOnly");
    }
    if options.secure == Some(true) {
        rendered.push_str("; Secure");
    }
    if let Some(same_site) = options.same_site {
        rendered.push_str("; SameSite=");
        rendered.push_str(&same_site.to_string());
    }
    rendered
}

fn format_http_date(date: OffsetDateTime) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    date.format(&format).ok()
}
