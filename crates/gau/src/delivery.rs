//! Session delivery policy: cookie vs. URL-fragment token.
//!
//! Browsers will not reliably attach cross-site cookies, and custom-scheme
//! deep links cannot carry them at all, so those targets get the token in
//! the URL fragment instead. The fragment never reaches a server or its
//! logs, which is why the query string is never used for this.

use url::Url;

use crate::auth::{Auth, SessionStrategy};
use crate::cors::url_host;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Cookie,
    Fragment,
}

/// Decide how a completed exchange hands over the session token.
pub(crate) fn resolve_delivery(auth: &Auth, request_url: &Url, redirect_url: &Url) -> Delivery {
    match auth.session_strategy() {
        SessionStrategy::Token => Delivery::Fragment,
        SessionStrategy::Cookie => Delivery::Cookie,
        SessionStrategy::Auto => {
            let custom_scheme = !matches!(redirect_url.scheme(), "http" | "https");
            let cross_host = url_host(request_url) != url_host(redirect_url);
            if custom_scheme || cross_host {
                Delivery::Fragment
            } else {
                Delivery::Cookie
            }
        }
    }
}

/// Minimal page that forwards the browser to `destination` with the token
/// in the fragment, then tries to close the leftover OAuth tab.
pub(crate) fn fragment_page(redirect_url: &Url, token: &str) -> String {
    let mut destination = redirect_url.clone();
    destination.set_fragment(Some(&format!("token={token}")));
    // JSON-escape the URL so it is a safe JS string literal.
    let destination_literal =
        serde_json::to_string(destination.as_str()).unwrap_or_else(|_| "\"/\"".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>Authentication Complete</title>
  <style>
    body {{
      font-family: ui-sans-serif, system-ui, sans-serif;
      background-color: #09090b;
      color: #fafafa;
      display: flex;
      justify-content: center;
      align-items: center;
      height: 100vh;
      margin: 0;
      text-align: center;
    }}
    .card {{
      background-color: #18181b;
      border: 1px solid #27272a;
      border-radius: 0.75rem;
      padding: 2rem;
      max-width: 320px;
    }}
  </style>
  <script>
    window.onload = function() {{
      const url = {destination_literal};
      window.location.href = url;
      setTimeout(window.close, 500);
    }};
  </script>
</head>
<body>
  <div class="card">
    <h1>Authentication Successful</h1>
    <p>You can now close this window.</p>
  </div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_page_embeds_token_in_hash() {
        let url = Url::parse("gau://home").expect("url");
        let page = fragment_page(&url, "tok123");
        assert!(page.contains("gau://home#token=tok123"));
        assert!(!page.contains("?token="));
    }

    #[test]
    fn fragment_page_escapes_destination() {
        let url = Url::parse("https://app.example/path?q=\"quote\"").expect("url");
        let page = fragment_page(&url, "tok");
        assert!(page.contains("\\\"quote\\\"") || page.contains("%22"));
    }
}
