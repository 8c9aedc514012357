//! CORS policy resolution and the POST origin-trust check.

use axum::http::{HeaderValue, header};
use axum::response::Response;
use url::Url;

use crate::auth::{Auth, TrustHosts};

/// Which origins receive CORS headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Reflect any origin ('*' when credentials are disabled).
    All,
    /// Reuse the context's trusted-host list.
    Trusted,
    /// Explicit full origins (`https://app.example.com`) or hostnames.
    List(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct CorsConfig {
    pub allowed_origins: AllowedOrigins,
    pub allow_credentials: bool,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age: Option<i64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::All,
            allow_credentials: true,
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "Cookie".to_string(),
            ],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            expose_headers: Vec::new(),
            max_age: None,
        }
    }
}

/// Host with explicit port when present, mirroring the `Host` header shape.
pub(crate) fn url_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn origin_allowed(auth: &Auth, origin: &str) -> bool {
    let Some(cors) = auth.cors() else {
        return false;
    };
    match &cors.allowed_origins {
        AllowedOrigins::All => true,
        AllowedOrigins::Trusted => match auth.trust_hosts() {
            TrustHosts::All => true,
            TrustHosts::List(_) => match Url::parse(origin) {
                Ok(url) => {
                    auth.trust_hosts().contains(&url_host(&url))
                        || url
                            .host_str()
                            .is_some_and(|host| auth.trust_hosts().contains(host))
                }
                Err(_) => false,
            },
        },
        AllowedOrigins::List(origins) => {
            if origins.iter().any(|o| o == "*") {
                return true;
            }
            if origins.iter().any(|o| o == origin) {
                return true;
            }
            match Url::parse(origin) {
                Ok(url) => {
                    let host = url_host(&url);
                    origins.iter().any(|o| {
                        o == &host || url.host_str().is_some_and(|hostname| o == hostname)
                    })
                }
                Err(_) => false,
            }
        }
    }
}

fn allow_origin_value(cors: &CorsConfig, origin: &str) -> String {
    if cors.allowed_origins == AllowedOrigins::All && !cors.allow_credentials {
        "*".to_string()
    } else {
        origin.to_string()
    }
}

fn set_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

/// Inject CORS headers into an outgoing response when the request origin
/// passes the configured policy. Applied to every response.
pub(crate) fn apply_cors(auth: &Auth, origin: Option<&str>, response: &mut Response) {
    let Some(cors) = auth.cors() else {
        return;
    };
    let Some(origin) = origin else {
        return;
    };
    if !origin_allowed(auth, origin) {
        return;
    }

    set_header(response, header::VARY, "Origin");
    set_header(
        response,
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        &allow_origin_value(cors, origin),
    );
    if cors.allow_credentials {
        set_header(response, header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
    }
    set_header(
        response,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        &cors.allowed_headers.join(", "),
    );
    set_header(
        response,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        &cors.allowed_methods.join(", "),
    );
    if !cors.expose_headers.is_empty() {
        set_header(
            response,
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            &cors.expose_headers.join(", "),
        );
    }
}

/// Answer an OPTIONS preflight. Runs before any routing or origin check.
pub(crate) fn handle_preflight(auth: &Auth, origin: Option<&str>) -> Response {
    let mut response = Response::builder()
        .status(axum::http::StatusCode::NO_CONTENT)
        .body(axum::body::Body::empty())
        .unwrap_or_default();

    let Some(cors) = auth.cors() else {
        return response;
    };

    if let Some(origin) = origin
        && origin_allowed(auth, origin)
    {
        set_header(
            &mut response,
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            &allow_origin_value(cors, origin),
        );
        if cors.allow_credentials {
            set_header(
                &mut response,
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                "true",
            );
        }
    }
    set_header(
        &mut response,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        &cors.allowed_headers.join(", "),
    );
    set_header(
        &mut response,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        &cors.allowed_methods.join(", "),
    );
    if let Some(max_age) = cors.max_age {
        set_header(
            &mut response,
            header::ACCESS_CONTROL_MAX_AGE,
            &max_age.to_string(),
        );
    }
    if !cors.expose_headers.is_empty() {
        set_header(
            &mut response,
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            &cors.expose_headers.join(", "),
        );
    }
    response
}

/// Origin-trust check for state-changing requests. `request_origin` is the
/// server's own `scheme://host` for the incoming request.
pub(crate) fn verify_request_origin(
    auth: &Auth,
    origin: Option<&str>,
    request_origin: &str,
) -> bool {
    if matches!(auth.trust_hosts(), TrustHosts::All) {
        return true;
    }
    let Some(origin) = origin else {
        return false;
    };
    let Ok(origin_url) = Url::parse(origin) else {
        return false;
    };
    let origin_host = url_host(&origin_url);

    // Exact hostname match, port irrelevant. A prefix check would also
    // accept hosts like `localhost.evil.com`.
    if auth.development() && matches!(origin_url.host_str(), Some("localhost" | "127.0.0.1")) {
        return true;
    }
    if origin == request_origin {
        return true;
    }
    auth.trust_hosts().contains(&origin_host)
}
