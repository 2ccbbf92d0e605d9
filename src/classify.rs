//! Request classification.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::EngineConfig;
use crate::http::{Destination, Method, Request, RequestMode};

static IMAGE_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpe?g|png|gif|svg|webp)$").expect("valid regex"));

/// Handling class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Network-first with cache fallback.
    Api,
    /// Cache-first with placeholder fallback.
    Image,
    /// Network-first with offline-document fallback.
    Navigate,
    /// Cache-first with dynamic-store fallback.
    Static,
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Api => "api",
            Self::Image => "image",
            Self::Navigate => "navigate",
            Self::Static => "static",
        };
        f.write_str(name)
    }
}

/// Assigns a request to exactly one strategy, or `None` if the engine must
/// not intercept it at all.
///
/// Rules, first match wins:
/// 1. non-`GET` → bypass
/// 2. non-http(s) scheme → bypass
/// 3. path starts with a configured API prefix, or contains `/api/` → API
/// 4. image extension, or image destination → Image
/// 5. navigate mode → Navigate
/// 6. anything else → Static
///
/// The `/api/` substring rule makes the prefix list redundant for prefixes
/// that themselves contain `/api/`; both are kept so non-`/api/` prefixes
/// can still be configured.
#[must_use]
pub fn classify(request: &Request, config: &EngineConfig) -> Option<ResourceClass> {
    if request.method != Method::GET {
        return None;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
        return None;
    }

    let path = request.url.path();
    let class = if config
        .api_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
        || path.contains("/api/")
    {
        ResourceClass::Api
    } else if IMAGE_EXT_RE.is_match(path) || request.destination == Destination::Image {
        ResourceClass::Image
    } else if request.mode == RequestMode::Navigate {
        ResourceClass::Navigate
    } else {
        ResourceClass::Static
    };
    Some(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn classify_default(request: &Request) -> Option<ResourceClass> {
        classify(request, &EngineConfig::default())
    }

    #[test]
    fn api_by_prefix_and_by_substring() {
        assert_eq!(
            classify_default(&get("http://localhost:3000/api/weather?zip=1")),
            Some(ResourceClass::Api)
        );
        // Not in the allowlist, caught by the `/api/` substring rule.
        assert_eq!(
            classify_default(&get("http://localhost:3000/v2/api/other")),
            Some(ResourceClass::Api)
        );
    }

    #[test]
    fn custom_prefix_without_api_segment() {
        let config = EngineConfig::default().with_api_prefixes(["/graphql"]);
        assert_eq!(
            classify(&get("http://localhost:3000/graphql"), &config),
            Some(ResourceClass::Api)
        );
    }

    #[test]
    fn api_wins_over_image_extension() {
        assert_eq!(
            classify_default(&get("http://localhost:3000/api/photos/lawn.png")),
            Some(ResourceClass::Api)
        );
    }

    #[test]
    fn images_by_extension_or_destination() {
        for url in [
            "http://localhost:3000/a.jpg",
            "http://localhost:3000/a.JPEG",
            "http://localhost:3000/a.png",
            "http://localhost:3000/a.gif",
            "http://localhost:3000/a.svg",
            "http://localhost:3000/a.webp?w=200",
        ] {
            assert_eq!(classify_default(&get(url)), Some(ResourceClass::Image), "{url}");
        }
        let by_destination =
            get("http://localhost:3000/avatar").with_destination(Destination::Image);
        assert_eq!(classify_default(&by_destination), Some(ResourceClass::Image));
    }

    #[test]
    fn navigation_and_static_fallback() {
        let nav = Request::navigate(Url::parse("http://localhost:3000/lawn/42").unwrap());
        assert_eq!(classify_default(&nav), Some(ResourceClass::Navigate));

        for url in [
            "http://localhost:3000/static/js/bundle.js",
            "http://localhost:3000/static/css/main.css",
            "http://localhost:3000/fonts/inter.woff2",
            "http://localhost:3000/manifest.json",
        ] {
            assert_eq!(classify_default(&get(url)), Some(ResourceClass::Static), "{url}");
        }
    }

    #[test]
    fn non_get_and_non_http_bypass() {
        let post = get("http://localhost:3000/api/feedback").with_method(Method::POST);
        assert_eq!(classify_default(&post), None);
        assert_eq!(classify_default(&get("chrome-extension://abc/script.js")), None);
        assert_eq!(classify_default(&get("data:text/plain,hi")), None);
    }

    proptest! {
        #[test]
        fn non_get_is_never_classified(
            method in prop::sample::select(vec![
                Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD, Method::OPTIONS,
            ]),
            tail in "[a-z/]{0,20}(\\.png|\\.js|/api/x)?",
            navigate in any::<bool>(),
        ) {
            let url = Url::parse("https://lawnsync.example")
                .unwrap()
                .join(&format!("/p/{tail}"))
                .unwrap();
            let mut request = Request::get(url).with_method(method);
            if navigate {
                request = request.with_mode(RequestMode::Navigate);
            }
            prop_assert_eq!(classify_default(&request), None);
        }

        #[test]
        fn get_over_http_is_always_classified(tail in "[a-zA-Z0-9/._-]{0,30}") {
            let url = Url::parse("http://localhost:3000")
                .unwrap()
                .join(&format!("/p/{tail}"))
                .unwrap();
            prop_assert!(classify_default(&Request::get(url)).is_some());
        }
    }
}
