//! Client-side route table and the authentication guard.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Profile,
    GenerationQueue,
    CreateTrilogy,
    Trilogy(Uuid),
    WorldRules(Uuid),
    RuleAnalytics(Uuid),
    Characters(Uuid),
    BookChapters(Uuid),
    ChapterSubChapters(Uuid),
}

static PARAM_ROUTE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^/(trilogy|book|chapter)/([0-9a-fA-F-]{36})(?:/(world-rules|rule-analytics|characters|chapters|sub-chapters))?/?$",
    )
    .ok()
});

impl Route {
    /// Resolves a path, ignoring any query string or fragment.
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();

        let fixed = match path.trim_end_matches('/') {
            "" | "/dashboard" => Some(Route::Dashboard),
            "/login" => Some(Route::Login),
            "/register" => Some(Route::Register),
            "/profile" => Some(Route::Profile),
            "/generation-queue" => Some(Route::GenerationQueue),
            "/trilogy/create" => Some(Route::CreateTrilogy),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }

        let captures = PARAM_ROUTE.as_ref()?.captures(path)?;
        let id = Uuid::parse_str(captures.get(2)?.as_str()).ok()?;
        let section = captures.get(3).map(|m| m.as_str());

        match (captures.get(1)?.as_str(), section) {
            ("trilogy", None) => Some(Route::Trilogy(id)),
            ("trilogy", Some("world-rules")) => Some(Route::WorldRules(id)),
            ("trilogy", Some("rule-analytics")) => Some(Route::RuleAnalytics(id)),
            ("trilogy", Some("characters")) => Some(Route::Characters(id)),
            ("book", Some("chapters")) => Some(Route::BookChapters(id)),
            ("chapter", Some("sub-chapters")) => Some(Route::ChapterSubChapters(id)),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Login => "/login".to_string(),
            Route::Register => "/register".to_string(),
            Route::Dashboard => "/dashboard".to_string(),
            Route::Profile => "/profile".to_string(),
            Route::GenerationQueue => "/generation-queue".to_string(),
            Route::CreateTrilogy => "/trilogy/create".to_string(),
            Route::Trilogy(id) => format!("/trilogy/{id}"),
            Route::WorldRules(id) => format!("/trilogy/{id}/world-rules"),
            Route::RuleAnalytics(id) => format!("/trilogy/{id}/rule-analytics"),
            Route::Characters(id) => format!("/trilogy/{id}/characters"),
            Route::BookChapters(id) => format!("/book/{id}/chapters"),
            Route::ChapterSubChapters(id) => format!("/chapter/{id}/sub-chapters"),
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Login | Route::Register)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Where navigation to `route` actually lands.
pub fn guard(route: Route, authenticated: bool) -> Route {
    if route.requires_auth() && !authenticated {
        Route::Login
    } else {
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "6f1c2b1e-8a4d-4c2e-9b7a-1d2e3f4a5b6c";

    #[test]
    fn test_route_pattern_compiles() {
        assert!(PARAM_ROUTE.is_some());
    }

    #[test]
    fn test_parse_fixed_routes() {
        assert_eq!(Route::parse("/login"), Some(Route::Login));
        assert_eq!(Route::parse("/"), Some(Route::Dashboard));
        assert_eq!(Route::parse("/generation-queue/"), Some(Route::GenerationQueue));
        assert_eq!(Route::parse("/trilogy/create"), Some(Route::CreateTrilogy));
        assert_eq!(Route::parse("/nowhere"), None);
    }

    #[test]
    fn test_parse_parameterized_routes() {
        let id = Uuid::parse_str(ID).unwrap();
        assert_eq!(Route::parse(&format!("/trilogy/{ID}")), Some(Route::Trilogy(id)));
        assert_eq!(
            Route::parse(&format!("/trilogy/{ID}/world-rules?tab=active")),
            Some(Route::WorldRules(id))
        );
        assert_eq!(
            Route::parse(&format!("/book/{ID}/chapters")),
            Some(Route::BookChapters(id))
        );
        assert_eq!(
            Route::parse(&format!("/chapter/{ID}/sub-chapters")),
            Some(Route::ChapterSubChapters(id))
        );
        assert_eq!(Route::parse(&format!("/book/{ID}/characters")), None);
        assert_eq!(Route::parse("/trilogy/not-a-uuid-at-all-but-36-chars-long"), None);
    }

    #[test]
    fn test_path_round_trips() {
        let id = Uuid::parse_str(ID).unwrap();
        for route in [
            Route::Profile,
            Route::RuleAnalytics(id),
            Route::Characters(id),
            Route::ChapterSubChapters(id),
        ] {
            assert_eq!(Route::parse(&route.path()), Some(route));
        }
    }

    #[test]
    fn test_guard_redirects_to_login() {
        let id = Uuid::parse_str(ID).unwrap();
        assert_eq!(guard(Route::Trilogy(id), false), Route::Login);
        assert_eq!(guard(Route::Trilogy(id), true), Route::Trilogy(id));
        assert_eq!(guard(Route::Register, false), Route::Register);
        assert_eq!(guard(Route::Dashboard, false), Route::Login);
    }
}
