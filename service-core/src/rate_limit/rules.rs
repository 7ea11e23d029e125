use axum::http::Method;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Quota {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Quota {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn window_ms(&self) -> i64 {
        (self.window_seconds as i64).saturating_mul(1000)
    }
}

/// One endpoint class: a method (or any) plus an exact path or a `prefix*`.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub name: String,
    pub method: Option<Method>,
    pub pattern: String,
    pub quota: Quota,
}

impl RateLimitRule {
    pub fn new(
        name: impl Into<String>,
        method: Option<Method>,
        pattern: impl Into<String>,
        quota: Quota,
    ) -> Self {
        Self {
            name: name.into(),
            method,
            pattern: pattern.into(),
            quota,
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(expected) = &self.method {
            if expected != method {
                return false;
            }
        }

        match self.pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.pattern,
        }
    }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RateLimitRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        Self { rules }
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<&RateLimitRule> {
        self.rules.iter().find(|rule| rule.matches(method, path))
    }

    pub fn rules(&self) -> &[RateLimitRule] {
        &self.rules
    }

    /// Longest window across all rules; bounds how long idle keys are kept.
    pub fn max_window_seconds(&self) -> u64 {
        self.rules
            .iter()
            .map(|r| r.quota.window_seconds)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RuleTable {
        RuleTable::new(vec![
            RateLimitRule::new(
                "login",
                Some(Method::POST),
                "/api/v1/auth/login",
                Quota::new(5, 300),
            ),
            RateLimitRule::new("post", Some(Method::POST), "/api/v1/*", Quota::new(50, 300)),
            RateLimitRule::new("get", Some(Method::GET), "/api/v1/*", Quota::new(100, 300)),
        ])
    }

    #[test]
    fn literal_rule_wins_over_prefix() {
        let t = table();
        let rule = t.find(&Method::POST, "/api/v1/auth/login");
        assert_eq!(rule.map(|r| r.name.as_str()), Some("login"));
    }

    #[test]
    fn prefix_rule_matches_other_paths() {
        let t = table();
        assert_eq!(
            t.find(&Method::POST, "/api/v1/roles").map(|r| r.name.as_str()),
            Some("post")
        );
        assert_eq!(
            t.find(&Method::GET, "/api/v1/auth/me").map(|r| r.name.as_str()),
            Some("get")
        );
    }

    #[test]
    fn method_mismatch_and_unknown_paths_are_unlimited() {
        let t = table();
        assert!(t.find(&Method::DELETE, "/api/v1/roles/1").is_none());
        assert!(t.find(&Method::GET, "/health").is_none());
        assert_eq!(t.max_window_seconds(), 300);
    }
}
