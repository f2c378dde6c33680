//! The page URL as the engine sees it: a query string that can be replaced
//! without navigating, plus the origin used to normalize WebSocket URLs.

pub trait UrlState {
    /// Current query string without the leading `?`.
    fn query(&self) -> String;

    /// Non-navigating history replacement of the query string.
    fn replace_query(&mut self, query: &str);

    fn origin(&self) -> String;
}

pub struct MemoryUrl {
    pub origin: String,
    pub query: String,
}

impl Default for MemoryUrl {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            query: String::new(),
        }
    }
}

impl MemoryUrl {
    pub fn with_query(query: &str) -> Self {
        Self {
            query: query.trim_start_matches('?').to_string(),
            ..Self::default()
        }
    }
}

impl UrlState for MemoryUrl {
    fn query(&self) -> String {
        self.query.clone()
    }

    fn replace_query(&mut self, query: &str) {
        self.query = query.trim_start_matches('?').to_string();
    }

    fn origin(&self) -> String {
        self.origin.clone()
    }
}
