//! Cache key construction

/// Builds stable string keys of the form `namespace:name=value:...`.
///
/// Parts keep insertion order. Reserved characters inside values are
/// percent-escaped so distinct inputs never collide.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    parts: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            parts: Vec::new(),
        }
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.parts.push((name.to_string(), escape(value)));
        self
    }

    /// Add a part only when a value is present
    pub fn with_optional(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn with_flag(self, name: &str, flag: bool) -> Self {
        self.with(name, if flag { "1" } else { "0" })
    }

    pub fn build(&self) -> String {
        let mut key = escape(&self.namespace);
        for (name, value) in &self.parts {
            key.push(':');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            c => out.push(c),
        }
    }
    out
}
