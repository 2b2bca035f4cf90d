use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex};

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::FetchError;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(group|user_id)\}").unwrap());

/// Read-through cache of rendered search bodies, keyed by (user_id, group).
/// Oldest entries are evicted once `capacity` is reached.
pub struct TemplateCache {
    template: String,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    rendered: HashMap<(String, String), Value>,
    order: VecDeque<(String, String)>,
}

impl TemplateCache {
    pub fn new(template: String, capacity: usize) -> Self {
        TemplateCache {
            template,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn render(&self, user_id: &str, group: &str) -> Result<Value, FetchError> {
        let key = (user_id.to_string(), group.to_string());
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = inner.rendered.get(&key) {
            return Ok(hit.clone());
        }

        let value = render_template(&self.template, user_id, group)?;
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.rendered.remove(&oldest);
            }
        }
        inner.order.push_back(key.clone());
        inner.rendered.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.rendered.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Substitute placeholders with JSON-escaped values and parse the result.
fn render_template(template: &str, user_id: &str, group: &str) -> Result<Value, FetchError> {
    let escape = |s: &str| {
        let quoted = Value::String(s.to_string()).to_string();
        quoted[1..quoted.len() - 1].to_string()
    };
    let (user_id, group) = (escape(user_id), escape(group));
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| match &caps[1] {
        "group" => group.clone(),
        _ => user_id.clone(),
    });
    Ok(serde_json::from_str(&rendered)?)
}
