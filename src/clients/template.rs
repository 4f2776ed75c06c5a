use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{error::MediumError, store::TemplateStore};

/// Resolves `(name, medium)` to template content, with an optional TTL cache.
pub struct TemplateResolver {
    store: Arc<dyn TemplateStore>,
    cache_ttl: Duration,
    cache: RwLock<HashMap<(String, String), (String, Instant)>>,
}

impl TemplateResolver {
    pub fn new(store: Arc<dyn TemplateStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn uncached(store: Arc<dyn TemplateStore>) -> Self {
        Self::new(store, Duration::ZERO)
    }

    pub async fn resolve(&self, name: &str, medium: &str) -> Result<String, MediumError> {
        let key = (name.to_string(), medium.to_string());

        if !self.cache_ttl.is_zero() {
            if let Some((content, cached_at)) = self.cache.read().await.get(&key) {
                if cached_at.elapsed() < self.cache_ttl {
                    debug!(template = name, medium, "Template served from cache");
                    return Ok(content.clone());
                }
            }
        }

        let template = self
            .store
            .find_template(name, medium)
            .await?
            .ok_or_else(|| MediumError::TemplateNotFound {
                name: name.to_string(),
                medium: medium.to_string(),
            })?;

        if !self.cache_ttl.is_zero() {
            self.cache
                .write()
                .await
                .insert(key, (template.content.clone(), Instant::now()));
        }

        Ok(template.content)
    }
}

/// Substitutes `{{ key }}` placeholders from the context. Whitespace inside
/// the braces is ignored. Every placeholder must have a value.
pub fn render_template(
    template: &str,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<String, MediumError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let end = after_open
            .find("}}")
            .ok_or_else(|| MediumError::Render("Unclosed placeholder in template".to_string()))?;

        let key = after_open[..end].trim();
        if key.is_empty() {
            return Err(MediumError::Render("Empty placeholder in template".to_string()));
        }

        let value = variables.get(key).ok_or_else(|| {
            warn!(missing_variable = %key, "Template contains unreplaced variable");
            MediumError::Render(format!("Missing variable in template: {{{{{}}}}}", key))
        })?;

        rendered.push_str(&render_value(value));
        rest = &after_open[end + 2..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
