//! Delivery mediums.
//!
//! A medium resolves its own template, renders it against the notification
//! context, picks the destination out of the recipient's contact map and
//! hands the result to a [`Transport`]. It never touches delivery logs; the
//! dispatcher owns all bookkeeping.

pub mod email;
pub mod sms;
pub mod transport;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    clients::template::{TemplateResolver, render_template},
    error::MediumError,
    models::{notification::Notification, template::DeliveryResult},
};

pub use email::EmailMedium;
pub use sms::SmsMedium;
pub use transport::{LogTransport, Transport};

#[async_trait]
pub trait Medium: Send + Sync {
    /// Registry key and template scope, e.g. `email`.
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<DeliveryResult, MediumError>;
}

/// What to do when the recipient has no address for a medium's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingAddressPolicy {
    Fail,
    Fallback(String),
}

impl MissingAddressPolicy {
    pub fn from_fallback(fallback: Option<String>) -> Self {
        match fallback {
            Some(address) if !address.trim().is_empty() => MissingAddressPolicy::Fallback(address),
            _ => MissingAddressPolicy::Fail,
        }
    }

    fn apply(
        &self,
        notification: &Notification,
        medium: &str,
        channel: &str,
    ) -> Result<String, MediumError> {
        match (notification.contact(channel), self) {
            (Some(address), _) => Ok(address.to_string()),
            (None, MissingAddressPolicy::Fallback(address)) => Ok(address.clone()),
            (None, MissingAddressPolicy::Fail) => Err(MediumError::MissingAddress {
                medium: medium.to_string(),
                channel: channel.to_string(),
            }),
        }
    }
}

/// Template lookup plus render, shared by the built-in mediums.
async fn render_for(
    templates: &TemplateResolver,
    notification: &Notification,
    medium: &str,
) -> Result<String, MediumError> {
    let content = templates.resolve(&notification.template_name, medium).await?;
    render_template(&content, &notification.context_data)
}

/// Immutable name → medium map built once at startup.
pub struct MediumRegistry {
    mediums: HashMap<String, Arc<dyn Medium>>,
}

impl MediumRegistry {
    pub fn builder() -> MediumRegistryBuilder {
        MediumRegistryBuilder {
            mediums: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Medium>> {
        self.mediums.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mediums.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

pub struct MediumRegistryBuilder {
    mediums: HashMap<String, Arc<dyn Medium>>,
}

impl MediumRegistryBuilder {
    /// Later registrations under the same name replace earlier ones.
    pub fn register(mut self, medium: Arc<dyn Medium>) -> Self {
        self.mediums.insert(medium.name().to_string(), medium);
        self
    }

    pub fn build(self) -> MediumRegistry {
        MediumRegistry {
            mediums: self.mediums,
        }
    }
}
