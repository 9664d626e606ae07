use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Pending,
    Provisioning,
    Staging,
    Ready,
    Error,
}

text_enum!(TemplateStatus, "template status" {
    Pending => "pending",
    Provisioning => "provisioning",
    Staging => "staging",
    Ready => "ready",
    Error => "error",
});

impl TemplateStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, TemplateStatus::Ready | TemplateStatus::Error)
    }

    /// Pipeline transition table. Resetting to `pending` is how a recreate starts over.
    pub fn can_transition_to(&self, next: TemplateStatus) -> bool {
        use TemplateStatus::*;
        match (*self, next) {
            (_, Pending) => true,
            (Pending, Provisioning) => true,
            (Provisioning, Staging) | (Provisioning, Ready) => true,
            (Staging, Ready) => true,
            (Pending | Provisioning | Staging, Error) => true,
            _ => false,
        }
    }
}

/// Where a template's root filesystem comes from. A template has exactly one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSource {
    Base {
        #[serde(rename = "baseCtTemplate")]
        base_ct_template: String,
    },
    Parent {
        #[serde(rename = "parentTemplateId")]
        parent_template_id: String,
    },
}

impl TemplateSource {
    pub fn base(name: impl Into<String>) -> Self {
        TemplateSource::Base {
            base_ct_template: name.into(),
        }
    }

    pub fn parent(id: impl Into<String>) -> Self {
        TemplateSource::Parent {
            parent_template_id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub status: TemplateStatus,
    pub vmid: Option<u32>,
    pub node: Option<String>,
    #[serde(flatten)]
    pub source: TemplateSource,
    pub tech_stacks: BTreeSet<String>,
    pub inherited_tech_stacks: BTreeSet<String>,
    pub is_default: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn base_ct_template(&self) -> Option<&str> {
        match &self.source {
            TemplateSource::Base { base_ct_template } => Some(base_ct_template),
            TemplateSource::Parent { .. } => None,
        }
    }

    pub fn parent_template_id(&self) -> Option<&str> {
        match &self.source {
            TemplateSource::Parent { parent_template_id } => Some(parent_template_id),
            TemplateSource::Base { .. } => None,
        }
    }

    /// Everything installed in this template's image once it is ready.
    pub fn effective_tech_stacks(&self) -> BTreeSet<String> {
        self.inherited_tech_stacks
            .union(&self.tech_stacks)
            .cloned()
            .collect()
    }
}
