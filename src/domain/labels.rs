// ============================================================
// Layer 3 — Label Spaces
// ============================================================
// The model tags tokens with BIO tags drawn from one of four
// label namespaces, and classifies spans into a closed entity
// vocabulary. Which namespace the tagger uses is decided once,
// when the archive configuration is written, and never per call.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Label every gold mention carries at position 0 of its label list.
pub const MENTION_LABEL: &str = "Entity";

/// Closed entity-type set tracked by the typed mention metric.
pub const ENTITY_TYPES: [&str; 4] = ["Material", "Method", "Task", "Metric"];

/// Tag for tokens outside every mention.
pub const OUTSIDE_TAG: &str = "O";

/// Which of the four NER label tensors the tagger is trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NerLabelKind {
    /// Plain mention detection: every mention is tagged `Entity`.
    #[default]
    Ner,
    /// Mentions tagged with their entity type.
    Entity,
    /// Mentions tagged `Linked` / `Unlinked` by coreference membership.
    Link,
    /// Mentions tagged `True` / `False` by entity-vocabulary membership.
    IsEntity,
}

impl NerLabelKind {
    /// Mention labels this namespace produces, without BIO prefixes.
    pub fn mention_labels(&self, entity_labels: &[String]) -> Vec<String> {
        match self {
            NerLabelKind::Ner => vec![MENTION_LABEL.to_string()],
            NerLabelKind::Entity => entity_labels.to_vec(),
            NerLabelKind::Link => vec!["Linked".to_string(), "Unlinked".to_string()],
            NerLabelKind::IsEntity => vec!["True".to_string(), "False".to_string()],
        }
    }

    /// The label a gold mention receives under this namespace.
    pub fn mention_label(&self, entity_type: &str, linked: bool, entity_labels: &[String]) -> String {
        match self {
            NerLabelKind::Ner => MENTION_LABEL.to_string(),
            NerLabelKind::Entity => entity_type.to_string(),
            NerLabelKind::Link => if linked { "Linked" } else { "Unlinked" }.to_string(),
            NerLabelKind::IsEntity => {
                let known = entity_labels.iter().any(|l| l == entity_type);
                if known { "True" } else { "False" }.to_string()
            }
        }
    }
}

impl fmt::Display for NerLabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NerLabelKind::Ner => "ner",
            NerLabelKind::Entity => "entity",
            NerLabelKind::Link => "link",
            NerLabelKind::IsEntity => "is_entity",
        };
        f.write_str(name)
    }
}

impl FromStr for NerLabelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ner" | "ner_labels" => Ok(NerLabelKind::Ner),
            "entity" | "ner_entity_labels" => Ok(NerLabelKind::Entity),
            "link" | "ner_link_labels" => Ok(NerLabelKind::Link),
            "is_entity" | "ner_is_entity_labels" => Ok(NerLabelKind::IsEntity),
            other => Err(format!("unknown NER label kind '{other}'")),
        }
    }
}

/// Tag and entity vocabularies shared by the batcher and the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpace {
    pub ner_label_kind: NerLabelKind,
    /// BIO tags; index 0 is always `O`.
    pub ner_tags: Vec<String>,
    /// Entity vocabulary; also the role order of relation tuples.
    pub entity_labels: Vec<String>,
}

impl LabelSpace {
    pub fn new(ner_label_kind: NerLabelKind, entity_labels: Vec<String>) -> Self {
        let mut ner_tags = vec![OUTSIDE_TAG.to_string()];
        for label in ner_label_kind.mention_labels(&entity_labels) {
            ner_tags.push(format!("B-{label}"));
            ner_tags.push(format!("I-{label}"));
        }
        Self { ner_label_kind, ner_tags, entity_labels }
    }

    pub fn num_tags(&self) -> usize {
        self.ner_tags.len()
    }

    pub fn num_entity_labels(&self) -> usize {
        self.entity_labels.len()
    }

    pub fn tag_index(&self, tag: &str) -> Option<usize> {
        self.ner_tags.iter().position(|t| t == tag)
    }

    pub fn tag(&self, index: usize) -> Option<&str> {
        self.ner_tags.get(index).map(String::as_str)
    }

    pub fn entity_index(&self, label: &str) -> Option<usize> {
        self.entity_labels.iter().position(|l| l == label)
    }

    /// Whether gold mentions of `entity_type` are tagged at all. Only the
    /// is-entity namespace has a tag for types outside the vocabulary.
    pub fn tags_type(&self, entity_type: &str) -> bool {
        self.ner_label_kind == NerLabelKind::IsEntity || self.entity_index(entity_type).is_some()
    }

    pub fn entity_label(&self, index: usize) -> Option<&str> {
        self.entity_labels.get(index).map(String::as_str)
    }
}

impl Default for LabelSpace {
    fn default() -> Self {
        LabelSpace::new(
            NerLabelKind::Ner,
            ENTITY_TYPES.iter().map(|s| s.to_string()).collect(),
        )
    }
}
