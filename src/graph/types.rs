//! Core graph type definitions.
//!
//! Defines [`OrgId`] (the tenant key every accessor demands), [`NodeKind`],
//! [`Relation`], the persisted [`MemoryNode`] / [`MemoryEdge`] records, the
//! [`ArtifactRecord`] delivered by ingestion, and the [`CandidateEdge`]
//! proposals heuristics emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Tenant identifier. Constructing one is the only way into the store, so a
/// call site without an org does not compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrgId(String);

impl OrgId {
    /// Validate a raw org identifier. Empty or whitespace-only ids are rejected,
    /// never defaulted.
    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GraphError::MissingOrg);
        }
        if trimmed.len() > 128 || trimmed.chars().any(char::is_control) {
            return Err(GraphError::malformed("org id is not a valid identifier"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Canonical form of an artifact's external id: trimmed and uppercased, the
/// same form key extraction produces, so `eng-7` and `ENG-7` are one node.
pub fn normalize_foreign_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of engineering artifact a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Issue,
    PullRequest,
    Deployment,
    Incident,
    Meeting,
    Doc,
    ChatThread,
    Discussion,
    Commit,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        Self::Issue,
        Self::PullRequest,
        Self::Deployment,
        Self::Incident,
        Self::Meeting,
        Self::Doc,
        Self::ChatThread,
        Self::Discussion,
        Self::Commit,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::PullRequest => "pull_request",
            Self::Deployment => "deployment",
            Self::Incident => "incident",
            Self::Meeting => "meeting",
            Self::Doc => "doc",
            Self::ChatThread => "chat_thread",
            Self::Discussion => "discussion",
            Self::Commit => "commit",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown node kind: {s}"))
    }
}

/// Typed relationship between two nodes of the same org.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Discusses,
    References,
    Implements,
    Fixes,
    Duplicates,
    DerivedFrom,
    CausedBy,
    Next,
    Previous,
}

impl Relation {
    pub const ALL: [Relation; 9] = [
        Self::Discusses,
        Self::References,
        Self::Implements,
        Self::Fixes,
        Self::Duplicates,
        Self::DerivedFrom,
        Self::CausedBy,
        Self::Next,
        Self::Previous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discusses => "discusses",
            Self::References => "references",
            Self::Implements => "implements",
            Self::Fixes => "fixes",
            Self::Duplicates => "duplicates",
            Self::DerivedFrom => "derived_from",
            Self::CausedBy => "caused_by",
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }

    /// Edge `weight` assigned to every edge of this relation.
    pub fn base_weight(&self) -> f64 {
        match self {
            Self::CausedBy => 1.0,
            Self::Fixes => 0.95,
            Self::Implements => 0.9,
            Self::DerivedFrom => 0.85,
            Self::Duplicates => 0.8,
            Self::Next | Self::Previous => 0.75,
            Self::References => 0.6,
            Self::Discusses => 0.5,
        }
    }

    /// Relations that make up a causality chain.
    pub fn is_causal(&self) -> bool {
        matches!(
            self,
            Self::CausedBy | Self::Fixes | Self::Implements | Self::DerivedFrom
        )
    }

    /// `next` / `previous` temporal links.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Next | Self::Previous)
    }

    /// Short English phrase used by the template narrative ("A <phrase> B").
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::Discusses => "discusses",
            Self::References => "references",
            Self::Implements => "is implemented by",
            Self::Fixes => "fixes",
            Self::Duplicates => "duplicates",
            Self::DerivedFrom => "led to",
            Self::CausedBy => "was caused by",
            Self::Next => "was followed by",
            Self::Previous => "came after",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown relation: {s}"))
    }
}

/// A node record, matching the `memory_nodes` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    /// UUID v7 primary key.
    pub id: String,
    pub org_id: String,
    pub kind: NodeKind,
    /// External identifier such as `ENG-102` or `#456`.
    pub foreign_id: String,
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// `true` while the node was only ever referenced, never ingested.
    pub is_stub: bool,
    /// Event time of the artifact (drives timeline order).
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An edge record, matching the `memory_edges` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub id: String,
    pub org_id: String,
    pub src_id: String,
    pub dst_id: String,
    pub relation: Relation,
    pub weight: f64,
    pub confidence: f64,
    /// Heuristic source, time delta, reference type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEdge {
    /// Traversal strength used for path scoring.
    pub fn strength(&self) -> f64 {
        self.weight * self.confidence
    }

    /// The endpoint opposite `node_id`.
    pub fn other_end(&self, node_id: &str) -> &str {
        if self.src_id == node_id {
            &self.dst_id
        } else {
            &self.src_id
        }
    }
}

/// A normalized artifact as delivered by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub org_id: String,
    pub kind: NodeKind,
    pub foreign_id: String,
    pub title: String,
    /// Body, description, or transcript.
    #[serde(default)]
    pub text: String,
    /// When the underlying event happened.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ArtifactRecord {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            foreign_id: self.foreign_id.clone(),
            kind: Some(self.kind),
        }
    }
}

/// Reference to a node by external identity, resolved (or stubbed) at merge time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeRef {
    pub foreign_id: String,
    /// `None` when only the key is known; the kind is inferred from the key shape.
    pub kind: Option<NodeKind>,
}

impl NodeRef {
    pub fn key(foreign_id: impl Into<String>) -> Self {
        Self {
            foreign_id: foreign_id.into(),
            kind: None,
        }
    }

    pub fn typed(foreign_id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            foreign_id: foreign_id.into(),
            kind: Some(kind),
        }
    }
}

/// One edge proposed by a heuristic, before node resolution.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateEdge {
    pub src: NodeRef,
    pub dst: NodeRef,
    pub relation: Relation,
    pub confidence: f64,
    pub heuristic: &'static str,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_id_rejects_blank() {
        assert!(matches!(OrgId::parse(""), Err(GraphError::MissingOrg)));
        assert!(matches!(OrgId::parse("   "), Err(GraphError::MissingOrg)));
        assert_eq!(OrgId::parse(" acme ").unwrap().as_str(), "acme");
    }

    #[test]
    fn kinds_and_relations_round_trip_through_sql_names() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        for relation in Relation::ALL {
            assert_eq!(relation.as_str().parse::<Relation>().unwrap(), relation);
        }
        assert!("widget".parse::<NodeKind>().is_err());
    }

    #[test]
    fn causal_relations() {
        let causal: Vec<_> = Relation::ALL.iter().filter(|r| r.is_causal()).collect();
        assert_eq!(causal.len(), 4);
        assert!(!Relation::References.is_causal());
        assert!(Relation::Next.is_temporal());
    }

    #[test]
    fn artifact_record_deserializes_with_defaults() {
        let json = r##"{"org_id":"acme","kind":"pull_request","foreign_id":"#456",
                       "title":"Fix login","timestamp":"2026-03-01T10:00:00Z"}"##;
        let record: ArtifactRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, NodeKind::PullRequest);
        assert!(record.text.is_empty());
        assert!(record.metadata.is_empty());
    }
}
