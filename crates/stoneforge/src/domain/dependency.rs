//! Dependency edges between elements.
//!
//! An edge is directed: `blocked` is the element that waits, `blocker` is
//! the element it waits on. Edge types fall into four disjoint families;
//! only the blocking family participates in cycle detection and readiness.

use crate::error::{Error, Result};
use crate::id::{ElementId, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Family a dependency type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyFamily {
    /// Participates in cycle detection and readiness.
    Blocking,
    /// Informational cross-references.
    Associative,
    /// Records who did what.
    Attribution,
    /// Message threading.
    Threading,
}

/// Type of dependency relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    // Blocking family
    /// Hard blocker: `blocked` cannot proceed until `blocker` closes.
    Blocks,
    /// Hierarchical: child waits on parent.
    ParentChild,
    /// Waits on a gate condition (timer, approval, external, webhook).
    Awaits,

    // Associative family
    /// Symmetric association; canonicalized so the lexicographically
    /// smaller id is stored as `blocked`.
    RelatesTo,
    /// One element cites another.
    References,
    /// `blocked` replaces `blocker`.
    Supersedes,
    /// `blocked` duplicates `blocker`.
    Duplicates,
    /// `blocked` was caused by `blocker`.
    CausedBy,
    /// A validation run of `blocker` recorded against `blocked`.
    Validates,
    /// Derived from message content; reconstructed, never authored.
    Mentions,

    // Attribution family
    /// `blocker` authored `blocked`.
    AuthoredBy,
    /// `blocker` is assigned to `blocked`.
    AssignedTo,
    /// `blocker` approved `blocked`.
    ApprovedBy,

    // Threading family
    /// `blocked` replies to `blocker`.
    RepliesTo,
}

impl DependencyType {
    /// The family this type belongs to.
    #[must_use]
    pub fn family(self) -> DependencyFamily {
        match self {
            Self::Blocks | Self::ParentChild | Self::Awaits => DependencyFamily::Blocking,
            Self::RelatesTo
            | Self::References
            | Self::Supersedes
            | Self::Duplicates
            | Self::CausedBy
            | Self::Validates
            | Self::Mentions => DependencyFamily::Associative,
            Self::AuthoredBy | Self::AssignedTo | Self::ApprovedBy => {
                DependencyFamily::Attribution
            }
            Self::RepliesTo => DependencyFamily::Threading,
        }
    }

    /// Whether this type participates in cycle detection and readiness.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        self.family() == DependencyFamily::Blocking
    }
}

/// The unblocking condition attached to an `awaits` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Gate {
    /// Unblocks once the current time reaches `wait_until`.
    Timer {
        /// When the gate opens.
        wait_until: DateTime<Utc>,
    },
    /// Unblocks once `approval_count` distinct required approvers have
    /// approved.
    Approval {
        /// Entities whose approval counts.
        required_approvers: BTreeSet<EntityId>,
        /// How many distinct approvals are needed.
        approval_count: u32,
        /// Approvals recorded so far.
        #[serde(default)]
        approved_by: BTreeSet<EntityId>,
    },
    /// Unblocks when a sentinel event from the named external system
    /// arrives.
    External {
        /// Identifier of the external system.
        system: String,
        /// Whether the sentinel has arrived.
        #[serde(default)]
        satisfied: bool,
    },
    /// Unblocks when the identified webhook fires.
    Webhook {
        /// Endpoint identifier.
        endpoint_id: String,
        /// Whether the webhook has fired.
        #[serde(default)]
        satisfied: bool,
    },
}

impl Gate {
    /// Validate gate payload constraints.
    ///
    /// # Errors
    ///
    /// Returns a constraint error when `approval_count` exceeds the
    /// number of required approvers or is zero.
    pub fn validate(&self) -> Result<()> {
        if let Self::Approval {
            required_approvers,
            approval_count,
            ..
        } = self
        {
            let count = *approval_count as usize;
            if count == 0 || count > required_approvers.len() {
                return Err(Error::Constraint(format!(
                    "approval_count must be in 1..={} (got {approval_count})",
                    required_approvers.len()
                )));
            }
        }
        Ok(())
    }

    /// Whether the gate is open at `now`.
    #[must_use]
    pub fn is_satisfied(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Timer { wait_until } => now >= *wait_until,
            Self::Approval {
                approval_count,
                approved_by,
                ..
            } => approved_by.len() >= *approval_count as usize,
            Self::External { satisfied, .. } | Self::Webhook { satisfied, .. } => *satisfied,
        }
    }
}

/// An event that advances a gate toward satisfaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A required approver approved.
    Approval(EntityId),
    /// The sentinel arrived from the named external system.
    ExternalSignal(String),
    /// The identified webhook fired.
    WebhookFired(String),
}

/// Result of a validation run recorded on a `validates` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// The validation passed.
    Pass,
    /// The validation failed.
    Fail,
}

/// Payload of a `validates` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    /// Kind of test that ran.
    pub test_type: String,
    /// Outcome.
    pub result: TestResult,
    /// Free-form details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Typed metadata carried on an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMeta {
    /// Gate condition; only meaningful on `awaits` edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,

    /// Validation payload; only meaningful on `validates` edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRecord>,
}

impl EdgeMeta {
    /// Whether the metadata carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gate.is_none() && self.validation.is_none()
    }
}

/// A dependency edge, keyed by `(blocked, blocker, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    /// The element that waits.
    #[serde(rename = "blockedId")]
    pub blocked: ElementId,

    /// The element it waits on.
    #[serde(rename = "blockerId")]
    pub blocker: ElementId,

    /// Type of the relationship.
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    /// When the edge was created.
    pub created_at: DateTime<Utc>,

    /// Entity that created the edge.
    pub created_by: EntityId,

    /// Typed edge metadata.
    #[serde(default, skip_serializing_if = "EdgeMeta::is_empty")]
    pub metadata: EdgeMeta,
}

impl DependencyEdge {
    /// The `(blocked, blocker, type)` key identifying this edge.
    #[must_use]
    pub fn key(&self) -> (ElementId, ElementId, DependencyType) {
        (self.blocked.clone(), self.blocker.clone(), self.dep_type)
    }
}

/// Data for creating a new dependency edge.
#[derive(Debug, Clone)]
pub struct NewDependency {
    /// The element that waits.
    pub blocked: ElementId,
    /// The element it waits on.
    pub blocker: ElementId,
    /// Type of the relationship.
    pub dep_type: DependencyType,
    /// Creating entity.
    pub created_by: EntityId,
    /// Gate payload for `awaits` edges.
    pub gate: Option<Gate>,
    /// Validation payload for `validates` edges.
    pub validation: Option<ValidationRecord>,
}

impl NewDependency {
    /// Validate type-specific payload constraints.
    ///
    /// # Errors
    ///
    /// Returns a constraint error for a self-loop, a gate on a non-awaits
    /// edge, a missing gate on an awaits edge, or an invalid gate payload.
    pub fn validate(&self) -> Result<()> {
        if self.blocked == self.blocker {
            return Err(Error::Constraint(
                "an element cannot depend on itself".to_string(),
            ));
        }
        match (self.dep_type, &self.gate) {
            (DependencyType::Awaits, Some(gate)) => gate.validate()?,
            (DependencyType::Awaits, None) => {
                return Err(Error::MissingRequiredField("gate"));
            }
            (_, Some(_)) => {
                return Err(Error::Constraint(
                    "gate metadata is only valid on awaits edges".to_string(),
                ));
            }
            (_, None) => {}
        }
        if self.validation.is_some() && self.dep_type != DependencyType::Validates {
            return Err(Error::Constraint(
                "validation metadata is only valid on validates edges".to_string(),
            ));
        }
        Ok(())
    }
}

/// Direction for dependency tree walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeDirection {
    /// Follow edges from `blocked` to `blocker` (what the start waits on).
    Outgoing,
    /// Follow edges from `blocker` to `blocked` (what waits on the start).
    Incoming,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(s: &str) -> EntityId {
        EntityId::from(ElementId::parse(s).unwrap())
    }

    #[test]
    fn families_are_disjoint_and_complete() {
        let blocking = [
            DependencyType::Blocks,
            DependencyType::ParentChild,
            DependencyType::Awaits,
        ];
        for t in blocking {
            assert!(t.is_blocking());
        }
        for t in [
            DependencyType::RelatesTo,
            DependencyType::References,
            DependencyType::Mentions,
            DependencyType::AuthoredBy,
            DependencyType::RepliesTo,
        ] {
            assert!(!t.is_blocking());
        }
    }

    #[test]
    fn timer_gate_tracks_clock() {
        let now = Utc::now();
        let future = Gate::Timer {
            wait_until: now + chrono::Duration::hours(1),
        };
        let past = Gate::Timer {
            wait_until: now - chrono::Duration::hours(1),
        };
        assert!(!future.is_satisfied(now));
        assert!(past.is_satisfied(now));
    }

    #[test]
    fn approval_gate_counts_distinct_approvers() {
        let gate = Gate::Approval {
            required_approvers: [entity("el-aaa"), entity("el-bbb"), entity("el-ccc")].into(),
            approval_count: 2,
            approved_by: [entity("el-aaa")].into(),
        };
        assert!(!gate.is_satisfied(Utc::now()));

        let gate = Gate::Approval {
            required_approvers: [entity("el-aaa"), entity("el-bbb"), entity("el-ccc")].into(),
            approval_count: 2,
            approved_by: [entity("el-aaa"), entity("el-bbb")].into(),
        };
        assert!(gate.is_satisfied(Utc::now()));
    }

    #[test]
    fn approval_count_bounded_by_approvers() {
        let gate = Gate::Approval {
            required_approvers: [entity("el-aaa")].into(),
            approval_count: 2,
            approved_by: BTreeSet::new(),
        };
        assert_eq!(gate.validate().unwrap_err().kind(), "CONSTRAINT");
    }

    #[test]
    fn awaits_edge_requires_gate() {
        let dep = NewDependency {
            blocked: ElementId::parse("el-aaa").unwrap(),
            blocker: ElementId::parse("el-bbb").unwrap(),
            dep_type: DependencyType::Awaits,
            created_by: entity("el-sys"),
            gate: None,
            validation: None,
        };
        assert_eq!(dep.validate().unwrap_err().kind(), "MISSING_REQUIRED_FIELD");
    }

    #[test]
    fn self_loop_rejected() {
        let dep = NewDependency {
            blocked: ElementId::parse("el-aaa").unwrap(),
            blocker: ElementId::parse("el-aaa").unwrap(),
            dep_type: DependencyType::Blocks,
            created_by: entity("el-sys"),
            gate: None,
            validation: None,
        };
        assert_eq!(dep.validate().unwrap_err().kind(), "CONSTRAINT");
    }
}
