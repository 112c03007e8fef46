//! Checks candidate role sets against mutual-exclusion constraints

use crate::error::{AuthzError, Result};
use crate::types::{RoleId, SodConstraint};
use std::collections::BTreeSet;
use tracing::warn;

/// Validates a user's complete resulting role set
///
/// Only enabled static constraints take part. A candidate set is rejected
/// when it holds two or more roles of any such constraint. The check must be
/// fed the full role set the user would end up with, not a delta.
#[derive(Debug, Clone, Default)]
pub struct SodEnforcer {
    constraints: Vec<SodConstraint>,
}

impl SodEnforcer {
    /// Create an enforcer over a constraint snapshot
    pub fn new(constraints: impl IntoIterator<Item = SodConstraint>) -> Self {
        let mut constraints: Vec<SodConstraint> = constraints
            .into_iter()
            .filter(SodConstraint::is_enforced)
            .collect();
        // Deterministic reporting when several constraints are violated
        constraints.sort_by_key(|c| c.id);
        Self { constraints }
    }

    /// Number of constraints being enforced
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Whether no constraint is enforced
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Check a candidate role set
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Conflict`] naming the first violated constraint.
    pub fn check_assignment(&self, candidate: &BTreeSet<RoleId>) -> Result<()> {
        match self.first_violation(candidate) {
            Some(constraint) => {
                warn!(
                    constraint = %constraint.name,
                    roles = ?candidate,
                    "Role set rejected by separation of duty"
                );
                Err(AuthzError::Conflict {
                    constraint: constraint.name.clone(),
                })
            }
            None => Ok(()),
        }
    }

    /// Every constraint the candidate set violates
    pub fn violations(&self, candidate: &BTreeSet<RoleId>) -> Vec<&SodConstraint> {
        self.constraints
            .iter()
            .filter(|c| Self::overlap(c, candidate) >= 2)
            .collect()
    }

    fn first_violation(&self, candidate: &BTreeSet<RoleId>) -> Option<&SodConstraint> {
        self.constraints
            .iter()
            .find(|c| Self::overlap(c, candidate) >= 2)
    }

    fn overlap(constraint: &SodConstraint, candidate: &BTreeSet<RoleId>) -> usize {
        constraint.role_set.intersection(candidate).count()
    }
}
