//! # Abilities
//!
//! Rule-based permission checks in the style of CASL.
//!
//! An [`Ability`] is an ordered list of [`Rule`]s. Each rule grants (or, when
//! inverted, forbids) an [`Action`] on a [`SubjectType`], optionally limited
//! by [`Condition`]s on the subject instance and by a list of fields.
//!
//! # Precedence
//!
//! Rules defined later take priority. A check looks for the last rule that
//! is relevant (action and subject type match) and whose conditions and
//! fields match; that rule decides. No such rule means the check is denied.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::PermissionError;
use super::ltree::LabelPath;
use super::roles::GroupRole;

// ==================
// Actions & Subjects
// ==================

/// What is being done to a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Any action
    Manage,
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Manage => "manage",
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Whether a rule written for `self` covers a request for `requested`
    fn covers(&self, requested: Action) -> bool {
        *self == Action::Manage || *self == requested
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of thing a rule talks about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    /// Any subject type
    #[serde(rename = "all")]
    All,
    User,
    Group,
    Membership,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::All => "all",
            SubjectType::User => "User",
            SubjectType::Group => "Group",
            SubjectType::Membership => "Membership",
        }
    }

    fn covers(&self, requested: SubjectType) -> bool {
        *self == SubjectType::All || *self == requested
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subject instance to check, or a bare subject type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Type-level check: "can I read *some* group?"
    Type(SubjectType),
    User {
        id: Uuid,
    },
    Group {
        id: Uuid,
        path: LabelPath,
    },
    Membership {
        group_id: Uuid,
        group_path: LabelPath,
        user_id: Uuid,
        role: GroupRole,
    },
}

impl Subject {
    pub fn subject_type(&self) -> SubjectType {
        match self {
            Subject::Type(t) => *t,
            Subject::User { .. } => SubjectType::User,
            Subject::Group { .. } => SubjectType::Group,
            Subject::Membership { .. } => SubjectType::Membership,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self, Subject::Type(_))
    }

    fn id(&self) -> Option<Uuid> {
        match self {
            Subject::User { id } | Subject::Group { id, .. } => Some(*id),
            _ => None,
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            Subject::User { id } => Some(*id),
            Subject::Membership { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    fn group_id(&self) -> Option<Uuid> {
        match self {
            Subject::Group { id, .. } => Some(*id),
            Subject::Membership { group_id, .. } => Some(*group_id),
            _ => None,
        }
    }

    fn path(&self) -> Option<&LabelPath> {
        match self {
            Subject::Group { path, .. } => Some(path),
            Subject::Membership { group_path, .. } => Some(group_path),
            _ => None,
        }
    }

    fn role(&self) -> Option<GroupRole> {
        match self {
            Subject::Membership { role, .. } => Some(*role),
            _ => None,
        }
    }
}

// ==================
// Conditions
// ==================

/// A restriction on the subject instance
///
/// A condition on an attribute the subject does not have never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Condition {
    /// Subject's own id
    IdEquals(Uuid),
    /// User the subject is, or belongs to
    UserEquals(Uuid),
    /// Group the subject is, or belongs to
    GroupEquals(Uuid),
    /// Group path is the given path or below it
    PathWithin(LabelPath),
    /// Group path is strictly below the given path
    PathBelow(LabelPath),
    /// Membership role is at most the given role
    RoleAtMost(GroupRole),
}

impl Condition {
    pub fn matches(&self, subject: &Subject) -> bool {
        match self {
            Condition::IdEquals(id) => subject.id() == Some(*id),
            Condition::UserEquals(id) => subject.user_id() == Some(*id),
            Condition::GroupEquals(id) => subject.group_id() == Some(*id),
            Condition::PathWithin(scope) => subject
                .path()
                .map(|p| p.is_descendant_of(scope))
                .unwrap_or(false),
            Condition::PathBelow(scope) => subject
                .path()
                .map(|p| p.is_strict_descendant_of(scope))
                .unwrap_or(false),
            Condition::RoleAtMost(max) => subject.role().map(|r| r <= *max).unwrap_or(false),
        }
    }
}

// ==================
// Rules
// ==================

/// A single grant or prohibition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    pub subject: SubjectType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Rule {
    fn new(action: Action, subject: SubjectType, inverted: bool) -> Self {
        Self {
            action,
            subject,
            conditions: Vec::new(),
            fields: None,
            inverted,
            reason: None,
        }
    }

    fn is_relevant(&self, action: Action, subject: SubjectType) -> bool {
        self.action.covers(action) && self.subject.covers(subject)
    }

    fn matches_conditions(&self, subject: &Subject) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        // A conditional grant may allow some instance; a conditional
        // prohibition cannot forbid the whole type.
        if subject.is_type() {
            return !self.inverted;
        }
        self.conditions.iter().all(|c| c.matches(subject))
    }

    fn matches_field(&self, field: Option<&str>) -> bool {
        match (&self.fields, field) {
            (None, _) => true,
            (Some(_), None) => !self.inverted,
            (Some(fields), Some(field)) => fields.iter().any(|f| f == field),
        }
    }
}

// ==================
// Builder
// ==================

/// Collects rules in definition order
#[derive(Debug, Default)]
pub struct AbilityBuilder {
    rules: Vec<Rule>,
}

/// Refines the rule just added to an [`AbilityBuilder`]
pub struct RuleBuilder<'a> {
    rule: &'a mut Rule,
}

impl AbilityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `action` on `subject`
    pub fn can(&mut self, action: Action, subject: SubjectType) -> RuleBuilder<'_> {
        self.push(Rule::new(action, subject, false))
    }

    /// Forbid `action` on `subject`
    pub fn cannot(&mut self, action: Action, subject: SubjectType) -> RuleBuilder<'_> {
        self.push(Rule::new(action, subject, true))
    }

    fn push(&mut self, rule: Rule) -> RuleBuilder<'_> {
        let index = self.rules.len();
        self.rules.push(rule);
        RuleBuilder {
            rule: &mut self.rules[index],
        }
    }

    pub fn build(self) -> Ability {
        Ability { rules: self.rules }
    }
}

impl RuleBuilder<'_> {
    /// Add a condition; all conditions of a rule must match
    pub fn when(self, condition: Condition) -> Self {
        self.rule.conditions.push(condition);
        self
    }

    /// Limit the rule to these fields
    pub fn fields(self, fields: &[&str]) -> Self {
        self.rule.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Reason reported when this rule denies a check
    pub fn because(self, reason: impl Into<String>) -> Self {
        self.rule.reason = Some(reason.into());
        self
    }
}

// ==================
// Ability
// ==================

/// An immutable set of rules for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    rules: Vec<Rule>,
}

impl Ability {
    /// Build from a packed rule list (for instance one sent to a client)
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The rule deciding a check, if any
    pub fn relevant_rule(&self, action: Action, subject: &Subject, field: Option<&str>) -> Option<&Rule> {
        let subject_type = subject.subject_type();
        self.rules.iter().rev().find(|rule| {
            rule.is_relevant(action, subject_type)
                && rule.matches_conditions(subject)
                && rule.matches_field(field)
        })
    }

    pub fn can(&self, action: Action, subject: &Subject) -> bool {
        self.relevant_rule(action, subject, None)
            .map(|rule| !rule.inverted)
            .unwrap_or(false)
    }

    pub fn cannot(&self, action: Action, subject: &Subject) -> bool {
        !self.can(action, subject)
    }

    pub fn can_field(&self, action: Action, subject: &Subject, field: &str) -> bool {
        self.relevant_rule(action, subject, Some(field))
            .map(|rule| !rule.inverted)
            .unwrap_or(false)
    }

    /// `Ok(())` if allowed, otherwise an error carrying the denying rule's reason
    pub fn ensure(&self, action: Action, subject: &Subject) -> Result<(), PermissionError> {
        self.ensure_inner(action, subject, None)
    }

    pub fn ensure_field(&self, action: Action, subject: &Subject, field: &str) -> Result<(), PermissionError> {
        self.ensure_inner(action, subject, Some(field))
    }

    fn ensure_inner(&self, action: Action, subject: &Subject, field: Option<&str>) -> Result<(), PermissionError> {
        match self.relevant_rule(action, subject, field) {
            Some(rule) if !rule.inverted => Ok(()),
            rule => Err(PermissionError {
                action,
                subject: subject.subject_type(),
                field: field.map(str::to_string),
                reason: rule.and_then(|r| r.reason.clone()),
            }),
        }
    }

    /// Reduce the rules to a predicate for listing instances
    pub fn accessible_filter(&self, action: Action, subject_type: SubjectType) -> AccessFilter {
        let mut rules = Vec::new();
        for rule in self.rules.iter().rev() {
            if !rule.is_relevant(action, subject_type) || !rule.matches_field(None) {
                continue;
            }
            let unconditional = rule.conditions.is_empty();
            rules.push(rule.clone());
            // Nothing below an unconditional rule can ever decide
            if unconditional {
                break;
            }
        }
        AccessFilter { rules }
    }
}

/// Rules relevant to one action and subject type, highest priority first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFilter {
    rules: Vec<Rule>,
}

impl AccessFilter {
    /// Same answer as [`Ability::can`] for an instance of the filtered type
    pub fn matches(&self, subject: &Subject) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.conditions.iter().all(|c| c.matches(subject)))
            .map(|rule| !rule.inverted)
            .unwrap_or(false)
    }

    /// Every instance is allowed
    pub fn is_unrestricted(&self) -> bool {
        match self.rules.last() {
            Some(last) => {
                last.conditions.is_empty() && self.rules.iter().all(|r| !r.inverted)
            }
            None => false,
        }
    }

    /// No instance can be allowed
    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|r| r.inverted)
    }
}
