use chrono::{DateTime, Utc};
use enumset::{EnumSet, EnumSetType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Enums that implement [`ConditionType`] can be used to differentiate [`Condition`]
/// and describe the state of the resource.
pub trait ConditionType: EnumSetType + Default + Debug {
    /// The top-level variant that determines overall readiness of the resource.
    fn happy() -> Self;
    /// Variants that must be true to consider the happy condition true.
    fn dependents() -> Vec<Self>;
}

/// Defines how the variants of a [`ConditionType`] depend on one another.
///
/// A set is an ordinary value: reconcilers build the one they need and hand it to every
/// [`ConditionManager`] they create, so two kinds never share hidden state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConditionSet<C: ConditionType> {
    happy: C,
    dependents: EnumSet<C>,
}

impl<C: ConditionType> ConditionSet<C> {
    pub fn new(happy: C, dependents: impl IntoIterator<Item = C>) -> Self {
        let dependents: EnumSet<C> = dependents.into_iter().collect();
        assert!(
            !dependents.contains(happy),
            "dependents may not contain happy condition"
        );

        ConditionSet { happy, dependents }
    }

    /// A set for long-running resources, whose happy condition is `C::happy()`.
    pub fn living(dependents: impl IntoIterator<Item = C>) -> Self {
        Self::new(C::happy(), dependents)
    }

    pub fn happy(&self) -> C {
        self.happy
    }

    pub fn dependents(&self) -> impl Iterator<Item = C> + '_ {
        self.dependents.iter()
    }

    pub fn is_dependent(&self, condition_type: C) -> bool {
        self.dependents.contains(condition_type)
    }

    /// Whether the [`ConditionType`] determines happiness.
    pub fn is_terminal(&self, condition_type: C) -> bool {
        self.is_dependent(condition_type) || self.happy == condition_type
    }

    pub fn severity(&self, condition_type: C) -> ConditionSeverity {
        if self.is_terminal(condition_type) {
            ConditionSeverity::Error
        } else {
            ConditionSeverity::Info
        }
    }

    /// Returns a [`ConditionManager`] that mutates `conditions` according to this set.
    pub fn manage<'a>(&'a self, conditions: &'a mut Conditions<C>) -> ConditionManager<'a, C> {
        ConditionManager {
            set: self,
            conditions,
        }
    }
}

impl<C: ConditionType> Default for ConditionSet<C> {
    /// The set described by the `#[dependent]` variants of `C`.
    fn default() -> Self {
        Self::living(C::dependents())
    }
}

/// The importance of a conditions status.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

impl ConditionSeverity {
    pub fn is_err(&self) -> bool {
        *self == ConditionSeverity::Error
    }
}

impl Default for ConditionSeverity {
    fn default() -> Self {
        ConditionSeverity::Error
    }
}

/// A [`Vec`] of [`Condition`] that maintains transition times.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Conditions<C>(Vec<Condition<C>>);

impl<C> Default for Conditions<C> {
    fn default() -> Self {
        Conditions(Vec::new())
    }
}

impl<C: ConditionType> Conditions<C> {
    pub fn with_conditions(conditions: Vec<Condition<C>>) -> Conditions<C> {
        Conditions(conditions)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition<C>> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, type_: C) -> Option<&Condition<C>> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    fn get_mut(&mut self, type_: C) -> Option<&mut Condition<C>> {
        self.0.iter_mut().find(|c| c.type_ == type_)
    }

    /// Stores `condition`, bumping its transition time only when something other than the
    /// time changed. Writing an identical condition twice leaves the list untouched.
    fn set(&mut self, condition: Condition<C>) {
        match self.get_mut(condition.type_) {
            Some(current) => {
                let unchanged = current.status == condition.status
                    && current.severity == condition.severity
                    && current.reason == condition.reason
                    && current.message == condition.message;
                if !unchanged {
                    *current = Condition {
                        last_transition_time: Some(Utc::now()),
                        ..condition
                    };
                }
            }
            None => self.0.push(Condition {
                last_transition_time: Some(Utc::now()),
                ..condition
            }),
        }
    }
}

/// A custom resource status condition.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition<C> {
    #[serde(rename = "type")]
    pub type_: C,
    pub status: ConditionStatus,
    /// ConditionSeverityError specifies that a failure of a condition type
    /// should be viewed as an error. Error is the default and is omitted
    /// when serialized.
    #[serde(default)]
    #[serde(skip_serializing_if = "ConditionSeverity::is_err")]
    pub severity: ConditionSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<C: Default> Default for Condition<C> {
    fn default() -> Condition<C> {
        Condition {
            type_: C::default(),
            status: ConditionStatus::default(),
            severity: ConditionSeverity::default(),
            last_transition_time: Some(Utc::now()),
            reason: None,
            message: None,
        }
    }
}

impl<C> Condition<C> {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }

    /// False outranks Unknown outranks True; between equal statuses the most recent wins.
    fn outranks(&self, other: &Self) -> bool {
        use ConditionStatus::*;

        match (self.status, other.status) {
            (False, False) | (Unknown, Unknown) | (True, True) => {
                match (self.last_transition_time, other.last_transition_time) {
                    (Some(left), Some(right)) => left > right,
                    _ => false,
                }
            }
            (False, _) | (Unknown, True) => true,
            (Unknown, False) | (True, _) => false,
        }
    }
}

/// The state of a [`Condition`].
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Default for ConditionStatus {
    fn default() -> Self {
        ConditionStatus::Unknown
    }
}

/// Provides [`ConditionManager`] access to the [`Conditions`] of a status.
pub trait ConditionAccessor<C: ConditionType> {
    /// Return the conditions of your CR status type.
    fn conditions(&mut self) -> &mut Conditions<C>;

    /// Returns a [`ConditionManager`] for the given set.
    fn manage<'a>(&'a mut self, set: &'a ConditionSet<C>) -> ConditionManager<'a, C> {
        set.manage(self.conditions())
    }
}

impl<C: ConditionType> ConditionAccessor<C> for Conditions<C> {
    fn conditions(&mut self) -> &mut Conditions<C> {
        self
    }
}

/// Mutates [`Conditions`] in accordance with the dependency chain of a [`ConditionSet`].
pub struct ConditionManager<'a, C: ConditionType> {
    set: &'a ConditionSet<C>,
    conditions: &'a mut Conditions<C>,
}

impl<'a, C: ConditionType> ConditionManager<'a, C> {
    pub fn get_condition(&self, condition_type: C) -> Option<&Condition<C>> {
        self.conditions.get(condition_type)
    }

    /// Returns the happy [`Condition`], if it has been initialized.
    pub fn get_top_level_condition(&self) -> Option<&Condition<C>> {
        self.get_condition(self.set.happy)
    }

    pub fn is_happy(&self) -> bool {
        self.get_top_level_condition()
            .map(Condition::is_true)
            .unwrap_or(false)
    }

    /// Sets every condition of the set that has not been observed yet. When the happy
    /// condition is already True the missing dependents are implied True, otherwise
    /// they start Unknown. Existing conditions are never touched.
    pub fn initialize_conditions(&mut self) {
        let set = self.set;
        let status = match self.conditions.get(set.happy) {
            Some(cond) if cond.is_true() => ConditionStatus::True,
            Some(_) => ConditionStatus::Unknown,
            None => {
                let happy = self.condition(set.happy, ConditionStatus::Unknown, None, None);
                self.conditions.set(happy);
                ConditionStatus::Unknown
            }
        };

        for dependent in set.dependents() {
            if self.conditions.get(dependent).is_none() {
                let cond = self.condition(dependent, status, None, None);
                self.conditions.set(cond);
            }
        }
    }

    fn condition(
        &self,
        type_: C,
        status: ConditionStatus,
        reason: Option<String>,
        message: Option<String>,
    ) -> Condition<C> {
        Condition {
            type_,
            status,
            severity: self.set.severity(type_),
            reason,
            message,
            ..Default::default()
        }
    }

    /// The most important non-true dependent, preferring the most recent False over the
    /// most recent Unknown. Dependents that were never set count as Unknown.
    fn find_unhappy_dependent(&self) -> Option<Condition<C>> {
        let mut unhappy: Option<Condition<C>> = None;

        for dependent in self.set.dependents() {
            let cond = match self.conditions.get(dependent) {
                Some(cond) if cond.is_true() => continue,
                Some(cond) => cond.clone(),
                None => Condition {
                    type_: dependent,
                    status: ConditionStatus::Unknown,
                    last_transition_time: None,
                    ..Default::default()
                },
            };
            unhappy = match unhappy {
                Some(current) if !cond.outranks(&current) => Some(current),
                _ => Some(cond),
            };
        }

        unhappy
    }

    /// Mark the happy condition to true if all other dependents are also true.
    fn recompute_happiness(&mut self, condition_type: C) {
        let happy = self.set.happy;

        let cond = if let Some(dependent) = self.find_unhappy_dependent() {
            Some(self.condition(happy, dependent.status, dependent.reason, dependent.message))
        } else if condition_type != happy {
            Some(self.condition(happy, ConditionStatus::True, None, None))
        } else {
            None
        };

        if let Some(cond) = cond {
            self.conditions.set(cond);
        }
    }

    pub fn mark_true(&mut self, condition_type: C) {
        let cond = self.condition(condition_type, ConditionStatus::True, None, None);
        self.conditions.set(cond);
        self.recompute_happiness(condition_type);
    }

    pub fn mark_true_with_reason(&mut self, condition_type: C, reason: &str, message: Option<String>) {
        let cond = self.condition(
            condition_type,
            ConditionStatus::True,
            Some(reason.to_string()),
            message,
        );
        self.conditions.set(cond);
        self.recompute_happiness(condition_type);
    }

    /// Set the status of the condition type to false, as well as the happy condition if this
    /// condition is a dependent.
    pub fn mark_false(&mut self, condition_type: C, reason: &str, message: Option<String>) {
        let cond = self.condition(
            condition_type,
            ConditionStatus::False,
            Some(reason.to_string()),
            message.clone(),
        );
        self.conditions.set(cond);

        if self.set.is_dependent(condition_type) {
            let happy = self.condition(
                self.set.happy,
                ConditionStatus::False,
                Some(reason.to_string()),
                message,
            );
            self.conditions.set(happy);
        }
    }

    /// Set the status to unknown and also set the happy condition to unknown if no other dependent
    /// condition is in an error state.
    pub fn mark_unknown(&mut self, condition_type: C, reason: &str, message: Option<String>) {
        let cond = self.condition(
            condition_type,
            ConditionStatus::Unknown,
            Some(reason.to_string()),
            message.clone(),
        );
        self.conditions.set(cond);

        // a failed dependent trumps unknown ones
        let failed = self
            .set
            .dependents()
            .any(|d| self.conditions.get(d).map(Condition::is_false).unwrap_or(false));
        if failed {
            let happy_is_false = self
                .get_top_level_condition()
                .map(Condition::is_false)
                .unwrap_or(false);
            if !happy_is_false {
                self.mark_false(self.set.happy, reason, message);
            }
            return;
        }

        if self.set.is_dependent(condition_type) {
            let happy = self.condition(
                self.set.happy,
                ConditionStatus::Unknown,
                Some(reason.to_string()),
                message,
            );
            self.conditions.set(happy);
        }
    }
}
