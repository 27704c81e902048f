//! # Event Records
//!
//! The value object behind every `track` and `page` call. A record owns
//! structural copies of the caller's properties and routing options, derives
//! its allow/deny/group lists from those options, and is only ever rewritten
//! through [`EventRecord::apply_transform`].
//!
//! ## Invariants
//!
//! - `name` is a non-empty trimmed string for the whole life of a stored record
//! - `kind` never changes after construction
//! - a transform can rewrite a record but never delete it

use crate::error::AnalyticsError;
use crate::utils::{catch_panic, dedup_ordered, normalize_name};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, error, warn};

/// Key/value mapping used for event properties, user traits and options.
pub type Properties = Map<String, Value>;

/// Routing option key holding the allow list
pub const ALLOW_LIST_KEY: &str = "integrationWhitelist";
/// Routing option key holding the deny list
pub const DENY_LIST_KEY: &str = "integrationBlacklist";
/// Routing option key holding the group names
pub const GROUPS_KEY: &str = "groups";

/// Kind of tracked occurrence. Immutable once a record exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A named action (`track`)
    #[default]
    Event,
    /// A page view (`page`)
    Page,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Event => write!(f, "event"),
            EventKind::Page => write!(f, "page"),
        }
    }
}

/// Options passed alongside an event, kept verbatim on the record.
///
/// The three well-known lists are typed; anything else the caller supplied
/// survives in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingOptions {
    /// Integrations allowed to receive the event (empty = all)
    #[serde(rename = "integrationWhitelist", default, skip_serializing_if = "Vec::is_empty")]
    pub integration_whitelist: Vec<String>,
    /// Integrations that must not receive the event (empty = none)
    #[serde(rename = "integrationBlacklist", default, skip_serializing_if = "Vec::is_empty")]
    pub integration_blacklist: Vec<String>,
    /// Groups the event is addressed to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Any other caller supplied option
    #[serde(flatten)]
    pub extra: Properties,
}

impl RoutingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict delivery to the named integrations
    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.integration_whitelist.extend(names.into_iter().map(Into::into));
        self
    }

    /// Exclude the named integrations from delivery
    pub fn deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.integration_blacklist.extend(names.into_iter().map(Into::into));
        self
    }

    /// Address the event to a group
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.groups.push(name.into());
        self
    }

    /// Attach an arbitrary extra option
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Build options from loosely shaped JSON.
    ///
    /// Non-object input yields empty options. Known list keys only keep their
    /// string entries; a list key holding something other than an array is
    /// ignored.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            if !value.is_null() {
                debug!("Routing options were not an object, ignoring: {}", value);
            }
            return Self::default();
        };

        let mut take_list = |key: &str| -> Vec<String> {
            match map.remove(key) {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        };

        let integration_whitelist = take_list(ALLOW_LIST_KEY);
        let integration_blacklist = take_list(DENY_LIST_KEY);
        let groups = take_list(GROUPS_KEY);

        Self {
            integration_whitelist,
            integration_blacklist,
            groups,
            extra: map,
        }
    }
}

/// Convert loosely shaped JSON into a property map. Anything but an object
/// becomes an empty map.
pub fn properties_from_value(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        Value::Null => Properties::new(),
        other => {
            debug!("Event properties were not an object, ignoring: {}", other);
            Properties::new()
        }
    }
}

/// What happened when a transform ran against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Every transformed field was taken over
    Applied,
    /// The transform blanked the name; the old name was kept, the rest applied
    NameReverted,
    /// The transform returned nothing; the record is untouched
    Rejected,
    /// The transform panicked; the record is untouched
    Failed,
}

/// One tracked occurrence.
///
/// Stored records always satisfy the name invariant. `Default` exists so a
/// transform can build a replacement from scratch; such a value is never
/// stored without going through [`EventRecord::apply_transform`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub kind: EventKind,
    pub name: String,
    pub properties: Properties,
    pub routing_options: RoutingOptions,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    pub groups: Vec<String>,
}

impl EventRecord {
    /// Validate the name and build a record.
    ///
    /// The name is trimmed; a blank name is rejected. Allow, deny and group
    /// lists are derived from `routing_options` with duplicates removed.
    pub fn new(
        kind: EventKind,
        name: &str,
        properties: Properties,
        routing_options: RoutingOptions,
    ) -> Result<Self, AnalyticsError> {
        let name = normalize_name(name).ok_or(AnalyticsError::InvalidEventName)?;

        let allow_list = dedup_ordered(routing_options.integration_whitelist.iter().cloned());
        let deny_list = dedup_ordered(routing_options.integration_blacklist.iter().cloned());
        let groups = dedup_ordered(routing_options.groups.iter().cloned());

        Ok(Self {
            kind,
            name,
            properties,
            routing_options,
            allow_list,
            deny_list,
            groups,
        })
    }

    /// Run one transform against this record.
    ///
    /// The transform receives a copy. Returning `None` rejects the rewrite
    /// (deleting events through transforms is not supported), a blank name is
    /// reverted while the other fields are still taken, and a panic leaves
    /// the record exactly as it was. `kind` is never taken from the result.
    pub fn apply_transform<F>(&mut self, transform: F) -> TransformOutcome
    where
        F: FnOnce(EventRecord) -> Option<EventRecord>,
    {
        let working = self.clone();
        let transformed = match catch_panic(|| transform(working)) {
            Ok(Some(transformed)) => transformed,
            Ok(None) => {
                warn!(
                    "⚠️ \"{}\" was deleted by a transform. This is not allowed, the transform is ignored. \
                     Use the '{}' list to block delivery instead.",
                    self.name, DENY_LIST_KEY
                );
                return TransformOutcome::Rejected;
            }
            Err(panic) => {
                error!("❌ Transform panicked on \"{}\": {}", self.name, panic);
                return TransformOutcome::Failed;
            }
        };

        if transformed.kind != self.kind {
            debug!(
                "Transform tried to change kind of \"{}\" from {} to {}, kind is immutable",
                self.name, self.kind, transformed.kind
            );
        }

        let outcome = match normalize_name(&transformed.name) {
            Some(name) => {
                self.name = name;
                TransformOutcome::Applied
            }
            None => {
                warn!(
                    "⚠️ \"{}\" had its name removed by a transform. The name change is reverted.",
                    self.name
                );
                TransformOutcome::NameReverted
            }
        };

        self.properties = transformed.properties;
        self.routing_options = transformed.routing_options;
        self.allow_list = dedup_ordered(transformed.allow_list);
        self.deny_list = dedup_ordered(transformed.deny_list);
        self.groups = dedup_ordered(transformed.groups);

        outcome
    }
}
