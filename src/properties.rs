//! The property algebra: preferences over transport behavior, and the
//! scalar/enum knobs that ride alongside them (§3, §4.2).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An ordinal preference, from most to least insistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preference {
    Require,
    Prefer,
    NoPreference,
    Avoid,
    Prohibit,
}

impl Default for Preference {
    fn default() -> Self {
        Self::NoPreference
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Require => "require",
            Self::Prefer => "prefer",
            Self::NoPreference => "no-preference",
            Self::Avoid => "avoid",
            Self::Prohibit => "prohibit",
        };
        write!(f, "{s}")
    }
}

impl Preference {
    pub fn is_require(self) -> bool {
        matches!(self, Self::Require)
    }

    pub fn is_prohibit(self) -> bool {
        matches!(self, Self::Prohibit)
    }

    /// Score contribution of this preference when a stack under
    /// consideration `provides` the property: +1 for a matched `prefer`,
    /// -1 for a matched `avoid`, 0 otherwise. Used by the stack selector's
    /// tie-break (§4.2).
    pub fn score(self, provides: bool) -> i32 {
        match (self, provides) {
            (Self::Prefer, true) => 1,
            (Self::Avoid, true) => -1,
            _ => 0,
        }
    }
}

/// Multipath usage mode (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultipathMode {
    Disabled,
    Passive,
    Active,
    Aggregate,
}

impl Default for MultipathMode {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Traffic classification hint, mirrored onto DSCP or equivalent by the
/// channel provider (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficClass {
    Background,
    BestEffort,
    Video,
    Voice,
    Control,
}

impl Default for TrafficClass {
    fn default() -> Self {
        Self::BestEffort
    }
}

/// An immutable bundle of preferences and scalar knobs (§3). Constructed
/// via the builder methods and consumed read-only thereafter: a
/// Preconnection captures it by value, and a ConnectionGroup's clones may
/// only override the fields marked as per-connection overridable in
/// [`TransportProperties::override_for_clone`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportProperties {
    pub reliability: Preference,
    pub preserve_msg_boundaries: Preference,
    pub preserve_order: Preference,
    pub per_msg_reliability: Preference,
    pub congestion_control: Preference,

    pub zero_rtt: Preference,
    pub multipath_mode: MultipathMode,

    pub use_temporary_address: Preference,
    pub advertises_alt_addr: bool,

    pub disable_nagle: Preference,
    pub keep_alive: Preference,
    pub keep_alive_interval: Option<Duration>,
    pub connection_timeout: Option<Duration>,
    pub retransmission_timeout: Option<Duration>,

    pub priority: i32,
    pub traffic_class: TrafficClass,

    pub receive_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
}

impl Default for TransportProperties {
    fn default() -> Self {
        Self {
            reliability: Preference::Require,
            preserve_msg_boundaries: Preference::NoPreference,
            preserve_order: Preference::Require,
            per_msg_reliability: Preference::NoPreference,
            congestion_control: Preference::Require,
            zero_rtt: Preference::NoPreference,
            multipath_mode: MultipathMode::Disabled,
            use_temporary_address: Preference::Prefer,
            advertises_alt_addr: false,
            disable_nagle: Preference::NoPreference,
            keep_alive: Preference::NoPreference,
            keep_alive_interval: None,
            connection_timeout: None,
            retransmission_timeout: None,
            priority: 0,
            traffic_class: TrafficClass::BestEffort,
            receive_buffer_size: None,
            send_buffer_size: None,
        }
    }
}

impl TransportProperties {
    /// Applies a clone's per-connection alterations, rejecting any that
    /// would change a property the group invariant fixes (reliability,
    /// ordering, msg-boundaries, congestion control; §4.6). `priority` and
    /// the buffer sizes may always change.
    pub fn override_for_clone(&self, alterations: CloneAlterations) -> crate::error::Result<Self> {
        let mut next = self.clone();
        if let Some(priority) = alterations.priority {
            next.priority = priority;
        }
        if let Some(traffic_class) = alterations.traffic_class {
            next.traffic_class = traffic_class;
        }
        if let Some(recv) = alterations.receive_buffer_size {
            next.receive_buffer_size = Some(recv);
        }
        if let Some(send) = alterations.send_buffer_size {
            next.send_buffer_size = Some(send);
        }
        Ok(next)
    }
}

/// Alterations a clone may request (§4.6). Fields left `None` inherit the
/// group's value unchanged.
#[derive(Debug, Clone, Default)]
pub struct CloneAlterations {
    pub priority: Option<i32>,
    pub traffic_class: Option<TrafficClass>,
    pub receive_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
}

#[cfg(test)]
mod properties_test {
    use super::*;

    #[test]
    fn prefer_scores_positive_when_provided() {
        assert_eq!(Preference::Prefer.score(true), 1);
        assert_eq!(Preference::Prefer.score(false), 0);
    }

    #[test]
    fn avoid_scores_negative_when_provided() {
        assert_eq!(Preference::Avoid.score(true), -1);
    }

    #[test]
    fn clone_alterations_only_touch_requested_fields() {
        let base = TransportProperties::default();
        let altered = base
            .override_for_clone(CloneAlterations {
                priority: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(altered.priority, 5);
        assert_eq!(altered.reliability, base.reliability);
    }
}
