//! Event-type routing per event family.
//!
//! Each family has a closed set of event types, each mapped to one
//! `(exchange, routing key)` pair. Stored tags outside that set resolve to
//! `None`, which the relay records as a delivery failure for that event.

use outbox_database::OutboxTable;
use relay_config_and_utils::RelayMode;

/// Exchange for user-facing notifications.
pub const NOTIFICATION_EXCHANGE: &str = "notification";

/// Exchange for search index maintenance.
pub const SEARCH_INDEXING_EXCHANGE: &str = "search-indexing";

pub const RESTORE_ACCESS_ROUTING_KEY: &str = "notification.restore-access";
pub const PROFILE_INDEX_ROUTING_KEY: &str = "search.profile.index";
pub const PROFILE_REMOVE_ROUTING_KEY: &str = "search.profile.remove";

/// Where a single event is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub exchange: &'static str,
    pub routing_key: &'static str,
}

/// Authentication event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventType {
    RestoreAccessMail,
}

impl AuthEventType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "RESTORE_ACCESS_MAIL" => Some(Self::RestoreAccessMail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestoreAccessMail => "RESTORE_ACCESS_MAIL",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::RestoreAccessMail => RESTORE_ACCESS_ROUTING_KEY,
        }
    }
}

/// Profile event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileEventType {
    ProfileIndex,
    ProfileRemove,
}

impl ProfileEventType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "PROFILE_INDEX" => Some(Self::ProfileIndex),
            "PROFILE_REMOVE" => Some(Self::ProfileRemove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileIndex => "PROFILE_INDEX",
            Self::ProfileRemove => "PROFILE_REMOVE",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::ProfileIndex => PROFILE_INDEX_ROUTING_KEY,
            Self::ProfileRemove => PROFILE_REMOVE_ROUTING_KEY,
        }
    }
}

/// Event family drained by one relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Auth,
    Profile,
}

impl EventFamily {
    pub fn from_mode(mode: RelayMode) -> Self {
        match mode {
            RelayMode::Auth => Self::Auth,
            RelayMode::Profile => Self::Profile,
        }
    }

    pub fn table(&self) -> OutboxTable {
        match self {
            Self::Auth => OutboxTable::Auth,
            Self::Profile => OutboxTable::Profile,
        }
    }

    pub fn exchange(&self) -> &'static str {
        match self {
            Self::Auth => NOTIFICATION_EXCHANGE,
            Self::Profile => SEARCH_INDEXING_EXCHANGE,
        }
    }

    /// Resolve a stored event-type tag. Tags are exact and case-sensitive.
    pub fn resolve(&self, event_type: &str) -> Option<Route> {
        let routing_key = match self {
            Self::Auth => AuthEventType::parse(event_type)?.routing_key(),
            Self::Profile => ProfileEventType::parse(event_type)?.routing_key(),
        };
        Some(Route {
            exchange: self.exchange(),
            routing_key,
        })
    }
}

/// Everything a relay instance needs to know about its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyDescriptor {
    pub family: EventFamily,
    pub table: OutboxTable,
    pub exchange: &'static str,
}

impl FamilyDescriptor {
    pub fn new(family: EventFamily) -> Self {
        Self {
            family,
            table: family.table(),
            exchange: family.exchange(),
        }
    }

    pub fn for_mode(mode: RelayMode) -> Self {
        Self::new(EventFamily::from_mode(mode))
    }

    pub fn resolve(&self, event_type: &str) -> Option<Route> {
        self.family.resolve(event_type)
    }
}
