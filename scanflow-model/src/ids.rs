use std::borrow::Cow;
use std::fmt;

use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Strongly typed ID for libraries
    LibraryId
);
uuid_id!(
    /// Identifier of one scan run
    ScanId
);
uuid_id!(
    /// Identifier of the user who requested a scan
    UserId
);
uuid_id!(
    /// Unique identifier stamped on every published event
    EventId
);

/// Correlation key tying together every event emitted by one scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanIdentity {
    pub scan_id: ScanId,
    pub user_id: UserId,
}

impl ScanIdentity {
    pub fn new(scan_id: ScanId, user_id: UserId) -> Self {
        Self { scan_id, user_id }
    }

    /// Fresh scan id for the given user.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            scan_id: ScanId::new(),
            user_id,
        }
    }
}

impl fmt::Display for ScanIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.scan_id, self.user_id)
    }
}

/// Stable identifier of a job kind inside a job graph.
///
/// Built-in pipeline stages use the associated constants; tests and custom
/// graphs may mint their own through [`StageId::new`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct StageId(Cow<'static, str>);

impl StageId {
    pub const DISCOVERY: StageId = StageId(Cow::Borrowed("discovery"));
    pub const COMPARISON: StageId = StageId(Cow::Borrowed("comparison"));
    pub const REPOSITORY_LOOKUP: StageId =
        StageId(Cow::Borrowed("repository_lookup"));
    pub const METADATA_SAVE: StageId = StageId(Cow::Borrowed("metadata_save"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for StageId {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
