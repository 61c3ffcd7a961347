//! Row identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            #[inline]
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Primary key of a project.
    ProjectId
);
id_type!(
    /// Primary key of an environment.
    EnvironmentId
);
id_type!(
    /// Primary key of a deploy.
    DeployId
);
id_type!(
    /// Primary key of a bug.
    BugId
);
id_type!(
    /// Primary key of an occurrence.
    OccurrenceId
);
id_type!(
    /// Primary key of an event record.
    EventId
);
