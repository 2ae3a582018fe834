//! Identifier newtypes for tracked metadata
//!
//! Every name that appears in a catalog snapshot gets its own type so a
//! relationship name can never be passed where a column name is expected.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static GRAPHQL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[_A-Za-z][_0-9A-Za-z]*$").expect("GraphQL name pattern is a valid regex")
});

/// Check whether a string is a valid GraphQL name (`/[_A-Za-z][_0-9A-Za-z]*/`)
pub fn is_graphql_name(name: &str) -> bool {
    GRAPHQL_NAME.is_match(name)
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new name
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the name as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// Name of a tracked table or view
    TableName
);
name_type!(
    /// Name of a table column
    ColumnName
);
name_type!(
    /// Name of an object or array relationship
    RelName
);
name_type!(
    /// Name of a foreign-key constraint
    ConstraintName
);
name_type!(
    /// Name of a database function
    FunctionName
);
name_type!(
    /// Name of a computed field
    ComputedFieldName
);
name_type!(
    /// Name of an event trigger
    TriggerName
);
name_type!(
    /// Name of a remote schema declaration
    RemoteSchemaName
);
name_type!(
    /// Role a permission is granted to
    RoleName
);

impl RoleName {
    /// The built-in role that sees everything
    pub fn admin() -> Self {
        Self::new("admin")
    }

    /// Whether this is the built-in admin role
    pub fn is_admin(&self) -> bool {
        self.0 == "admin"
    }
}
