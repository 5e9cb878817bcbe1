//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings for backward compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for String {
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Name of a resource, the unique key of a manifest entry.
    ResourceName
);

string_newtype!(
    /// Name of a network binding declared by a resource.
    BindingName
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_display_and_as_ref() {
        let name = ResourceName::new("nodeapp");
        assert_eq!(name.to_string(), "nodeapp");
        assert_eq!(name.as_str(), "nodeapp");
        assert_eq!(AsRef::<str>::as_ref(&name), "nodeapp");
    }

    #[test]
    fn resource_name_serde_roundtrip() {
        let name = ResourceName::new("redis");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"redis\"");
        let back: ResourceName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn binding_name_from_str() {
        let binding = BindingName::from("http");
        assert_eq!(binding.as_str(), "http");
    }

    #[test]
    fn binding_name_equality() {
        let a = BindingName::new("https");
        let b = BindingName::new("https");
        let c = BindingName::new("tcp");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn resource_name_into_inner() {
        let name = ResourceName::new("apiservice".to_owned());
        assert_eq!(name.into_inner(), "apiservice");
    }
}
