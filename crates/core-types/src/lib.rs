#![allow(dead_code)]

use std::fmt;

use uuid::Uuid;

macro_rules! time_sortable_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde-full", serde(transparent))]
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            /// UUIDv7 identifiers sort lexicographically by creation time.
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

time_sortable_id!(
    /// Identifier of one recorded inference.
    InferenceId
);
time_sortable_id!(
    /// Identifier grouping the inferences of one conversation.
    EpisodeId
);
time_sortable_id!(
    /// Identifier of a stored exemplar.
    ExampleId
);
time_sortable_id!(FeedbackId);
time_sortable_id!(
    /// Identifier handed out by the external optimization worker.
    JobId
);

/// Key of a function's variant. Functions and variants are addressed by name.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub function: String,
    pub variant: String,
}

impl VariantKey {
    pub fn new(function: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            variant: variant.into(),
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.function, self.variant)
    }
}

/// Key of one optimization target: a metric tracked for a function.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub function: String,
    pub metric: String,
}

impl TargetKey {
    pub fn new(function: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function, self.metric)
    }
}

#[cfg(feature = "serde-full")]
pub type Payload = serde_json::Value;

#[cfg(not(feature = "serde-full"))]
pub type Payload = ();
