// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-problem working record.
//!
//! A [`ProblemContext`] is the mutable single source of truth for one
//! problem instance: the immutable request, the resolved spec and flag
//! variant, working-folder locations, and text macros. It is created on
//! first generation and persisted by the store after every pipeline phase
//! and every grade; a persisted context with a bound flag is what makes
//! re-entry skip regeneration.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::problem::Problem;
use crate::spec::{ChallengeSpec, FlagSpec};
use crate::state::ProblemState;

/// A text substitution, either literal or resolved on first use.
///
/// The resolver variant binds a closure at construction and evaluates it at
/// most once; the result is cached for every later lookup. Serialization
/// forces resolution, so a persisted context always carries literal values.
#[derive(Clone)]
pub struct Macro {
    key: String,
    source: MacroSource,
    cached: OnceLock<String>,
}

#[derive(Clone)]
enum MacroSource {
    Literal(String),
    Resolver(Arc<dyn Fn() -> String + Send + Sync>),
}

impl Macro {
    /// Create a macro with a fixed value.
    pub fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: MacroSource::Literal(value.into()),
            cached: OnceLock::new(),
        }
    }

    /// Create a macro whose value is computed on first use.
    pub fn resolver(
        key: impl Into<String>,
        resolve: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            source: MacroSource::Resolver(Arc::new(resolve)),
            cached: OnceLock::new(),
        }
    }

    /// The placeholder this macro replaces, e.g. `{{PlayerList}}`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The substitution value, resolving and caching it if necessary.
    pub fn value(&self) -> &str {
        match &self.source {
            MacroSource::Literal(value) => value,
            MacroSource::Resolver(resolve) => self.cached.get_or_init(|| resolve()),
        }
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            MacroSource::Literal(value) => value.as_str(),
            MacroSource::Resolver(_) => match self.cached.get() {
                Some(value) => value.as_str(),
                None => "<unresolved>",
            },
        };
        f.debug_struct("Macro")
            .field("key", &self.key)
            .field("value", &source)
            .finish()
    }
}

impl Serialize for Macro {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Macro", 2)?;
        s.serialize_field("key", &self.key)?;
        s.serialize_field("value", self.value())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Macro {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MacroVisitor;

        impl<'de> Visitor<'de> for MacroVisitor {
            type Value = Macro;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a macro object with key and value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Macro, A::Error> {
                let mut key: Option<String> = None;
                let mut value: Option<String> = None;
                while let Some(field) = map.next_key::<String>()? {
                    match field.as_str() {
                        "key" => key = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(Macro::literal(
                    key.unwrap_or_default(),
                    value.unwrap_or_default(),
                ))
            }
        }

        deserializer.deserialize_map(MacroVisitor)
    }
}

/// The mutable working record for one problem instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemContext {
    /// The originating request, never mutated.
    pub problem: Problem,
    /// Externally visible status projection.
    pub problem_state: ProblemState,
    /// The resolved challenge definition; working copy, macro-substituted.
    pub spec: ChallengeSpec,
    /// The bound flag variant; `None` until generation selects one.
    pub flag: Option<FlagSpec>,
    /// Index of the bound variant within the spec's flag list.
    pub flag_index: usize,
    /// Read-only challenge content folder.
    pub challenge_folder: String,
    /// Per-problem scratch folder.
    pub problem_folder: String,
    /// Download-accessible folder for ISOs and staged documents.
    pub iso_folder: String,
    /// Text substitutions applied during generation.
    #[serde(default)]
    pub macros: Vec<Macro>,
}

impl ProblemContext {
    /// True once a flag variant has been bound, i.e. the problem has been
    /// generated at least once.
    pub fn is_generated(&self) -> bool {
        self.flag.is_some()
    }
}
