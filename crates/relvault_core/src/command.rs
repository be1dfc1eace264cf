//! Commands, their parameters and the registry they are looked up in.

use crate::context::WriteContext;
use crate::error::{CoreError, CoreResult};
use crate::types::InstanceId;
use relvault_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A named mutation executed by the consumer thread.
///
/// Commands must be deterministic: replaying the same transaction against
/// the same state has to produce the same effects, on any process sharing
/// the log. Read clocks, randomness or the environment in the caller and
/// pass the results as parameters.
pub trait Command: Send + Sync {
    /// Runs the command against the store.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole transaction and rolls it back.
    fn execute(&self, ctx: &mut WriteContext<'_>, params: &Params) -> CoreResult<Value>;
}

struct FnCommand<F>(F);

impl<F> Command for FnCommand<F>
where
    F: Fn(&mut WriteContext<'_>, &Params) -> CoreResult<Value> + Send + Sync,
{
    fn execute(&self, ctx: &mut WriteContext<'_>, params: &Params) -> CoreResult<Value> {
        (self.0)(ctx, params)
    }
}

/// Commands by name.
///
/// # Example
///
/// ```
/// use relvault_core::{CommandRegistry, Value};
///
/// let mut commands = CommandRegistry::new();
/// commands
///     .register_fn("noop", |_ctx, _params| Ok(Value::Null))
///     .unwrap();
/// assert!(commands.register_fn("noop", |_ctx, _params| Ok(Value::Null)).is_err());
/// ```
#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command under `name`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` if the name is empty or already taken.
    pub fn register(&mut self, name: impl Into<String>, command: impl Command + 'static) -> CoreResult<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::schema("command name must not be empty"));
        }
        if self.commands.contains_key(&name) {
            return Err(CoreError::schema(format!("duplicate command {name}")));
        }
        self.commands.insert(name, Arc::new(command));
        Ok(())
    }

    /// Registers a closure as a command.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` if the name is empty or already taken.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> CoreResult<()>
    where
        F: Fn(&mut WriteContext<'_>, &Params) -> CoreResult<Value> + Send + Sync + 'static,
    {
        self.register(name, FnCommand(f))
    }

    /// Looks up a command.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| c.as_ref())
    }

    /// Returns true if a command is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

/// Named command parameters.
///
/// A parameter holding `Value::Null` counts as missing for the required
/// accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    /// Creates an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a parameter.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns a parameter, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Iterates parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a required, non-null parameter.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if absent or null.
    pub fn value(&self, name: &str) -> CoreResult<&Value> {
        self.0
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| CoreError::MissingParameter {
                name: name.to_string(),
            })
    }

    /// Returns a required text parameter.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` or `TypeMismatch`.
    pub fn text(&self, name: &str) -> CoreResult<&str> {
        let value = self.value(name)?;
        value.as_text().ok_or_else(|| mismatch(name, "text", value))
    }

    /// Returns a required integer parameter.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` or `TypeMismatch`.
    pub fn integer(&self, name: &str) -> CoreResult<i64> {
        let value = self.value(name)?;
        value.as_integer().ok_or_else(|| mismatch(name, "integer", value))
    }

    /// Returns a required boolean parameter.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` or `TypeMismatch`.
    pub fn bool(&self, name: &str) -> CoreResult<bool> {
        let value = self.value(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "bool", value))
    }

    /// Returns a required byte-string parameter.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` or `TypeMismatch`.
    pub fn bytes(&self, name: &str) -> CoreResult<&[u8]> {
        let value = self.value(name)?;
        value.as_bytes().ok_or_else(|| mismatch(name, "bytes", value))
    }

    /// Returns a required instance id parameter, stored as a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` or `TypeMismatch`.
    pub fn id(&self, name: &str) -> CoreResult<InstanceId> {
        let value = self.value(name)?;
        value
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .map(InstanceId::new)
            .ok_or_else(|| mismatch(name, "instance id", value))
    }

    /// Returns an optional text parameter.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if present with another type.
    pub fn optional_text(&self, name: &str) -> CoreResult<Option<&str>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_text()
                .map(Some)
                .ok_or_else(|| mismatch(name, "text", value)),
        }
    }

    /// Returns an optional integer parameter.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if present with another type.
    pub fn optional_integer(&self, name: &str) -> CoreResult<Option<i64>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_integer()
                .map(Some)
                .ok_or_else(|| mismatch(name, "integer", value)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn mismatch(name: &str, expected: &str, found: &Value) -> CoreError {
    CoreError::type_mismatch(format!(
        "parameter {name} expects {expected}, got {}",
        found.kind()
    ))
}
