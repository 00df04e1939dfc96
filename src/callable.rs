//! The work functions that can be scheduled implement the `Callable`
//! trait, invoked with a map of named arguments rather than a fixed
//! positional tuple.

use std::collections::BTreeMap;
use std::fmt;

/// An argument value passed to a [`Callable`]. Kept small and concrete
/// rather than a trait object, since the scheduler only ever needs to
/// hash and render these, never operate on them generically.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ArgValue>),
    Map(BTreeMap<String, ArgValue>),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArgValue::Str(s) => write!(f, "{s}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ArgValue::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Map-of-named-arguments type passed to every call.
pub type Kwargs = BTreeMap<String, ArgValue>;

/// Canonical short rendering of a single argument value, used both for
/// `Job::function_signature` display and as an input to the signature
/// hash. Lists collapse to `[..]`, maps collapse to `{..}`, everything
/// else is `Display`-formatted and truncated to 6 characters + `..` if
/// longer.
#[must_use]
pub fn render_short(value: &ArgValue) -> String {
    match value {
        ArgValue::List(_) => "[..]".to_string(),
        ArgValue::Map(_) => "{..}".to_string(),
        other => {
            let full = other.to_string();
            if full.chars().count() > 6 {
                let truncated: String = full.chars().take(6).collect();
                format!("{truncated}..")
            } else {
                full
            }
        }
    }
}

/// Anything schedulable. `call` receives the job's kwargs and returns an
/// error on failure - the scheduler routes it to the job's error
/// handlers rather than unwinding the dispatch loop.
pub trait Callable: Send + Sync {
    /// Execute this callable.
    ///
    /// # Errors
    /// Returns an error describing why the unit of work failed.
    fn call(&self, kwargs: &Kwargs) -> anyhow::Result<()>;

    /// Stable name used in logs, signature hashing, and the monitor API.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Callable(name={})", self.name())
    }
}

/// Adapts a plain `fn(&Kwargs) -> anyhow::Result<()>` into a [`Callable`].
pub struct FnCallable {
    name: String,
    work: fn(&Kwargs) -> anyhow::Result<()>,
}

impl FnCallable {
    pub fn new(name: impl Into<String>, work: fn(&Kwargs) -> anyhow::Result<()>) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl fmt::Debug for FnCallable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FnCallable(name={})", self.name)
    }
}

impl Callable for FnCallable {
    fn call(&self, kwargs: &Kwargs) -> anyhow::Result<()> {
        (self.work)(kwargs)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
