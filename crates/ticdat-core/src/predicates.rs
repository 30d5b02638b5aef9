use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::container::TicDat;
use crate::row::RowView;

/// Error raised from inside a predicate or its argument maker.
pub type PredicateError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a row predicate on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    FailWith(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Verdict::FailWith(message) if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}

impl From<bool> for Verdict {
    fn from(pass: bool) -> Self {
        if pass { Verdict::Pass } else { Verdict::Fail }
    }
}

/// A non-empty message is a failure carrying that message; an empty one is a plain failure.
impl From<String> for Verdict {
    fn from(message: String) -> Self {
        if message.is_empty() {
            Verdict::Fail
        } else {
            Verdict::FailWith(message)
        }
    }
}

impl From<&str> for Verdict {
    fn from(message: &str) -> Self {
        Verdict::from(message.to_string())
    }
}

impl From<Result<(), String>> for Verdict {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Verdict::Pass,
            Err(message) => Verdict::from(message),
        }
    }
}

/// Named values computed once per validation call and shared by every row.
#[derive(Default)]
pub struct PredicateArgs {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl PredicateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Box::new(value));
    }

    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|value| value.downcast_ref())
    }

    /// Like `get`, but a missing or mistyped argument is an error.
    pub fn require<T: Any>(&self, name: &str) -> Result<&T, PredicateError> {
        self.get(name)
            .ok_or_else(|| format!("missing or mistyped predicate argument: {name}").into())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for PredicateArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("PredicateArgs").field("names", &names).finish()
    }
}

type MakerFn = dyn Fn(&TicDat) -> Result<PredicateArgs, PredicateError> + Send + Sync;
type PredicateFn = dyn Fn(&RowView<'_>, &PredicateArgs) -> Result<Verdict, PredicateError> + Send + Sync;

/// Dataset-level precomputation for predicates. Clones share identity, so
/// predicates holding the same maker see a single computed result.
#[derive(Clone)]
pub struct KwargsMaker(Arc<MakerFn>);

impl KwargsMaker {
    pub fn new<F>(maker: F) -> Self
    where
        F: Fn(&TicDat) -> Result<PredicateArgs, PredicateError> + Send + Sync + 'static,
    {
        KwargsMaker(Arc::new(maker))
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn make(&self, dat: &TicDat) -> Result<PredicateArgs, PredicateError> {
        (self.0)(dat)
    }
}

impl fmt::Debug for KwargsMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KwargsMaker({:#x})", self.id())
    }
}

/// How failures of a predicate are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureResponse {
    /// Only which rows failed.
    #[default]
    Boolean,
    /// Failing rows together with the predicate's message.
    ErrorMessage,
}

/// Named semantic check run against every row of one table.
#[derive(Clone)]
pub struct RowPredicate {
    name: String,
    check: Arc<PredicateFn>,
    kwargs_maker: Option<KwargsMaker>,
    failure_response: FailureResponse,
}

impl RowPredicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RowView<'_>, &PredicateArgs) -> Result<Verdict, PredicateError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
            kwargs_maker: None,
            failure_response: FailureResponse::default(),
        }
    }

    /// A predicate that only looks at the row and cannot raise.
    pub fn simple<F, V>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RowView<'_>) -> V + Send + Sync + 'static,
        V: Into<Verdict>,
    {
        Self::new(name, move |row: &RowView<'_>, _: &PredicateArgs| Ok(check(row).into()))
    }

    pub fn with_kwargs_maker(mut self, maker: KwargsMaker) -> Self {
        self.kwargs_maker = Some(maker);
        self
    }

    pub fn with_failure_response(mut self, response: FailureResponse) -> Self {
        self.failure_response = response;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kwargs_maker(&self) -> Option<&KwargsMaker> {
        self.kwargs_maker.as_ref()
    }

    pub fn failure_response(&self) -> FailureResponse {
        self.failure_response
    }

    pub(crate) fn evaluate(
        &self,
        row: &RowView<'_>,
        args: &PredicateArgs,
    ) -> Result<Verdict, PredicateError> {
        (self.check)(row, args)
    }
}

impl fmt::Debug for RowPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowPredicate")
            .field("name", &self.name)
            .field("kwargs_maker", &self.kwargs_maker)
            .field("failure_response", &self.failure_response)
            .finish()
    }
}
