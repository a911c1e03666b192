//! Extraction functions: dimensions, statistics and external functions
//!
//! A [`Function`] maps an [`Element`] of its declaring type to a [`Value`].
//! Dimensions are used for filtering and grouping, statistics are the values
//! aggregated by a query. The [`FunctionDto`] is the wire-level identity used
//! to look a function up again in the [`FunctionRegistry`].

pub mod registry;

pub use registry::{FunctionCatalog, FunctionRegistry};

use crate::error::ProcessingFailure;
use crate::types::{Element, TypeTag, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Role of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Used for filtering and grouping
    Dimension,
    /// Value that can be aggregated
    Statistic,
    /// Function provided by a type the domain does not own
    External,
}

/// Evaluation callback of a function
pub type Evaluator = Arc<dyn Fn(&Element) -> Result<Value, ProcessingFailure> + Send + Sync>;

/// Wire-level identity of a function
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionDto {
    /// Name of the declaring type
    pub declaring_type: String,
    /// Function name, unique per declaring type
    pub name: String,
    /// Name of the result type
    pub return_type: String,
    /// Role of the function
    pub kind: FunctionKind,
    /// Position used to order functions of the same type
    pub ordinal: i32,
}

/// A named, typed extraction from a domain type to a value
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    declaring_type: TypeTag,
    return_type: TypeTag,
    kind: FunctionKind,
    ordinal: i32,
    unit: Option<Arc<str>>,
    result_decimals: u32,
    evaluator: Evaluator,
}

impl Function {
    /// Create a function of the given kind
    pub fn new<F>(
        kind: FunctionKind,
        declaring_type: TypeTag,
        name: impl Into<Arc<str>>,
        return_type: TypeTag,
        evaluator: F,
    ) -> Self
    where
        F: Fn(&Element) -> Result<Value, ProcessingFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            declaring_type,
            return_type,
            kind,
            ordinal: i32::MAX,
            unit: None,
            result_decimals: 0,
            evaluator: Arc::new(evaluator),
        }
    }

    /// Create a dimension
    pub fn dimension<F>(
        declaring_type: TypeTag,
        name: impl Into<Arc<str>>,
        return_type: TypeTag,
        evaluator: F,
    ) -> Self
    where
        F: Fn(&Element) -> Result<Value, ProcessingFailure> + Send + Sync + 'static,
    {
        Self::new(FunctionKind::Dimension, declaring_type, name, return_type, evaluator)
    }

    /// Create a statistic
    pub fn statistic<F>(
        declaring_type: TypeTag,
        name: impl Into<Arc<str>>,
        return_type: TypeTag,
        evaluator: F,
    ) -> Self
    where
        F: Fn(&Element) -> Result<Value, ProcessingFailure> + Send + Sync + 'static,
    {
        Self::new(FunctionKind::Statistic, declaring_type, name, return_type, evaluator)
    }

    /// Create an external function
    pub fn external<F>(
        declaring_type: TypeTag,
        name: impl Into<Arc<str>>,
        return_type: TypeTag,
        evaluator: F,
    ) -> Self
    where
        F: Fn(&Element) -> Result<Value, ProcessingFailure> + Send + Sync + 'static,
    {
        Self::new(FunctionKind::External, declaring_type, name, return_type, evaluator)
    }

    /// Set the ordinal
    pub fn with_ordinal(mut self, ordinal: i32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Set the unit of the result
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the number of decimals the result should be displayed with
    pub fn with_result_decimals(mut self, decimals: u32) -> Self {
        self.result_decimals = decimals;
        self
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type the function is declared on
    pub fn declaring_type(&self) -> &TypeTag {
        &self.declaring_type
    }

    /// Type of the produced values
    pub fn return_type(&self) -> &TypeTag {
        &self.return_type
    }

    /// Role of the function
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Whether this is a dimension
    pub fn is_dimension(&self) -> bool {
        self.kind == FunctionKind::Dimension
    }

    /// Ordering position
    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }

    /// Unit of the result, if any
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Display decimals of the result
    pub fn result_decimals(&self) -> u32 {
        self.result_decimals
    }

    /// `DeclaringType.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }

    /// Evaluate the function
    ///
    /// Elements of the wrong type yield a recoverable failure, a panicking
    /// evaluator a fatal one.
    pub fn try_apply(&self, element: &Element) -> Result<Value, ProcessingFailure> {
        if !element.is_instance_of(&self.declaring_type) {
            return Err(ProcessingFailure::element(format!(
                "{} cannot be applied to an element of type {}",
                self.qualified_name(),
                element.type_tag()
            )));
        }
        panic::catch_unwind(AssertUnwindSafe(|| (self.evaluator)(element)))
            .unwrap_or_else(|payload| Err(ProcessingFailure::from_panic(payload)))
    }

    /// Wire-level identity
    pub fn to_dto(&self) -> FunctionDto {
        FunctionDto {
            declaring_type: self.declaring_type.name().to_string(),
            name: self.name.to_string(),
            return_type: self.return_type.name().to_string(),
            kind: self.kind,
            ordinal: self.ordinal,
        }
    }

    /// Whether the DTO identifies this function
    pub fn matches_dto(&self, dto: &FunctionDto) -> bool {
        self.declaring_type.name() == dto.declaring_type
            && &*self.name == dto.name
            && self.return_type.name() == dto.return_type
            && self.kind == dto.kind
    }
}

// Identity: declaring type, name, return type and kind. The evaluator is not
// comparable and two registrations of the same identity are the same function.
impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_type == other.declaring_type
            && self.name == other.name
            && self.return_type == other.return_type
            && self.kind == other.kind
    }
}

impl Eq for Function {}

impl Hash for Function {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.declaring_type.hash(state);
        self.name.hash(state);
        self.return_type.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.qualified_name())
            .field("return_type", &self.return_type)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boat() -> TypeTag {
        TypeTag::new("Boat")
    }

    fn sail_id() -> Function {
        Function::dimension(boat(), "sailId", TypeTag::text(), |e| {
            Ok(e.downcast_ref::<String>().cloned().into())
        })
    }

    #[test]
    fn test_apply() {
        let element = Element::new(boat(), "GER 7".to_string());
        assert_eq!(sail_id().try_apply(&element), Ok(Value::from("GER 7")));
    }

    #[test]
    fn test_apply_to_wrong_type_is_recoverable() {
        let element = Element::new(TypeTag::new("Race"), 1u32);
        let failure = sail_id().try_apply(&element).unwrap_err();
        assert!(!failure.is_severe());
    }

    #[test]
    fn test_panicking_evaluator_is_fatal() {
        let broken = Function::statistic(boat(), "length", TypeTag::float(), |_| {
            panic!("no length")
        });
        let element = Element::new(boat(), ());
        let failure = broken.try_apply(&element).unwrap_err();
        assert!(failure.is_severe());
    }

    #[test]
    fn test_dto_identity() {
        let function = sail_id().with_ordinal(2);
        let dto = function.to_dto();
        assert!(function.matches_dto(&dto));
        assert_eq!(dto.declaring_type, "Boat");
        assert_eq!(dto.ordinal, 2);

        let other = FunctionDto {
            kind: FunctionKind::Statistic,
            ..dto
        };
        assert!(!function.matches_dto(&other));
    }

    #[test]
    fn test_equality_ignores_metadata() {
        assert_eq!(sail_id(), sail_id().with_unit("none").with_ordinal(1));
    }
}
