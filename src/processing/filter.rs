//! Filter criteria applied to retrieved elements

use crate::error::ProcessingFailure;
use crate::functions::Function;
use crate::types::{Element, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Decides whether a retrieved element is passed on
pub trait FilterCriterion: Send + Sync {
    /// Whether `element` passes the filter
    fn matches(&self, element: &Element) -> Result<bool, ProcessingFailure>;
}

/// Passes elements whose dimension value is one of the accepted values
pub struct DimensionValuesFilterCriterion {
    dimension: Function,
    accepted: HashSet<Value>,
}

impl DimensionValuesFilterCriterion {
    /// Create a criterion
    pub fn new(dimension: Function, accepted: HashSet<Value>) -> Self {
        Self {
            dimension,
            accepted,
        }
    }
}

impl FilterCriterion for DimensionValuesFilterCriterion {
    fn matches(&self, element: &Element) -> Result<bool, ProcessingFailure> {
        let value = self.dimension.try_apply(element)?;
        Ok(self.accepted.contains(&value))
    }
}

/// Passes elements that pass every criterion
pub struct AndFilterCriterion {
    criteria: Vec<Arc<dyn FilterCriterion>>,
}

impl AndFilterCriterion {
    /// Combine criteria
    pub fn new(criteria: Vec<Arc<dyn FilterCriterion>>) -> Self {
        Self { criteria }
    }

    /// Criterion for the filter selection of one retriever level
    ///
    /// Dimensions with no accepted values do not restrict anything. Returns
    /// `None` if nothing is restricted at all.
    pub fn for_selection(
        selection: &HashMap<Function, HashSet<Value>>,
    ) -> Option<Arc<dyn FilterCriterion>> {
        let mut criteria: Vec<Arc<dyn FilterCriterion>> = selection
            .iter()
            .filter(|(_, accepted)| !accepted.is_empty())
            .map(|(dimension, accepted)| {
                Arc::new(DimensionValuesFilterCriterion::new(
                    dimension.clone(),
                    accepted.clone(),
                )) as Arc<dyn FilterCriterion>
            })
            .collect();
        match criteria.len() {
            0 => None,
            1 => criteria.pop(),
            _ => Some(Arc::new(Self::new(criteria))),
        }
    }
}

impl FilterCriterion for AndFilterCriterion {
    fn matches(&self, element: &Element) -> Result<bool, ProcessingFailure> {
        for criterion in &self.criteria {
            if !criterion.matches(element)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
