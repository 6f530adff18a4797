//! `filter { name, values }` blocks shared by the listing data sources.
//!
//! A candidate passes when every filter whose name the data source knows
//! has at least one value regex matching the corresponding field. Filters
//! with unknown names are ignored; a filter with no values matches nothing.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::resources::decode;
use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock};

/// Attribute name of the filter blocks.
pub const FILTER: &str = "filter";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterConfig {
    name: String,
    values: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterBlocks {
    filter: Vec<FilterConfig>,
}

/// One compiled filter.
#[derive(Debug, Clone)]
pub struct Filter {
    name: String,
    values: Vec<Regex>,
}

impl Filter {
    fn matches(&self, field: &str) -> bool {
        self.values.iter().any(|re| re.is_match(field))
    }
}

/// All filters of one data source read.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// Compile the `filter` blocks of a data source config.
    pub fn from_config(config: &Value) -> Result<Self, ProviderError> {
        let blocks: FilterBlocks = decode(config)?;
        let filters = blocks
            .filter
            .into_iter()
            .map(|f| {
                let values = f
                    .values
                    .iter()
                    .map(|v| {
                        Regex::new(v).map_err(|e| {
                            ProviderError::Validation(format!(
                                "invalid filter value {:?} for {:?}: {}",
                                v, f.name, e
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Filter { name: f.name, values })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// True if every filter naming one of `fields` matches that field's value.
    pub fn matches(&self, fields: &[(&str, &str)]) -> bool {
        self.filters.iter().all(|filter| {
            match fields.iter().find(|(name, _)| *name == filter.name) {
                Some((_, value)) => filter.matches(value),
                None => true,
            }
        })
    }
}

/// Diagnostics for a data source whose filterable fields are `known`.
///
/// Values that do not compile are errors. Names outside `known` only warn,
/// since reads ignore them.
pub fn diagnostics(config: &Value, known: &[&str]) -> Vec<Diagnostic> {
    match FilterSet::from_config(config) {
        Ok(set) => set
            .filters
            .iter()
            .filter(|f| !known.contains(&f.name.as_str()))
            .map(|f| {
                Diagnostic::warning(format!("filter {:?} is ignored", f.name))
                    .with_detail(format!("Valid names are {:?}", known))
                    .with_attribute(FILTER)
            })
            .collect(),
        Err(e) => vec![Diagnostic::error(e.message()).with_attribute(FILTER)],
    }
}

/// The `filter` block for a data source schema.
pub fn filter_block() -> NestedBlock {
    NestedBlock::set(
        Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "values",
                Attribute::required(AttributeType::string_list())
                    .with_description("Regular expressions; any match passes."),
            ),
    )
}
