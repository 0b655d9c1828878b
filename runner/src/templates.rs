use std::collections::BTreeMap;
use thiserror::Error;

/// substitution site for the physical table name
pub const TABLE_SITE: &str = "%s";

/// every query name a variant has to define (or explicitly mark unsupported)
pub const QUERY_NAMES: [&str; 5] = [
    "select_all",
    "score_over_7",
    "count_score_over_7",
    "count_year_2000_at_gt",
    "count_year_2000_eq",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Sql(&'static str),
    /// the variant's encoding cannot answer this query
    Unsupported,
}

use Template::{Sql, Unsupported};

const SELECT_ALL: Template = Sql("SELECT * FROM %s");
const SCORE_OVER_7: Template = Sql("SELECT * FROM %s WHERE CAST(data->>'score' AS FLOAT) > 7.0");
const COUNT_SCORE_OVER_7: Template =
    Sql("SELECT COUNT(*) FROM %s WHERE CAST(data->>'score' AS FLOAT) > 7.0");
const COUNT_YEAR_2000_AT_GT: Template =
    Sql("SELECT COUNT(*) FROM %s WHERE data @> '{\"year\": 2000}'");
const COUNT_YEAR_2000_EQ: Template = Sql("SELECT COUNT(*) FROM %s WHERE data->>'year' = '2000'");

const JSONB_TEMPLATES: [Template; 5] = [
    SELECT_ALL,
    SCORE_OVER_7,
    COUNT_SCORE_OVER_7,
    COUNT_YEAR_2000_AT_GT,
    COUNT_YEAR_2000_EQ,
];

/// variant -> templates in `QUERY_NAMES` order
const BUILTIN: [(&str, [Template; 5]); 6] = [
    (
        "text",
        [
            SELECT_ALL,
            Sql("SELECT * FROM %s WHERE CAST(CAST(data AS JSON)->>'score' AS FLOAT) > 7.0"),
            Unsupported,
            Unsupported,
            Unsupported,
        ],
    ),
    (
        "json",
        [
            SELECT_ALL,
            SCORE_OVER_7,
            COUNT_SCORE_OVER_7,
            Unsupported,
            COUNT_YEAR_2000_EQ,
        ],
    ),
    ("jsonb", JSONB_TEMPLATES),
    ("btree_idx_score", JSONB_TEMPLATES),
    ("gin_idx", JSONB_TEMPLATES),
    ("gin_idx_path", JSONB_TEMPLATES),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Variant '{variant}' does not define query '{query}'")]
    Incomplete { variant: String, query: String },
    #[error("Template '{query}' of variant '{variant}' must contain exactly one '%s'")]
    Malformed { variant: String, query: String },
    #[error("'{0}' is not a known table variant")]
    UnknownVariant(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Query name '{0}' passed as an argument is not valid")]
pub struct UnknownQueryError(pub String);

#[derive(Debug, Clone)]
/// Immutable variant -> query name -> template lookup, validated on construction
pub struct QueryRegistry {
    variants: BTreeMap<String, BTreeMap<String, Template>>,
}

impl QueryRegistry {
    /// the six built-in variants with their templates
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(BUILTIN.iter().map(|(variant, templates)| {
            (
                variant.to_string(),
                QUERY_NAMES
                    .iter()
                    .map(|name| name.to_string())
                    .zip(templates.iter().copied())
                    .collect(),
            )
        }))
    }

    pub fn new<I>(variants: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (String, BTreeMap<String, Template>)>,
    {
        let registry = Self {
            variants: variants.into_iter().collect(),
        };
        registry.validate()?;

        Ok(registry)
    }

    /// every variant has every query name, every template exactly one table site
    fn validate(&self) -> Result<(), RegistryError> {
        for (variant, templates) in &self.variants {
            for query in QUERY_NAMES {
                match templates.get(query) {
                    None => {
                        return Err(RegistryError::Incomplete {
                            variant: variant.clone(),
                            query: query.to_owned(),
                        })
                    }
                    Some(Sql(sql)) if sql.matches(TABLE_SITE).count() != 1 => {
                        return Err(RegistryError::Malformed {
                            variant: variant.clone(),
                            query: query.to_owned(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    pub fn contains(&self, variant: &str) -> bool {
        self.variants.contains_key(variant)
    }

    /// Resolve `variant` names in order, dropping duplicates
    pub fn select<S: AsRef<str>>(&self, variants: &[S]) -> Result<Vec<String>, RegistryError> {
        let mut selected: Vec<String> = Vec::with_capacity(variants.len());

        for variant in variants.iter().map(AsRef::as_ref) {
            if !self.contains(variant) {
                return Err(RegistryError::UnknownVariant(variant.to_owned()));
            }
            if !selected.iter().any(|known| known == variant) {
                selected.push(variant.to_owned());
            }
        }

        Ok(selected)
    }

    pub fn template(&self, variant: &str, query: &str) -> Result<Template, QueryLookupError> {
        if !QUERY_NAMES.contains(&query) {
            return Err(UnknownQueryError(query.to_owned()).into());
        }

        self.variants
            .get(variant)
            .and_then(|templates| templates.get(query))
            .copied()
            .ok_or_else(|| RegistryError::UnknownVariant(variant.to_owned()).into())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryLookupError {
    #[error(transparent)]
    UnknownQuery(#[from] UnknownQueryError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
