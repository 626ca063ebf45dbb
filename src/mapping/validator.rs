//! Record validation against entity mappings

use super::transforms::{apply, check};
use super::types::{
    EntityMapping, FieldError, FieldErrorKind, FieldMapping, Transform, ValidationResult,
};
use crate::error::{Error, Result};
use crate::reconcile::ReconciliationReport;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Validates and coerces inbound records, one entity contract at a time
#[derive(Debug, Clone, Default)]
pub struct DataMappingValidator {
    mappings: BTreeMap<String, EntityMapping>,
}

impl DataMappingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity mappings for every entity of a report, with overrides
    ///
    /// Overrides for entities the report does not contain are registered as
    /// they are.
    pub fn from_report(
        report: &ReconciliationReport,
        overrides: &BTreeMap<String, Vec<FieldMapping>>,
    ) -> Self {
        let mut validator = Self::new();
        for entity in &report.entities {
            let mapping = EntityMapping::from_entity(entity)
                .overlay(overrides.get(&entity.name).cloned().unwrap_or_default());
            validator.register(mapping);
        }
        for (entity, fields) in overrides {
            if !validator.mappings.contains_key(entity) {
                validator.register(EntityMapping::new(entity, fields.clone()));
            }
        }
        validator
    }

    /// Add or replace the mapping of one entity
    pub fn register(&mut self, mapping: EntityMapping) {
        self.mappings.insert(mapping.entity.clone(), mapping);
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: EntityMapping) -> Self {
        self.register(mapping);
        self
    }

    pub fn mapping(&self, entity: &str) -> Option<&EntityMapping> {
        self.mappings.get(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }

    /// Validate one record for an entity
    ///
    /// Data problems never fail the call: every offending field is reported
    /// in `errors` and the passing fields are returned under their target
    /// names. The only error is an entity with no registered mapping.
    pub fn validate(&self, record: &Value, entity: &str) -> Result<ValidationResult> {
        let mapping = self
            .mappings
            .get(entity)
            .ok_or_else(|| Error::UnknownEntity {
                entity: entity.to_string(),
            })?;
        Ok(validate_fields(record, &mapping.fields))
    }
}

fn validate_fields(record: &Value, fields: &[FieldMapping]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut output = Map::new();

    for mapping in fields {
        let present = lookup(record, &mapping.source).filter(|v| !v.is_null());

        let Some(value) = present else {
            if mapping.required {
                errors.push(FieldError {
                    field: mapping.source.clone(),
                    kind: FieldErrorKind::Missing,
                    message: "required field is missing".to_string(),
                });
            } else if let Some(Transform::Default(default)) = &mapping.transform {
                output.insert(mapping.target.clone(), default.clone());
            }
            continue;
        };

        let transformed = match &mapping.transform {
            Some(transform) => match apply(transform, value) {
                Ok(v) => v,
                Err(message) => {
                    errors.push(FieldError {
                        field: mapping.source.clone(),
                        kind: FieldErrorKind::Transform,
                        message,
                    });
                    continue;
                }
            },
            None => value.clone(),
        };

        if let Some(validation) = &mapping.validate {
            if let Err(message) = check(validation, &transformed) {
                errors.push(FieldError {
                    field: mapping.source.clone(),
                    kind: FieldErrorKind::Validation,
                    message,
                });
                continue;
            }
        }

        output.insert(mapping.target.clone(), transformed);
    }

    ValidationResult::new(errors, output)
}

/// Walk a dotted path; numeric segments index arrays
pub(crate) fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }
    path.split('.').try_fold(record, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
