use std::collections::HashSet;

use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Duplicate field in extraction schema: {0}")]
    DuplicateField(String),

    #[error("Extraction schema contains an empty field name")]
    EmptyField,
}

/// Ordered, duplicate-free list of the fields a caller requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSchema {
    fields: Vec<String>,
}

impl ExtractionSchema {
    pub fn new<I, S>(fields: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for field in fields {
            let field = field.into();
            if field.trim().is_empty() {
                return Err(SchemaError::EmptyField);
            }
            if !seen.insert(field.clone()) {
                return Err(SchemaError::DuplicateField(field));
            }
            ordered.push(field);
        }
        Ok(Self { fields: ordered })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Closed lists of accepted values for the fields that have one.
#[derive(Debug, Clone, Default)]
pub struct AllowedValues {
    entries: Vec<(String, Vec<String>)>,
}

impl AllowedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, values: &[&str]) -> Self {
        let values = values.iter().map(|v| v.to_string()).collect();
        match self.entries.iter_mut().find(|(f, _)| f == field) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((field.to_string(), values)),
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v.as_slice()))
    }
}

/// The schema plus its allowed-values table. Every endpoint shares one.
#[derive(Debug, Clone)]
pub struct ExtractionProfile {
    pub schema: ExtractionSchema,
    pub allowed_values: AllowedValues,
}

pub const WORKER_FIELDS: &[&str] = &[
    "Name",
    "dateofbirth",
    "Age",
    "PlaceOfBirth",
    "Nationality",
    "Religion",
    "MaritalStatus",
    "NumberOfChildren",
    "EducationLevel",
    "Height",
    "Weight",
    "PassportNumber",
    "PassportIssueDate",
    "PassportExpiryDate",
    "EnglishProficiency",
    "ArabicProficiency",
    "Skills",
    "WorkExperience",
    "ContactNumber",
];

pub const EDUCATION_LEVELS: &[&str] = &[
    "None",
    "Primary School",
    "Secondary School",
    "High School",
    "Vocational",
    "College",
    "University",
];

pub const MARITAL_STATUSES: &[&str] = &["Single", "Married", "Divorced", "Widowed", "Separated"];

pub const LANGUAGE_PROFICIENCIES: &[&str] = &["Poor", "Fair", "Good", "Fluent"];

pub const NATIONALITIES: &[&str] = &[
    "Filipino",
    "Indonesian",
    "Indian",
    "Sri Lankan",
    "Nepalese",
    "Bangladeshi",
    "Myanmar",
    "Ethiopian",
    "Kenyan",
    "Ugandan",
    "Ghanaian",
];

impl ExtractionProfile {
    /// Worker CV profile used by every extraction endpoint.
    pub fn worker() -> Self {
        let schema = ExtractionSchema {
            fields: WORKER_FIELDS.iter().map(|f| f.to_string()).collect(),
        };
        let allowed_values = AllowedValues::new()
            .with("Nationality", NATIONALITIES)
            .with("MaritalStatus", MARITAL_STATUSES)
            .with("EducationLevel", EDUCATION_LEVELS)
            .with("EnglishProficiency", LANGUAGE_PROFICIENCIES)
            .with("ArabicProficiency", LANGUAGE_PROFICIENCIES);

        Self {
            schema,
            allowed_values,
        }
    }
}

/// Every schema field mapped to a string or null, in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedResult {
    entries: Vec<(String, Option<String>)>,
}

impl NormalizedResult {
    pub(crate) fn from_entries(entries: Vec<(String, Option<String>)>) -> Self {
        Self { entries }
    }

    /// `None` when the field is not in the schema, `Some(None)` when it is null.
    pub fn get(&self, field: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_deref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of fields that received a value.
    pub fn filled(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_some()).count()
    }
}

impl Serialize for NormalizedResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field, &value)?;
        }
        map.end()
    }
}
