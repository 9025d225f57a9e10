// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner metadata and property schema.
//!
//! A [`ProvisionerSpec`] is built once when a provisioner is instantiated and
//! never changes afterwards. The declared [`ProvisionerProperty`] list drives
//! both UI rendering and the default property validation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionerError, Result};

/// Identity and property schema of a provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerSpec {
    /// Unique name the provisioner is registered under.
    pub name: String,
    /// Human readable label.
    pub label: String,
    /// Description shown to administrators.
    pub description: String,
    /// Declared properties.
    #[serde(default)]
    pub properties: Vec<ProvisionerProperty>,
}

impl ProvisionerSpec {
    /// Create a spec without properties.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: description.into(),
            properties: Vec::new(),
        }
    }

    /// Add a declared property.
    pub fn with_property(mut self, property: ProvisionerProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Look up a declared property by name.
    pub fn property(&self, name: &str) -> Option<&ProvisionerProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Validate a property map against the declared schema.
    ///
    /// Fails with [`ProvisionerError::InvalidArgument`] when a required
    /// property is missing or a supplied value does not satisfy its
    /// declaration. Keys that are not declared are ignored.
    pub fn validate_properties(&self, properties: &HashMap<String, String>) -> Result<()> {
        for property in &self.properties {
            match properties.get(&property.name) {
                Some(value) => property.validate(value)?,
                None if property.required => {
                    return Err(ProvisionerError::InvalidArgument(format!(
                        "Missing required property '{}'",
                        property.name
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Value type of a provisioner property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Free-form text.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// Floating point number.
    Float,
    /// `true` or `false`.
    Boolean,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Declaration of one provisioner property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerProperty {
    /// Property key.
    pub name: String,
    /// Human readable label.
    pub label: String,
    /// Description shown to administrators.
    pub description: String,
    /// Value type.
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Whether the property must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Allowed values, if the property is an enumeration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeSet<String>>,
    /// Allowed numeric range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl ProvisionerProperty {
    /// Create an optional property with no value constraints.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        property_type: PropertyType,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: description.into(),
            property_type,
            required: false,
            values: None,
            range: None,
        }
    }

    /// Mark the property as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict the property to a set of allowed values.
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict a numeric property to a range.
    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    /// Validate a single supplied value.
    pub fn validate(&self, value: &str) -> Result<()> {
        if let Some(values) = &self.values
            && !values.is_empty()
            && !values.contains(value)
        {
            return Err(ProvisionerError::InvalidArgument(format!(
                "Property '{}' must be one of {:?}, got '{}'",
                self.name, values, value
            )));
        }

        let numeric = match self.property_type {
            PropertyType::String => None,
            PropertyType::Boolean => {
                if !value.eq_ignore_ascii_case("true") && !value.eq_ignore_ascii_case("false") {
                    return Err(self.type_mismatch(value));
                }
                None
            }
            PropertyType::Integer => Some(
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| self.type_mismatch(value))? as f64,
            ),
            PropertyType::Float => {
                let parsed = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| self.type_mismatch(value))?;
                if parsed.is_nan() {
                    return Err(self.type_mismatch(value));
                }
                Some(parsed)
            }
        };

        if let (Some(number), Some(range)) = (numeric, &self.range)
            && !range.contains(number)
        {
            return Err(ProvisionerError::InvalidArgument(format!(
                "Property '{}' value {} is outside of range {}",
                self.name, value, range
            )));
        }

        Ok(())
    }

    fn type_mismatch(&self, value: &str) -> ProvisionerError {
        ProvisionerError::InvalidArgument(format!(
            "Property '{}' must be of type {}, got '{}'",
            self.name, self.property_type, value
        ))
    }
}

/// Numeric interval with independently inclusive or exclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
    /// Whether `min` itself is allowed.
    pub min_inclusive: bool,
    /// Whether `max` itself is allowed.
    pub max_inclusive: bool,
}

impl Range {
    /// Half-open range `[min, max)`.
    pub fn new(min: f64, max: f64) -> Self {
        Self::with_bounds(min, max, true, false)
    }

    /// Range with explicit bound inclusivity.
    pub fn with_bounds(min: f64, max: f64, min_inclusive: bool, max_inclusive: bool) -> Self {
        Self {
            min,
            max,
            min_inclusive,
            max_inclusive,
        }
    }

    /// Check whether `value` lies inside the range.
    pub fn contains(&self, value: f64) -> bool {
        let above_min = if self.min_inclusive {
            value >= self.min
        } else {
            value > self.min
        };
        let below_max = if self.max_inclusive {
            value <= self.max
        } else {
            value < self.max
        };
        above_min && below_max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},{}{}",
            if self.min_inclusive { "[" } else { "(" },
            self.min,
            self.max,
            if self.max_inclusive { "]" } else { ")" }
        )
    }
}
