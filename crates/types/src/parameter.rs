//! Declared parameter contract of a diagnostic tree.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive type a parameter value is coerced into before a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Integer,
    Float,
    Bool,
    /// Stored as an RFC 3339 UTC timestamp.
    DateTime,
    /// IPv4 or IPv6 address.
    IpAddress,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
            ParameterType::Bool => "bool",
            ParameterType::DateTime => "datetime",
            ParameterType::IpAddress => "ipaddress",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseParameterTypeError(pub String);

impl fmt::Display for ParseParameterTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown parameter type '{}'; expected one of string, integer, float, bool, datetime, ipaddress",
            self.0
        )
    }
}

impl std::error::Error for ParseParameterTypeError {}

impl FromStr for ParameterType {
    type Err = ParseParameterTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "str" | "string" => Ok(Self::String),
            "int" | "integer" => Ok(Self::Integer),
            "float" | "number" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Bool),
            "datetime" => Ok(Self::DateTime),
            "ip" | "ipaddress" => Ok(Self::IpAddress),
            other => Err(ParseParameterTypeError(other.to_string())),
        }
    }
}

/// One entry of a tree's public parameter contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub help: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Lower-case string values before they are stored.
    #[serde(default)]
    pub ignorecase: bool,
    /// The parameter is kept for compatibility only.
    #[serde(default)]
    pub deprecated: bool,
    /// Replacement parameter that receives the value of a deprecated one.
    #[serde(default)]
    pub new_parameter: Option<String>,
}

impl ParameterSpec {
    pub fn new(kind: ParameterType, help: impl Into<String>) -> Self {
        Self {
            kind,
            help: help.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn ignorecase(mut self) -> Self {
        self.ignorecase = true;
        self
    }

    pub fn deprecated_for(mut self, new_parameter: impl Into<String>) -> Self {
        self.deprecated = true;
        self.new_parameter = Some(new_parameter.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_type_aliases() {
        assert_eq!("int".parse::<ParameterType>(), Ok(ParameterType::Integer));
        assert_eq!("Boolean".parse::<ParameterType>(), Ok(ParameterType::Bool));
        assert_eq!("ipaddress".parse::<ParameterType>(), Ok(ParameterType::IpAddress));
    }

    #[test]
    fn rejects_unknown_types() {
        let error = "uuid".parse::<ParameterType>().expect_err("unknown type");
        assert!(error.to_string().contains("unknown parameter type 'uuid'"));
    }

    #[test]
    fn builder_sets_flags() {
        let spec = ParameterSpec::new(ParameterType::String, "The zone")
            .required()
            .ignorecase()
            .default_value("us-central1-a");
        assert!(spec.required);
        assert!(spec.ignorecase);
        assert_eq!(spec.default, Some(Value::String("us-central1-a".into())));
    }
}
