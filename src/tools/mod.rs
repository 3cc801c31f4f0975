//! Tool contracts and registry
//!
//! The capability set is closed: every tool is declared up front as a
//! [`ToolSpec`] (name + parameter contract). Model-proposed arguments are
//! validated against the contract before the injected [`ToolBackend`] is
//! ever called.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::models::OptimizedToolArgs;
use crate::Result;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub mod finance;

pub use finance::{FinanceTool, FinancialDatasetsBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    pub description: &'static str,
    /// Permitted values for string parameters; empty means unrestricted
    pub allowed: &'static [&'static str],
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
            allowed: &[],
        }
    }

    pub const fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
            allowed: &[],
        }
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if !self.kind.accepts(value) {
            return Err(format!(
                "'{}' must be {}, got {}",
                self.name, self.kind, value
            ));
        }
        if !self.allowed.is_empty() {
            let ok = value
                .as_str()
                .map(|s| self.allowed.contains(&s))
                .unwrap_or(false);
            if !ok {
                return Err(format!(
                    "'{}' must be one of [{}], got {}",
                    self.name,
                    self.allowed.join(", "),
                    value
                ));
            }
        }
        Ok(())
    }
}

/// Declared capability: name, purpose, and parameter contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Short noun phrase for what the tool returns ("income statements")
    pub label: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// Check `arguments` against the parameter contract.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<()> {
        for param in &self.params {
            match arguments.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::InvalidToolInput(format!(
                        "{}: missing required parameter '{}'",
                        self.name, param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => param
                    .check(value)
                    .map_err(|e| AgentError::InvalidToolInput(format!("{}: {}", self.name, e)))?,
            }
        }

        if let Some(unknown) = arguments
            .keys()
            .find(|key| !self.params.iter().any(|p| p.name == key.as_str()))
        {
            return Err(AgentError::InvalidToolInput(format!(
                "{}: unknown parameter '{}'",
                self.name, unknown
            )));
        }

        Ok(())
    }

    /// One-line signature for prompts, e.g.
    /// `get_prices(ticker: string, interval: minute|day, limit?: integer)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let kind = if p.allowed.is_empty() {
                    p.kind.to_string()
                } else {
                    p.allowed.join("|")
                };
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, kind)
            })
            .collect();
        format!("{}({}) – {}", self.name, params.join(", "), self.description)
    }

    /// Human-readable description of a call, used to label context entries:
    /// `AAPL income statements (period quarterly, limit 4)`.
    pub fn describe_call(&self, arguments: &Map<String, Value>) -> String {
        let subject = arguments
            .get("ticker")
            .and_then(Value::as_str)
            .map(|t| format!("{} ", t.to_uppercase()))
            .unwrap_or_default();

        let details: Vec<String> = self
            .params
            .iter()
            .filter(|p| p.name != "ticker")
            .filter_map(|p| {
                arguments.get(p.name).filter(|v| !v.is_null()).map(|v| match v {
                    Value::String(s) => format!("{} {}", p.name, s),
                    other => format!("{} {}", p.name, other),
                })
            })
            .collect();

        if details.is_empty() {
            format!("{}{}", subject, self.label)
        } else {
            format!("{}{} ({})", subject, self.label, details.join(", "))
        }
    }
}

/// The external capability that actually runs a tool
#[async_trait::async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(&self, tool: &ToolSpec, arguments: &Map<String, Value>) -> Result<Value>;
}

/// Declared tools plus the backend that executes them
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    backend: Arc<dyn ToolBackend>,
}

impl ToolRegistry {
    /// Later specs with a duplicate name are ignored; names stay unique.
    pub fn new(specs: Vec<ToolSpec>, backend: Arc<dyn ToolBackend>) -> Self {
        let mut tools: Vec<ToolSpec> = Vec::with_capacity(specs.len());
        for spec in specs {
            if !tools.iter().any(|t| t.name == spec.name) {
                tools.push(spec);
            }
        }
        Self { tools, backend }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.tools
    }

    /// Tool catalog rendered for prompts, one signature per line.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}", t.signature()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolve the proposed tool and check its arguments.
    pub fn validate(&self, proposal: &OptimizedToolArgs) -> Result<&ToolSpec> {
        let spec = self
            .get(&proposal.tool_name)
            .ok_or_else(|| AgentError::ToolNotFound(proposal.tool_name.clone()))?;
        spec.validate(&proposal.arguments)?;
        Ok(spec)
    }

    /// Validate, then run a single invocation attempt.
    pub async fn invoke(&self, proposal: &OptimizedToolArgs) -> Result<Value> {
        let spec = self.validate(proposal)?;
        self.backend.invoke(spec, &proposal.arguments).await
    }
}

/// Finance catalog backed by the Financial Datasets HTTP API.
pub fn create_default_registry(config: &AgentConfig) -> Result<ToolRegistry> {
    let backend = FinancialDatasetsBackend::new(
        config.financial_api_base_url.clone(),
        config.financial_api_key.clone(),
    )?;
    Ok(ToolRegistry::new(FinanceTool::specs(), Arc::new(backend)))
}
