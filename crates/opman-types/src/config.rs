//! Configuration types for the operations manager and its deployment.

use serde::{Deserialize, Serialize};

use crate::{constants, Identity, OpmanError, ParamValue, Result, Role};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpManConfig {
    /// Approvals from active signers required to execute (M in M-of-N).
    pub threshold: usize,
    /// Signers must confirm their identity before their approvals count.
    pub require_signer_confirmation: bool,
    /// Maximum number of non-terminal operations at once.
    pub max_pending_operations: usize,
}

impl Default for OpManConfig {
    fn default() -> Self {
        Self {
            threshold: constants::DEFAULT_THRESHOLD,
            require_signer_confirmation: true,
            max_pending_operations: constants::DEFAULT_MAX_PENDING_OPERATIONS,
        }
    }
}

impl OpManConfig {
    /// Config with the given threshold and defaults elsewhere.
    #[must_use]
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns `Configuration` for a zero threshold or a zero pending limit.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(OpmanError::Configuration("threshold must be > 0".into()));
        }
        if self.max_pending_operations == 0 {
            return Err(OpmanError::Configuration(
                "max_pending_operations must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// A business parameter to set on a unit before it is sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterAssignment {
    pub unit: Role,
    pub name: String,
    pub value: ParamValue,
}

/// Operator inputs for a full initialization run.
///
/// Unit identities and the engine identity come from the deployment itself;
/// the plan only carries what the operator chooses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Holder of every `Admin` slot (hardware wallet).
    pub admin: Identity,
    /// Holder of the Hub `Web` slot, if one is used.
    #[serde(default)]
    pub web: Option<Identity>,
    /// Parameters applied after initialise and before seal, in order.
    #[serde(default)]
    pub parameters: Vec<ParameterAssignment>,
}

impl DeploymentPlan {
    #[must_use]
    pub fn new(admin: Identity) -> Self {
        Self {
            admin,
            web: None,
            parameters: Vec::new(),
        }
    }

    /// Parse and validate a JSON plan.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let plan: Self = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    /// # Errors
    /// Returns `Configuration` if the admin or web identity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.admin.is_zero() {
            return Err(OpmanError::Configuration("admin must not be zero".into()));
        }
        if self.web.is_some_and(|w| w.is_zero()) {
            return Err(OpmanError::Configuration("web must not be zero".into()));
        }
        Ok(())
    }

    /// Parameters destined for `unit`, in plan order.
    pub fn parameters_for(&self, unit: Role) -> impl Iterator<Item = &ParameterAssignment> {
        self.parameters.iter().filter(move |p| p.unit == unit)
    }
}
