use crate::errors::{Result, SocboxError};
use serde::{Deserialize, Serialize};
use socbox_sim::Expr;
use std::collections::HashSet;

/// Role of a variable inside the study
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// Manipulated variable, a degree of freedom of the optimization
    Manipulated,
    /// Disturbance, varied during sampling but not optimized
    Disturbance,
    /// Candidate measurement for the control structure
    Candidate,
    /// Auxiliary quantity, recorded but not used downstream
    Auxiliary,
    /// Inequality constraint, satisfied when at most zero
    Constraint,
    /// Economic objective, minimized by the optimizer
    Objective,
}

/// A process variable exposed by the simulator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variable {
    /// Unique alias used by expressions, training and ranking
    pub alias: String,
    /// Role of the variable
    pub var_type: VarType,
    /// Path identifier understood by the simulator driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A derived quantity computed row-wise after each simulator call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExpressionDef {
    /// Unique alias of the derived column
    pub alias: String,
    /// Formula over previously declared aliases
    pub formula: String,
    /// Role of the derived quantity
    pub var_type: VarType,
}

fn valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// The frozen-on-sampling set of variables and expressions of a project.
///
/// Aliases are unique across variables and expressions; expression
/// formulas may only reference aliases declared before them, which rules
/// out forward references and cycles at definition time.
#[derive(Clone, Debug, Default)]
pub struct VariableRegistry {
    variables: Vec<Variable>,
    expressions: Vec<(ExpressionDef, Expr)>,
    frozen: bool,
}

impl VariableRegistry {
    /// Creates an empty registry.
    pub fn new() -> VariableRegistry {
        VariableRegistry::default()
    }

    fn known_aliases(&self) -> HashSet<String> {
        self.variables
            .iter()
            .map(|v| v.alias.clone())
            .chain(self.expressions.iter().map(|(e, _)| e.alias.clone()))
            .collect()
    }

    fn check_new_alias(&self, alias: &str) -> Result<()> {
        if self.frozen {
            return Err(SocboxError::InvalidProject(
                "the project is frozen, sampling has begun".to_string(),
            ));
        }
        if !valid_alias(alias) {
            return Err(SocboxError::InvalidProject(format!(
                "alias '{alias}' is not a valid identifier"
            )));
        }
        if self.known_aliases().contains(alias) {
            return Err(SocboxError::DuplicateAlias(alias.to_string()));
        }
        Ok(())
    }

    /// Declares a simulator variable.
    pub fn add_variable(&mut self, variable: Variable) -> Result<()> {
        self.check_new_alias(&variable.alias)?;
        self.variables.push(variable);
        Ok(())
    }

    /// Declares a derived expression. The formula must parse and may only
    /// reference already-declared aliases.
    pub fn add_expression(&mut self, def: ExpressionDef) -> Result<()> {
        self.check_new_alias(&def.alias)?;
        let expr = Expr::parse(&def.formula)?;
        let known = self.known_aliases();
        if let Some(missing) = expr.aliases().iter().find(|a| !known.contains(*a)) {
            return Err(SocboxError::UnknownAlias(format!(
                "'{missing}' in expression '{}'",
                def.alias
            )));
        }
        self.expressions.push((def, expr));
        Ok(())
    }

    /// Freezes the registry; later declarations are rejected.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Declared variables, in declaration order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Declared expressions, in declaration order.
    pub fn expression_defs(&self) -> impl Iterator<Item = &ExpressionDef> {
        self.expressions.iter().map(|(def, _)| def)
    }

    /// Parsed expressions ready for a sampling sweep.
    pub fn compiled_expressions(&self) -> Vec<(String, Expr)> {
        self.expressions
            .iter()
            .map(|(def, expr)| (def.alias.clone(), expr.clone()))
            .collect()
    }

    /// Aliases of variables and expressions of one type, variables first,
    /// each group in declaration order.
    pub fn aliases_of(&self, var_type: VarType) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| v.var_type == var_type)
            .map(|v| v.alias.clone())
            .chain(
                self.expressions
                    .iter()
                    .filter(|(e, _)| e.var_type == var_type)
                    .map(|(e, _)| e.alias.clone()),
            )
            .collect()
    }

    /// Aliases of the simulator outputs read after each run: every
    /// non-input variable that is not itself an expression.
    pub fn output_aliases(&self) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| {
                !matches!(v.var_type, VarType::Manipulated | VarType::Disturbance)
            })
            .map(|v| v.alias.clone())
            .collect()
    }

    /// The single objective alias.
    pub fn objective(&self) -> Result<String> {
        let objectives = self.aliases_of(VarType::Objective);
        match objectives.len() {
            1 => Ok(objectives.into_iter().next().unwrap_or_default()),
            0 => Err(SocboxError::InvalidProject(
                "no objective declared".to_string(),
            )),
            n => Err(SocboxError::InvalidProject(format!(
                "{n} objectives declared, expected exactly one"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(alias: &str, var_type: VarType) -> Variable {
        Variable {
            alias: alias.to_string(),
            var_type,
            path: None,
        }
    }

    fn registry() -> VariableRegistry {
        let mut reg = VariableRegistry::new();
        reg.add_variable(var("qr", VarType::Manipulated)).unwrap();
        reg.add_variable(var("feed", VarType::Disturbance)).unwrap();
        reg.add_variable(var("t_top", VarType::Candidate)).unwrap();
        reg
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut reg = registry();
        assert!(matches!(
            reg.add_variable(var("qr", VarType::Candidate)),
            Err(SocboxError::DuplicateAlias(_))
        ));
        assert!(matches!(
            reg.add_expression(ExpressionDef {
                alias: "t_top".to_string(),
                formula: "qr + 1".to_string(),
                var_type: VarType::Auxiliary,
            }),
            Err(SocboxError::DuplicateAlias(_))
        ));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let mut reg = registry();
        assert!(matches!(
            reg.add_expression(ExpressionDef {
                alias: "j".to_string(),
                formula: "qr + later".to_string(),
                var_type: VarType::Objective,
            }),
            Err(SocboxError::UnknownAlias(_))
        ));
        // earlier expressions are legal references
        reg.add_expression(ExpressionDef {
            alias: "duty".to_string(),
            formula: "2 * qr".to_string(),
            var_type: VarType::Auxiliary,
        })
        .unwrap();
        reg.add_expression(ExpressionDef {
            alias: "j".to_string(),
            formula: "duty - feed".to_string(),
            var_type: VarType::Objective,
        })
        .unwrap();
        assert_eq!(reg.objective().unwrap(), "j");
    }

    #[test]
    fn test_frozen_registry_rejects_additions() {
        let mut reg = registry();
        reg.freeze();
        assert!(matches!(
            reg.add_variable(var("late", VarType::Auxiliary)),
            Err(SocboxError::InvalidProject(_))
        ));
    }

    #[test]
    fn test_bad_alias_rejected() {
        let mut reg = registry();
        assert!(reg.add_variable(var("Qr", VarType::Auxiliary)).is_err());
        assert!(reg.add_variable(var("1x", VarType::Auxiliary)).is_err());
        assert!(reg.add_variable(var("", VarType::Auxiliary)).is_err());
    }

    #[test]
    fn test_alias_ordering() {
        let mut reg = registry();
        reg.add_variable(var("t_bot", VarType::Candidate)).unwrap();
        assert_eq!(reg.aliases_of(VarType::Candidate), vec!["t_top", "t_bot"]);
        assert_eq!(reg.output_aliases(), vec!["t_top", "t_bot"]);
    }
}
