use async_trait::async_trait;
use flowcore::{
    node_types, ExecutionContext, ExecutionOutput, ExecutorError, FiredPorts, FlowValue,
    NodeExecutor, NodeMetadata, VariableType,
};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    #[serde(default)]
    conditions: Vec<ConditionItem>,
}

#[derive(Debug, Deserialize)]
struct ConditionItem {
    key: String,
    value: ConditionRule,
}

#[derive(Debug, Deserialize)]
struct ConditionRule {
    left: FlowValue,
    operator: Operator,
    #[serde(default)]
    right: Option<FlowValue>,
}

/// Comparison operators understood by condition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
    IsTrue,
    IsFalse,
}

impl Operator {
    fn is_unary(self) -> bool {
        matches!(
            self,
            Operator::IsEmpty | Operator::IsNotEmpty | Operator::IsTrue | Operator::IsFalse
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::IsTrue => "is_true",
            Operator::IsFalse => "is_false",
        }
    }

    /// Whether the operator is defined for a left operand of this type
    fn supports(self, left: VariableType) -> bool {
        use Operator::*;
        match self {
            Eq | Neq | IsEmpty | IsNotEmpty => true,
            Gt | Gte | Lt | Lte => matches!(
                left,
                VariableType::Integer
                    | VariableType::Number
                    | VariableType::String
                    | VariableType::DateTime
            ),
            In | Nin => !matches!(left, VariableType::Array | VariableType::Object),
            Contains | NotContains => {
                matches!(left, VariableType::String | VariableType::Array)
            }
            IsTrue | IsFalse => left == VariableType::Boolean,
        }
    }
}

/// Evaluate one comparison. Fails when the operator is not defined for the
/// operands.
pub fn evaluate(
    left: &Value,
    operator: Operator,
    right: Option<&Value>,
) -> Result<bool, ExecutorError> {
    let left_type = VariableType::of(left);
    if !operator.supports(left_type) {
        return Err(unsupported(operator, left_type));
    }
    if operator.is_unary() {
        return Ok(match operator {
            Operator::IsEmpty => is_empty(left),
            Operator::IsNotEmpty => !is_empty(left),
            Operator::IsTrue => left.as_bool() == Some(true),
            _ => left.as_bool() == Some(false),
        });
    }

    let right = right.ok_or_else(|| {
        ExecutorError::Configuration(format!(
            "operator '{}' requires a right operand",
            operator.as_str()
        ))
    })?;

    match operator {
        Operator::Eq => Ok(loose_eq(left, right)),
        Operator::Neq => Ok(!loose_eq(left, right)),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let ordering = compare(left, right).ok_or_else(|| {
                ExecutorError::ExecutionFailed(format!(
                    "cannot compare {} with {}",
                    left_type,
                    VariableType::of(right)
                ))
            })?;
            Ok(match operator {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Gte => ordering != Ordering::Less,
                Operator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        Operator::In | Operator::Nin => {
            let candidates = right.as_array().ok_or_else(|| {
                ExecutorError::ExecutionFailed(format!(
                    "operator '{}' expects an array on the right, got {}",
                    operator.as_str(),
                    VariableType::of(right)
                ))
            })?;
            let found = candidates.iter().any(|c| loose_eq(left, c));
            Ok(if operator == Operator::In { found } else { !found })
        }
        Operator::Contains | Operator::NotContains => {
            let found = match left {
                Value::String(haystack) => match right {
                    Value::String(needle) => haystack.contains(needle.as_str()),
                    other => {
                        return Err(ExecutorError::ExecutionFailed(format!(
                            "cannot search a string for {}",
                            VariableType::of(other)
                        )))
                    }
                },
                Value::Array(items) => items.iter().any(|item| loose_eq(item, right)),
                _ => return Err(unsupported(operator, left_type)),
            };
            Ok(if operator == Operator::Contains {
                found
            } else {
                !found
            })
        }
        _ => Err(unsupported(operator, left_type)),
    }
}

fn unsupported(operator: Operator, left: VariableType) -> ExecutorError {
    ExecutorError::ExecutionFailed(format!(
        "operator '{}' is not supported for {} values",
        operator.as_str(),
        left
    ))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Equality where integers and floats compare numerically
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) if left.is_number() && right.is_number() => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Fires the port of the first rule that holds
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn node_type(&self) -> &str {
        node_types::CONDITION
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let config: ConditionConfig = ctx.config()?;

        for item in &config.conditions {
            let rule = &item.value;
            let left = ctx.resolve(&rule.left)?.value;
            let right = match &rule.right {
                Some(value) => Some(ctx.resolve(value)?.value),
                None => None,
            };

            if evaluate(&left, rule.operator, right.as_ref())? {
                ctx.events.info(format!("Condition '{}' matched", item.key));
                return Ok(ExecutionOutput::new().with_ports(FiredPorts::Only(item.key.clone())));
            }
        }

        ctx.events.info("No condition matched");
        Ok(ExecutionOutput::new().with_ports(FiredPorts::Nothing))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Branch on the first matching rule".to_string(),
            category: "flow".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_comparison_mixes_integers_and_floats() {
        assert!(evaluate(&json!(3), Operator::Eq, Some(&json!(3.0))).unwrap());
        assert!(evaluate(&json!(2), Operator::Lt, Some(&json!(2.5))).unwrap());
        assert!(evaluate(&json!(5), Operator::Gte, Some(&json!(5))).unwrap());
    }

    #[test]
    fn test_membership_and_containment() {
        assert!(evaluate(&json!("b"), Operator::In, Some(&json!(["a", "b"]))).unwrap());
        assert!(evaluate(&json!(1), Operator::Nin, Some(&json!([2, 3]))).unwrap());
        assert!(evaluate(&json!("hello"), Operator::Contains, Some(&json!("ell"))).unwrap());
        assert!(evaluate(&json!([1, 2]), Operator::NotContains, Some(&json!(3))).unwrap());
    }

    #[test]
    fn test_unary_operators() {
        assert!(evaluate(&json!(""), Operator::IsEmpty, None).unwrap());
        assert!(evaluate(&json!({"a": 1}), Operator::IsNotEmpty, None).unwrap());
        assert!(evaluate(&json!(true), Operator::IsTrue, None).unwrap());
        assert!(evaluate(&json!(false), Operator::IsFalse, None).unwrap());
    }

    #[test]
    fn test_unsupported_operator_for_type_fails() {
        assert!(evaluate(&json!(1), Operator::IsTrue, None).is_err());
        assert!(evaluate(&json!({"a": 1}), Operator::Gt, Some(&json!(1))).is_err());
        assert!(evaluate(&json!(1), Operator::Contains, Some(&json!(1))).is_err());
    }

    #[test]
    fn test_missing_right_operand() {
        let err = evaluate(&json!(1), Operator::Eq, None).unwrap_err();
        assert!(matches!(err, ExecutorError::Configuration(_)));
    }
}
