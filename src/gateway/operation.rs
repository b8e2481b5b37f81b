use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::collaborator::{AutomationClient, CollaboratorError, CollaboratorResult, StoreScript};
use crate::error::{GatewayError, GatewayResult};
use crate::types::Identifier;

/// Which path produced a feature operation's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Primary,
    Fallback,
}

/// What happened while executing one feature operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub primary_attempted: bool,
    pub fallback_attempted: bool,
    pub succeeded: Option<ExecutionPath>,
}

impl ExecutionRecord {
    pub fn summary(&self) -> &'static str {
        match self.succeeded {
            Some(ExecutionPath::Primary) => "primary-succeeded",
            Some(ExecutionPath::Fallback) => "fallback-succeeded",
            None => "both-failed",
        }
    }
}

/// One extended operation and its execution record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureOperation {
    pub kind: &'static str,
    pub target: Option<Identifier>,
    pub params: serde_json::Value,
    pub record: ExecutionRecord,
}

impl FeatureOperation {
    /// Describes `script` as an operation on `target`.
    pub fn new(kind: &'static str, target: Option<&Identifier>, script: &StoreScript) -> Self {
        Self {
            kind,
            target: target.cloned(),
            params: serde_json::to_value(script).unwrap_or(serde_json::Value::Null),
            record: ExecutionRecord::default(),
        }
    }
}

/// Result of a dual-path execution together with how it was obtained.
#[derive(Debug)]
pub struct OpOutcome<T> {
    pub result: GatewayResult<T>,
    pub operation: FeatureOperation,
}

impl<T> OpOutcome<T> {
    pub fn path(&self) -> Option<ExecutionPath> {
        self.operation.record.succeeded
    }

    pub fn into_result(self) -> GatewayResult<T> {
        let op = &self.operation;
        match &self.result {
            Ok(_) => debug!("{} ({}): {}", op.kind, target_name(op), op.record.summary()),
            Err(err) => warn!(
                "{} ({}): {}: {err}",
                op.kind,
                target_name(op),
                op.record.summary()
            ),
        }
        self.result
    }
}

fn target_name(op: &FeatureOperation) -> String {
    op.target
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".into())
}

/// Runs `primary`; if the method is absent or fails, runs `script` exactly
/// once in the client's scripting context. The fallback is never retried.
pub async fn execute<T, F>(
    client: &Arc<dyn AutomationClient>,
    mut operation: FeatureOperation,
    primary: F,
    script: StoreScript,
) -> OpOutcome<T>
where
    T: DeserializeOwned,
    F: Future<Output = CollaboratorResult<T>>,
{
    operation.record.primary_attempted = true;
    let primary_err = match primary.await {
        Ok(value) => {
            operation.record.succeeded = Some(ExecutionPath::Primary);
            return OpOutcome {
                result: Ok(value),
                operation,
            };
        }
        // A refusal from the store itself is final on either path.
        Err(CollaboratorError::LabelInUse(label)) => {
            return OpOutcome {
                result: Err(GatewayError::LabelInUse(label)),
                operation,
            };
        }
        Err(err) => err,
    };

    let primary_absent = matches!(primary_err, CollaboratorError::Unsupported(_));
    if primary_absent {
        info!("{}: method not available, using store fallback", operation.kind);
    } else {
        warn!(
            "{}: primary method failed ({primary_err}), using store fallback",
            operation.kind
        );
    }

    let Some(context) = client.script_context() else {
        return OpOutcome {
            result: Err(GatewayError::StoreUnavailable(operation.kind.to_string())),
            operation,
        };
    };

    operation.record.fallback_attempted = true;
    let result = match context.evaluate(&script).await {
        Ok(value) => serde_json::from_value::<T>(value).map_err(|e| {
            GatewayError::Collaborator(format!("unexpected {} result: {e}", operation.kind))
        }),
        Err(CollaboratorError::LabelInUse(label)) => Err(GatewayError::LabelInUse(label)),
        Err(CollaboratorError::NotFound(what)) => Err(GatewayError::NotFound(what)),
        Err(err) if primary_absent => Err(GatewayError::FeatureUnsupported {
            operation: operation.kind.to_string(),
            cause: err.to_string(),
        }),
        Err(err) => Err(err.into()),
    };
    if result.is_ok() {
        operation.record.succeeded = Some(ExecutionPath::Fallback);
    }
    OpOutcome { result, operation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::memory::{MemoryClientFactory, ScriptMode};
    use crate::collaborator::ClientFactory;
    use crate::config::GatewayConfig;
    use crate::types::{normalize, Label};

    fn client(factory: &MemoryClientFactory) -> Arc<dyn AutomationClient> {
        factory.create(&GatewayConfig::default()).unwrap().client
    }

    fn create_label_op(name: &str) -> (FeatureOperation, StoreScript) {
        let script = StoreScript::CreateLabel {
            name: name.into(),
            hex_color: None,
        };
        (FeatureOperation::new("create_label", None, &script), script)
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let factory = MemoryClientFactory::new();
        let client = client(&factory);
        let (op, script) = create_label_op("VIP");

        let outcome: OpOutcome<Label> =
            execute(&client, op, client.create_label("VIP", None), script).await;
        assert_eq!(outcome.path(), Some(ExecutionPath::Primary));
        assert!(!outcome.operation.record.fallback_attempted);
        assert_eq!(outcome.result.unwrap().name, "VIP");
        assert!(factory.scripts().is_empty());
    }

    #[tokio::test]
    async fn absent_primary_runs_exactly_one_fallback() {
        let factory = MemoryClientFactory::new();
        factory.without_method("create_label");
        let client = client(&factory);
        let (op, script) = create_label_op("Leads");

        let outcome: OpOutcome<Label> =
            execute(&client, op, client.create_label("Leads", None), script.clone()).await;
        assert_eq!(outcome.path(), Some(ExecutionPath::Fallback));
        assert_eq!(outcome.operation.record.summary(), "fallback-succeeded");
        assert_eq!(outcome.result.unwrap().name, "Leads");
        assert_eq!(factory.scripts(), vec![script]);
    }

    #[tokio::test]
    async fn failing_fallback_is_reported_as_unsupported_with_cause() {
        let factory = MemoryClientFactory::new();
        factory.without_method("create_label");
        factory.set_script_mode(ScriptMode::Failing("Store.Label is undefined".into()));
        let client = client(&factory);
        let (op, script) = create_label_op("Leads");

        let outcome: OpOutcome<Label> =
            execute(&client, op, client.create_label("Leads", None), script).await;
        assert_eq!(outcome.operation.record.summary(), "both-failed");
        assert_eq!(
            outcome.result.unwrap_err(),
            GatewayError::FeatureUnsupported {
                operation: "create_label".into(),
                cause: "Store.Label is undefined".into(),
            }
        );
        assert_eq!(factory.scripts().len(), 1);
    }

    #[tokio::test]
    async fn missing_script_context_is_store_unavailable() {
        let factory = MemoryClientFactory::new();
        factory.failing_method("set_archived", "Evaluation failed");
        factory.set_script_mode(ScriptMode::Missing);
        let client = client(&factory);
        let chat = factory.with_world(|w| w.register("201001112222"));
        let script = StoreScript::SetArchived {
            chat_id: chat.clone(),
            archived: true,
        };
        let op = FeatureOperation::new("set_archived", Some(&chat), &script);

        let outcome: OpOutcome<()> =
            execute(&client, op, client.set_archived(&chat, true), script).await;
        assert_eq!(
            outcome.result,
            Err(GatewayError::StoreUnavailable("set_archived".into()))
        );
        assert!(!outcome.operation.record.fallback_attempted);
    }

    #[tokio::test]
    async fn failing_primary_with_failing_fallback_keeps_fallback_error() {
        let factory = MemoryClientFactory::new();
        factory.failing_method("set_pinned", "pin limit reached");
        factory.set_script_mode(ScriptMode::Failing("max pinned chats".into()));
        let client = client(&factory);
        let chat = normalize("201001112222@c.us");
        let script = StoreScript::SetPinned {
            chat_id: chat.clone(),
            pinned: true,
        };
        let op = FeatureOperation::new("set_pinned", Some(&chat), &script);

        let outcome: OpOutcome<()> =
            execute(&client, op, client.set_pinned(&chat, true), script).await;
        assert_eq!(
            outcome.result,
            Err(GatewayError::Collaborator("max pinned chats".into()))
        );
    }
}
