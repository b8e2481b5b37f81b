use std::sync::Arc;

use super::operation::{execute, FeatureOperation};
use super::{require_text, target, FeatureGateway};
use crate::collaborator::{AutomationClient, StoreScript};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{normalize_participant, CreatedGroup, GroupMetadata, Identifier, ParticipantAction};

fn participants(raw: &[String]) -> GatewayResult<Vec<Identifier>> {
    if raw.is_empty() {
        return Err(GatewayError::InvalidRequest("participants required".into()));
    }
    raw.iter()
        .map(|p| normalize_participant(p).require_valid())
        .collect()
}

/// Fails with `NotAGroup` unless `chat` is a group chat.
async fn require_group(client: &Arc<dyn AutomationClient>, chat: &Identifier) -> GatewayResult<()> {
    if !chat.is_group() {
        return Err(GatewayError::NotAGroup(chat.to_string()));
    }
    let summary = client.chat_by_id(chat).await?;
    if !summary.is_group {
        return Err(GatewayError::NotAGroup(chat.to_string()));
    }
    Ok(())
}

impl FeatureGateway {
    pub async fn create_group(&self, title: &str, members: &[String]) -> GatewayResult<CreatedGroup> {
        require_text("group title", title)?;
        let members = participants(members)?;
        let client = self.client().await?;
        let script = StoreScript::CreateGroup {
            title: title.to_string(),
            participants: members.clone(),
        };
        let op = FeatureOperation::new("create_group", None, &script);
        execute(&client, op, client.create_group(title, &members), script)
            .await
            .into_result()
    }

    pub async fn group_metadata(&self, group: &str) -> GatewayResult<GroupMetadata> {
        let group = target(group)?;
        let client = self.client().await?;
        require_group(&client, &group).await?;
        let script = StoreScript::GroupMetadata {
            group_id: group.clone(),
        };
        let op = FeatureOperation::new("group_metadata", Some(&group), &script);
        execute(&client, op, client.group_metadata(&group), script)
            .await
            .into_result()
    }

    /// Adds, removes, promotes or demotes participants. Participant handles
    /// are always treated as users.
    pub async fn update_participants(
        &self,
        group: &str,
        members: &[String],
        action: ParticipantAction,
    ) -> GatewayResult<()> {
        let group = target(group)?;
        let members = participants(members)?;
        let client = self.client().await?;
        require_group(&client, &group).await?;
        let script = StoreScript::UpdateParticipants {
            group_id: group.clone(),
            participants: members.clone(),
            action,
        };
        let op = FeatureOperation::new("update_participants", Some(&group), &script);
        execute(
            &client,
            op,
            client.update_participants(&group, &members, action),
            script,
        )
        .await
        .into_result()
    }
}
