use super::operation::{execute, FeatureOperation};
use super::{require_text, target, FeatureGateway};
use crate::collaborator::StoreScript;
use crate::error::GatewayResult;
use crate::types::Label;

impl FeatureGateway {
    pub async fn labels(&self) -> GatewayResult<Vec<Label>> {
        let client = self.client().await?;
        Ok(client.labels().await?)
    }

    pub async fn create_label(&self, name: &str, hex_color: Option<&str>) -> GatewayResult<Label> {
        require_text("label name", name)?;
        let client = self.client().await?;
        let script = StoreScript::CreateLabel {
            name: name.to_string(),
            hex_color: hex_color.map(str::to_string),
        };
        let op = FeatureOperation::new("create_label", None, &script);
        execute(&client, op, client.create_label(name, hex_color), script)
            .await
            .into_result()
    }

    /// Renames and/or recolors a label. A `None` color keeps the current one.
    pub async fn update_label(
        &self,
        label_id: &str,
        name: &str,
        hex_color: Option<&str>,
    ) -> GatewayResult<()> {
        require_text("label name", name)?;
        let client = self.client().await?;
        let label = Label {
            id: label_id.to_string(),
            name: name.to_string(),
            hex_color: hex_color.map(str::to_string),
        };
        let script = StoreScript::UpdateLabel {
            label_id: label.id.clone(),
            name: label.name.clone(),
            hex_color: label.hex_color.clone(),
        };
        let op = FeatureOperation::new("update_label", None, &script);
        execute(&client, op, client.update_label(&label), script)
            .await
            .into_result()
    }

    /// Fails with `LabelInUse` while chats still carry the label.
    pub async fn delete_label(&self, label_id: &str) -> GatewayResult<()> {
        let client = self.client().await?;
        let script = StoreScript::DeleteLabel {
            label_id: label_id.to_string(),
        };
        let op = FeatureOperation::new("delete_label", None, &script);
        execute(&client, op, client.delete_label(label_id), script)
            .await
            .into_result()
    }

    pub async fn chat_labels(&self, chat: &str) -> GatewayResult<Vec<Label>> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let assigned = client.chat_by_id(&chat).await?.labels;
        let labels = client.labels().await?;
        Ok(labels
            .into_iter()
            .filter(|label| assigned.contains(&label.id))
            .collect())
    }

    /// Replaces the chat's label set. Unknown label ids are dropped by the store.
    pub async fn assign_labels(&self, chat: &str, label_ids: &[String]) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::ChangeChatLabels {
            chat_id: chat.clone(),
            label_ids: label_ids.to_vec(),
        };
        let op = FeatureOperation::new("change_chat_labels", Some(&chat), &script);
        execute(&client, op, client.change_chat_labels(&chat, label_ids), script)
            .await
            .into_result()
    }
}
