use super::operation::{execute, FeatureOperation};
use super::{target, FeatureGateway};
use crate::collaborator::StoreScript;
use crate::error::GatewayResult;
use crate::types::ContactInfo;

impl FeatureGateway {
    pub async fn contact(&self, id: &str) -> GatewayResult<ContactInfo> {
        let id = target(id)?.as_user();
        let client = self.client().await?;
        let script = StoreScript::GetContact {
            contact_id: id.clone(),
        };
        let op = FeatureOperation::new("contact", Some(&id), &script);
        execute(&client, op, client.contact_by_id(&id), script)
            .await
            .into_result()
    }

    pub async fn block(&self, id: &str) -> GatewayResult<()> {
        self.set_blocked(id, true).await
    }

    pub async fn unblock(&self, id: &str) -> GatewayResult<()> {
        self.set_blocked(id, false).await
    }

    async fn set_blocked(&self, id: &str, blocked: bool) -> GatewayResult<()> {
        let id = target(id)?.as_user();
        let client = self.client().await?;
        let script = StoreScript::SetBlocked {
            contact_id: id.clone(),
            blocked,
        };
        let op = FeatureOperation::new("set_blocked", Some(&id), &script);
        execute(&client, op, client.set_blocked(&id, blocked), script)
            .await
            .into_result()
    }

    pub async fn blocked_contacts(&self) -> GatewayResult<Vec<ContactInfo>> {
        let client = self.client().await?;
        let script = StoreScript::BlockedContacts;
        let op = FeatureOperation::new("blocked_contacts", None, &script);
        execute(&client, op, client.blocked_contacts(), script)
            .await
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GatewayError;
    use crate::gateway::testing;

    #[tokio::test(start_paused = true)]
    async fn block_and_unblock_through_the_store() {
        let fx = testing::ready().await;
        for method in ["set_blocked", "blocked_contacts", "contact_by_id"] {
            fx.factory.without_method(method);
        }
        fx.factory.with_world(|w| w.register("201001112222"));

        fx.gateway.block("+20 100 111 2222").await.unwrap();
        let blocked = fx.gateway.blocked_contacts().await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert!(blocked[0].is_blocked);
        assert!(fx.gateway.contact("201001112222").await.unwrap().is_blocked);

        fx.gateway.unblock("201001112222@c.us").await.unwrap();
        assert!(fx.gateway.blocked_contacts().await.unwrap().is_empty());
        assert_eq!(fx.factory.scripts().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_contact_is_not_found() {
        let fx = testing::ready().await;
        assert!(matches!(
            fx.gateway.contact("15550000000").await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
