use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod consumer;

/// Body of a credential-issuance event. Delivered at-least-once, order is
/// only meaningful per subject and even that is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokenMessage {
    pub user_id: Uuid,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let user_id = Uuid::new_v4();
        let data = format!(r#"{{"user_id":"{user_id}","token":"abc.def.ghi"}}"#);

        let message: SessionTokenMessage =
            serde_json::from_str(&data).expect("failed to decode message");

        assert_eq!(
            message,
            SessionTokenMessage {
                user_id,
                token: "abc.def.ghi".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(serde_json::from_str::<SessionTokenMessage>("not json").is_err());
        assert!(serde_json::from_str::<SessionTokenMessage>(r#"{"user_id":"nope"}"#).is_err());
    }
}
