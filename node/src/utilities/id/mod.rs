use uuid::Uuid;

pub type MessageId = String;

pub fn generate_message_id() -> MessageId {
    Uuid::new_v4().to_string()
}
