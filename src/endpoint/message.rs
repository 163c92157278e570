/// Body of an inbound message as delivered by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Bytes(Vec<u8>),
    Text(String),
    Empty,
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Bytes(_) => "bytes",
            MessageBody::Text(_) => "text",
            MessageBody::Empty => "empty",
        }
    }
}

/// A message handed to the subscriber callback.
///
/// Properties keep the order the endpoint delivered them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_type: String,
    pub message_id: String,
    pub properties: Vec<(String, String)>,
    pub body: MessageBody,
}

impl InboundMessage {
    pub fn new(message_id: impl Into<String>, body: MessageBody) -> Self {
        Self {
            message_type: String::new(),
            message_id: message_id.into(),
            properties: Vec::new(),
            body,
        }
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// First property with the given name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
