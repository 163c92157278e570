//! JSON frames exchanged with a popsub-style WebSocket broker.
//!
//! Only the subscriber's side of the conversation is modelled: the client
//! logs in, authenticates with the returned token, subscribes and acks QoS 1
//! deliveries. Deliveries come either as `"type": "message"` frames, which may
//! carry a binary `body` and string `properties` such as `content-length`, or
//! as the broker's bare message records with no `type` field.

use serde::{Deserialize, Serialize};

use super::message::{InboundMessage, MessageBody};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "login")]
    Login {
        username: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
    #[serde(rename = "ack")]
    Ack { message_id: String },
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "login_response")]
    LoginResponse { token: String },
    #[serde(rename = "authenticated")]
    Authenticated {},
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "message")]
    Message {
        topic: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        timestamp: i64,
        message_id: String,
        #[serde(default)]
        qos: u8,
        #[serde(default)]
        message_type: Option<String>,
        #[serde(default, with = "ordered_pairs")]
        properties: Vec<(String, String)>,
        #[serde(default)]
        body: Option<Vec<u8>>,
    },
}

/// A delivery frame split into its routing topic, ack requirement and the
/// message handed to the consumer.
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub needs_ack: bool,
    pub message: InboundMessage,
}

impl ServerMessage {
    /// `None` for frames that are not deliveries.
    pub fn into_delivery(self) -> Option<Delivery> {
        let ServerMessage::Message {
            topic,
            payload,
            message_id,
            qos,
            message_type,
            properties,
            body,
            ..
        } = self
        else {
            return None;
        };

        let body = match body {
            Some(bytes) => MessageBody::Bytes(bytes),
            None if payload.is_empty() => MessageBody::Empty,
            None => MessageBody::Text(payload),
        };

        Some(Delivery {
            topic,
            needs_ack: qos == 1,
            message: InboundMessage {
                message_type: message_type.unwrap_or_default(),
                message_id,
                properties,
                body,
            },
        })
    }
}

/// A delivery as the broker stores and fans it out: no `type` tag, text
/// payload only.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BareMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub timestamp: i64,
    pub message_id: String,
    #[serde(default)]
    pub qos: u8,
}

/// Any frame the broker may send after the handshake.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BrokerFrame {
    Tagged(ServerMessage),
    Bare(BareMessage),
}

impl BrokerFrame {
    pub fn into_delivery(self) -> Option<Delivery> {
        match self {
            BrokerFrame::Tagged(frame) => frame.into_delivery(),
            BrokerFrame::Bare(BareMessage {
                topic,
                payload,
                timestamp,
                message_id,
                qos,
            }) => ServerMessage::Message {
                topic,
                payload,
                timestamp,
                message_id,
                qos,
                message_type: None,
                properties: Vec::new(),
                body: None,
            }
            .into_delivery(),
        }
    }
}

/// A JSON object of string properties kept in the order it arrived.
mod ordered_pairs {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        pairs: &[(String, String)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(pairs.iter().map(|(name, value)| (name, value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, String)>, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of string properties")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(pair) = map.next_entry::<String, String>()? {
                    pairs.push(pair);
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}
