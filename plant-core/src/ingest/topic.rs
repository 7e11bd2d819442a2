use super::IngestError;

/// Message class derived from the topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Telemetry,
    Event,
}

/// A parsed machine-scoped topic:
/// `factory/{site}/machine/{machineId}/telemetry|event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub site: String,
    pub machine_id: i32,
    pub kind: TopicKind,
}

impl ParsedTopic {
    /// Parse a topic path. The machine id is the fourth path segment and
    /// must parse as an integer; anything else is a decode error.
    pub fn parse(topic: &str) -> Result<Self, IngestError> {
        let parts: Vec<&str> = topic.split('/').collect();

        if parts.len() != 5 || parts[0] != "factory" || parts[2] != "machine" {
            return Err(IngestError::Decode(format!("Unrecognized topic: {}", topic)));
        }

        let machine_id: i32 = parts[3]
            .parse()
            .map_err(|_| IngestError::Decode(format!("Non-integer machine id in topic: {}", topic)))?;

        let kind = match parts[4] {
            "telemetry" => TopicKind::Telemetry,
            "event" => TopicKind::Event,
            other => {
                return Err(IngestError::Decode(format!(
                    "Unknown topic suffix '{}' in: {}",
                    other, topic
                )))
            }
        };

        Ok(Self {
            site: parts[1].to_string(),
            machine_id,
            kind,
        })
    }
}
